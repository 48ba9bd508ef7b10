//! Status command implementation.

use super::{format_time, CommandResult};
use crate::settings::SettingsLoader;
use studysync_engine::StudyInfo;
use studysync_store::LocalStore;

/// Shows local information about one study, or a summary of all of them.
///
/// Only local files are read unless `check` asks the remote for new events.
pub fn run(loader: &SettingsLoader, study: Option<&str>, check: bool) -> CommandResult {
    let settings = loader.load(study)?;
    let store = LocalStore::new(settings.store_config()?);

    let Some(study) = study else {
        let studies = store.list_studies()?;
        println!("Local studies in {}:", store.config().data_dir.display());
        if studies.is_empty() {
            println!("  (none; use 'studysync download STUDY')");
        }
        for name in &studies {
            let info = StudyInfo::load(&store, name)?;
            let last = info
                .last_outcome()
                .map_or_else(|| "-".to_string(), |o| o.to_string());
            println!("  - {:30} {:>10} events  last run: {last}", name, info.total_events());
        }
        return Ok(0);
    };

    let info = StudyInfo::load(&store, study)?;
    println!("Study: {study}");
    let status = match (&info.metadata, info.last_outcome()) {
        (None, None) => "not downloaded".to_string(),
        (_, Some(outcome)) if !outcome.is_success() => format!("last run {outcome}"),
        _ => "downloaded".to_string(),
    };
    println!("  Status: {status}");
    println!("  Local events: {}", info.total_events());
    println!("  Storage: {} ({})", info.storage_format, info.organization);
    if let Some(metadata) = &info.metadata {
        println!("  First download: {}", format_time(metadata.first_download_at));
        println!("  Last update: {}", format_time(metadata.last_update_at));
        if let Some(cursor) = metadata.high_water_mark {
            println!("  Newest event: {}", cursor.to_rfc3339());
        }
    }
    println!("  Runs: {}", info.runs);

    if check {
        let engine = super::connect(loader, &settings)?;
        match engine.check_updates(study) {
            Ok(update) if update.has_updates => {
                println!("  Remote: {} new event(s) available", update.new_events_available)
            }
            Ok(_) => println!("  Remote: up to date"),
            Err(e) => {
                eprintln!("✗ Update check failed: {e}");
                return Ok(e.exit_code());
            }
        }
    }
    Ok(0)
}
