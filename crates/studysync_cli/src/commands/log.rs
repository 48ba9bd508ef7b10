//! Log command implementation.

use super::{format_time, CommandResult};
use crate::settings::SettingsLoader;
use studysync_store::LocalStore;

/// Shows the download history of a study, newest first.
pub fn run(loader: &SettingsLoader, study: &str, limit: Option<usize>, format: &str) -> CommandResult {
    let settings = loader.load(Some(study))?;
    let store = LocalStore::new(settings.store_config()?);

    let mut entries = store.read_history(study)?;
    entries.reverse();
    if let Some(limit) = limit {
        entries.truncate(limit);
    }

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(0);
    }

    println!("Download history for: {study}");
    if entries.is_empty() {
        println!("  (no downloads recorded)");
        return Ok(0);
    }
    for entry in &entries {
        let seconds = (entry.finished_at - entry.started_at).num_milliseconds() as f64 / 1000.0;
        println!(
            "  {}  {:<11} {:<7}  {} new / {} received, {} page(s), {:.1}s",
            format_time(entry.started_at),
            entry.mode.to_string(),
            entry.outcome.to_string(),
            entry.events_fetched,
            entry.events_received,
            entry.pages_fetched,
            seconds
        );
        if let Some(summary) = &entry.error_summary {
            println!("      {summary}");
        }
    }
    Ok(0)
}
