//! Download command implementation.

use super::CommandResult;
use crate::settings::SettingsLoader;
use studysync_engine::{Progress, SyncReport};
use studysync_protocol::SyncMode;

fn print_progress(p: &Progress) {
    match p.total_expected {
        Some(total) => println!(
            "  Page {}: {} new event(s), {}/{} received",
            p.pages_fetched_so_far, p.events_fetched_so_far, p.events_received_so_far, total
        ),
        None => println!(
            "  Page {}: {} new event(s), {} received",
            p.pages_fetched_so_far, p.events_fetched_so_far, p.events_received_so_far
        ),
    }
}

fn print_failure(report: &SyncReport) {
    eprintln!("✗ Download failed: {}", report.message);
    if report.events_fetched > 0 {
        eprintln!(
            "  {} new event(s) were kept; run the command again to resume.",
            report.events_fetched
        );
    }
}

/// Downloads a study: incremental from the stored cursor, or everything
/// from the beginning with `fresh`.
///
/// Ctrl-C stops the download after the page in flight.
pub fn run(loader: &SettingsLoader, study: &str, fresh: bool) -> CommandResult {
    let settings = loader.load(Some(study))?;
    let engine = super::connect(loader, &settings)?;
    let cancel = super::cancel_on_ctrl_c();

    println!("Downloading study: {study}");
    let mode = select_mode(fresh);

    let mut progress = |p: Progress| print_progress(&p);
    let report = match engine.sync_with(study, mode, &mut progress, &cancel) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("✗ Download failed: {e}");
            return Ok(e.exit_code());
        }
    };

    if report.success {
        println!("✓ {}", report.message);
        println!("  Total events: {}", report.total_events);
        println!(
            "  Saved to: {}",
            engine.store().study_dir(study)?.display()
        );
    } else {
        print_failure(&report);
    }
    Ok(report.exit_code())
}

/// Downloads every study the credential can see, plus studies already
/// stored locally.
///
/// Exits with the code of the first study that did not succeed.
pub fn run_all(loader: &SettingsLoader, fresh: bool) -> CommandResult {
    let settings = loader.load(None)?;
    let engine = super::connect(loader, &settings)?;
    let cancel = super::cancel_on_ctrl_c();

    let mut current = String::new();
    let mut progress = |study: &str, p: Progress| {
        if current != study {
            println!("Downloading study: {study}");
            current = study.to_string();
        }
        print_progress(&p);
    };
    let results = match engine.sync_all(select_mode(fresh), &mut progress, &cancel) {
        Ok(results) => results,
        Err(e) => {
            eprintln!("✗ Cannot list studies: {e}");
            return Ok(e.exit_code());
        }
    };

    let mut code = 0;
    let mut succeeded = 0;
    for (study, result) in &results {
        let study_code = match result {
            Ok(report) if report.success => {
                succeeded += 1;
                println!("✓ {study}: {} ({} events)", report.message, report.total_events);
                0
            }
            Ok(report) => {
                eprint!("{study}: ");
                print_failure(report);
                report.exit_code()
            }
            Err(e) => {
                eprintln!("✗ {study}: {e}");
                e.exit_code()
            }
        };
        if code == 0 {
            code = study_code;
        }
    }

    println!("{succeeded}/{} studies downloaded", results.len());
    if cancel.is_cancelled() && code == 0 {
        code = 130;
    }
    Ok(code)
}

fn select_mode(fresh: bool) -> SyncMode {
    if fresh {
        println!("Using fresh download mode (all remote events)...");
        SyncMode::Full
    } else {
        println!("Using incremental update mode...");
        SyncMode::Incremental
    }
}
