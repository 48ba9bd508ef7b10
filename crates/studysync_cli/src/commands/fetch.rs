//! Fetch command implementation.

use super::CommandResult;
use crate::settings::SettingsLoader;

/// Asks the remote whether new events are available, without downloading.
pub fn run(loader: &SettingsLoader, study: &str) -> CommandResult {
    let settings = loader.load(Some(study))?;
    let engine = super::connect(loader, &settings)?;

    println!("Checking for updates: {study}");
    let check = match engine.check_updates(study) {
        Ok(check) => check,
        Err(e) => {
            eprintln!("✗ Error: {e}");
            return Ok(e.exit_code());
        }
    };

    println!();
    println!("  Local events:  {}", check.local_total);
    match check.remote_total {
        Some(total) => println!("  Remote events: {total}"),
        None => println!("  Remote events: unknown"),
    }
    println!("  New available: {}", check.new_events_available);
    println!();
    if check.has_updates {
        println!("✓ Updates available! Run 'studysync download {study}' to get new events.");
    } else {
        println!("✓ No new events available. Local data is up to date.");
    }
    Ok(0)
}
