//! Remote command implementation.

use super::CommandResult;
use crate::settings::SettingsLoader;

/// Lists the studies the API offers.
pub fn run(loader: &SettingsLoader) -> CommandResult {
    let settings = loader.load(None)?;
    let engine = super::connect(loader, &settings)?;
    let studies = engine.list_remote_studies()?;

    println!("Available studies:");
    if studies.is_empty() {
        println!("  (none)");
    }
    for study in &studies {
        match &study.description {
            Some(description) => println!("  - {:30} {}", study.name, description),
            None => println!("  - {}", study.name),
        }
    }
    Ok(0)
}
