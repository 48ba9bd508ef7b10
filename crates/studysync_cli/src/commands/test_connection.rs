//! Test-connection command implementation.

use super::CommandResult;
use crate::settings::SettingsLoader;

/// Checks that the API accepts the configured credential.
///
/// With a study, its events endpoint is checked with that study's key;
/// otherwise the study listing is requested with the default key.
pub fn run(loader: &SettingsLoader, study: Option<&str>) -> CommandResult {
    let settings = loader.load(study)?;
    let engine = super::connect(loader, &settings)?;

    println!("Testing API connection to {}...", settings.api.base_url);
    let ok = match study {
        Some(study) => engine.test_connection(study),
        None => engine.list_remote_studies().is_ok(),
    };

    if ok {
        println!("✓ Connection successful!");
        Ok(0)
    } else {
        println!("✗ Connection failed. Check your API key and base URL.");
        Ok(1)
    }
}
