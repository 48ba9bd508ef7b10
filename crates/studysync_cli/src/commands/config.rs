//! Config and create-config command implementations.

use super::CommandResult;
use crate::settings::{file_api_key, SettingsLoader};
use studysync_client::ApiKey;

/// Lists study config files, or shows the resolved settings of one study.
pub fn run(loader: &SettingsLoader, study: Option<&str>) -> CommandResult {
    match study {
        Some(study) => show(loader, study),
        None => list(loader),
    }
}

fn list(loader: &SettingsLoader) -> CommandResult {
    println!("Available study config files:");
    let names = loader.study_config_names()?;
    if names.is_empty() {
        println!("  (no study configs found; use 'studysync create-config STUDY' to create one)");
    }
    for name in &names {
        let status = match loader.read_study_file(name) {
            Ok(Some(file)) if file_api_key(&file).is_some() => "✓ has API key".to_string(),
            Ok(_) => "✗ missing API key".to_string(),
            Err(e) => format!("? {e}"),
        };
        println!("  - {name:30} {status}");
    }
    Ok(0)
}

fn show(loader: &SettingsLoader, study: &str) -> CommandResult {
    let settings = loader.load(Some(study))?;
    let key = ApiKey::new(settings.api.api_key.clone());

    println!("Settings for: {study}");
    println!("  api.base_url:                     {}", settings.api.base_url);
    if key.is_empty() {
        println!("  api.api_key:                      (missing)");
    } else {
        println!("  api.api_key:                      {}", key.masked());
    }
    println!("  api.timeout:                      {}s", settings.api.timeout);
    println!("  api.max_retries:                  {}", settings.api.max_retries);
    println!("  api.retry_delay:                  {}s", settings.api.retry_delay);
    println!("  download.default_page_size:       {}", settings.download.default_page_size);
    println!("  download.max_concurrent_requests: {}", settings.download.max_concurrent_requests);
    println!("  download.max_pages:               {}", settings.download.max_pages);
    println!(
        "  storage.data_directory:           {}",
        settings.storage.data_directory.display()
    );
    println!("  storage.default_format:           {}", settings.storage.default_format);
    println!("  storage.organization:             {}", settings.organization()?);
    Ok(0)
}

/// Creates `study_configs/<study>.json` from the template.
pub fn create(loader: &SettingsLoader, study: &str) -> CommandResult {
    match loader.create_study_config(study) {
        Ok(path) => {
            println!("✓ Created config file: {}", path.display());
            println!("  Edit the file to add your API key for '{study}'");
            Ok(0)
        }
        Err(e) => {
            println!("✗ {e}");
            Ok(1)
        }
    }
}
