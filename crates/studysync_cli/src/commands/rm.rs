//! Rm command implementation.

use super::CommandResult;
use crate::settings::SettingsLoader;
use std::io::{self, Write};

/// Deletes the local data of a study.
///
/// Asks for confirmation unless `force` is set. `force` also allows
/// deleting a directory that does not look like a study.
pub fn run(loader: &SettingsLoader, study: &str, force: bool) -> CommandResult {
    let settings = loader.load(Some(study))?;
    let engine = super::connect(loader, &settings)?;
    let dir = engine.store().study_dir(study)?;

    if !dir.exists() {
        println!("✗ No local data found for study: {study}");
        return Ok(1);
    }
    if !force && !confirm(&format!("Delete all local data for '{study}'?"))? {
        println!("Deletion cancelled.");
        return Ok(0);
    }

    match engine.delete_study(study, force) {
        Ok(true) => {
            println!("✓ Deleted local data for {study}");
            println!("  Deleted: {}", dir.display());
            Ok(0)
        }
        Ok(false) if dir.exists() => {
            println!(
                "✗ {} does not look like a study directory; use --force to delete it anyway",
                dir.display()
            );
            Ok(1)
        }
        Ok(false) => {
            println!("✗ No local data found for study: {study}");
            Ok(1)
        }
        Err(e) => {
            eprintln!("✗ {e}");
            Ok(e.exit_code())
        }
    }
}

fn confirm(prompt: &str) -> io::Result<bool> {
    print!("{prompt} [y/N]: ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::fs;
    use studysync_store::{LocalStore, Metadata, Organization, StorageFormat, StoreConfig};
    use tempfile::tempdir;

    fn loader_for(root: &std::path::Path, study: &str) -> SettingsLoader {
        let loader = SettingsLoader::new(root);
        let path = loader.study_config_path(study);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            &path,
            r#"{"api": {"api_key": "test-key"}, "storage": {"data_directory": "data"}}"#,
        )
        .unwrap();
        loader
    }

    #[test]
    fn forced_rm_deletes_a_study() {
        let root = tempdir().unwrap();
        let loader = loader_for(root.path(), "demo");

        let store = LocalStore::new(StoreConfig::new(root.path().join("data")));
        store
            .open_study("demo")
            .unwrap()
            .write_metadata(&Metadata::new(Utc::now(), StorageFormat::Json, Organization::by_study()))
            .unwrap();

        assert_eq!(run(&loader, "demo", true).unwrap(), 0);
        assert!(!root.path().join("data/demo").exists());
        assert_eq!(run(&loader, "demo", true).unwrap(), 1);
    }

    #[test]
    fn forced_rm_removes_a_stray_directory() {
        let root = tempdir().unwrap();
        let loader = loader_for(root.path(), "scratch");
        fs::create_dir_all(root.path().join("data/scratch")).unwrap();
        fs::write(root.path().join("data/scratch/notes.txt"), "x").unwrap();

        assert_eq!(run(&loader, "scratch", true).unwrap(), 0);
        assert!(!root.path().join("data/scratch").exists());
    }
}
