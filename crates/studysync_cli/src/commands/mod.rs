//! CLI command implementations.

pub mod config;
pub mod download;
pub mod fetch;
pub mod log;
pub mod remote;
pub mod rm;
pub mod status;
pub mod test_connection;

use crate::settings::{SettingsLoader, StudySettings};
use chrono::{DateTime, Local, Utc};
use std::error::Error;
use studysync_client::ApiClient;
use studysync_engine::{CancelToken, SyncEngine};
use studysync_store::LocalStore;
use tracing::{debug, warn};

/// Outcome of a command: the process exit code.
pub type CommandResult = Result<i32, Box<dyn Error>>;

/// Builds an engine for the configured remote and data directory.
pub fn connect(
    loader: &SettingsLoader,
    settings: &StudySettings,
) -> Result<SyncEngine<ApiClient>, Box<dyn Error>> {
    let known = loader.study_config_names()?;
    let client = ApiClient::connect(settings.client_config(known)?)?;
    let store = LocalStore::new(settings.store_config()?);
    Ok(SyncEngine::new(settings.sync_config(), client, store)?)
}

/// Formats a timestamp in local time.
pub fn format_time(time: DateTime<Utc>) -> String {
    time.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// Returns a token cancelled by the first Ctrl-C.
///
/// The signal is awaited on a helper thread with its own runtime, so a
/// running sync stops between pages and still records its history. A
/// second Ctrl-C exits immediately.
pub fn cancel_on_ctrl_c() -> CancelToken {
    let token = CancelToken::new();
    let cancel = token.clone();

    let spawned = std::thread::Builder::new()
        .name("ctrl-c".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    warn!(error = %e, "cannot listen for Ctrl-C");
                    return;
                }
            };
            runtime.block_on(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "cannot listen for Ctrl-C");
                    return;
                }
                eprintln!("\nInterrupted; stopping after the current page (Ctrl-C again to abort)");
                cancel.cancel();

                if tokio::signal::ctrl_c().await.is_ok() {
                    std::process::exit(130);
                }
            });
        });
    if let Err(e) = spawned {
        warn!(error = %e, "cannot listen for Ctrl-C");
    } else {
        debug!("Ctrl-C cancels the running sync");
    }
    token
}
