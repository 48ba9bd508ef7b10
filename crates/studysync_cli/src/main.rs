//! studysync CLI
//!
//! Downloads study event logs and keeps local copies current.
//!
//! # Commands
//!
//! - `remote` - List studies available from the API
//! - `status` - Show local study information
//! - `log` - Show download history
//! - `download` - Download new events (incremental by default, `--all` for every study)
//! - `fetch` - Check for new events without downloading
//! - `rm` - Delete local study data
//! - `test-connection` - Check the API credential
//! - `config` / `create-config` - Inspect and create study config files

mod commands;
mod settings;

use clap::{Parser, Subcommand};
use settings::SettingsLoader;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Study event log downloader.
#[derive(Parser)]
#[command(name = "studysync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding `settings/` and `study_configs/`
    #[arg(global = true, short = 'C', long, default_value = ".")]
    root: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List studies available from the API
    Remote,

    /// Show local study information
    Status {
        /// Study name (all local studies if omitted)
        study: Option<String>,

        /// Also ask the API whether new events are available
        #[arg(short, long)]
        check: bool,
    },

    /// Show download history
    Log {
        /// Study name
        study: String,

        /// Show at most this many runs
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Download study data (incremental by default)
    Download {
        /// Study name
        #[arg(required_unless_present = "all")]
        study: Option<String>,

        /// Download every available study
        #[arg(short, long, conflicts_with = "study")]
        all: bool,

        /// Download all events from the beginning
        #[arg(short, long)]
        fresh: bool,
    },

    /// Check for new events available remotely
    Fetch {
        /// Study name
        study: String,
    },

    /// Delete local study data
    Rm {
        /// Study name
        study: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Test the API connection
    TestConnection {
        /// Probe this study's events endpoint with its API key
        study: Option<String>,
    },

    /// List study config files, or show the resolved settings of a study
    Config {
        /// Study name
        study: Option<String>,
    },

    /// Create a study config file from the template
    CreateConfig {
        /// Study name
        study: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins unless --verbose is given
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let loader = SettingsLoader::new(&cli.root);
    let code = match cli.command {
        Commands::Remote => commands::remote::run(&loader)?,
        Commands::Status { study, check } => {
            commands::status::run(&loader, study.as_deref(), check)?
        }
        Commands::Log {
            study,
            limit,
            format,
        } => commands::log::run(&loader, &study, limit, &format)?,
        Commands::Download { study, all, fresh } => match study {
            Some(study) if !all => commands::download::run(&loader, &study, fresh)?,
            _ => commands::download::run_all(&loader, fresh)?,
        },
        Commands::Fetch { study } => commands::fetch::run(&loader, &study)?,
        Commands::Rm { study, force } => commands::rm::run(&loader, &study, force)?,
        Commands::TestConnection { study } => {
            commands::test_connection::run(&loader, study.as_deref())?
        }
        Commands::Config { study } => commands::config::run(&loader, study.as_deref())?,
        Commands::CreateConfig { study } => commands::config::create(&loader, &study)?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
