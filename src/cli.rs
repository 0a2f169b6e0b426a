use std::path::PathBuf;
use clap::{Parser, Subcommand, ValueEnum};
use crate::config::SettingsStore;

#[derive(Parser)]
#[command(name = "editstamp")]
#[command(author = "xicv")]
#[command(version)]
#[command(about = "Keeps created/updated front-matter timestamps of markdown notes in sync with edits")]
#[command(long_about = "editstamp watches a vault of markdown notes and maintains `created` and `updated` \
front-matter fields. Updates are debounced and can be skipped for unchanged content with a hash cache, \
which keeps synchronized vaults free of write storms.")]
pub struct Cli {
    /// Vault directory
    #[arg(long, global = true, value_name = "PATH", help = "Vault to manage (defaults to current directory)")]
    pub vault: Option<PathBuf>,

    /// Settings file location
    #[arg(long, global = true, value_name = "FILE", help = "Settings file (defaults to <vault>/.editstamp/settings.json)")]
    pub settings: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Disable colors in output
    #[arg(long, global = true, help = "Disable colored output")]
    pub no_color: bool,

    /// Output format for reports
    #[arg(long, global = true, default_value = "text", help = "Output format")]
    pub output: OutputFormat,

    /// Manage Excalidraw drawings like any other note
    #[arg(long, global = true, help = "Do not skip Excalidraw drawings")]
    pub no_excalidraw: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Watch the vault and update timestamps as notes change (default)
    Watch,
    /// Update timestamps of every eligible note once
    UpdateAll,
    /// Record content hashes of every eligible note without touching them
    PopulateCache,
    /// List the notes editstamp would manage
    List,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human readable lines (default)
    Text,
    /// JSON output for scripting
    Json,
    /// Compact single-line format
    Compact,
}

impl Cli {
    pub fn get_vault_path(&self) -> PathBuf {
        self.vault.clone().unwrap_or_else(|| {
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        })
    }

    pub fn settings_store(&self) -> SettingsStore {
        match &self.settings {
            Some(path) => SettingsStore::new(path.clone()),
            None => SettingsStore::for_vault(self.get_vault_path()),
        }
    }

    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Watch)
    }

    pub fn setup_logging(&self) {
        let level = if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        };

        // Keep stdout clean for reports
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .with_ansi(!self.no_color)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }

    pub fn validate(&self) -> Result<(), String> {
        let path = self.get_vault_path();

        if !path.exists() {
            return Err(format!("Path does not exist: {}", path.display()));
        }

        if !path.is_dir() {
            return Err(format!("Path is not a directory: {}", path.display()));
        }

        if let Some(settings) = &self.settings {
            if settings.is_dir() {
                return Err(format!("Settings path is a directory: {}", settings.display()));
            }
        }

        Ok(())
    }
}
