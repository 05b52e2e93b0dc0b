use std::path::PathBuf;

use clap::{Parser, Subcommand};

use colony_core::kernel::constants::{LOG_LEVEL_KEY, MANAGER_PATH_KEY, PLUGIN_PATH_KEY};
use colony_core::storage::error::StorageSystemError;
use colony_core::ConfigStore;

/// Colony: a runtime plugin manager
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Root of the manager layout (defaults to COLONY_MANAGER_PATH, then the current directory)
    #[arg(long, value_name = "DIR")]
    pub manager_path: Option<PathBuf>,

    /// Configuration file (json, or toml/yaml when enabled)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory scanned for plugin manifests; may be repeated
    #[arg(long = "plugin-path", value_name = "DIR")]
    pub plugin_paths: Vec<PathBuf>,

    /// Log level: debug, info, warning, error or critical
    #[arg(long)]
    pub level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Load every plugin and run until interrupted (default)
    Run,
    /// List the registered plugin classes and exit
    List,
}

impl CliArgs {
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Run)
    }

    /// Load the configuration store and apply the command line overrides on top.
    pub fn config_store(&self) -> Result<ConfigStore, StorageSystemError> {
        let mut store = ConfigStore::load(self.config.as_deref())?;
        if let Some(path) = &self.manager_path {
            store.set(MANAGER_PATH_KEY, path.display().to_string())?;
        }
        if !self.plugin_paths.is_empty() {
            let paths: Vec<String> = self.plugin_paths.iter().map(|p| p.display().to_string()).collect();
            store.set(PLUGIN_PATH_KEY, paths)?;
        }
        if let Some(level) = &self.level {
            store.set(LOG_LEVEL_KEY, level)?;
        }
        Ok(store)
    }
}
