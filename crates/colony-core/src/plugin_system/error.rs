//! # Colony Plugin System Errors
//!
//! Defines error types specific to the Colony Plugin System.
//!
//! [`PluginSystemError`] covers the consistency errors of the manager
//! (unknown plugins, duplicate injections, unloading something never loaded,
//! dependency cycles) and hook failures that escape in strict mode. Expected
//! runtime conditions such as a blacklisted plugin or a missing dependency are
//! not errors: the manager reports them with a `false` return and a log line.
use std::path::PathBuf;

use crate::plugin_system::dependency::DependencyError;
use crate::plugin_system::traits::PluginError;

#[derive(Debug, thiserror::Error)]
pub enum PluginSystemError {
    #[error("Plugin not found: '{plugin_id}'")]
    NotFound { plugin_id: String },

    #[error("Plugin '{plugin_id}' is not loaded")]
    NotLoaded { plugin_id: String },

    #[error("Plugin class already registered: '{plugin_id}'")]
    ClassAlreadyRegistered { plugin_id: String },

    #[error("Plugin '{plugin_id}' is already started in scope {scope}")]
    AlreadyStarted { plugin_id: String, scope: u64 },

    #[error("Plugin '{consumer}' already holds '{provider}' as allowed plugin for capability '{capability}'")]
    DuplicateAllowed {
        consumer: String,
        provider: String,
        capability: String,
    },

    #[error("Plugin '{consumer}' does not hold '{provider}' as allowed plugin for capability '{capability}'")]
    AllowedNotFound {
        consumer: String,
        provider: String,
        capability: String,
    },

    #[error("Hook '{hook}' of plugin '{plugin_id}' failed: {source}")]
    HookFailed {
        plugin_id: String,
        hook: String,
        #[source]
        source: PluginError,
    },

    #[error("Plugin '{plugin_id}' is not allowed to fire event '{event}'")]
    EventNotDeclared { plugin_id: String, event: String },

    #[error("Plugin manifest error for '{path}': {message}")]
    ManifestError {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Dependency resolution failed: {0}")]
    DependencyResolution(#[from] DependencyError),

    #[error("Internal plugin system error: {0}")]
    InternalError(String),
}

impl PluginSystemError {
    pub fn not_found(plugin_id: &str) -> Self {
        PluginSystemError::NotFound {
            plugin_id: plugin_id.to_string(),
        }
    }

    pub fn cyclic(path: Vec<String>) -> Self {
        PluginSystemError::DependencyResolution(DependencyError::CyclicDependency(path))
    }

    /// True for the cycle variant, which strict mode treats as fatal.
    pub fn is_cyclic(&self) -> bool {
        matches!(
            self,
            PluginSystemError::DependencyResolution(DependencyError::CyclicDependency(_))
        )
    }
}

/// Result alias used inside the plugin system.
pub type PluginResult<T> = std::result::Result<T, PluginSystemError>;
