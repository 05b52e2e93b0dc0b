//! Identity prefixed logging used by the manager and by plugins.
use log::{Level, LevelFilter};

/// Identity the manager logs under.
pub const MANAGER_LOG_TAG: &str = "plugin_manager";

/// Map a configured level name to a `log` filter.
///
/// `critical` has no `log` counterpart and filters like `error`.
pub fn level_filter(name: &str) -> Option<LevelFilter> {
    match name.to_lowercase().as_str() {
        "debug" => Some(LevelFilter::Debug),
        "info" => Some(LevelFilter::Info),
        "warning" | "warn" => Some(LevelFilter::Warn),
        "error" | "critical" => Some(LevelFilter::Error),
        _ => None,
    }
}

/// Logger implementing `debug|info|warning|error|critical(message)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginLogger {
    identity: String,
    thread_id: bool,
}

impl PluginLogger {
    pub fn for_manager(thread_id: bool) -> Self {
        Self {
            identity: MANAGER_LOG_TAG.to_string(),
            thread_id,
        }
    }

    pub fn for_plugin(plugin_id: &str, thread_id: bool) -> Self {
        Self {
            identity: plugin_id.to_string(),
            thread_id,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// "[identity]" optionally followed by "[thread <id>]".
    pub fn prefix(&self) -> String {
        if self.thread_id {
            format!("[{}] [thread {:?}]", self.identity, std::thread::current().id())
        } else {
            format!("[{}]", self.identity)
        }
    }

    fn emit(&self, level: Level, marker: Option<&str>, message: &str) {
        match marker {
            Some(marker) => log::log!(level, "{} {} {}", self.prefix(), marker, message),
            None => log::log!(level, "{} {}", self.prefix(), message),
        }
    }

    pub fn debug(&self, message: &str) {
        self.emit(Level::Debug, None, message);
    }

    pub fn info(&self, message: &str) {
        self.emit(Level::Info, None, message);
    }

    pub fn warning(&self, message: &str) {
        self.emit(Level::Warn, None, message);
    }

    pub fn error(&self, message: &str) {
        self.emit(Level::Error, None, message);
    }

    pub fn critical(&self, message: &str) {
        self.emit(Level::Error, Some("CRITICAL"), message);
    }
}
