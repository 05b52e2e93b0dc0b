//! # Colony Event System
//!
//! Hierarchical event notification between plugins and the manager.
//!
//! Events are identified by dot-separated names. A subscription registered for
//! pattern `p` receives every event whose name has `p` as an ancestor or is
//! equal to it, so a plugin handling `"plugin_manager"` sees every manager
//! lifecycle event. Subscriptions live in the [`EventIndex`], split in two
//! channels: events fired by plugins and events fired by the manager.
//!
//! The [`ManagerEventQueue`] is the FIFO feeding the manager main loop.
pub mod dispatcher;
pub mod error;
pub mod queue;

use std::fmt;

use serde_json::Value;

/// Root of every manager fired event
pub const MANAGER_EVENT_ROOT: &str = "plugin_manager";

pub const LOAD_PLUGIN_EVENT: &str = "plugin_manager.plugin.load_plugin";
pub const LAZY_LOAD_PLUGIN_EVENT: &str = "plugin_manager.plugin.lazy_load_plugin";
pub const END_LOAD_PLUGIN_EVENT: &str = "plugin_manager.plugin.end_load_plugin";
pub const UNLOAD_PLUGIN_EVENT: &str = "plugin_manager.plugin.unload_plugin";
pub const END_UNLOAD_PLUGIN_EVENT: &str = "plugin_manager.plugin.end_unload_plugin";
pub const RELOAD_PLUGIN_EVENT: &str = "plugin_manager.plugin.reload_plugin";
pub const END_LOAD_SYSTEM_EVENT: &str = "plugin_manager.end_load_system";
pub const UNLOAD_SYSTEM_EVENT: &str = "plugin_manager.unload_system";

/// Who fired an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventSource {
    Manager,
    Plugin(String),
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventSource::Manager => write!(f, "{}", MANAGER_EVENT_ROOT),
            EventSource::Plugin(id) => write!(f, "{}", id),
        }
    }
}

/// An event as delivered to a plugin's `event_handler`.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginEvent {
    pub name: String,
    pub args: Vec<Value>,
    pub source: EventSource,
}

impl PluginEvent {
    pub fn from_manager(name: &str, args: Vec<Value>) -> Self {
        Self {
            name: name.to_string(),
            args,
            source: EventSource::Manager,
        }
    }

    pub fn from_plugin(plugin_id: &str, name: &str, args: Vec<Value>) -> Self {
        Self {
            name: name.to_string(),
            args,
            source: EventSource::Plugin(plugin_id.to_string()),
        }
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// Convenience accessor for string arguments.
    pub fn arg_str(&self, index: usize) -> Option<&str> {
        self.args.get(index).and_then(Value::as_str)
    }

    /// Copy of this event with arguments padded for a handler of `arity`.
    pub(crate) fn padded_for(&self, arity: Option<usize>) -> PluginEvent {
        PluginEvent {
            name: self.name.clone(),
            args: dispatcher::pad_arguments(&self.args, arity),
            source: self.source.clone(),
        }
    }
}

/// Re-export important types
pub use dispatcher::{EventChannel, EventIndex, Subscription};
pub use error::EventSystemError;
pub use queue::{ManagerEvent, ManagerEventQueue};

// Test module declaration
#[cfg(test)]
mod tests;
