use std::any::Any;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::event::PluginEvent;
use crate::plugin_system::descriptor::PluginDescriptor;
use crate::plugin_system::error::PluginResult;
use crate::plugin_system::instance::PluginHandle;
use crate::plugin_system::logger::PluginLogger;
use crate::plugin_system::manager::PluginManager;

/// Error type returned by plugin hooks
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    #[error("Plugin loading error: {0}")]
    LoadError(String),
    #[error("Plugin unloading error: {0}")]
    UnloadError(String),
    #[error("Plugin execution error: {0}")]
    ExecutionError(String),
    #[error("Plugin dependency error: {0}")]
    DependencyError(String),
    #[error("Plugin hook panicked: {0}")]
    Panicked(String),
}

/// Result of a lifecycle hook
pub type HookResult = std::result::Result<(), PluginError>;

/// Everything a hook may touch: the manager, its own instance and a logger.
#[derive(Clone)]
pub struct PluginContext {
    manager: PluginManager,
    handle: PluginHandle,
}

impl PluginContext {
    pub(crate) fn new(manager: PluginManager, handle: PluginHandle) -> Self {
        Self { manager, handle }
    }

    pub fn manager(&self) -> &PluginManager {
        &self.manager
    }

    pub fn handle(&self) -> &PluginHandle {
        &self.handle
    }

    pub fn id(&self) -> &str {
        self.handle.id()
    }

    pub fn logger(&self) -> PluginLogger {
        PluginLogger::for_plugin(self.handle.id(), self.manager.config().log_thread_id)
    }

    /// Fire an event on behalf of this plugin.
    pub fn generate_event(&self, name: &str, args: Vec<serde_json::Value>) -> PluginResult<()> {
        self.manager.generate_event(&self.handle, name, args)
    }
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin", &self.handle.id())
            .finish_non_exhaustive()
    }
}

/// Core trait that all plugins must implement.
///
/// Every hook has a no-op default. The manager performs the lifecycle
/// bookkeeping (state flags, containers, event registration, lifecycle events)
/// around each call, so implementations only carry their own behaviour.
pub trait Plugin: Any + Send + Sync {
    /// Full load. Runs after the manager allocated the allowed containers.
    fn load_plugin(&self, _ctx: &PluginContext) -> HookResult {
        Ok(())
    }

    /// Lightweight load of a lazy plugin; dependencies are not resolved yet.
    fn lazy_load_plugin(&self, _ctx: &PluginContext) -> HookResult {
        Ok(())
    }

    /// Called once dependencies and allowed plugins are injected.
    fn end_load_plugin(&self, _ctx: &PluginContext) -> HookResult {
        Ok(())
    }

    /// Called after every dependent was unloaded.
    fn unload_plugin(&self, _ctx: &PluginContext) -> HookResult {
        Ok(())
    }

    fn end_unload_plugin(&self, _ctx: &PluginContext) -> HookResult {
        Ok(())
    }

    /// A dependency instance was wired into this plugin.
    fn dependency_injected(&self, _ctx: &PluginContext, _dependency: &PluginHandle) -> HookResult {
        Ok(())
    }

    /// A provider of an allowed capability was wired into this plugin.
    fn load_allowed(&self, _ctx: &PluginContext, _plugin: &PluginHandle, _capability: &str) -> HookResult {
        Ok(())
    }

    /// A previously wired provider is going away.
    fn unload_allowed(&self, _ctx: &PluginContext, _plugin: &PluginHandle, _capability: &str) -> HookResult {
        Ok(())
    }

    /// Receives every event matching one of the descriptor's `events_handled` patterns.
    fn event_handler(&self, _ctx: &PluginContext, _event: &PluginEvent) -> HookResult {
        Ok(())
    }

    /// Cast to Any for downcasting injected instances
    fn as_any(&self) -> &dyn Any;
}

/// Constructor of plugin instances.
pub type PluginFactory = Arc<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

/// A discovered plugin class: immutable metadata plus a way to build instances.
#[derive(Clone)]
pub struct PluginClass {
    descriptor: Arc<PluginDescriptor>,
    factory: PluginFactory,
}

impl PluginClass {
    pub fn new<F>(descriptor: PluginDescriptor, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        Self {
            descriptor: Arc::new(descriptor),
            factory: Arc::new(factory),
        }
    }

    pub fn from_factory(descriptor: PluginDescriptor, factory: PluginFactory) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            factory,
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &Arc<PluginDescriptor> {
        &self.descriptor
    }

    pub fn create(&self) -> Box<dyn Plugin> {
        (self.factory)()
    }
}

impl fmt::Debug for PluginClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginClass")
            .field("id", &self.descriptor.id)
            .field("version", &self.descriptor.version)
            .finish_non_exhaustive()
    }
}
