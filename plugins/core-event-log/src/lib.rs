//! Built-in plugin keeping a bounded history of plugin manager events.
//!
//! Other plugins reach the history through the `diagnostics.event_log`
//! capability, see [`find`], and read it with
//! `handle.downcast_ref::<EventLogPlugin>()`.
use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use serde_json::Value;

use colony_core::event::MANAGER_EVENT_ROOT;
use colony_core::plugin_system::traits::HookResult;
use colony_core::{Plugin, PluginClass, PluginContext, PluginDescriptor, PluginEvent, PluginHandle, PluginManager};

pub const PLUGIN_ID: &str = "core-event-log";

/// Factory name manifests use to bind to this plugin
pub const ENTRY_POINT: &str = PLUGIN_ID;

pub const CAPABILITY: &str = "diagnostics.event_log";

/// Descriptor attribute overriding [`DEFAULT_CAPACITY`]
pub const CAPACITY_ATTRIBUTE: &str = "capacity";

pub const DEFAULT_CAPACITY: usize = 256;

/// One recorded manager event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggedEvent {
    pub name: String,
    pub source: String,
    pub args: Vec<Value>,
}

impl From<&PluginEvent> for LoggedEvent {
    fn from(event: &PluginEvent) -> Self {
        Self {
            name: event.name.clone(),
            source: event.source.to_string(),
            args: event.args.clone(),
        }
    }
}

#[derive(Debug)]
pub struct EventLogPlugin {
    history: Mutex<VecDeque<LoggedEvent>>,
    capacity: AtomicUsize,
}

impl Default for EventLogPlugin {
    fn default() -> Self {
        Self {
            history: Mutex::new(VecDeque::new()),
            capacity: AtomicUsize::new(DEFAULT_CAPACITY),
        }
    }
}

impl EventLogPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded events, oldest first.
    pub fn history(&self) -> Vec<LoggedEvent> {
        self.lock().iter().cloned().collect()
    }

    /// Recorded events named `name` or one of its descendants.
    pub fn history_of(&self, name: &str) -> Vec<LoggedEvent> {
        let prefix = format!("{}.", name);
        self.lock()
            .iter()
            .filter(|e| e.name == name || e.name.starts_with(&prefix))
            .cloned()
            .collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<LoggedEvent>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, event: LoggedEvent) {
        let capacity = self.capacity();
        let mut history = self.lock();
        history.push_back(event);
        while history.len() > capacity {
            history.pop_front();
        }
    }
}

impl Plugin for EventLogPlugin {
    fn load_plugin(&self, ctx: &PluginContext) -> HookResult {
        if let Some(capacity) = ctx
            .handle()
            .descriptor()
            .attributes
            .get(CAPACITY_ATTRIBUTE)
            .and_then(Value::as_u64)
        {
            let capacity = usize::try_from(capacity).unwrap_or(usize::MAX).max(1);
            self.capacity.store(capacity, Ordering::SeqCst);
        }
        ctx.logger()
            .debug(&format!("Recording manager events, keeping the last {}", self.capacity()));
        Ok(())
    }

    fn end_unload_plugin(&self, _ctx: &PluginContext) -> HookResult {
        self.lock().clear();
        Ok(())
    }

    fn event_handler(&self, ctx: &PluginContext, event: &PluginEvent) -> HookResult {
        let args: Vec<String> = event.args.iter().map(Value::to_string).collect();
        ctx.logger().info(&format!("{} [{}]", event.name, args.join(", ")));
        self.record(LoggedEvent::from(event));
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor::builder(PLUGIN_ID, env!("CARGO_PKG_VERSION"))
        .name("Event log")
        .description("Records plugin manager lifecycle events")
        .author("Colony Developers")
        .capability(CAPABILITY)
        .event_handled(MANAGER_EVENT_ROOT)
        .build()
}

/// The class registered when no manifest provides this plugin.
pub fn class() -> PluginClass {
    PluginClass::new(descriptor(), factory)
}

pub fn factory() -> Box<dyn Plugin> {
    Box::new(EventLogPlugin::new())
}

/// First loaded provider of [`CAPABILITY`].
pub fn find(manager: &PluginManager) -> Option<PluginHandle> {
    manager
        .get_plugins_by_capability(CAPABILITY)
        .into_iter()
        .find(|h| h.downcast_ref::<EventLogPlugin>().is_some())
}
