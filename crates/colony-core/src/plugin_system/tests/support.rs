//! Shared fixtures: a plugin that records every hook call on a timeline.
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::event::PluginEvent;
use crate::plugin_system::descriptor::PluginDescriptor;
use crate::plugin_system::instance::PluginHandle;
use crate::plugin_system::manager::PluginManager;
use crate::plugin_system::traits::{HookResult, Plugin, PluginClass, PluginContext, PluginError};
use crate::storage::config::ManagerConfig;

pub type Timeline = Arc<Mutex<Vec<String>>>;

pub type HookAction = Arc<dyn Fn(&PluginContext) -> HookResult + Send + Sync>;

#[derive(Clone)]
pub enum Behavior {
    Fail,
    Panic,
    Sleep(Duration),
    Run(HookAction),
}

pub fn timeline() -> Timeline {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(timeline: &Timeline) -> Vec<String> {
    timeline.lock().unwrap().clone()
}

pub fn count(timeline: &Timeline, entry: &str) -> usize {
    timeline.lock().unwrap().iter().filter(|e| *e == entry).count()
}

/// Position of `entry` on the timeline; panics when absent.
pub fn position(timeline: &Timeline, entry: &str) -> usize {
    let recorded = entries(timeline);
    recorded
        .iter()
        .position(|e| e == entry)
        .unwrap_or_else(|| panic!("'{}' not recorded in {:?}", entry, recorded))
}

pub fn config() -> ManagerConfig {
    ManagerConfig::for_path(std::env::temp_dir().join("colony-core-tests"))
}

pub fn manager() -> PluginManager {
    PluginManager::new(config())
}

pub fn strict_manager() -> PluginManager {
    let mut config = config();
    config.stop_on_cycle_error = true;
    PluginManager::new(config)
}

/// Register `class` and start its global instance.
pub fn start(manager: &PluginManager, class: PluginClass) -> PluginHandle {
    let id = class.id().to_string();
    manager.register_plugin_class(class).unwrap();
    manager.start_plugin(&id).unwrap()
}

/// Hook behaviour of the [`Recorder`] instances a class creates.
#[derive(Clone)]
pub struct RecorderSpec {
    timeline: Timeline,
    behaviors: HashMap<&'static str, Behavior>,
}

impl RecorderSpec {
    pub fn new(timeline: &Timeline) -> Self {
        Self {
            timeline: Arc::clone(timeline),
            behaviors: HashMap::new(),
        }
    }

    pub fn with(mut self, hook: &'static str, behavior: Behavior) -> Self {
        self.behaviors.insert(hook, behavior);
        self
    }

    pub fn fail(self, hook: &'static str) -> Self {
        self.with(hook, Behavior::Fail)
    }

    pub fn panic(self, hook: &'static str) -> Self {
        self.with(hook, Behavior::Panic)
    }

    pub fn run<F>(self, hook: &'static str, action: F) -> Self
    where
        F: Fn(&PluginContext) -> HookResult + Send + Sync + 'static,
    {
        self.with(hook, Behavior::Run(Arc::new(action)))
    }

    pub fn class(self, descriptor: PluginDescriptor) -> PluginClass {
        PluginClass::new(descriptor, move || {
            Box::new(Recorder {
                timeline: Arc::clone(&self.timeline),
                behaviors: self.behaviors.clone(),
                events: Mutex::new(Vec::new()),
                threads: Mutex::new(Vec::new()),
            })
        })
    }
}

/// Class of a recorder without special behaviour.
pub fn recorder(descriptor: PluginDescriptor, timeline: &Timeline) -> PluginClass {
    RecorderSpec::new(timeline).class(descriptor)
}

pub struct Recorder {
    timeline: Timeline,
    behaviors: HashMap<&'static str, Behavior>,
    events: Mutex<Vec<PluginEvent>>,
    threads: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<PluginEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Names of the threads hooks ran on, in call order.
    pub fn threads(&self) -> Vec<String> {
        self.threads.lock().unwrap().clone()
    }

    fn record(&self, hook: &'static str, ctx: &PluginContext, entry: String) -> HookResult {
        self.timeline.lock().unwrap().push(entry);
        self.threads
            .lock()
            .unwrap()
            .push(thread::current().name().unwrap_or_default().to_string());
        match self.behaviors.get(hook) {
            None => Ok(()),
            Some(Behavior::Fail) => Err(PluginError::ExecutionError(format!("{} failed", hook))),
            Some(Behavior::Panic) => panic!("{} exploded", hook),
            Some(Behavior::Sleep(duration)) => {
                thread::sleep(*duration);
                Ok(())
            }
            Some(Behavior::Run(action)) => action(ctx),
        }
    }
}

impl Plugin for Recorder {
    fn load_plugin(&self, ctx: &PluginContext) -> HookResult {
        self.record("load_plugin", ctx, format!("load_plugin:{}", ctx.id()))
    }

    fn lazy_load_plugin(&self, ctx: &PluginContext) -> HookResult {
        self.record("lazy_load_plugin", ctx, format!("lazy_load_plugin:{}", ctx.id()))
    }

    fn end_load_plugin(&self, ctx: &PluginContext) -> HookResult {
        self.record("end_load_plugin", ctx, format!("end_load_plugin:{}", ctx.id()))
    }

    fn unload_plugin(&self, ctx: &PluginContext) -> HookResult {
        self.record("unload_plugin", ctx, format!("unload_plugin:{}", ctx.id()))
    }

    fn end_unload_plugin(&self, ctx: &PluginContext) -> HookResult {
        self.record("end_unload_plugin", ctx, format!("end_unload_plugin:{}", ctx.id()))
    }

    fn dependency_injected(&self, ctx: &PluginContext, dependency: &PluginHandle) -> HookResult {
        self.record(
            "dependency_injected",
            ctx,
            format!("dependency_injected:{}:{}", ctx.id(), dependency.id()),
        )
    }

    fn load_allowed(&self, ctx: &PluginContext, plugin: &PluginHandle, capability: &str) -> HookResult {
        self.record(
            "load_allowed",
            ctx,
            format!("load_allowed:{}:{}:{}", ctx.id(), plugin.id(), capability),
        )
    }

    fn unload_allowed(&self, ctx: &PluginContext, plugin: &PluginHandle, capability: &str) -> HookResult {
        self.record(
            "unload_allowed",
            ctx,
            format!("unload_allowed:{}:{}:{}", ctx.id(), plugin.id(), capability),
        )
    }

    fn event_handler(&self, ctx: &PluginContext, event: &PluginEvent) -> HookResult {
        self.events.lock().unwrap().push(event.clone());
        self.record("event_handler", ctx, format!("event:{}:{}", ctx.id(), event.name))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

