//! Load and unload driving.
//!
//! The manager performs the bookkeeping around every user hook: state flags,
//! allowed containers, event subscriptions and the lifecycle events fired
//! once a hook succeeded. A failing hook is recorded on the plugin and turns
//! the operation into `Ok(false)`, or into an error in strict mode.
use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;

use crate::event::{
    EventChannel, END_LOAD_PLUGIN_EVENT, END_UNLOAD_PLUGIN_EVENT, LAZY_LOAD_PLUGIN_EVENT,
    LOAD_PLUGIN_EVENT, UNLOAD_PLUGIN_EVENT,
};
use crate::plugin_system::descriptor::PluginDescriptor;
use crate::plugin_system::error::{PluginResult, PluginSystemError};
use crate::plugin_system::instance::{LifecycleState, PluginHandle};
use crate::plugin_system::manager::PluginManager;
use crate::plugin_system::threads::HookKind;
use crate::plugin_system::traits::{HookResult, PluginContext, PluginError};

/// How far `load_plugin_with` takes a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
    #[default]
    Full,
    /// Only the lightweight `lazy_load_plugin` hook; no injection
    Lazy,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run a hook, turning a panic into [`PluginError::Panicked`].
pub(crate) fn catch_hook<F>(hook: F) -> HookResult
where
    F: FnOnce() -> HookResult,
{
    match panic::catch_unwind(AssertUnwindSafe(hook)) {
        Ok(result) => result,
        Err(payload) => Err(PluginError::Panicked(panic_message(payload.as_ref()))),
    }
}

impl PluginManager {
    /// Fully load the global instance of `id`.
    ///
    /// Returns `Ok(true)` when the plugin is loaded (including when it already
    /// was), `Ok(false)` when a precondition or a hook failed.
    pub fn load_plugin(&self, id: &str) -> PluginResult<bool> {
        self.load_plugin_with(id, LoadMode::Full)
    }

    pub fn load_plugin_with(&self, id: &str, mode: LoadMode) -> PluginResult<bool> {
        let handle = self
            .global_instance(id)
            .ok_or_else(|| PluginSystemError::not_found(id))?;
        self.load_instance(&handle, mode, &mut Vec::new())
    }

    /// Unload the global instance of `id`, cascading to its dependents first.
    pub fn unload_plugin(&self, id: &str) -> PluginResult<bool> {
        let handle = self
            .global_instance(id)
            .ok_or_else(|| PluginSystemError::not_found(id))?;
        self.unload_instance(&handle)
    }

    /// Blacklist, platform, thread permission and dependency checks, in that order.
    ///
    /// A failure is logged at `info` level and reported as `false`.
    pub fn test_plugin_load(&self, handle: &PluginHandle) -> bool {
        let mut visited = HashSet::from([handle.id().to_string()]);
        match self.check_preconditions(handle.descriptor(), &mut visited) {
            Ok(()) => true,
            Err(reason) => {
                self.logger().info(&format!(
                    "Not loading plugin {}: {}",
                    handle.descriptor().display_name(),
                    reason
                ));
                false
            }
        }
    }

    /// Side effect free load feasibility of the class `id`.
    ///
    /// Ids already in `visited` count as feasible so dependency cycles terminate.
    pub fn test_class_load(&self, id: &str, visited: &mut HashSet<String>) -> bool {
        if !visited.insert(id.to_string()) {
            return true;
        }
        let descriptor = match self.registry().class(id) {
            Some(class) => Arc::clone(class.descriptor()),
            None => return false,
        };
        self.check_preconditions(&descriptor, visited).is_ok()
    }

    fn check_preconditions(
        &self,
        descriptor: &PluginDescriptor,
        visited: &mut HashSet<String>,
    ) -> Result<(), String> {
        let config = self.config();
        if config.is_blacklisted(&descriptor.id) {
            return Err("plugin is blacklisted".to_string());
        }
        if !config.is_whitelisted(&descriptor.id) {
            return Err("plugin is not whitelisted".to_string());
        }
        if !descriptor.platforms.is_empty() && !descriptor.platforms.iter().any(|p| *p == config.platform) {
            return Err(format!("platform '{}' is not supported", config.platform));
        }
        if descriptor.is_threaded() && !config.allow_threads {
            return Err("threaded plugins are not allowed".to_string());
        }
        for dependency in &descriptor.dependencies {
            if dependency.is_mandatory() && !dependency.test_dependency_visited(self, visited) {
                return Err(format!("dependency not satisfied ({})", dependency));
            }
        }
        Ok(())
    }

    /// `trail` holds the ids whose full load is in progress on this call path.
    pub(crate) fn load_instance(
        &self,
        handle: &PluginHandle,
        mode: LoadMode,
        trail: &mut Vec<String>,
    ) -> PluginResult<bool> {
        match (handle.lifecycle(), mode) {
            (LifecycleState::Loaded | LifecycleState::Loading, _) => return Ok(true),
            (LifecycleState::LazyLoaded, LoadMode::Lazy) => return Ok(true),
            (LifecycleState::Unloading, _) => {
                log::debug!("Plugin '{}' is unloading, not loading it", handle.id());
                return Ok(false);
            }
            _ => {}
        }
        if !self.test_plugin_load(handle) {
            return Ok(false);
        }
        match mode {
            LoadMode::Lazy => self.run_lifecycle_hook(handle, HookKind::LazyLoad),
            LoadMode::Full => {
                handle.set_lifecycle(LifecycleState::Loading);
                handle.allocate_allowed_containers();
                trail.push(handle.id().to_string());
                let result = self.complete_full_load(handle, trail);
                trail.pop();
                result
            }
        }
    }

    fn complete_full_load(&self, handle: &PluginHandle, trail: &mut Vec<String>) -> PluginResult<bool> {
        if !self.run_lifecycle_hook(handle, HookKind::Load)? {
            return Ok(false);
        }
        self.registry().register_allowed(handle);

        let injected = match self.inject_dependencies(handle, trail) {
            Ok(true) => self.inject_allowed(handle),
            other => other,
        };
        match injected {
            Ok(true) => {}
            Ok(false) => return self.abort_load(handle),
            Err(e) => {
                self.abort_load(handle)?;
                return Err(e);
            }
        }
        self.inject_all_allowed(handle)?;

        if !self.run_lifecycle_hook(handle, HookKind::EndLoad)? {
            return self.abort_load(handle);
        }
        log::debug!("Loaded plugin {}", handle.descriptor().display_name());
        Ok(true)
    }

    /// Best-effort unload of a partially loaded plugin, keeping its error.
    fn abort_load(&self, handle: &PluginHandle) -> PluginResult<bool> {
        let exception = handle.exception();
        if handle.is_active() {
            if let Err(e) = self.unload_instance(handle) {
                log::debug!("Unload after failed load of '{}' failed: {}", handle.id(), e);
            }
        }
        if let Some(exception) = exception {
            handle.set_error(exception);
        }
        Ok(false)
    }

    pub(crate) fn unload_instance(&self, handle: &PluginHandle) -> PluginResult<bool> {
        match handle.lifecycle() {
            LifecycleState::Unloaded => {
                return Err(PluginSystemError::NotLoaded {
                    plugin_id: handle.id().to_string(),
                });
            }
            LifecycleState::Unloading => return Ok(true),
            _ => {}
        }
        handle.set_lifecycle(LifecycleState::Unloading);

        let dependents = self.registry().dependents_of(handle.instance_id());
        for dependent in dependents {
            if !dependent.is_active() {
                continue;
            }
            if let Err(e) = self.unload_instance(&dependent) {
                self.logger().error(&format!(
                    "Problem unloading dependent plugin {}: {}",
                    dependent.descriptor().display_name(),
                    e
                ));
            }
        }

        let consumers = self.registry().allowed_into(handle.instance_id());
        for (consumer, capability) in consumers {
            if let Err(e) = self.unload_allowed(&consumer, handle, &capability) {
                self.logger().error(&format!(
                    "Problem releasing plugin '{}' from {}: {}",
                    handle.id(),
                    consumer.descriptor().display_name(),
                    e
                ));
            }
        }

        let dependencies = handle.dependencies();
        let allowed = handle.allowed_loaded_capability();
        let unloaded = self.run_lifecycle_hook(handle, HookKind::Unload);
        {
            let mut registry = self.registry();
            registry.unregister_allowed(handle.instance_id());
            for dependency in &dependencies {
                registry.remove_dependent(dependency.instance_id(), handle.instance_id());
            }
            for (provider, capability) in &allowed {
                registry.remove_allowed_into(provider.instance_id(), handle.instance_id(), capability);
            }
        }
        let replicas: Vec<PluginHandle> = dependencies
            .into_iter()
            .chain(allowed.into_iter().map(|(provider, _)| provider))
            .filter(|h| h.is_replica())
            .collect();
        self.release_replicas(replicas);

        if !unloaded? {
            return Ok(false);
        }
        let ended = self.run_lifecycle_hook(handle, HookKind::EndUnload)?;
        log::debug!("Unloaded plugin {}", handle.descriptor().display_name());
        Ok(ended)
    }

    /// Run a lifecycle hook on the plugin's worker thread or inline, then do its bookkeeping.
    pub(crate) fn run_lifecycle_hook(&self, handle: &PluginHandle, kind: HookKind) -> PluginResult<bool> {
        let ctx = PluginContext::new(self.clone(), Arc::clone(handle));
        let outcome = if handle.descriptor().is_threaded() {
            match self.worker_for(handle) {
                Ok(worker) => worker.run_hook(kind, ctx),
                Err(e) => Err(PluginError::ExecutionError(format!("cannot start worker thread: {}", e))),
            }
        } else {
            catch_hook(|| kind.invoke(&ctx))
        };

        match outcome {
            Ok(()) => {
                self.after_hook(handle, kind);
                Ok(true)
            }
            Err(error) => {
                if matches!(kind, HookKind::Load | HookKind::LazyLoad | HookKind::Unload) {
                    self.reset_instance(handle);
                }
                self.hook_failed(handle, kind.name(), error)
            }
        }
    }

    fn after_hook(&self, handle: &PluginHandle, kind: HookKind) {
        let args = vec![Value::from(handle.id()), Value::from(handle.version())];
        match kind {
            HookKind::Load => {
                handle.complete_load();
                self.register_handled_events(handle);
                self.notify_handlers(LOAD_PLUGIN_EVENT, args);
            }
            HookKind::LazyLoad => {
                handle.complete_lazy_load();
                self.notify_handlers(LAZY_LOAD_PLUGIN_EVENT, args);
            }
            HookKind::EndLoad => self.notify_handlers(END_LOAD_PLUGIN_EVENT, args),
            HookKind::Unload => {
                self.reset_instance(handle);
                self.notify_handlers(UNLOAD_PLUGIN_EVENT, args);
            }
            HookKind::EndUnload => {
                handle.clear_error();
                self.notify_handlers(END_UNLOAD_PLUGIN_EVENT, args);
            }
        }
    }

    fn register_handled_events(&self, handle: &PluginHandle) {
        let descriptor = handle.descriptor();
        let mut registry = self.registry();
        for pattern in &descriptor.events_handled {
            let channel = EventChannel::for_pattern(pattern);
            let arity = descriptor.handler_arity(pattern);
            if let Err(e) = registry
                .events_mut()
                .subscribe(channel, pattern, handle.instance_id(), arity)
            {
                log::warn!("Plugin '{}': {}", handle.id(), e);
            }
        }
    }

    /// Drop subscriptions and injected references; the plugin ends up unloaded.
    fn reset_instance(&self, handle: &PluginHandle) {
        self.registry().events_mut().unsubscribe_instance(handle.instance_id());
        handle.complete_unload();
    }

    /// Store a hook failure on the plugin. Strict mode turns it into an error.
    pub(crate) fn hook_failed(&self, handle: &PluginHandle, hook: &str, error: PluginError) -> PluginResult<bool> {
        self.logger().error(&format!(
            "Problem in {} of plugin {}: {}",
            hook,
            handle.descriptor().display_name(),
            error
        ));
        handle.set_error(error.clone());
        if self.config().stop_on_cycle_error {
            return Err(PluginSystemError::HookFailed {
                plugin_id: handle.id().to_string(),
                hook: hook.to_string(),
                source: error,
            });
        }
        Ok(false)
    }
}
