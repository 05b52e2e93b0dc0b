use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::event::{
    EventChannel, ManagerEvent, ManagerEventQueue, PluginEvent, END_LOAD_SYSTEM_EVENT,
    RELOAD_PLUGIN_EVENT, UNLOAD_SYSTEM_EVENT,
};
use crate::kernel::shutdown::{default_kill_action, KillAction, KillTimer};
use crate::plugin_system::dependency::{EnvironmentPackageResolver, PackageResolver};
use crate::plugin_system::descriptor::LoadingType;
use crate::plugin_system::error::{PluginResult, PluginSystemError};
use crate::plugin_system::instance::{InstanceId, PluginHandle, PluginInstance, PluginStatus, ScopeId};
use crate::plugin_system::lifecycle::{catch_hook, LoadMode};
use crate::plugin_system::loader::PluginCatalog;
use crate::plugin_system::logger::PluginLogger;
use crate::plugin_system::manifest::PluginManifest;
use crate::plugin_system::registry::PluginRegistry;
use crate::plugin_system::threads::{PluginThread, RetrieveLock};
use crate::plugin_system::traits::{PluginClass, PluginContext};
use crate::storage::config::ManagerConfig;
use crate::storage::layout::ManagerLayout;

struct ManagerInner {
    config: ManagerConfig,
    registry: Mutex<PluginRegistry>,
    retrieve_lock: RetrieveLock,
    package_resolver: Arc<dyn PackageResolver>,
    logger: PluginLogger,
    queue: ManagerEventQueue,
    threads: Mutex<HashMap<InstanceId, Arc<PluginThread>>>,
    running: AtomicBool,
    kill_action: KillAction,
}

/// Central orchestrator: class registry, instances, injection, events and main loop.
///
/// Cheap to clone; every clone drives the same manager.
#[derive(Clone)]
pub struct PluginManager {
    inner: Arc<ManagerInner>,
}

impl fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginManager")
            .field("manager_path", &self.inner.config.manager_path)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Builder for a [`PluginManager`] with non default collaborators.
pub struct PluginManagerBuilder {
    config: ManagerConfig,
    package_resolver: Option<Arc<dyn PackageResolver>>,
    kill_action: Option<KillAction>,
}

impl PluginManagerBuilder {
    pub fn package_resolver(mut self, resolver: impl PackageResolver + 'static) -> Self {
        self.package_resolver = Some(Arc::new(resolver));
        self
    }

    /// Action run when shutdown exceeds the unload timeout.
    pub fn kill_action(mut self, action: KillAction) -> Self {
        self.kill_action = Some(action);
        self
    }

    pub fn build(self) -> PluginManager {
        let package_resolver = self.package_resolver.unwrap_or_else(|| {
            let layout = ManagerLayout::new(&self.config.manager_path);
            Arc::new(EnvironmentPackageResolver::new(vec![layout.libraries_dir()]))
        });
        PluginManager {
            inner: Arc::new(ManagerInner {
                logger: PluginLogger::for_manager(self.config.log_thread_id),
                config: self.config,
                registry: Mutex::new(PluginRegistry::new()),
                retrieve_lock: RetrieveLock::new(),
                package_resolver,
                queue: ManagerEventQueue::new(),
                threads: Mutex::new(HashMap::new()),
                running: AtomicBool::new(false),
                kill_action: self.kill_action.unwrap_or_else(default_kill_action),
            }),
        }
    }
}

impl PluginManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: ManagerConfig) -> PluginManagerBuilder {
        PluginManagerBuilder {
            config,
            package_resolver: None,
            kill_action: None,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub fn logger(&self) -> &PluginLogger {
        &self.inner.logger
    }

    pub fn package_resolver(&self) -> &dyn PackageResolver {
        self.inner.package_resolver.as_ref()
    }

    /// Registry tables stay consistent between statements, so poisoning is recovered.
    pub(crate) fn registry(&self) -> MutexGuard<'_, PluginRegistry> {
        self.inner.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- classes ---

    pub fn register_plugin_class(&self, class: PluginClass) -> PluginResult<()> {
        let id = class.id().to_string();
        self.registry().register_class(class)?;
        log::debug!("Registered plugin class '{}'", id);
        Ok(())
    }

    /// Bind scanned manifests to factories of `catalog` and register the classes.
    ///
    /// Manifests without a factory, or clashing with a registered class, are
    /// reported and skipped. Returns how many classes were registered.
    pub fn discover(&self, manifests: Vec<PluginManifest>, catalog: &PluginCatalog) -> usize {
        let mut registered = 0;
        for manifest in manifests {
            let class = match catalog.bind(&manifest) {
                Ok(class) => class,
                Err(e) => {
                    self.logger().warning(&e.to_string());
                    continue;
                }
            };
            match self.register_plugin_class(class) {
                Ok(()) => registered += 1,
                Err(e) => self.logger().warning(&e.to_string()),
            }
        }
        self.logger().info(&format!("Discovered {} plugin classes", registered));
        registered
    }

    pub fn has_plugin_class(&self, id: &str) -> bool {
        self.registry().has_class(id)
    }

    /// Version of the registered class `id`.
    pub fn class_version(&self, id: &str) -> Option<String> {
        self.registry()
            .class(id)
            .map(|class| class.descriptor().version.clone())
    }

    /// Registered class ids, in registration order.
    pub fn plugin_ids(&self) -> Vec<String> {
        self.registry().class_ids()
    }

    // --- instances ---

    /// Create and index the global instance of a registered class.
    pub fn start_plugin(&self, id: &str) -> PluginResult<PluginHandle> {
        let mut registry = self.registry();
        let class = registry
            .class(id)
            .cloned()
            .ok_or_else(|| PluginSystemError::not_found(id))?;
        if registry.global(id).is_some() {
            return Err(PluginSystemError::AlreadyStarted {
                plugin_id: id.to_string(),
                scope: ScopeId::GLOBAL.0,
            });
        }
        let instance_id = registry.next_instance_id();
        let handle = Arc::new(PluginInstance::new(
            instance_id,
            ScopeId::GLOBAL,
            None,
            Arc::clone(class.descriptor()),
            class.create(),
        ));
        registry.insert_instance(Arc::clone(&handle))?;
        registry.register_plugin_capabilities(&handle);
        drop(registry);
        log::debug!("Started plugin '{}' as instance {}", id, instance_id);
        Ok(handle)
    }

    /// Hot-unplug every instance of `id`, unloading loaded ones first.
    pub fn stop_plugin(&self, id: &str) -> PluginResult<()> {
        let handles = self.registry().instances_of(id);
        if handles.is_empty() {
            return Err(PluginSystemError::not_found(id));
        }
        for handle in handles.iter().rev() {
            self.stop_instance(handle)?;
        }
        Ok(())
    }

    pub(crate) fn stop_instance(&self, handle: &PluginHandle) -> PluginResult<()> {
        if handle.is_active() {
            self.unload_instance(handle)?;
        }
        self.stop_worker(handle.instance_id());
        self.registry().remove_instance(handle.instance_id());
        log::debug!("Stopped instance {} of plugin '{}'", handle.instance_id(), handle.id());
        Ok(())
    }

    /// Replace the instance of `id` with a fresh one from its class factory.
    ///
    /// The plugin is unloaded, stopped, started again and, if it was loaded
    /// before, loaded again. Returns the result of that load.
    pub fn reload_plugin(&self, id: &str) -> PluginResult<bool> {
        let handle = self
            .global_instance(id)
            .ok_or_else(|| PluginSystemError::not_found(id))?;
        let was_loaded = handle.is_loaded();
        let was_lazy = handle.is_lazy_loaded();
        self.stop_plugin(id)?;
        self.start_plugin(id)?;
        let loaded = if was_loaded {
            self.load_plugin(id)?
        } else if was_lazy {
            self.load_plugin_with(id, LoadMode::Lazy)?
        } else {
            true
        };
        self.notify_handlers(RELOAD_PLUGIN_EVENT, vec![Value::from(id)]);
        Ok(loaded)
    }

    pub(crate) fn global_instance(&self, id: &str) -> Option<PluginHandle> {
        self.registry().global(id)
    }

    pub fn get_plugin_instance(&self, id: &str, scope: ScopeId) -> Option<PluginHandle> {
        self.registry().instance_in_scope(id, scope)
    }

    /// Retrieve the global instance of `id`, loading it on first access.
    ///
    /// Loaded plugins are returned without locking. Otherwise the load is
    /// performed under the reentrant retrieve lock so concurrent callers do
    /// not trigger the load hooks twice. `None` when `id` is unknown or its
    /// version does not satisfy `version`.
    pub fn get_plugin(&self, id: &str, version: Option<&str>) -> Option<PluginHandle> {
        let handle = self.global_instance(id)?;
        if let Some(expected) = version {
            if !crate::plugin_system::version::is_version_compatible(handle.version(), expected) {
                return None;
            }
        }
        if handle.is_loaded() {
            return Some(handle);
        }
        let _guard = self.inner.retrieve_lock.lock();
        if let Err(e) = self.assert_plugin(&handle) {
            self.logger().error(&format!("Problem retrieving plugin '{}': {}", id, e));
        }
        Some(handle)
    }

    /// Full-load a lazy or unloaded plugin. Plugins in error state are left alone.
    pub fn assert_plugin(&self, handle: &PluginHandle) -> PluginResult<bool> {
        if handle.is_loaded() {
            return Ok(true);
        }
        if handle.is_error() {
            return Ok(false);
        }
        self.load_instance(handle, LoadMode::Full, &mut Vec::new())
    }

    /// Providers of `capability` or a descendant, each loaded on access.
    pub fn get_plugins_by_capability(&self, capability: &str) -> Vec<PluginHandle> {
        let providers = self.registry().providers_of(capability);
        let mut result = Vec::with_capacity(providers.len());
        for provider in providers {
            if provider.is_error() {
                continue;
            }
            match self.assert_plugin(&provider) {
                Ok(true) => result.push(provider),
                Ok(false) => {}
                Err(e) => self.logger().error(&format!(
                    "Problem asserting plugin '{}' for capability '{}': {}",
                    provider.id(),
                    capability,
                    e
                )),
            }
        }
        result
    }

    pub fn loaded_plugins(&self) -> Vec<PluginHandle> {
        self.registry()
            .instances()
            .into_iter()
            .filter(|h| h.is_loaded())
            .collect()
    }

    /// Ids of the plugins the global instance of `id` was injected into.
    pub fn dependents_of(&self, id: &str) -> Vec<String> {
        let registry = self.registry();
        registry
            .global(id)
            .map(|h| {
                registry
                    .dependents_of(h.instance_id())
                    .iter()
                    .map(|d| d.id().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn plugin_status(&self, id: &str) -> Option<PluginStatus> {
        self.global_instance(id).map(|h| h.status())
    }

    // --- events ---

    /// Fire `name` on behalf of `source`, which must declare it (or an ancestor) in `events_fired`.
    pub fn generate_event(&self, source: &PluginHandle, name: &str, args: Vec<Value>) -> PluginResult<()> {
        if !source.descriptor().fires(name) {
            return Err(PluginSystemError::EventNotDeclared {
                plugin_id: source.id().to_string(),
                event: name.to_string(),
            });
        }
        let event = PluginEvent::from_plugin(source.id(), name, args);
        self.dispatch(EventChannel::Plugin, &event, Some(source.instance_id()));
        Ok(())
    }

    /// Fire a manager event to every subscribed plugin.
    pub fn notify_handlers(&self, name: &str, args: Vec<Value>) {
        let event = PluginEvent::from_manager(name, args);
        self.dispatch(EventChannel::Manager, &event, None);
    }

    fn dispatch(&self, channel: EventChannel, event: &PluginEvent, skip: Option<InstanceId>) {
        let targets: Vec<(PluginHandle, Option<usize>)> = {
            let registry = self.registry();
            registry
                .events()
                .handlers_for(channel, &event.name)
                .into_iter()
                .filter(|s| Some(s.instance) != skip)
                .filter_map(|s| registry.instance(s.instance).map(|h| (h, s.arity)))
                .collect()
        };
        for (handle, arity) in targets {
            if handle.is_error() {
                continue;
            }
            let delivered = event.padded_for(arity);
            let ctx = PluginContext::new(self.clone(), Arc::clone(&handle));
            if let Err(e) = catch_hook(|| handle.plugin().event_handler(&ctx, &delivered)) {
                self.logger().error(&format!(
                    "Problem handling event '{}' in plugin {}: {}",
                    event.name,
                    handle.descriptor().display_name(),
                    e
                ));
                handle.set_error(e);
            }
        }
    }

    // --- system ---

    /// Start every class, full-load eager plugins and lazy-load lazy ones.
    ///
    /// Precondition and hook failures are logged and skipped; in strict mode
    /// they abort with an error.
    pub fn load_system(&self) -> PluginResult<()> {
        for id in self.plugin_ids() {
            if self.global_instance(&id).is_none() {
                self.start_plugin(&id)?;
            }
        }
        let handles: Vec<PluginHandle> = self
            .registry()
            .instances()
            .into_iter()
            .filter(|h| h.scope().is_global())
            .collect();
        for handle in handles {
            let mode = match handle.descriptor().loading_type {
                LoadingType::Eager => LoadMode::Full,
                LoadingType::Lazy => LoadMode::Lazy,
            };
            self.load_instance(&handle, mode, &mut Vec::new())?;
        }
        self.notify_handlers(END_LOAD_SYSTEM_EVENT, Vec::new());
        self.logger().info("Finished loading plugin system");
        Ok(())
    }

    /// Unload every plugin under the kill timer, then stop the worker threads.
    pub fn unload_system(&self) -> PluginResult<()> {
        let timer = KillTimer::arm(self.config().unload_timeout, Arc::clone(&self.inner.kill_action))
            .map_err(|e| PluginSystemError::InternalError(format!("cannot arm kill timer: {}", e)))?;
        self.notify_handlers(UNLOAD_SYSTEM_EVENT, Vec::new());

        let handles = self.registry().instances();
        let mut first_error = None;
        for handle in handles.iter().rev() {
            if !handle.is_active() {
                continue;
            }
            if let Err(e) = self.unload_instance(handle) {
                self.logger().error(&format!(
                    "Problem unloading plugin {}: {}",
                    handle.descriptor().display_name(),
                    e
                ));
                first_error.get_or_insert(e);
            }
        }
        self.shutdown_workers();
        timer.disarm();
        self.logger().info("Finished unloading plugin system");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // --- main loop ---

    /// Run `f` on the main loop thread.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce(&PluginManager) + Send + 'static,
    {
        self.inner.queue.push(ManagerEvent::Execute(Box::new(f)));
    }

    /// Ask the main loop to return once the events queued so far are handled.
    pub fn exit(&self) {
        self.inner.queue.push(ManagerEvent::Exit);
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Process queued events until an exit event arrives, then join the worker threads.
    pub fn main_loop(&self) {
        self.inner.running.store(true, Ordering::SeqCst);
        self.logger().debug("Entering main loop");
        loop {
            let Some(event) = self.inner.queue.pop_timeout(self.config().loop_timeout) else {
                continue;
            };
            match event {
                ManagerEvent::Execute(f) => {
                    if panic::catch_unwind(AssertUnwindSafe(|| f(self))).is_err() {
                        self.logger().error("Execute event panicked on the main loop");
                    }
                }
                ManagerEvent::Exit => break,
            }
        }
        let discarded = self.inner.queue.drain().len();
        if discarded > 0 {
            log::debug!("Discarded {} events queued after exit", discarded);
        }
        self.shutdown_workers();
        self.inner.running.store(false, Ordering::SeqCst);
        self.logger().debug("Left main loop");
    }

    // --- worker threads ---

    /// The worker of a threaded instance, spawned on first use.
    pub(crate) fn worker_for(&self, handle: &PluginHandle) -> std::io::Result<Arc<PluginThread>> {
        let mut threads = self.inner.threads.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(thread) = threads.get(&handle.instance_id()) {
            if thread.is_running() {
                return Ok(Arc::clone(thread));
            }
        }
        let thread = Arc::new(PluginThread::spawn(handle.id(), self.config().unload_timeout)?);
        threads.insert(handle.instance_id(), Arc::clone(&thread));
        Ok(thread)
    }

    pub(crate) fn stop_worker(&self, instance: InstanceId) {
        let thread = self
            .inner
            .threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&instance);
        if let Some(thread) = thread {
            thread.shutdown();
        }
    }

    pub fn worker_count(&self) -> usize {
        self.inner.threads.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn shutdown_workers(&self) {
        let threads: Vec<Arc<PluginThread>> = self
            .inner
            .threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, thread)| thread)
            .collect();
        for thread in threads {
            thread.shutdown();
        }
    }
}
