//! Managed plugin instances and their lifecycle state.
//!
//! A [`PluginInstance`] wraps one user [`Plugin`] object together with the
//! state the manager keeps for it: lifecycle, error flag, injected
//! dependencies and allowed plugins. Instances are shared as
//! [`PluginHandle`]s; their mutable state sits behind a mutex that is never
//! held while a user hook runs.
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use crate::plugin_system::descriptor::PluginDescriptor;
use crate::plugin_system::error::{PluginResult, PluginSystemError};
use crate::plugin_system::traits::{Plugin, PluginError};

/// Diagnostic identifier of an instance, never reused during the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Diffusion scope an instance belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u64);

impl ScopeId {
    /// Scope of normally started (non replica) plugins.
    pub const GLOBAL: ScopeId = ScopeId(0);

    pub fn is_global(&self) -> bool {
        *self == Self::GLOBAL
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state; a single enum keeps `loaded` and `lazy_loaded` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Unloaded,
    LazyLoaded,
    Loading,
    Loaded,
    Unloading,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Unloaded => "unloaded",
            LifecycleState::LazyLoaded => "lazy_loaded",
            LifecycleState::Loading => "loading",
            LifecycleState::Loaded => "loaded",
            LifecycleState::Unloading => "unloading",
        };
        write!(f, "{}", name)
    }
}

/// Shared reference to a managed instance.
pub type PluginHandle = Arc<PluginInstance>;

#[derive(Default)]
struct InstanceState {
    lifecycle: LifecycleState,
    error_state: bool,
    exception: Option<PluginError>,
    loaded_at: Option<SystemTime>,
    dependencies: Vec<PluginHandle>,
    allowed: BTreeMap<String, Vec<PluginHandle>>,
    allowed_loaded: Vec<(PluginHandle, String)>,
}

pub struct PluginInstance {
    instance_id: InstanceId,
    scope: ScopeId,
    replica_id: Option<u64>,
    descriptor: Arc<PluginDescriptor>,
    plugin: Box<dyn Plugin>,
    state: Mutex<InstanceState>,
}

impl PluginInstance {
    pub(crate) fn new(
        instance_id: InstanceId,
        scope: ScopeId,
        replica_id: Option<u64>,
        descriptor: Arc<PluginDescriptor>,
        plugin: Box<dyn Plugin>,
    ) -> Self {
        Self {
            instance_id,
            scope,
            replica_id,
            descriptor,
            plugin,
            state: Mutex::new(InstanceState::default()),
        }
    }

    // Every write below leaves the state consistent, so a poisoned lock is still usable.
    fn state(&self) -> MutexGuard<'_, InstanceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn version(&self) -> &str {
        &self.descriptor.version
    }

    pub fn descriptor(&self) -> &Arc<PluginDescriptor> {
        &self.descriptor
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    pub fn replica_id(&self) -> Option<u64> {
        self.replica_id
    }

    pub fn is_replica(&self) -> bool {
        self.replica_id.is_some()
    }

    pub fn plugin(&self) -> &dyn Plugin {
        self.plugin.as_ref()
    }

    /// Downcast the wrapped plugin object.
    pub fn downcast_ref<T: Plugin>(&self) -> Option<&T> {
        self.plugin.as_any().downcast_ref::<T>()
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.state().lifecycle
    }

    pub fn is_loaded(&self) -> bool {
        self.lifecycle() == LifecycleState::Loaded
    }

    pub fn is_lazy_loaded(&self) -> bool {
        self.lifecycle() == LifecycleState::LazyLoaded
    }

    /// Loaded or lazy loaded.
    pub fn is_active(&self) -> bool {
        matches!(self.lifecycle(), LifecycleState::Loaded | LifecycleState::LazyLoaded)
    }

    pub fn is_error(&self) -> bool {
        self.state().error_state
    }

    pub fn exception(&self) -> Option<PluginError> {
        self.state().exception.clone()
    }

    pub fn loaded_at(&self) -> Option<SystemTime> {
        self.state().loaded_at
    }

    pub fn dependencies(&self) -> Vec<PluginHandle> {
        self.state().dependencies.clone()
    }

    /// Injected dependency with the given plugin id.
    pub fn dependency(&self, plugin_id: &str) -> Option<PluginHandle> {
        self.state()
            .dependencies
            .iter()
            .find(|dep| dep.id() == plugin_id)
            .cloned()
    }

    /// Plugins injected under the allowed capability `capability`.
    pub fn allowed_plugins(&self, capability: &str) -> Vec<PluginHandle> {
        self.state().allowed.get(capability).cloned().unwrap_or_default()
    }

    /// Allowed capabilities that currently have a container.
    pub fn allowed_capabilities(&self) -> Vec<String> {
        self.state().allowed.keys().cloned().collect()
    }

    /// Every `(plugin, capability)` pair injected as allowed, in injection order.
    pub fn allowed_loaded_capability(&self) -> Vec<(PluginHandle, String)> {
        self.state().allowed_loaded.clone()
    }

    pub fn has_allowed(&self, provider: &PluginInstance, capability: &str) -> bool {
        self.state()
            .allowed_loaded
            .iter()
            .any(|(p, c)| p.instance_id == provider.instance_id && c == capability)
    }

    /// Whether any instance of plugin `id` is injected under `capability`.
    pub fn has_allowed_of(&self, id: &str, capability: &str) -> bool {
        self.state()
            .allowed_loaded
            .iter()
            .any(|(p, c)| p.id() == id && c == capability)
    }

    pub fn status(&self) -> PluginStatus {
        let state = self.state();
        PluginStatus {
            id: self.descriptor.id.clone(),
            version: self.descriptor.version.clone(),
            instance_id: self.instance_id,
            scope: self.scope,
            replica_id: self.replica_id,
            lifecycle: state.lifecycle,
            error_state: state.error_state,
            exception: state.exception.as_ref().map(ToString::to_string),
            loaded_at: state.loaded_at,
            dependencies: state.dependencies.iter().map(|d| d.id().to_string()).collect(),
            allowed: state
                .allowed_loaded
                .iter()
                .map(|(p, c)| (p.id().to_string(), c.clone()))
                .collect(),
        }
    }

    // --- manager bookkeeping ---

    pub(crate) fn set_lifecycle(&self, lifecycle: LifecycleState) {
        self.state().lifecycle = lifecycle;
    }

    /// One empty container per allowed capability.
    pub(crate) fn allocate_allowed_containers(&self) {
        let mut state = self.state();
        for allowed in &self.descriptor.capabilities_allowed {
            state.allowed.entry(allowed.capability.clone()).or_default();
        }
    }

    pub(crate) fn complete_load(&self) {
        let mut state = self.state();
        state.lifecycle = LifecycleState::Loaded;
        state.error_state = false;
        state.exception = None;
        state.loaded_at = Some(SystemTime::now());
    }

    pub(crate) fn complete_lazy_load(&self) {
        let mut state = self.state();
        state.lifecycle = LifecycleState::LazyLoaded;
        state.error_state = false;
        state.exception = None;
    }

    pub(crate) fn complete_unload(&self) {
        let mut state = self.state();
        state.lifecycle = LifecycleState::Unloaded;
        state.loaded_at = None;
        state.dependencies.clear();
        state.allowed.clear();
        state.allowed_loaded.clear();
    }

    pub(crate) fn clear_error(&self) {
        let mut state = self.state();
        state.error_state = false;
        state.exception = None;
    }

    pub(crate) fn set_error(&self, error: PluginError) {
        let mut state = self.state();
        state.error_state = true;
        state.exception = Some(error);
    }

    pub(crate) fn add_dependency(&self, dependency: PluginHandle) {
        let mut state = self.state();
        if !state
            .dependencies
            .iter()
            .any(|d| d.instance_id == dependency.instance_id)
        {
            state.dependencies.push(dependency);
        }
    }

    /// Record `provider` under `capability`. A duplicate pair is an error.
    pub(crate) fn add_allowed(&self, provider: PluginHandle, capability: &str) -> PluginResult<()> {
        let mut state = self.state();
        if state
            .allowed_loaded
            .iter()
            .any(|(p, c)| p.instance_id == provider.instance_id && c == capability)
        {
            return Err(PluginSystemError::DuplicateAllowed {
                consumer: self.descriptor.id.clone(),
                provider: provider.id().to_string(),
                capability: capability.to_string(),
            });
        }
        state
            .allowed
            .entry(capability.to_string())
            .or_default()
            .push(provider.clone());
        state.allowed_loaded.push((provider, capability.to_string()));
        Ok(())
    }

    pub(crate) fn remove_allowed(&self, provider: &PluginInstance, capability: &str) -> PluginResult<()> {
        let mut state = self.state();
        let position = state
            .allowed_loaded
            .iter()
            .position(|(p, c)| p.instance_id == provider.instance_id && c == capability)
            .ok_or_else(|| PluginSystemError::AllowedNotFound {
                consumer: self.descriptor.id.clone(),
                provider: provider.id().to_string(),
                capability: capability.to_string(),
            })?;
        state.allowed_loaded.remove(position);
        if let Some(container) = state.allowed.get_mut(capability) {
            container.retain(|p| p.instance_id != provider.instance_id);
        }
        Ok(())
    }
}

impl fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginInstance")
            .field("id", &self.descriptor.id)
            .field("instance_id", &self.instance_id)
            .field("scope", &self.scope)
            .field("replica_id", &self.replica_id)
            .field("lifecycle", &self.lifecycle())
            .finish_non_exhaustive()
    }
}

/// Point in time snapshot of an instance.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginStatus {
    pub id: String,
    pub version: String,
    pub instance_id: InstanceId,
    pub scope: ScopeId,
    pub replica_id: Option<u64>,
    pub lifecycle: LifecycleState,
    pub error_state: bool,
    pub exception: Option<String>,
    pub loaded_at: Option<SystemTime>,
    pub dependencies: Vec<String>,
    /// `(provider id, capability)` pairs
    pub allowed: Vec<(String, String)>,
}
