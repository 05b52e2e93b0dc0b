use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::event::EventIndex;
use crate::plugin_system::capability::path_and_ancestors;
use crate::plugin_system::error::{PluginResult, PluginSystemError};
use crate::plugin_system::instance::{InstanceId, PluginHandle, ScopeId};
use crate::plugin_system::traits::PluginClass;

/// Bookkeeping tables of the plugin manager.
///
/// The registry only stores and indexes; it never calls plugin hooks. The
/// manager keeps it behind a mutex and releases the lock before running any
/// hook, since hooks re-enter the manager.
#[derive(Default)]
pub struct PluginRegistry {
    /// Discovered classes by plugin id
    classes: HashMap<String, PluginClass>,
    /// Class ids in registration order
    class_order: Vec<String>,
    /// Every started instance
    instances: HashMap<InstanceId, PluginHandle>,
    /// `(plugin id, scope)` -> instance
    by_scope: HashMap<(String, ScopeId), InstanceId>,
    /// Capability path (every prefix level) -> global providers
    capabilities: HashMap<String, Vec<InstanceId>>,
    /// Allowed capability -> loaded consumers declaring it
    allowed: HashMap<String, Vec<InstanceId>>,
    /// Dependency -> instances it was injected into
    dependents: HashMap<InstanceId, Vec<InstanceId>>,
    /// Provider -> `(consumer, capability)` it was injected into as allowed
    allowed_into: HashMap<InstanceId, Vec<(InstanceId, String)>>,
    /// Consumer -> group scope used for its same-scope replicas
    group_scopes: HashMap<InstanceId, ScopeId>,
    events: EventIndex,
    current_id: u64,
    current_replica_id: u64,
    current_scope_id: u64,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("classes", &self.class_order)
            .field("instances", &self.instances.len())
            .field("capabilities", &self.capabilities.len())
            .field("events", &self.events)
            .field("current_id", &self.current_id)
            .finish_non_exhaustive()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // --- classes ---

    pub fn register_class(&mut self, class: PluginClass) -> PluginResult<()> {
        let id = class.id().to_string();
        if self.classes.contains_key(&id) {
            return Err(PluginSystemError::ClassAlreadyRegistered { plugin_id: id });
        }
        self.class_order.push(id.clone());
        self.classes.insert(id, class);
        Ok(())
    }

    pub fn unregister_class(&mut self, id: &str) -> Option<PluginClass> {
        self.class_order.retain(|c| c != id);
        self.classes.remove(id)
    }

    pub fn class(&self, id: &str) -> Option<&PluginClass> {
        self.classes.get(id)
    }

    pub fn has_class(&self, id: &str) -> bool {
        self.classes.contains_key(id)
    }

    /// Class ids in registration order.
    pub fn class_ids(&self) -> Vec<String> {
        self.class_order.clone()
    }

    // --- counters ---

    pub fn next_instance_id(&mut self) -> InstanceId {
        self.current_id += 1;
        InstanceId(self.current_id)
    }

    pub fn next_replica_id(&mut self) -> u64 {
        self.current_replica_id += 1;
        self.current_replica_id
    }

    pub fn next_scope_id(&mut self) -> ScopeId {
        self.current_scope_id += 1;
        ScopeId(self.current_scope_id)
    }

    // --- instances ---

    pub fn insert_instance(&mut self, handle: PluginHandle) -> PluginResult<()> {
        let key = (handle.id().to_string(), handle.scope());
        if self.by_scope.contains_key(&key) {
            return Err(PluginSystemError::AlreadyStarted {
                plugin_id: key.0,
                scope: handle.scope().0,
            });
        }
        self.by_scope.insert(key, handle.instance_id());
        self.instances.insert(handle.instance_id(), handle);
        Ok(())
    }

    /// Remove an instance and purge every index entry referencing it.
    pub fn remove_instance(&mut self, instance: InstanceId) -> Option<PluginHandle> {
        let handle = self.instances.remove(&instance)?;
        self.by_scope.remove(&(handle.id().to_string(), handle.scope()));
        self.unregister_plugin_capabilities(instance);
        self.unregister_allowed(instance);
        self.events.unsubscribe_instance(instance);
        self.dependents.remove(&instance);
        for dependents in self.dependents.values_mut() {
            dependents.retain(|d| *d != instance);
        }
        self.allowed_into.remove(&instance);
        for consumers in self.allowed_into.values_mut() {
            consumers.retain(|(c, _)| *c != instance);
        }
        self.group_scopes.remove(&instance);
        Some(handle)
    }

    pub fn instance(&self, instance: InstanceId) -> Option<PluginHandle> {
        self.instances.get(&instance).cloned()
    }

    pub fn instance_in_scope(&self, id: &str, scope: ScopeId) -> Option<PluginHandle> {
        self.by_scope
            .get(&(id.to_string(), scope))
            .and_then(|iid| self.instances.get(iid))
            .cloned()
    }

    pub fn global(&self, id: &str) -> Option<PluginHandle> {
        self.instance_in_scope(id, ScopeId::GLOBAL)
    }

    /// Every instance, oldest first.
    pub fn instances(&self) -> Vec<PluginHandle> {
        let mut handles: Vec<PluginHandle> = self.instances.values().cloned().collect();
        handles.sort_by_key(|h| h.instance_id());
        handles
    }

    /// Every instance (global and replicas) of a plugin id, oldest first.
    pub fn instances_of(&self, id: &str) -> Vec<PluginHandle> {
        let mut handles: Vec<PluginHandle> = self
            .instances
            .values()
            .filter(|h| h.id() == id)
            .cloned()
            .collect();
        handles.sort_by_key(|h| h.instance_id());
        handles
    }

    fn resolve(&self, ids: &[InstanceId]) -> Vec<PluginHandle> {
        ids.iter().filter_map(|iid| self.instances.get(iid).cloned()).collect()
    }

    // --- capability index ---

    /// Index every prefix level of every capability of a global instance.
    pub fn register_plugin_capabilities(&mut self, handle: &PluginHandle) {
        if !handle.scope().is_global() {
            return;
        }
        for capability in &handle.descriptor().capabilities {
            for level in path_and_ancestors(capability) {
                let providers = self.capabilities.entry(level).or_default();
                if !providers.contains(&handle.instance_id()) {
                    providers.push(handle.instance_id());
                }
            }
        }
    }

    pub fn unregister_plugin_capabilities(&mut self, instance: InstanceId) {
        self.capabilities.retain(|_, providers| {
            providers.retain(|p| *p != instance);
            !providers.is_empty()
        });
    }

    /// Providers of `capability` or any of its descendants, in start order.
    pub fn providers_of(&self, capability: &str) -> Vec<PluginHandle> {
        self.capabilities
            .get(capability)
            .map(|ids| self.resolve(ids))
            .unwrap_or_default()
    }

    // --- allowed index ---

    pub fn register_allowed(&mut self, consumer: &PluginHandle) {
        for allowed in &consumer.descriptor().capabilities_allowed {
            let consumers = self.allowed.entry(allowed.capability.clone()).or_default();
            if !consumers.contains(&consumer.instance_id()) {
                consumers.push(consumer.instance_id());
            }
        }
    }

    pub fn unregister_allowed(&mut self, consumer: InstanceId) {
        self.allowed.retain(|_, consumers| {
            consumers.retain(|c| *c != consumer);
            !consumers.is_empty()
        });
    }

    /// Loaded consumers whose allowed capability is satisfied by one of `capabilities`.
    ///
    /// Returns `(consumer, allowed capability)` pairs without duplicates.
    pub fn consumers_allowing(&self, capabilities: &[String]) -> Vec<(PluginHandle, String)> {
        let mut seen = HashSet::new();
        let mut result = Vec::new();
        for capability in capabilities {
            for level in path_and_ancestors(capability) {
                let Some(consumers) = self.allowed.get(&level) else {
                    continue;
                };
                for consumer in consumers {
                    if seen.insert((*consumer, level.clone())) {
                        if let Some(handle) = self.instances.get(consumer) {
                            result.push((handle.clone(), level.clone()));
                        }
                    }
                }
            }
        }
        result
    }

    // --- relationship indexes ---

    pub fn add_dependent(&mut self, dependency: InstanceId, dependent: InstanceId) {
        let dependents = self.dependents.entry(dependency).or_default();
        if !dependents.contains(&dependent) {
            dependents.push(dependent);
        }
    }

    pub fn remove_dependent(&mut self, dependency: InstanceId, dependent: InstanceId) {
        if let Some(dependents) = self.dependents.get_mut(&dependency) {
            dependents.retain(|d| *d != dependent);
            if dependents.is_empty() {
                self.dependents.remove(&dependency);
            }
        }
    }

    pub fn dependents_of(&self, dependency: InstanceId) -> Vec<PluginHandle> {
        self.dependents
            .get(&dependency)
            .map(|ids| self.resolve(ids))
            .unwrap_or_default()
    }

    pub fn add_allowed_into(&mut self, provider: InstanceId, consumer: InstanceId, capability: &str) {
        let entries = self.allowed_into.entry(provider).or_default();
        if !entries.iter().any(|(c, cap)| *c == consumer && cap == capability) {
            entries.push((consumer, capability.to_string()));
        }
    }

    pub fn remove_allowed_into(&mut self, provider: InstanceId, consumer: InstanceId, capability: &str) {
        if let Some(entries) = self.allowed_into.get_mut(&provider) {
            entries.retain(|(c, cap)| !(*c == consumer && cap == capability));
            if entries.is_empty() {
                self.allowed_into.remove(&provider);
            }
        }
    }

    /// Consumers `provider` was injected into, with the capability used.
    pub fn allowed_into(&self, provider: InstanceId) -> Vec<(PluginHandle, String)> {
        self.allowed_into
            .get(&provider)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|(c, cap)| self.instances.get(c).map(|h| (h.clone(), cap.clone())))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// True while some instance still holds `instance` as dependency or allowed plugin.
    pub fn is_referenced(&self, instance: InstanceId) -> bool {
        self.dependents.get(&instance).is_some_and(|d| !d.is_empty())
            || self.allowed_into.get(&instance).is_some_and(|a| !a.is_empty())
    }

    // --- diffusion scopes ---

    /// The group scope of `consumer`, allocated on first use.
    pub fn group_scope(&mut self, consumer: InstanceId) -> ScopeId {
        if let Some(scope) = self.group_scopes.get(&consumer) {
            return *scope;
        }
        let scope = self.next_scope_id();
        self.group_scopes.insert(consumer, scope);
        scope
    }

    // --- events ---

    pub fn events(&self) -> &EventIndex {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventIndex {
        &mut self.events
    }
}
