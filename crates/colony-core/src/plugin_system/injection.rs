//! Dependency and allowed plugin injection, diffusion scopes and replicas.
use std::sync::Arc;

use crate::plugin_system::descriptor::{DiffusionPolicy, LoadingType};
use crate::plugin_system::error::{PluginResult, PluginSystemError};
use crate::plugin_system::instance::{LifecycleState, PluginHandle, PluginInstance, ScopeId};
use crate::plugin_system::lifecycle::{catch_hook, LoadMode};
use crate::plugin_system::manager::PluginManager;
use crate::plugin_system::registry::PluginRegistry;
use crate::plugin_system::traits::PluginContext;
use crate::plugin_system::version::is_version_compatible;

impl PluginManager {
    /// Load and inject every applicable plugin dependency of `handle`.
    ///
    /// `Ok(false)` when a mandatory dependency is missing, incompatible,
    /// failed to load, or closes a cycle with `trail`.
    pub(crate) fn inject_dependencies(&self, handle: &PluginHandle, trail: &mut Vec<String>) -> PluginResult<bool> {
        let descriptor = Arc::clone(handle.descriptor());
        for dependency in descriptor.plugin_dependencies() {
            if !dependency.is_applicable() {
                continue;
            }
            if trail.iter().any(|id| *id == dependency.id) {
                let mut path = trail.clone();
                path.push(dependency.id.clone());
                let error = PluginSystemError::cyclic(path);
                self.logger().error(&format!(
                    "Problem loading plugin {}: {}",
                    descriptor.display_name(),
                    error
                ));
                if self.config().stop_on_cycle_error {
                    return Err(error);
                }
                return Ok(false);
            }

            let target = match self.resolve_instance(&dependency.id, dependency.diffusion_policy, handle)? {
                Some(target) if is_version_compatible(target.version(), &dependency.version) => target,
                resolved => {
                    if let Some(unused) = resolved {
                        self.discard_replica(unused);
                    }
                    if dependency.mandatory {
                        self.logger().info(&format!(
                            "Plugin {} is missing {}",
                            descriptor.display_name(),
                            dependency
                        ));
                        return Ok(false);
                    }
                    continue;
                }
            };
            let loaded = self.load_instance(&target, LoadMode::Full, trail);
            if !matches!(loaded, Ok(true)) {
                self.discard_replica(Arc::clone(&target));
            }
            if !loaded? {
                if dependency.mandatory {
                    self.logger().info(&format!(
                        "Plugin {} could not load its dependency '{}'",
                        descriptor.display_name(),
                        dependency.id
                    ));
                    return Ok(false);
                }
                continue;
            }

            handle.add_dependency(Arc::clone(&target));
            self.registry().add_dependent(target.instance_id(), handle.instance_id());
            let ctx = PluginContext::new(self.clone(), Arc::clone(handle));
            if let Err(e) = catch_hook(|| handle.plugin().dependency_injected(&ctx, &target)) {
                return self.hook_failed(handle, "dependency_injected", e);
            }
        }
        Ok(true)
    }

    /// Inject every loaded (or lazy loadable) provider of the consumer's allowed capabilities.
    pub(crate) fn inject_allowed(&self, consumer: &PluginHandle) -> PluginResult<bool> {
        let allowed_capabilities = consumer.descriptor().capabilities_allowed.clone();
        for allowed in allowed_capabilities {
            let providers = self.registry().providers_of(&allowed.capability);
            for provider in providers {
                if provider.id() == consumer.id() || provider.is_error() {
                    continue;
                }
                let target = match allowed.policy {
                    DiffusionPolicy::Singleton => {
                        if !provider.is_loaded() {
                            if provider.descriptor().loading_type != LoadingType::Lazy {
                                continue;
                            }
                            if !self.load_instance(&provider, LoadMode::Full, &mut Vec::new())? {
                                continue;
                            }
                        }
                        provider
                    }
                    _ if consumer.has_allowed_of(provider.id(), &allowed.capability) => continue,
                    policy => match self.loaded_replica(provider.id(), policy, consumer)? {
                        Some(replica) => replica,
                        None => continue,
                    },
                };
                if consumer.has_allowed(&target, &allowed.capability) {
                    continue;
                }
                if !self.load_allowed(consumer, &target, &allowed.capability)? {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Retroactively wire a freshly loaded global provider into loaded consumers.
    ///
    /// A consumer whose `load_allowed` hook fails is put in error state; the
    /// provider load goes on.
    pub(crate) fn inject_all_allowed(&self, provider: &PluginHandle) -> PluginResult<()> {
        if !provider.scope().is_global() {
            return Ok(());
        }
        let consumers = self
            .registry()
            .consumers_allowing(&provider.descriptor().capabilities);
        for (consumer, capability) in consumers {
            if consumer.id() == provider.id() || consumer.is_error() || !consumer.is_loaded() {
                continue;
            }
            let policy = consumer
                .descriptor()
                .capabilities_allowed
                .iter()
                .find(|allowed| allowed.capability == capability)
                .map(|allowed| allowed.policy)
                .unwrap_or_default();
            let target = match policy {
                DiffusionPolicy::Singleton => Arc::clone(provider),
                _ if consumer.has_allowed_of(provider.id(), &capability) => continue,
                policy => match self.loaded_replica(provider.id(), policy, &consumer)? {
                    Some(replica) => replica,
                    None => continue,
                },
            };
            if consumer.has_allowed(&target, &capability) {
                continue;
            }
            self.load_allowed(&consumer, &target, &capability)?;
        }
        Ok(())
    }

    fn loaded_replica(
        &self,
        id: &str,
        policy: DiffusionPolicy,
        consumer: &PluginHandle,
    ) -> PluginResult<Option<PluginHandle>> {
        let Some(replica) = self.resolve_instance(id, policy, consumer)? else {
            return Ok(None);
        };
        match self.load_instance(&replica, LoadMode::Full, &mut Vec::new()) {
            Ok(true) => Ok(Some(replica)),
            Ok(false) => {
                self.discard_replica(replica);
                Ok(None)
            }
            Err(e) => {
                self.discard_replica(replica);
                Err(e)
            }
        }
    }

    /// Stop a replica that never made it to loaded, unless someone still holds it.
    fn discard_replica(&self, handle: PluginHandle) {
        if handle.is_replica() && handle.lifecycle() == LifecycleState::Unloaded {
            self.release_replicas(vec![handle]);
        }
    }

    /// Pick the instance of `id` a consumer gets under `policy`.
    ///
    /// Singleton yields the global instance. Same scope reuses the replica of
    /// the consumer's scope, a global consumer getting its own group scope.
    /// New scope always creates a replica in a fresh scope.
    pub(crate) fn resolve_instance(
        &self,
        id: &str,
        policy: DiffusionPolicy,
        consumer: &PluginHandle,
    ) -> PluginResult<Option<PluginHandle>> {
        let mut registry = self.registry();
        if !registry.has_class(id) {
            return Ok(None);
        }
        match policy {
            DiffusionPolicy::Singleton => Ok(registry.global(id)),
            DiffusionPolicy::SameDiffusionScope => {
                let scope = if consumer.scope().is_global() {
                    registry.group_scope(consumer.instance_id())
                } else {
                    consumer.scope()
                };
                if let Some(existing) = registry.instance_in_scope(id, scope) {
                    return Ok(Some(existing));
                }
                create_replica(&mut registry, id, scope).map(Some)
            }
            DiffusionPolicy::NewDiffusionScope => {
                let scope = registry.next_scope_id();
                create_replica(&mut registry, id, scope).map(Some)
            }
        }
    }

    /// Stop replicas nobody references anymore.
    pub(crate) fn release_replicas(&self, replicas: Vec<PluginHandle>) {
        for replica in replicas {
            if self.registry().is_referenced(replica.instance_id()) {
                continue;
            }
            if self.registry().instance(replica.instance_id()).is_none() {
                continue;
            }
            if let Err(e) = self.stop_instance(&replica) {
                self.logger().error(&format!(
                    "Problem releasing replica {} of plugin '{}': {}",
                    replica.instance_id(),
                    replica.id(),
                    e
                ));
            }
        }
    }

    /// Inject `provider` into `consumer` under `capability` and run the consumer's `load_allowed` hook.
    ///
    /// Injecting the same pair twice is an error.
    pub fn load_allowed(&self, consumer: &PluginHandle, provider: &PluginHandle, capability: &str) -> PluginResult<bool> {
        consumer.add_allowed(Arc::clone(provider), capability)?;
        self.registry()
            .add_allowed_into(provider.instance_id(), consumer.instance_id(), capability);
        let ctx = PluginContext::new(self.clone(), Arc::clone(consumer));
        if let Err(e) = catch_hook(|| consumer.plugin().load_allowed(&ctx, provider, capability)) {
            return self.hook_failed(consumer, "load_allowed", e);
        }
        Ok(true)
    }

    /// Reverse of [`load_allowed`](Self::load_allowed). The hook runs before the pair is removed.
    pub fn unload_allowed(&self, consumer: &PluginHandle, provider: &PluginHandle, capability: &str) -> PluginResult<bool> {
        if !consumer.has_allowed(provider, capability) {
            return Err(PluginSystemError::AllowedNotFound {
                consumer: consumer.id().to_string(),
                provider: provider.id().to_string(),
                capability: capability.to_string(),
            });
        }
        let ctx = PluginContext::new(self.clone(), Arc::clone(consumer));
        let hook = catch_hook(|| consumer.plugin().unload_allowed(&ctx, provider, capability));
        consumer.remove_allowed(provider, capability)?;
        self.registry()
            .remove_allowed_into(provider.instance_id(), consumer.instance_id(), capability);
        match hook {
            Ok(()) => Ok(true),
            Err(e) => self.hook_failed(consumer, "unload_allowed", e),
        }
    }
}

fn create_replica(registry: &mut PluginRegistry, id: &str, scope: ScopeId) -> PluginResult<PluginHandle> {
    let class = registry
        .class(id)
        .cloned()
        .ok_or_else(|| PluginSystemError::not_found(id))?;
    let instance_id = registry.next_instance_id();
    let replica_id = registry.next_replica_id();
    let handle = Arc::new(PluginInstance::new(
        instance_id,
        scope,
        Some(replica_id),
        Arc::clone(class.descriptor()),
        class.create(),
    ));
    registry.insert_instance(Arc::clone(&handle))?;
    log::debug!("Created replica {} of plugin '{}' in scope {}", replica_id, id, scope);
    Ok(handle)
}
