//! Declarative plugin metadata.
//!
//! A [`PluginDescriptor`] is built once, before any instance of the plugin
//! exists, and is shared immutably between the class registry and every
//! instance (singleton or replica) created from it.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::plugin_system::capability::{is_capability_or_sub_capability, is_event_handled};
use crate::plugin_system::dependency::{Dependency, PackageDependency, PluginDependency};

/// Capability marking a plugin whose hooks run on a dedicated main thread.
pub const MAIN_CAPABILITY: &str = "main";
/// Capability marking a plugin whose hooks run on a dedicated worker thread.
pub const THREAD_CAPABILITY: &str = "thread";

/// When a plugin runs its full load hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadingType {
    /// Loaded at manager start.
    #[default]
    Eager,
    /// Only lazily loaded at start; fully loaded on first capability access.
    Lazy,
}

/// How an injected plugin instance is shared between consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffusionPolicy {
    /// One global instance shared by everybody.
    #[default]
    Singleton,
    /// One replica per consumer scope.
    SameDiffusionScope,
    /// A fresh replica for every injection.
    NewDiffusionScope,
}

impl fmt::Display for DiffusionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffusionPolicy::Singleton => write!(f, "singleton_diffusion_scope"),
            DiffusionPolicy::SameDiffusionScope => write!(f, "same_diffusion_scope"),
            DiffusionPolicy::NewDiffusionScope => write!(f, "new_diffusion_scope"),
        }
    }
}

impl FromStr for DiffusionPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "singleton" | "singleton_diffusion_scope" => Ok(DiffusionPolicy::Singleton),
            "same" | "same_diffusion_scope" => Ok(DiffusionPolicy::SameDiffusionScope),
            "new" | "new_diffusion_scope" => Ok(DiffusionPolicy::NewDiffusionScope),
            other => Err(format!("Unknown diffusion policy '{}'", other)),
        }
    }
}

/// A capability a plugin consumes, together with its diffusion policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedCapability {
    pub capability: String,
    #[serde(default)]
    pub policy: DiffusionPolicy,
}

impl AllowedCapability {
    pub fn new(capability: &str) -> Self {
        Self {
            capability: capability.to_string(),
            policy: DiffusionPolicy::Singleton,
        }
    }

    pub fn with_policy(capability: &str, policy: DiffusionPolicy) -> Self {
        Self {
            capability: capability.to_string(),
            policy,
        }
    }
}

/// Immutable plugin metadata.
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    pub id: String,
    pub name: String,
    pub short_name: String,
    pub description: String,
    pub author: String,
    pub version: String,
    pub loading_type: LoadingType,
    pub platforms: Vec<String>,
    pub capabilities: Vec<String>,
    pub capabilities_allowed: Vec<AllowedCapability>,
    pub dependencies: Vec<Dependency>,
    pub events_fired: Vec<String>,
    pub events_handled: Vec<String>,
    /// Positional arity a handler pattern expects, when it differs from the fired arguments
    pub event_arities: BTreeMap<String, usize>,
    pub main_modules: Vec<String>,
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl PluginDescriptor {
    /// Start building a descriptor for `id` at `version`.
    pub fn builder(id: &str, version: &str) -> PluginDescriptorBuilder {
        PluginDescriptorBuilder::new(id, version)
    }

    /// True when the plugin provides `capability` or one of its descendants.
    pub fn provides(&self, capability: &str) -> bool {
        self.capabilities
            .iter()
            .any(|candidate| is_capability_or_sub_capability(capability, candidate))
    }

    /// True when the plugin runs its hooks on a dedicated thread.
    pub fn is_threaded(&self) -> bool {
        self.capabilities
            .iter()
            .any(|c| c == MAIN_CAPABILITY || c == THREAD_CAPABILITY)
    }

    pub fn plugin_dependencies(&self) -> impl Iterator<Item = &PluginDependency> {
        self.dependencies.iter().filter_map(|dep| match dep {
            Dependency::Plugin(plugin_dep) => Some(plugin_dep),
            Dependency::Package(_) => None,
        })
    }

    pub fn package_dependencies(&self) -> impl Iterator<Item = &PackageDependency> {
        self.dependencies.iter().filter_map(|dep| match dep {
            Dependency::Package(package_dep) => Some(package_dep),
            Dependency::Plugin(_) => None,
        })
    }

    pub fn handler_arity(&self, pattern: &str) -> Option<usize> {
        self.event_arities.get(pattern).copied()
    }

    /// True when `event` equals or descends from a declared `events_fired` entry.
    pub fn fires(&self, event: &str) -> bool {
        self.events_fired
            .iter()
            .any(|declared| is_event_handled(declared, event))
    }

    /// "name v1.0.0" form used in log messages.
    pub fn display_name(&self) -> String {
        format!("{} v{}", self.name, self.version)
    }
}

/// Builder producing an immutable [`PluginDescriptor`].
#[derive(Debug, Clone)]
pub struct PluginDescriptorBuilder {
    descriptor: PluginDescriptor,
}

impl PluginDescriptorBuilder {
    pub fn new(id: &str, version: &str) -> Self {
        Self {
            descriptor: PluginDescriptor {
                id: id.to_string(),
                name: id.to_string(),
                short_name: id.rsplit('.').next().unwrap_or(id).to_string(),
                description: String::new(),
                author: String::new(),
                version: version.to_string(),
                loading_type: LoadingType::Eager,
                platforms: Vec::new(),
                capabilities: Vec::new(),
                capabilities_allowed: Vec::new(),
                dependencies: Vec::new(),
                events_fired: Vec::new(),
                events_handled: Vec::new(),
                event_arities: BTreeMap::new(),
                main_modules: Vec::new(),
                attributes: BTreeMap::new(),
            },
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.descriptor.name = name.to_string();
        self
    }

    pub fn short_name(mut self, short_name: &str) -> Self {
        self.descriptor.short_name = short_name.to_string();
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.descriptor.description = description.to_string();
        self
    }

    pub fn author(mut self, author: &str) -> Self {
        self.descriptor.author = author.to_string();
        self
    }

    pub fn loading_type(mut self, loading_type: LoadingType) -> Self {
        self.descriptor.loading_type = loading_type;
        self
    }

    pub fn platform(mut self, platform: &str) -> Self {
        self.descriptor.platforms.push(platform.to_string());
        self
    }

    pub fn capability(mut self, capability: &str) -> Self {
        self.descriptor.capabilities.push(capability.to_string());
        self
    }

    pub fn capability_allowed(mut self, capability: &str) -> Self {
        self.descriptor.capabilities_allowed.push(AllowedCapability::new(capability));
        self
    }

    pub fn capability_allowed_with(mut self, capability: &str, policy: DiffusionPolicy) -> Self {
        self.descriptor
            .capabilities_allowed
            .push(AllowedCapability::with_policy(capability, policy));
        self
    }

    pub fn dependency(mut self, dependency: impl Into<Dependency>) -> Self {
        self.descriptor.dependencies.push(dependency.into());
        self
    }

    pub fn event_fired(mut self, event: &str) -> Self {
        self.descriptor.events_fired.push(event.to_string());
        self
    }

    pub fn event_handled(mut self, event: &str) -> Self {
        self.descriptor.events_handled.push(event.to_string());
        self
    }

    /// Handle `event` with a handler expecting `arity` positional arguments.
    pub fn event_handled_with_arity(mut self, event: &str, arity: usize) -> Self {
        self.descriptor.events_handled.push(event.to_string());
        self.descriptor.event_arities.insert(event.to_string(), arity);
        self
    }

    pub fn main_module(mut self, module: &str) -> Self {
        self.descriptor.main_modules.push(module.to_string());
        self
    }

    pub fn attribute(mut self, key: &str, value: serde_json::Value) -> Self {
        self.descriptor.attributes.insert(key.to_string(), value);
        self
    }

    pub fn build(self) -> PluginDescriptor {
        self.descriptor
    }
}
