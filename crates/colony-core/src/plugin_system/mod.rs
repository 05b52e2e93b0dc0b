//! # Colony Plugin System
//!
//! Discovery, instantiation, dependency injection and lifecycle of plugins.
//!
//! ## Key Submodules and Responsibilities:
//!
//! - **[`capability`]**: the dot-separated hierarchy shared by capabilities and
//!   event names.
//! - **[`descriptor`]** and **[`traits`]**: plugin metadata, the [`Plugin`] hook
//!   trait and [`PluginClass`] (descriptor plus factory).
//! - **[`dependency`]** and **[`version`]**: dependency descriptors, their
//!   feasibility checks and version matching.
//! - **[`instance`]**: managed instances, their lifecycle state and the
//!   [`PluginHandle`] shared with other plugins.
//! - **[`registry`]**: the bookkeeping tables behind the manager.
//! - **[`manager`]**: the [`PluginManager`] itself. Loading, unloading and
//!   injection live in the private `lifecycle` and `injection` modules.
//! - **[`threads`]**: worker threads of plugins providing the `main` or
//!   `thread` capability.
//! - **[`manifest`]** and **[`loader`]**: `manifest.json` discovery and the
//!   factory catalog binding manifests to compiled-in plugins.
//! - **[`logger`]**: the identity prefixed logging contract.
pub mod capability;
pub mod dependency;
pub mod descriptor;
pub mod error;
mod injection;
pub mod instance;
mod lifecycle;
pub mod loader;
pub mod logger;
pub mod manager;
pub mod manifest;
pub mod registry;
pub mod threads;
pub mod traits;
pub mod version;

pub use capability::CapabilityPath;
pub use dependency::{Dependency, PackageDependency, PluginDependency};
pub use descriptor::{AllowedCapability, DiffusionPolicy, LoadingType, PluginDescriptor};
pub use error::{PluginResult, PluginSystemError};
pub use instance::{InstanceId, LifecycleState, PluginHandle, PluginStatus, ScopeId};
pub use lifecycle::LoadMode;
pub use loader::{ManifestLoader, PluginCatalog};
pub use manager::PluginManager;
pub use manifest::PluginManifest;
pub use registry::PluginRegistry;
pub use traits::{HookResult, Plugin, PluginClass, PluginContext, PluginError};
pub use version::VersionRange;

#[cfg(test)]
mod tests;
