pub mod event;
pub mod kernel;
pub mod plugin_system;
pub mod storage;

// Re-export key public types for the binary and plugin crates
pub use event::{EventSource, PluginEvent};
pub use kernel::error::Error as KernelError;
pub use kernel::Application;
pub use plugin_system::{
    DiffusionPolicy, LoadingType, Plugin, PluginClass, PluginContext, PluginDescriptor, PluginError,
    PluginHandle, PluginManager, PluginManifest,
};
pub use storage::{ConfigStore, ManagerConfig};
