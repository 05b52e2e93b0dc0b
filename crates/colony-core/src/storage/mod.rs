pub mod config;
pub mod error;
pub mod layout;

/// Re-export key types
pub use config::{Cast, ConfigFormat, ConfigStore, ManagerConfig};
pub use error::StorageSystemError;
pub use layout::{LayoutMode, ManagerLayout};

// Test module declaration
#[cfg(test)]
mod tests;
