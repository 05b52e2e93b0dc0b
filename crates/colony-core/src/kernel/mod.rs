//! # Colony Kernel
//!
//! Application bootstrapping and process level concerns.
//!
//! - **Bootstrapping**: [`Application`](bootstrap::Application) turns a
//!   configuration store into a running plugin manager and drives manifest
//!   discovery, the main loop and shutdown.
//! - **Shutdown watchdog**: [`KillTimer`](shutdown::KillTimer) terminates the
//!   process when unloading the plugin system exceeds the unload timeout.
//! - **Core Constants**: configuration keys, defaults and layout names in
//!   the `constants` submodule.
//! - **Error Handling**: the crate-wide [`Error`](error::Error) and `Result` alias.
pub mod bootstrap;
pub mod constants;
pub mod error;
pub mod shutdown;

pub use bootstrap::{Application, ShutdownHandle};
pub use error::{Error, KernelLifecyclePhase, Result};
pub use shutdown::{KillAction, KillTimer};

#[cfg(test)]
mod tests;
