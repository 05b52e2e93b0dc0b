//! # Colony Event System Errors
//!
//! Defines [`EventSystemError`], raised when a subscription cannot be
//! registered.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventSystemError {
    #[error("Failed to register event handler for pattern '{pattern}': {reason}")]
    HandlerRegistrationFailed { pattern: String, reason: String },
}
