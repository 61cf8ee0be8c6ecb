//! Runtime error types.

use thiserror::Error;

pub use crate::config::{ConfigError, ConfigResult};

/// Errors that can occur while building or running a [`HeraldRuntime`](crate::HeraldRuntime).
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The durable store could not be opened or flushed.
    #[error("Store error: {0}")]
    Store(#[from] herald_core::StoreError),

    /// The background execution context could not be started.
    #[error("Execution context error: {0}")]
    Context(#[from] herald_core::ContextError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
