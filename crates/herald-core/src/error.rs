//! Unified error types for the Herald core.
//!
//! None of these ever reach the transport layer: the router logs them where
//! they happen and reports a [`Route`](crate::router::Route) instead. They
//! surface only on host-app facing calls such as handler registration.

use thiserror::Error;

use crate::callback::CallbackHandle;

// =============================================================================
// Payload Errors
// =============================================================================

/// Errors raised while turning raw transport data into a payload.
#[derive(Debug, Clone, Error)]
pub enum PayloadError {
    /// The data is not valid JSON.
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),

    /// The data is valid JSON but not an object.
    #[error("payload must be a JSON object, got {kind}")]
    NotAnObject {
        /// The JSON kind that was received instead.
        kind: &'static str,
    },
}

impl From<serde_json::Error> for PayloadError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidJson(err.to_string())
    }
}

// =============================================================================
// Store Errors
// =============================================================================

/// Errors reported by a [`KeyValueStore`](crate::store::KeyValueStore) backend.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The backend rejected the operation.
    #[error("store backend error: {0}")]
    Backend(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// =============================================================================
// Queue Errors
// =============================================================================

/// Errors that can occur while reading or mutating the pending queue.
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The queue document could not be encoded.
    #[error("failed to encode pending queue: {0}")]
    Encode(String),
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encode(err.to_string())
    }
}

// =============================================================================
// Execution Context Errors
// =============================================================================

/// Errors from the background execution context lifecycle.
#[derive(Debug, Clone, Error)]
pub enum ContextError {
    /// No callback handles were supplied and none are persisted.
    #[error("callback handles are missing from the store")]
    MissingHandles,

    /// A handle does not map to any registered callback.
    #[error("no callback registered for handle {0}")]
    UnresolvedHandle(CallbackHandle),

    /// The context has not reported ready yet.
    #[error("execution context is not ready")]
    NotReady,

    /// The context's inbound channel has gone away.
    #[error("execution context channel closed")]
    ChannelClosed,

    /// There is no async runtime to host the context on.
    #[error("no async runtime available to host the execution context")]
    NoRuntime,

    /// Reading or writing persisted handles failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// =============================================================================
// Listener Errors
// =============================================================================

/// Errors from pushing into a foreground listener.
#[derive(Debug, Clone, Error)]
pub enum ListenerError {
    /// The listener's receiving side has been dropped.
    #[error("listener is gone")]
    Gone,

    /// The sink refused the event.
    #[error("failed to push to listener: {0}")]
    PushFailed(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Result type for execution context operations.
pub type ContextResult<T> = Result<T, ContextError>;

/// Result type for listener pushes.
pub type ListenerResult<T> = Result<T, ListenerError>;
