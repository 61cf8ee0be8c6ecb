//! # Herald Core
//!
//! Delivery router for push notifications with durable queuing.
//!
//! Each incoming payload is handed to exactly one live consumer, even though
//! every consumer comes and goes on its own schedule:
//!
//! - **Foreground listener** ([`ListenerRegistry`]): the UI's event
//!   subscriber. Takes absolute priority while attached.
//! - **Background context** ([`ExecutionContextManager`]): a long-lived task
//!   running user callbacks resolved through a [`CallbackRegistry`]. Survives
//!   process restarts through persisted [`CallbackHandle`]s.
//! - **Durable queue** ([`PendingQueue`]): holds payloads until one of the
//!   above is ready to take them.
//!
//! ## Flow
//!
//! ```text
//! ┌───────────┐     ┌──────────────┐     ┌────────────────────┐
//! │ Transport │────▶│ PluginBridge │────▶│ NotificationRouter │──▶ listener
//! └───────────┘     └──────────────┘     └────────────────────┘──▶ background context
//!                          ▲                                   └──▶ pending queue
//!                      UI binding
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use herald_core::prelude::*;
//! use std::sync::Arc;
//!
//! let registry = CallbackRegistry::new();
//! registry.register_entry(CallbackHandle::new(1), |ctx: BackgroundContext| async move {
//!     ctx.ready();
//! });
//! registry.register_handler(CallbackHandle::new(2), |payload| async move {
//!     tracing::info!(%payload, "background notification");
//!     anyhow::Ok(())
//! });
//!
//! let router = Arc::new(NotificationRouter::from_store(MemoryStore::shared(), registry));
//! let bridge = PluginBridge::new(router);
//! bridge.register_background_handlers(CallbackHandles::new(1, 2))?;
//!
//! bridge.on_raw_push(br#"{"message":"hi"}"#).await;
//! ```

pub mod bridge;
pub mod callback;
pub mod context;
pub mod error;
pub mod listener;
pub mod payload;
pub mod queue;
pub mod router;
pub mod store;

pub use bridge::{PluginBridge, PushReceiver, UiBinding};
pub use callback::{
    CallbackHandle, CallbackHandles, CallbackRegistry, EntryCallback, NotificationCallback,
};
pub use context::{
    BackgroundContext, ContextState, ENTRY_HANDLE_KEY, ExecutionContextManager,
    HANDLER_HANDLE_KEY, ReadySignal, StartOutcome,
};
pub use error::{
    ContextError, ContextResult, ListenerError, ListenerResult, PayloadError, QueueError,
    QueueResult, StoreError, StoreResult,
};
pub use listener::{ChannelSink, ListenerRegistry, ListenerSink, ListenerToken};
pub use payload::{CLICKED_KEY, MESSAGE_KEY, NotificationPayload};
pub use queue::{DEFAULT_QUEUE_KEY, PendingQueue, QUEUE_FORMAT_VERSION};
pub use router::{NotificationRouter, Route};
pub use store::{KeyValueStore, MemoryStore, SharedStore};

/// Commonly used types.
pub mod prelude {
    pub use crate::bridge::{PluginBridge, PushReceiver, UiBinding};
    pub use crate::callback::{CallbackHandle, CallbackHandles, CallbackRegistry};
    pub use crate::context::{BackgroundContext, ContextState};
    pub use crate::listener::{ChannelSink, ListenerSink, ListenerToken};
    pub use crate::payload::NotificationPayload;
    pub use crate::router::{NotificationRouter, Route};
    pub use crate::store::{KeyValueStore, MemoryStore, SharedStore};
}
