//! # Herald
//!
//! Push notification delivery that gets every payload to exactly one live
//! consumer, even when the UI is closed and the background worker has not
//! started yet.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐     ┌──────────────┐     ┌────────────────────┐
//! │ Transport │────▶│ PluginBridge │────▶│ NotificationRouter │──▶ foreground listener
//! └───────────┘     └──────────────┘     │                    │──▶ background context
//!                          ▲             └────────────────────┘──▶ durable queue
//!                       UI layer
//! ```
//!
//! - **Runtime**: owns the store, callback registry and router of the process
//! - **Router**: picks the consumer for each payload and drains the queue
//! - **Background context**: runs user callbacks resolved from persisted handles
//! - **Durable queue**: keeps payloads across restarts until someone takes them
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use herald::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = HeraldRuntime::builder()
//!         .entry_point(1, |ctx: BackgroundContext| async move { ctx.ready(); })
//!         .notification_handler(2, |payload: NotificationPayload| async move {
//!             info!(%payload, "background notification");
//!             anyhow::Ok(())
//!         })
//!         .build()?;
//!
//!     let bridge = runtime.bridge();
//!     bridge.register_background_handlers(CallbackHandles::new(1, 2))?;
//!     bridge.on_raw_push(br#"{"message":"hi"}"#).await;
//!
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: TOML configuration files (default)
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use herald_core as core;
pub use herald_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use herald::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use herald_runtime::{HeraldConfig, HeraldRuntime, RuntimeBuilder, SledStore};

    // Boundary traits - for transports and UI bindings
    pub use herald_core::{PluginBridge, PushReceiver, UiBinding};

    // Payloads and routing
    pub use herald_core::{NotificationPayload, NotificationRouter, Route};

    // Background callbacks
    pub use herald_core::{BackgroundContext, CallbackHandle, CallbackHandles, ContextState};

    // Listeners
    pub use herald_core::{ChannelSink, ListenerSink, ListenerToken};

    // Stores
    pub use herald_core::{KeyValueStore, MemoryStore, SharedStore};

    // Logging macros
    pub use herald_runtime::prelude::*;
}
