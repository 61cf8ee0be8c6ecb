//! Herald Runtime - composition layer for the Herald push bridge.
//!
//! This crate provides:
//! - The process-wide composition root (`HeraldRuntime`, `RuntimeBuilder`)
//! - Layered configuration loading with figment (`config`)
//! - Logging setup (`logging`)
//! - A sled-backed durable store (`SledStore`)
//!
//! ```ignore
//! use herald_runtime::HeraldRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = HeraldRuntime::builder().build()?;
//!
//!     // Hand the bridge to the transport and UI layers.
//!     let bridge = runtime.bridge();
//!
//!     // Run until Ctrl+C
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod store;

pub use config::{ConfigError, ConfigLoader, ConfigResult, HeraldConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{HeraldRuntime, RuntimeBuilder};
pub use store::SledStore;

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
