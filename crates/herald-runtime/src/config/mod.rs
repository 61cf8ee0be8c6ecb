//! Configuration module for the Herald runtime.
//!
//! Layered loading (defaults, files, environment) lives in [`loader`], the
//! typed schema in [`schema`], and sanity checks in [`validation`].

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile};
pub use schema::{
    ContextConfig, HeraldConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig,
    QueueConfig, SpanEventConfig, StorageConfig,
};
pub use validation::validate_config;
