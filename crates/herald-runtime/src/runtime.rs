//! Composition root.
//!
//! [`HeraldRuntime`] owns the one store, callback registry, router and plugin
//! bridge of a process. Build it once at startup, register background
//! callbacks on it before [`start`](HeraldRuntime::start), then hand
//! [`bridge`](HeraldRuntime::bridge) to the transport and UI layers.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use herald_runtime::HeraldRuntime;
//!
//! let runtime = HeraldRuntime::builder()
//!     .config_file("config/herald.toml")
//!     .entry_point(1, |ctx| async move { ctx.ready(); })
//!     .notification_handler(2, |payload| async move {
//!         tracing::info!(%payload, "background notification");
//!         anyhow::Ok(())
//!     })
//!     .build()?;
//!
//! let transport = runtime.bridge();
//! runtime.run().await?;
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use herald_core::{
    BackgroundContext, CallbackHandle, CallbackRegistry, ContextError, ExecutionContextManager,
    NotificationPayload, NotificationRouter, PendingQueue, PluginBridge, SharedStore,
};
use tokio::signal;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigLoader, HeraldConfig, validate_config};
use crate::error::RuntimeResult;
use crate::logging;
use crate::store::SledStore;

/// The process-wide Herald instance.
pub struct HeraldRuntime {
    config: HeraldConfig,
    store: SharedStore,
    registry: CallbackRegistry,
    router: Arc<NotificationRouter>,
    bridge: Arc<PluginBridge>,
    running: RwLock<bool>,
}

impl HeraldRuntime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from loaded configuration, opening the configured store.
    pub fn from_config(config: HeraldConfig) -> RuntimeResult<Self> {
        logging::init_from_config(&config.logging);
        validate_config(&config)?;

        let store: SharedStore = SledStore::from_config(&config.storage)?.shared();
        Ok(Self::with_parts(config, store, CallbackRegistry::new()))
    }

    /// Assembles a runtime from already constructed parts.
    pub fn with_parts(config: HeraldConfig, store: SharedStore, registry: CallbackRegistry) -> Self {
        let queue = PendingQueue::new(store.clone())
            .with_key(config.queue.key.clone())
            .with_max_pending(config.queue.max_pending);
        let context = ExecutionContextManager::new(store.clone(), registry.clone());
        let router = Arc::new(NotificationRouter::new(queue, context));
        let bridge = Arc::new(PluginBridge::new(router.clone()));

        info!(
            queue_key = %config.queue.key,
            max_pending = ?config.queue.max_pending,
            resume_on_start = config.context.resume_on_start,
            "Herald runtime created"
        );

        Self {
            config,
            store,
            registry,
            router,
            bridge,
            running: RwLock::new(false),
        }
    }

    pub fn config(&self) -> &HeraldConfig {
        &self.config
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Registry to populate with background callbacks before starting.
    pub fn registry(&self) -> &CallbackRegistry {
        &self.registry
    }

    pub fn router(&self) -> &Arc<NotificationRouter> {
        &self.router
    }

    /// The boundary handed to the transport and UI layers.
    pub fn bridge(&self) -> Arc<PluginBridge> {
        self.bridge.clone()
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Starts the runtime, resuming the background context from persisted
    /// handles when configured to.
    ///
    /// Having no persisted handles is fine; handles that are persisted but
    /// cannot be resolved or launched fail the start.
    pub async fn start(&self) -> RuntimeResult<()> {
        let mut running = self.running.write().await;
        if *running {
            warn!("Runtime is already running");
            return Ok(());
        }

        match self.router.queue().len() {
            Ok(pending) if pending > 0 => info!(pending, "Pending notifications found"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Could not inspect the pending queue"),
        }

        if self.config.context.resume_on_start {
            match self.bridge.resume() {
                Ok(()) => {}
                Err(ContextError::MissingHandles) => {
                    debug!("No persisted callback handles, background context stays idle");
                }
                Err(e) => {
                    error!(error = %e, "Could not resume background context");
                    return Err(e.into());
                }
            }
        }

        *running = true;
        info!(state = %self.router.state(), "Herald runtime started");
        Ok(())
    }

    /// Stops the runtime and flushes the store.
    pub async fn stop(&self) -> RuntimeResult<()> {
        {
            let mut running = self.running.write().await;
            if !*running {
                warn!("Runtime is not running");
                return Ok(());
            }
            *running = false;
        }

        self.store.flush()?;
        info!("Herald runtime stopped");
        Ok(())
    }

    /// Runs until Ctrl+C or SIGTERM.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.start().await?;
        info!("Herald runtime is now running. Press Ctrl+C to stop.");
        wait_for_shutdown().await;
        self.stop().await
    }

    /// Runs until `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        self.stop().await
    }
}

impl std::fmt::Debug for HeraldRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeraldRuntime")
            .field("router", &self.router)
            .field("registry", &self.registry)
            .finish()
    }
}

/// Waits for Ctrl+C or SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to register SIGTERM handler"),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for a [`HeraldRuntime`].
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    store: Option<SharedStore>,
    registry: CallbackRegistry,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
            store: None,
            registry: CallbackRegistry::new(),
        }
    }

    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    pub fn merge(mut self, config: HeraldConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Uses `store` instead of opening the configured sled database.
    pub fn store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Shares an existing callback registry.
    pub fn registry(mut self, registry: CallbackRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Registers the background entry point under `handle`.
    pub fn entry_point<F, Fut>(self, handle: impl Into<CallbackHandle>, f: F) -> Self
    where
        F: Fn(BackgroundContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.registry.register_entry(handle.into(), f);
        self
    }

    /// Registers a background notification handler under `handle`.
    pub fn notification_handler<F, Fut>(self, handle: impl Into<CallbackHandle>, f: F) -> Self
    where
        F: Fn(NotificationPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.registry.register_handler(handle.into(), f);
        self
    }

    pub fn build(self) -> RuntimeResult<HeraldRuntime> {
        let config = self.config_loader.load()?;
        logging::init_from_config(&config.logging);
        validate_config(&config)?;

        let store = match self.store {
            Some(store) => store,
            None => SledStore::from_config(&config.storage)?.shared(),
        };
        Ok(HeraldRuntime::with_parts(config, store, self.registry))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
