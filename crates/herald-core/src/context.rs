//! Lifecycle of the single background execution context.
//!
//! The context is an isolated tokio task that runs user callbacks while no
//! foreground listener is around. At most one exists per
//! [`ExecutionContextManager`], and it moves through three states:
//!
//! ```text
//! NotStarted ──ensure_started──▶ Starting ──on_ready──▶ Ready
//! ```
//!
//! Nothing leaves `Ready` for the lifetime of the manager. A fresh process
//! always begins at `NotStarted` and resumes from the handles persisted in the
//! store, so a restart does not need the host to register them again.
//!
//! Each handler call is isolated: an error or a panic is logged and the context
//! moves on to the next payload. A `Ready` context whose channel has died (its
//! runtime shut down, say) stays `Ready`; forwarding to it fails with
//! [`ContextError::ChannelClosed`].

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::callback::{CallbackHandle, CallbackHandles, CallbackRegistry, EntryCallback};
use crate::error::{ContextError, ContextResult};
use crate::payload::NotificationPayload;
use crate::store::SharedStore;

/// Store key of the persisted entry handle.
pub const ENTRY_HANDLE_KEY: &str = "herald.entry_handle";

/// Store key of the persisted notification handler handle.
pub const HANDLER_HANDLE_KEY: &str = "herald.handler_handle";

/// Where the background context is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextState {
    /// No context has been launched in this process.
    #[default]
    NotStarted,
    /// Launched, waiting for the entry callback to signal ready.
    Starting,
    /// Accepting forwarded payloads.
    Ready,
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "NotStarted"),
            Self::Starting => write!(f, "Starting"),
            Self::Ready => write!(f, "Ready"),
        }
    }
}

// =============================================================================
// BackgroundContext
// =============================================================================

/// Handle passed to the entry callback of a launched context.
#[derive(Clone)]
pub struct BackgroundContext {
    handles: CallbackHandles,
    ready_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl BackgroundContext {
    fn new(handles: CallbackHandles, ready_tx: oneshot::Sender<()>) -> Self {
        Self {
            handles,
            ready_tx: Arc::new(Mutex::new(Some(ready_tx))),
        }
    }

    /// The handles this context was launched with.
    pub fn handles(&self) -> CallbackHandles {
        self.handles
    }

    /// Signals that the context can now receive payloads.
    ///
    /// Only the first call has an effect; it returns `true` if the manager was
    /// still listening.
    pub fn ready(&self) -> bool {
        match self.ready_tx.lock().take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}

impl fmt::Debug for BackgroundContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundContext")
            .field("handles", &self.handles)
            .finish()
    }
}

/// Completes when a launched context signals ready.
#[derive(Debug)]
pub struct ReadySignal(oneshot::Receiver<()>);

impl ReadySignal {
    /// Waits for the signal. `false` means the context went away without
    /// ever becoming ready.
    pub async fn wait(self) -> bool {
        self.0.await.is_ok()
    }
}

/// What a start request did.
#[derive(Debug)]
pub enum StartOutcome {
    /// A new context was launched.
    Launched(ReadySignal),
    /// A context is already starting or running; nothing changed.
    AlreadyActive(ContextState),
}

// =============================================================================
// ExecutionContextManager
// =============================================================================

struct ContextMessage {
    handler: CallbackHandle,
    payload: NotificationPayload,
}

struct Inbound {
    tx: mpsc::UnboundedSender<ContextMessage>,
    handler: CallbackHandle,
}

#[derive(Default)]
struct Inner {
    state: ContextState,
    inbound: Option<Inbound>,
}

/// Owns the background context and its readiness state.
pub struct ExecutionContextManager {
    store: SharedStore,
    registry: CallbackRegistry,
    inner: Mutex<Inner>,
}

impl ExecutionContextManager {
    pub fn new(store: SharedStore, registry: CallbackRegistry) -> Self {
        Self {
            store,
            registry,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn state(&self) -> ContextState {
        self.inner.lock().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ContextState::Ready
    }

    pub fn registry(&self) -> &CallbackRegistry {
        &self.registry
    }

    /// Reads the persisted handle pair. `None` if either is missing.
    pub fn persisted_handles(&self) -> ContextResult<Option<CallbackHandles>> {
        let handles = CallbackHandles {
            entry: self.read_handle(ENTRY_HANDLE_KEY)?,
            handler: self.read_handle(HANDLER_HANDLE_KEY)?,
        };
        Ok((!handles.is_incomplete()).then_some(handles))
    }

    /// Overwrites the persisted handle pair.
    pub fn persist_handles(&self, handles: CallbackHandles) -> ContextResult<()> {
        self.store
            .put(ENTRY_HANDLE_KEY, &handles.entry.raw().to_le_bytes())?;
        self.store
            .put(HANDLER_HANDLE_KEY, &handles.handler.raw().to_le_bytes())?;
        debug!(entry = %handles.entry, handler = %handles.handler, "Persisted callback handles");
        Ok(())
    }

    fn read_handle(&self, key: &str) -> ContextResult<CallbackHandle> {
        let Some(bytes) = self.store.get(key)? else {
            return Ok(CallbackHandle::UNSET);
        };
        match <[u8; 8]>::try_from(bytes.as_slice()) {
            Ok(raw) => Ok(CallbackHandle::new(i64::from_le_bytes(raw))),
            Err(_) => {
                warn!(key, len = bytes.len(), "Ignoring malformed persisted callback handle");
                Ok(CallbackHandle::UNSET)
            }
        }
    }

    /// Launches the context unless one is already starting or running.
    ///
    /// With `Some(handles)` the pair is persisted first; with `None` the
    /// persisted pair is used. Both handles must resolve in the registry,
    /// otherwise the call fails and the state stays `NotStarted`.
    pub fn ensure_started(&self, handles: Option<CallbackHandles>) -> ContextResult<StartOutcome> {
        let mut inner = self.inner.lock();
        if inner.state != ContextState::NotStarted {
            debug!(state = %inner.state, "Execution context already active, ignoring start request");
            return Ok(StartOutcome::AlreadyActive(inner.state));
        }

        let handles = match handles {
            Some(handles) if handles.is_incomplete() => {
                error!(entry = %handles.entry, handler = %handles.handler, "Refusing to start with an unset callback handle");
                return Err(ContextError::MissingHandles);
            }
            Some(handles) => {
                self.persist_handles(handles)?;
                handles
            }
            None => match self.persisted_handles()? {
                Some(handles) => handles,
                None => {
                    error!("Entry / notification handler handles are missing from the store");
                    return Err(ContextError::MissingHandles);
                }
            },
        };

        let Some(entry) = self.registry.resolve_entry(handles.entry) else {
            error!(handle = %handles.entry, "Failed to locate entry callback");
            return Err(ContextError::UnresolvedHandle(handles.entry));
        };
        if self.registry.resolve_handler(handles.handler).is_none() {
            error!(handle = %handles.handler, "Failed to locate notification handler");
            return Err(ContextError::UnresolvedHandle(handles.handler));
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            error!("Execution context requested outside of a tokio runtime");
            ContextError::NoRuntime
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let ctx = BackgroundContext::new(handles, ready_tx);
        runtime.spawn(run_context(entry, ctx, rx, self.registry.clone()));

        inner.state = ContextState::Starting;
        inner.inbound = Some(Inbound {
            tx,
            handler: handles.handler,
        });
        info!(entry = %handles.entry, handler = %handles.handler, "Execution context starting");

        Ok(StartOutcome::Launched(ReadySignal(ready_rx)))
    }

    /// Moves `Starting` to `Ready`. Returns whether the transition happened.
    pub fn on_ready(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            ContextState::Starting => {
                inner.state = ContextState::Ready;
                info!("Execution context ready");
                true
            }
            state => {
                warn!(%state, "Ignoring ready signal");
                false
            }
        }
    }

    /// Sends a payload to the running context, tagged with its handler handle.
    pub fn forward(&self, payload: NotificationPayload) -> ContextResult<()> {
        let inner = self.inner.lock();
        if inner.state != ContextState::Ready {
            return Err(ContextError::NotReady);
        }
        let inbound = inner.inbound.as_ref().ok_or(ContextError::NotReady)?;
        inbound
            .tx
            .send(ContextMessage {
                handler: inbound.handler,
                payload,
            })
            .map_err(|_| ContextError::ChannelClosed)
    }
}

impl fmt::Debug for ExecutionContextManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContextManager")
            .field("state", &self.state())
            .finish()
    }
}

/// Body of the background context: runs the entry point, then serves payloads
/// one at a time until every sender is gone.
async fn run_context(
    entry: EntryCallback,
    ctx: BackgroundContext,
    mut inbound: mpsc::UnboundedReceiver<ContextMessage>,
    registry: CallbackRegistry,
) {
    tokio::spawn(entry(ctx));

    while let Some(ContextMessage { handler, payload }) = inbound.recv().await {
        let Some(callback) = registry.resolve_handler(handler) else {
            warn!(%handler, "No notification handler registered, dropping payload");
            continue;
        };
        match AssertUnwindSafe(callback(payload)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(%handler, error = %e, "Notification handler failed"),
            Err(panic) => error!(
                %handler,
                panic = panic_message(panic.as_ref()),
                "Notification handler panicked"
            ),
        }
    }

    debug!("Execution context inbound channel closed");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KeyValueStore, MemoryStore};
    use std::time::Duration;

    const ENTRY: CallbackHandle = CallbackHandle::new(11);
    const HANDLER: CallbackHandle = CallbackHandle::new(22);

    fn handles() -> CallbackHandles {
        CallbackHandles {
            entry: ENTRY,
            handler: HANDLER,
        }
    }

    /// Registry whose entry signals ready at once and whose handler echoes
    /// payload messages into the returned receiver.
    fn echo_registry() -> (CallbackRegistry, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = CallbackRegistry::new();
        registry.register_entry(ENTRY, |ctx: BackgroundContext| async move {
            ctx.ready();
        });
        registry.register_handler(HANDLER, move |payload: NotificationPayload| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(payload.message().unwrap_or_default().to_string());
                anyhow::Ok(())
            }
        });
        (registry, rx)
    }

    async fn start_ready(manager: &ExecutionContextManager, handles: Option<CallbackHandles>) {
        let StartOutcome::Launched(signal) = manager.ensure_started(handles).unwrap() else {
            panic!("expected a launch");
        };
        assert_eq!(manager.state(), ContextState::Starting);
        assert!(signal.wait().await);
        assert!(manager.on_ready());
    }

    #[tokio::test]
    async fn test_missing_handles_keep_not_started() {
        let (registry, _rx) = echo_registry();
        let manager = ExecutionContextManager::new(MemoryStore::shared(), registry);

        let err = manager.ensure_started(None).unwrap_err();
        assert!(matches!(err, ContextError::MissingHandles));
        assert_eq!(manager.state(), ContextState::NotStarted);
    }

    #[tokio::test]
    async fn test_unresolved_handle_aborts_but_persists() {
        let manager = ExecutionContextManager::new(MemoryStore::shared(), CallbackRegistry::new());

        let err = manager.ensure_started(Some(handles())).unwrap_err();
        assert!(matches!(err, ContextError::UnresolvedHandle(h) if h == ENTRY));
        assert_eq!(manager.state(), ContextState::NotStarted);
        assert_eq!(manager.persisted_handles().unwrap(), Some(handles()));
    }

    #[tokio::test]
    async fn test_forward_reaches_handler_once_ready() {
        let (registry, mut rx) = echo_registry();
        let manager = ExecutionContextManager::new(MemoryStore::shared(), registry);

        start_ready(&manager, Some(handles())).await;
        manager
            .forward(NotificationPayload::new().with("message", "hi"))
            .unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(got.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn test_forward_before_ready_fails() {
        let registry = CallbackRegistry::new();
        // Entry never signals ready.
        registry.register_entry(ENTRY, |_ctx: BackgroundContext| async {});
        registry.register_handler(HANDLER, |_| async { anyhow::Ok(()) });
        let manager = ExecutionContextManager::new(MemoryStore::shared(), registry);

        let StartOutcome::Launched(signal) = manager.ensure_started(Some(handles())).unwrap()
        else {
            panic!("expected a launch");
        };
        let err = manager.forward(NotificationPayload::new()).unwrap_err();
        assert!(matches!(err, ContextError::NotReady));

        assert!(!signal.wait().await);
        assert_eq!(manager.state(), ContextState::Starting);
    }

    #[tokio::test]
    async fn test_ensure_started_is_idempotent() {
        let (registry, _rx) = echo_registry();
        let manager = ExecutionContextManager::new(MemoryStore::shared(), registry);

        manager.ensure_started(Some(handles())).unwrap();
        let other = CallbackHandles::new(99, 98);
        let outcome = manager.ensure_started(Some(other)).unwrap();

        assert!(matches!(outcome, StartOutcome::AlreadyActive(ContextState::Starting)));
        assert_eq!(manager.state(), ContextState::Starting);
        assert_eq!(manager.persisted_handles().unwrap(), Some(handles()));
    }

    #[tokio::test]
    async fn test_resume_from_persisted_handles() {
        let store = MemoryStore::shared();
        {
            let (registry, _rx) = echo_registry();
            let first = ExecutionContextManager::new(store.clone(), registry);
            first.persist_handles(handles()).unwrap();
        }

        // Fresh process: new in-memory state, same store.
        let (registry, mut rx) = echo_registry();
        let manager = ExecutionContextManager::new(store, registry);
        assert_eq!(manager.state(), ContextState::NotStarted);

        start_ready(&manager, None).await;
        manager
            .forward(NotificationPayload::new().with("message", "resumed"))
            .unwrap();
        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(got.as_deref(), Some("resumed"));
    }

    #[tokio::test]
    async fn test_panicking_handler_keeps_context_serving() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let registry = CallbackRegistry::new();
        registry.register_entry(ENTRY, |ctx: BackgroundContext| async move {
            ctx.ready();
        });
        registry.register_handler(HANDLER, move |payload: NotificationPayload| {
            let tx = tx.clone();
            async move {
                let text = payload.message().unwrap_or_default().to_string();
                if text == "bad" {
                    panic!("handler blew up on {text}");
                }
                let _ = tx.send(text);
                anyhow::Ok(())
            }
        });
        let manager = ExecutionContextManager::new(MemoryStore::shared(), registry);
        start_ready(&manager, Some(handles())).await;

        manager
            .forward(NotificationPayload::new().with("message", "bad"))
            .unwrap();
        for text in ["good0", "good1", "good2"] {
            manager
                .forward(NotificationPayload::new().with("message", text))
                .unwrap();
        }

        for expected in ["good0", "good1", "good2"] {
            let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap();
            assert_eq!(got.as_deref(), Some(expected));
        }
        assert_eq!(manager.state(), ContextState::Ready);
    }

    #[test]
    fn test_dead_channel_stays_ready() {
        let (registry, _rx) = echo_registry();
        let manager = ExecutionContextManager::new(MemoryStore::shared(), registry);

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(start_ready(&manager, Some(handles())));
        // Shutting the runtime down drops the context task and its receiver.
        drop(rt);

        let err = manager.forward(NotificationPayload::new()).unwrap_err();
        assert!(matches!(err, ContextError::ChannelClosed));
        assert_eq!(manager.state(), ContextState::Ready);
    }

    #[tokio::test]
    async fn test_ensure_started_is_noop_when_ready() {
        let (registry, _rx) = echo_registry();
        let manager = ExecutionContextManager::new(MemoryStore::shared(), registry);
        start_ready(&manager, Some(handles())).await;

        let other = CallbackHandles::new(99, 98);
        let outcome = manager.ensure_started(Some(other)).unwrap();

        assert!(matches!(outcome, StartOutcome::AlreadyActive(ContextState::Ready)));
        assert_eq!(manager.state(), ContextState::Ready);
        assert_eq!(manager.persisted_handles().unwrap(), Some(handles()));
    }

    #[tokio::test]
    async fn test_malformed_persisted_handle_counts_as_missing() {
        let store = MemoryStore::shared();
        store.put(ENTRY_HANDLE_KEY, b"abc").unwrap();
        store
            .put(HANDLER_HANDLE_KEY, &HANDLER.raw().to_le_bytes())
            .unwrap();

        let manager = ExecutionContextManager::new(store, CallbackRegistry::new());
        assert_eq!(manager.persisted_handles().unwrap(), None);
    }

    #[test]
    fn test_ensure_started_without_runtime() {
        let (registry, _rx) = echo_registry();
        let manager = ExecutionContextManager::new(MemoryStore::shared(), registry);

        let err = manager.ensure_started(Some(handles())).unwrap_err();
        assert!(matches!(err, ContextError::NoRuntime));
        assert_eq!(manager.state(), ContextState::NotStarted);
    }

    #[test]
    fn test_ready_signal_only_fires_once() {
        let (tx, _rx) = oneshot::channel();
        let ctx = BackgroundContext::new(handles(), tx);
        assert!(ctx.ready());
        assert!(!ctx.ready());
    }
}
