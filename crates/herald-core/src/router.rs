//! The notification router.
//!
//! Every incoming payload goes to exactly one consumer, tried in this order:
//!
//! 1. the attached foreground listener,
//! 2. the background execution context, once it is `Ready`,
//! 3. the durable queue, which also kicks off the context if it never started.
//!
//! The queue is emptied on two triggers: the background context becoming ready
//! (drained into the context) and a listener attaching (drained into the
//! listener). All routing decisions share one async lock, so a payload can
//! never be queued behind a drain that has already taken its snapshot.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::callback::{CallbackHandles, CallbackRegistry};
use crate::context::{ContextState, ExecutionContextManager, StartOutcome};
use crate::error::ContextResult;
use crate::listener::{ListenerRegistry, ListenerSink, ListenerToken};
use crate::payload::NotificationPayload;
use crate::queue::PendingQueue;
use crate::store::SharedStore;

/// Where a payload ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Pushed to the foreground listener.
    Listener,
    /// Forwarded to the running background context.
    Background,
    /// Persisted in the pending queue.
    Queued,
    /// Held until the next listener attaches (click payloads only).
    Deferred,
    /// Lost; the reason was logged.
    Dropped,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listener => write!(f, "listener"),
            Self::Background => write!(f, "background"),
            Self::Queued => write!(f, "queued"),
            Self::Deferred => write!(f, "deferred"),
            Self::Dropped => write!(f, "dropped"),
        }
    }
}

/// Routes payloads between the listener, the background context and the queue.
///
/// Construct one per process and share it behind an `Arc`.
pub struct NotificationRouter {
    listeners: ListenerRegistry,
    context: ExecutionContextManager,
    queue: PendingQueue,
    pending_click: Mutex<Option<NotificationPayload>>,
    routing: tokio::sync::Mutex<()>,
}

impl NotificationRouter {
    pub fn new(queue: PendingQueue, context: ExecutionContextManager) -> Self {
        Self {
            listeners: ListenerRegistry::new(),
            context,
            queue,
            pending_click: Mutex::new(None),
            routing: tokio::sync::Mutex::new(()),
        }
    }

    /// Builds a router with a default queue over `store`.
    pub fn from_store(store: SharedStore, registry: CallbackRegistry) -> Self {
        let queue = PendingQueue::new(store.clone());
        Self::new(queue, ExecutionContextManager::new(store, registry))
    }

    pub fn context(&self) -> &ExecutionContextManager {
        &self.context
    }

    pub fn queue(&self) -> &PendingQueue {
        &self.queue
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    pub fn state(&self) -> ContextState {
        self.context.state()
    }

    /// Whether a click payload is waiting for the next listener.
    pub fn has_pending_click(&self) -> bool {
        self.pending_click.lock().is_some()
    }

    // =========================================================================
    // Delivery
    // =========================================================================

    /// Routes one incoming payload. Never fails; the outcome is informational.
    pub async fn deliver(self: &Arc<Self>, payload: NotificationPayload) -> Route {
        let _guard = self.routing.lock().await;

        let route = self.route_locked(payload);
        debug!(%route, "Payload routed");
        route
    }

    fn route_locked(self: &Arc<Self>, payload: NotificationPayload) -> Route {
        if let Some(sink) = self.listeners.current() {
            return match sink.push(payload.to_string()) {
                Ok(()) => Route::Listener,
                Err(e) => {
                    warn!(error = %e, "Listener push failed, payload dropped");
                    Route::Dropped
                }
            };
        }

        match self.context.state() {
            ContextState::Ready => match self.context.forward(payload) {
                Ok(()) => Route::Background,
                Err(e) => {
                    warn!(error = %e, "Forwarding to execution context failed, payload dropped");
                    Route::Dropped
                }
            },
            state => {
                if let Err(e) = self.queue.append(&payload) {
                    error!(error = %e, "Failed to persist payload, payload dropped");
                    return Route::Dropped;
                }
                if state == ContextState::NotStarted {
                    if let Err(e) = self.start_context(None) {
                        debug!(error = %e, "Payload stays queued until the context can start");
                    }
                }
                Route::Queued
            }
        }
    }

    // =========================================================================
    // Background context
    // =========================================================================

    /// Persists `handles` and starts the background context if it is not
    /// running yet.
    pub fn register_background_handlers(
        self: &Arc<Self>,
        handles: CallbackHandles,
    ) -> ContextResult<()> {
        self.start_context(Some(handles))
    }

    /// Starts the background context from the persisted handles.
    pub fn resume(self: &Arc<Self>) -> ContextResult<()> {
        self.start_context(None)
    }

    fn start_context(self: &Arc<Self>, handles: Option<CallbackHandles>) -> ContextResult<()> {
        let StartOutcome::Launched(signal) = self.context.ensure_started(handles)? else {
            return Ok(());
        };

        let router = Arc::clone(self);
        tokio::spawn(async move {
            if signal.wait().await {
                router.on_context_ready().await;
            } else {
                warn!("Execution context exited before signalling ready");
            }
        });
        Ok(())
    }

    async fn on_context_ready(&self) {
        let _guard = self.routing.lock().await;
        if self.context.on_ready() {
            self.flush_pending();
        }
    }

    /// Forwards every queued payload to the background context, then clears
    /// them. Individual forwarding failures do not stop the pass.
    fn flush_pending(&self) -> usize {
        let mut failed = 0usize;
        let drained = self.queue.drain_with(|payload| {
            if let Err(e) = self.context.forward(payload) {
                failed += 1;
                warn!(error = %e, "Dropping queued payload during flush");
            }
        });

        match drained {
            Ok(0) => 0,
            Ok(count) => {
                info!(pending = count, failed, "Flushed pending queue to execution context");
                count - failed
            }
            Err(e) => {
                error!(error = %e, "Failed to flush pending queue");
                0
            }
        }
    }

    // =========================================================================
    // Foreground listener
    // =========================================================================

    /// Attaches a listener, replacing the previous one.
    ///
    /// Queued payloads are pushed to it first, then a held click payload.
    pub async fn attach_listener(&self, sink: &Arc<dyn ListenerSink>) -> ListenerToken {
        let _guard = self.routing.lock().await;
        let token = self.listeners.attach(sink);

        let mut failed = 0usize;
        let drained = self.queue.drain_with(|payload| {
            if let Err(e) = sink.push(payload.to_string()) {
                failed += 1;
                warn!(%token, error = %e, "Dropping queued payload during listener flush");
            }
        });
        match drained {
            Ok(0) => {}
            Ok(count) => info!(%token, pending = count, failed, "Flushed pending queue to listener"),
            Err(e) => error!(%token, error = %e, "Failed to flush pending queue to listener"),
        }

        let click = self.pending_click.lock().take();
        if let Some(click) = click {
            match sink.push(click.to_string()) {
                Ok(()) => debug!(%token, "Replayed click payload to listener"),
                Err(e) => warn!(%token, error = %e, "Click payload replay failed"),
            }
        }

        token
    }

    /// Detaches the listener attached under `token`.
    pub fn detach_listener(&self, token: ListenerToken) -> bool {
        self.listeners.detach(token)
    }

    /// Handles the app being opened by tapping a notification.
    ///
    /// The payload is marked clicked and pushed to the live listener, or held
    /// for the next attach. Only the most recent click is held.
    pub async fn on_notification_click(&self, payload: NotificationPayload) -> Route {
        let payload = payload.mark_clicked();
        let _guard = self.routing.lock().await;

        if let Some(sink) = self.listeners.current() {
            return match sink.push(payload.to_string()) {
                Ok(()) => Route::Listener,
                Err(e) => {
                    warn!(error = %e, "Click payload push failed, payload dropped");
                    Route::Dropped
                }
            };
        }

        if self.pending_click.lock().replace(payload).is_some() {
            debug!("Replaced an unread click payload");
        }
        Route::Deferred
    }
}

impl fmt::Debug for NotificationRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationRouter")
            .field("listeners", &self.listeners)
            .field("context", &self.context)
            .field("queue", &self.queue)
            .field("pending_click", &self.has_pending_click())
            .finish()
    }
}
