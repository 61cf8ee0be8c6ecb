//! Callback handles and the registry that resolves them.
//!
//! The background execution context runs user code that has to be found again
//! after the process dies. Instead of persisting code, the host persists two
//! opaque [`CallbackHandle`]s and, at every process start, registers the
//! functions those handles stand for in a [`CallbackRegistry`]:
//!
//! | Handle | Resolves to | Called |
//! |---|---|---|
//! | entry | [`EntryCallback`] | once, when the context starts |
//! | handler | [`NotificationCallback`] | once per forwarded payload |
//!
//! ```rust,ignore
//! let registry = CallbackRegistry::new();
//! registry.register_entry(CallbackHandle::new(1), |ctx: BackgroundContext| async move {
//!     // warm up caches, open connections, ...
//!     ctx.ready();
//! });
//! registry.register_handler(CallbackHandle::new(2), |payload| async move {
//!     tracing::info!(%payload, "background notification");
//!     anyhow::Ok(())
//! });
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::BackgroundContext;
use crate::payload::NotificationPayload;

/// Opaque, persistable identifier of a registered callback.
///
/// The raw value `0` is reserved for "unset".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackHandle(i64);

impl CallbackHandle {
    /// The reserved "unset" handle.
    pub const UNSET: Self = Self(0);

    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> i64 {
        self.0
    }

    pub const fn is_unset(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for CallbackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<i64> for CallbackHandle {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

/// The pair of handles a background context needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallbackHandles {
    /// Entry point run when the context starts.
    pub entry: CallbackHandle,
    /// Handler invoked for every forwarded payload.
    pub handler: CallbackHandle,
}

impl CallbackHandles {
    pub fn new(entry: impl Into<CallbackHandle>, handler: impl Into<CallbackHandle>) -> Self {
        Self {
            entry: entry.into(),
            handler: handler.into(),
        }
    }

    /// Whether either handle is the reserved unset value.
    pub fn is_incomplete(&self) -> bool {
        self.entry.is_unset() || self.handler.is_unset()
    }
}

/// Entry point of a background context.
///
/// Must call [`BackgroundContext::ready`] once it can accept payloads.
pub type EntryCallback = Arc<dyn Fn(BackgroundContext) -> BoxFuture<'static, ()> + Send + Sync>;

/// User handler for a payload forwarded to the background context.
pub type NotificationCallback =
    Arc<dyn Fn(NotificationPayload) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Table mapping handles to registered callbacks.
///
/// Cloning is cheap and clones share the same table.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    entries: Arc<RwLock<HashMap<CallbackHandle, EntryCallback>>>,
    handlers: Arc<RwLock<HashMap<CallbackHandle, NotificationCallback>>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entry point under `handle`, replacing any previous one.
    ///
    /// Returns `false` (and registers nothing) for the unset handle.
    pub fn register_entry<F, Fut>(&self, handle: CallbackHandle, f: F) -> bool
    where
        F: Fn(BackgroundContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if handle.is_unset() {
            warn!("Refusing to register entry callback under the unset handle");
            return false;
        }
        let callback: EntryCallback = Arc::new(move |ctx| Box::pin(f(ctx)));
        self.entries.write().insert(handle, callback);
        debug!(%handle, "Registered entry callback");
        true
    }

    /// Registers a notification handler under `handle`, replacing any previous one.
    ///
    /// Returns `false` (and registers nothing) for the unset handle.
    pub fn register_handler<F, Fut>(&self, handle: CallbackHandle, f: F) -> bool
    where
        F: Fn(NotificationPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if handle.is_unset() {
            warn!("Refusing to register notification handler under the unset handle");
            return false;
        }
        let callback: NotificationCallback = Arc::new(move |payload| Box::pin(f(payload)));
        self.handlers.write().insert(handle, callback);
        debug!(%handle, "Registered notification handler");
        true
    }

    pub fn resolve_entry(&self, handle: CallbackHandle) -> Option<EntryCallback> {
        self.entries.read().get(&handle).cloned()
    }

    pub fn resolve_handler(&self, handle: CallbackHandle) -> Option<NotificationCallback> {
        self.handlers.read().get(&handle).cloned()
    }

    /// Number of registered callbacks of both kinds.
    pub fn len(&self) -> usize {
        self.entries.read().len() + self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("entries", &self.entries.read().len())
            .field("handlers", &self.handlers.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::assert_ok;

    #[test]
    fn test_unset_handle_is_rejected() {
        let registry = CallbackRegistry::new();
        assert!(!registry.register_handler(CallbackHandle::UNSET, |_| async { anyhow::Ok(()) }));
        assert!(!registry.register_entry(CallbackHandle::UNSET, |_| async {}));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_incomplete_handles() {
        assert!(CallbackHandles::new(0, 2).is_incomplete());
        assert!(CallbackHandles::new(1, 0).is_incomplete());
        assert!(!CallbackHandles::new(1, 2).is_incomplete());
    }

    #[tokio::test]
    async fn test_resolve_handler_invokes_registered_fn() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = CallbackRegistry::new();
        let counter = Arc::clone(&calls);
        registry.register_handler(CallbackHandle::new(7), move |payload| {
            let counter = Arc::clone(&counter);
            async move {
                assert_eq!(payload.message(), Some("hi"));
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
        });

        let handler = registry.resolve_handler(CallbackHandle::new(7)).unwrap();
        assert_ok!(handler(NotificationPayload::new().with("message", "hi")).await);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.resolve_handler(CallbackHandle::new(8)).is_none());
        assert!(registry.resolve_entry(CallbackHandle::new(7)).is_none());
    }

    #[test]
    fn test_clones_share_table() {
        let registry = CallbackRegistry::new();
        let clone = registry.clone();
        clone.register_handler(CallbackHandle::new(3), |_| async { anyhow::Ok(()) });
        assert!(registry.resolve_handler(CallbackHandle::new(3)).is_some());
    }
}
