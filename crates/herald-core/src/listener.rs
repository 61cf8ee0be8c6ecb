//! Foreground listener registry.
//!
//! At most one listener is attached at a time. The registry holds it weakly:
//! once the UI side drops its sink the slot reads as empty, without an explicit
//! detach. Each attach hands out a [`ListenerToken`] and detach only clears the
//! slot if the token still matches, so a late detach from a replaced listener
//! cannot evict its successor.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{ListenerError, ListenerResult};

/// Receiving end of foreground events, typically an event channel into the UI.
pub trait ListenerSink: Send + Sync {
    /// Pushes one serialized payload.
    fn push(&self, event: String) -> ListenerResult<()>;

    /// Whether the sink can still take events.
    fn is_alive(&self) -> bool {
        true
    }
}

/// [`ListenerSink`] backed by an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }

    /// Creates a shared sink together with the receiver the UI reads from.
    ///
    /// The caller must keep the returned `Arc` alive for as long as it wants
    /// to stay attached.
    pub fn pair() -> (Arc<dyn ListenerSink>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self::new(tx)), rx)
    }
}

impl ListenerSink for ChannelSink {
    fn push(&self, event: String) -> ListenerResult<()> {
        self.tx.send(event).map_err(|_| ListenerError::Gone)
    }

    fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Identifies one attach call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken(u64);

impl ListenerToken {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

struct Slot {
    token: ListenerToken,
    sink: Weak<dyn ListenerSink>,
}

/// Single-slot registry of the foreground listener.
#[derive(Default)]
pub struct ListenerRegistry {
    slot: Mutex<Option<Slot>>,
    next_token: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `sink`, replacing whatever was attached before.
    pub fn attach(&self, sink: &Arc<dyn ListenerSink>) -> ListenerToken {
        let token = ListenerToken(self.next_token.fetch_add(1, Ordering::Relaxed) + 1);
        let previous = self.slot.lock().replace(Slot {
            token,
            sink: Arc::downgrade(sink),
        });
        match previous {
            Some(prev) => debug!(%token, replaced = %prev.token, "Listener attached"),
            None => debug!(%token, "Listener attached"),
        }
        token
    }

    /// Detaches the listener identified by `token`.
    ///
    /// Returns `false` when a newer listener has taken the slot since.
    pub fn detach(&self, token: ListenerToken) -> bool {
        let mut slot = self.slot.lock();
        match slot.as_ref() {
            Some(current) if current.token == token => {
                *slot = None;
                debug!(%token, "Listener detached");
                true
            }
            _ => {
                trace!(%token, "Stale detach ignored");
                false
            }
        }
    }

    /// The live listener, if any. Clears the slot when it finds it dead.
    pub fn current(&self) -> Option<Arc<dyn ListenerSink>> {
        let mut slot = self.slot.lock();
        let current = slot.as_ref()?;
        match current.sink.upgrade() {
            Some(sink) if sink.is_alive() => Some(sink),
            _ => {
                debug!(token = %current.token, "Listener went away");
                *slot = None;
                None
            }
        }
    }

    pub fn is_attached(&self) -> bool {
        self.current().is_some()
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("token", &self.slot.lock().as_ref().map(|s| s.token))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_and_push() {
        let registry = ListenerRegistry::new();
        let (sink, mut rx) = ChannelSink::pair();
        registry.attach(&sink);

        let current = registry.current().unwrap();
        current.push("hello".to_string()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), "hello");
    }

    #[test]
    fn test_dropped_sink_reads_as_detached() {
        let registry = ListenerRegistry::new();
        let (sink, _rx) = ChannelSink::pair();
        registry.attach(&sink);
        drop(sink);

        assert!(!registry.is_attached());
    }

    #[test]
    fn test_closed_receiver_reads_as_detached() {
        let registry = ListenerRegistry::new();
        let (sink, rx) = ChannelSink::pair();
        registry.attach(&sink);
        drop(rx);

        assert!(registry.current().is_none());
    }

    #[test]
    fn test_stale_detach_keeps_newer_listener() {
        let registry = ListenerRegistry::new();
        let (first, _rx1) = ChannelSink::pair();
        let (second, _rx2) = ChannelSink::pair();

        let old = registry.attach(&first);
        let new = registry.attach(&second);
        assert_ne!(old, new);

        assert!(!registry.detach(old));
        assert!(registry.is_attached());

        assert!(registry.detach(new));
        assert!(!registry.is_attached());
    }

    #[test]
    fn test_push_to_closed_channel_fails() {
        let (sink, rx) = ChannelSink::pair();
        drop(rx);
        assert!(matches!(
            sink.push("x".to_string()),
            Err(ListenerError::Gone)
        ));
    }
}
