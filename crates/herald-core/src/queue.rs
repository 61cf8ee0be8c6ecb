//! Durable FIFO of payloads waiting for a consumer.
//!
//! The whole queue is one JSON document stored under a single key:
//!
//! ```text
//! {"version":1,"entries":[{"message":"a"},{"message":"b"}]}
//! ```
//!
//! Every mutation rewrites the document through one atomic
//! [`KeyValueStore::update`](crate::store::KeyValueStore::update), so readers
//! never observe a half-written list. Delivery out of the queue is
//! at-least-once: a crash between delivering and acknowledging a drain pass
//! replays that pass after restart.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::QueueResult;
use crate::payload::NotificationPayload;
use crate::store::SharedStore;

/// Store key used when none is configured.
pub const DEFAULT_QUEUE_KEY: &str = "herald.pending_notifications";

/// Version tag written into every queue document.
pub const QUEUE_FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct QueueDocumentRef<'a> {
    version: u32,
    entries: &'a [Value],
}

#[derive(Deserialize)]
struct QueueDocument {
    version: u32,
    #[serde(default)]
    entries: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredQueue {
    Versioned(QueueDocument),
    // Bare array written before the version tag existed.
    Legacy(Vec<Value>),
}

fn decode_entries(bytes: &[u8]) -> Vec<Value> {
    match serde_json::from_slice::<StoredQueue>(bytes) {
        Ok(StoredQueue::Versioned(doc)) => {
            if doc.version > QUEUE_FORMAT_VERSION {
                warn!(
                    version = doc.version,
                    supported = QUEUE_FORMAT_VERSION,
                    "Pending queue has a newer format version, reading entries anyway"
                );
            }
            doc.entries
        }
        Ok(StoredQueue::Legacy(entries)) => entries,
        Err(e) => {
            error!(error = %e, "Pending queue is unreadable, treating it as empty");
            Vec::new()
        }
    }
}

fn encode_entries(entries: &[Value]) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(&QueueDocumentRef {
        version: QUEUE_FORMAT_VERSION,
        entries,
    })
}

fn into_payloads(entries: Vec<Value>) -> Vec<NotificationPayload> {
    entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match NotificationPayload::from_value(entry) {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!(index, error = %e, "Skipping malformed pending entry");
                None
            }
        })
        .collect()
}

/// Persisted FIFO of [`NotificationPayload`]s.
///
/// Unbounded unless [`with_max_pending`](Self::with_max_pending) is set, in
/// which case the oldest entries are dropped to make room.
#[derive(Clone)]
pub struct PendingQueue {
    store: SharedStore,
    key: String,
    max_pending: Option<usize>,
}

impl PendingQueue {
    /// Creates a queue under [`DEFAULT_QUEUE_KEY`].
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            key: DEFAULT_QUEUE_KEY.to_string(),
            max_pending: None,
        }
    }

    /// Uses a different store key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Caps the number of retained entries.
    pub fn with_max_pending(mut self, max_pending: Option<usize>) -> Self {
        self.max_pending = max_pending;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn max_pending(&self) -> Option<usize> {
        self.max_pending
    }

    /// Appends a payload at the tail.
    pub fn append(&self, payload: &NotificationPayload) -> QueueResult<()> {
        let entry = serde_json::to_value(payload)?;
        let max_pending = self.max_pending;
        let mut evicted = 0usize;
        let mut pending = 0usize;
        let mut failure = None;

        self.store.update(&self.key, &mut |current| {
            let mut entries = current.map(decode_entries).unwrap_or_default();
            entries.push(entry.clone());

            evicted = match max_pending {
                Some(max) if entries.len() > max => entries.len() - max,
                _ => 0,
            };
            entries.drain(..evicted);
            pending = entries.len();

            match encode_entries(&entries) {
                Ok(bytes) => {
                    failure = None;
                    Some(bytes)
                }
                Err(e) => {
                    failure = Some(e);
                    current.map(<[u8]>::to_vec)
                }
            }
        })?;

        if let Some(e) = failure {
            return Err(e.into());
        }
        if evicted > 0 {
            warn!(evicted, ?max_pending, "Pending queue full, dropped oldest payloads");
        }
        debug!(pending, "Payload queued");
        Ok(())
    }

    /// Hands every queued payload to `deliver` in insertion order, then removes them.
    ///
    /// Removal is unconditional once the pass starts: `deliver` reports nothing
    /// back. Only the entries present when the pass started are removed, so
    /// payloads appended meanwhile stay queued. Returns how many payloads were
    /// handed out; malformed entries are logged, skipped and removed.
    pub fn drain_with<F>(&self, mut deliver: F) -> QueueResult<usize>
    where
        F: FnMut(NotificationPayload),
    {
        let Some(bytes) = self.store.get(&self.key)? else {
            return Ok(0);
        };
        let entries = decode_entries(&bytes);
        let consumed = entries.len();

        let mut delivered = 0;
        for payload in into_payloads(entries) {
            deliver(payload);
            delivered += 1;
        }

        self.acknowledge(consumed)?;
        Ok(delivered)
    }

    /// Removes the first `consumed` entries.
    fn acknowledge(&self, consumed: usize) -> QueueResult<()> {
        let mut failure = None;

        self.store.update(&self.key, &mut |current| {
            let mut entries = current.map(decode_entries).unwrap_or_default();
            if consumed >= entries.len() {
                failure = None;
                return None;
            }
            entries.drain(..consumed);
            match encode_entries(&entries) {
                Ok(bytes) => {
                    failure = None;
                    Some(bytes)
                }
                Err(e) => {
                    failure = Some(e);
                    current.map(<[u8]>::to_vec)
                }
            }
        })?;

        match failure {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Takes the whole queue and clears it in one atomic step.
    pub fn drain_all(&self) -> QueueResult<Vec<NotificationPayload>> {
        Ok(self
            .store
            .take(&self.key)?
            .map(|bytes| into_payloads(decode_entries(&bytes)))
            .unwrap_or_default())
    }

    /// Returns the queued payloads without removing them.
    pub fn peek(&self) -> QueueResult<Vec<NotificationPayload>> {
        Ok(self
            .store
            .get(&self.key)?
            .map(|bytes| into_payloads(decode_entries(&bytes)))
            .unwrap_or_default())
    }

    pub fn len(&self) -> QueueResult<usize> {
        Ok(self
            .store
            .get(&self.key)?
            .map_or(0, |bytes| decode_entries(&bytes).len()))
    }

    pub fn is_empty(&self) -> QueueResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Drops everything without delivering it.
    pub fn clear(&self) -> QueueResult<()> {
        self.store.take(&self.key)?;
        Ok(())
    }
}

impl std::fmt::Debug for PendingQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingQueue")
            .field("key", &self.key)
            .field("max_pending", &self.max_pending)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KeyValueStore, MemoryStore};
    use std::sync::Arc;

    fn msg(text: &str) -> NotificationPayload {
        NotificationPayload::new().with("message", text)
    }

    fn queue() -> (Arc<MemoryStore>, PendingQueue) {
        let store = MemoryStore::shared();
        let queue = PendingQueue::new(store.clone());
        (store, queue)
    }

    #[test]
    fn test_append_preserves_order() {
        let (_, queue) = queue();
        for text in ["a", "b", "c"] {
            queue.append(&msg(text)).unwrap();
        }

        let texts: Vec<_> = queue
            .peek()
            .unwrap()
            .iter()
            .map(|p| p.message().unwrap().to_string())
            .collect();
        assert_eq!(texts, ["a", "b", "c"]);
        assert_eq!(queue.len().unwrap(), 3);
    }

    #[test]
    fn test_document_carries_version_tag() {
        let (store, queue) = queue();
        queue.append(&msg("hi")).unwrap();

        let raw = store.get(DEFAULT_QUEUE_KEY).unwrap().unwrap();
        let doc: Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(doc["version"], QUEUE_FORMAT_VERSION);
        assert_eq!(doc["entries"][0]["message"], "hi");
    }

    #[test]
    fn test_drain_all_clears_key() {
        let (store, queue) = queue();
        queue.append(&msg("a")).unwrap();
        queue.append(&msg("b")).unwrap();

        let drained = queue.drain_all().unwrap();
        assert_eq!(drained.len(), 2);
        assert!(queue.is_empty().unwrap());
        assert!(!store.contains(DEFAULT_QUEUE_KEY));
    }

    #[test]
    fn test_drain_with_keeps_entries_appended_mid_pass() {
        let (_, queue) = queue();
        queue.append(&msg("a")).unwrap();
        queue.append(&msg("b")).unwrap();

        let mut seen = Vec::new();
        let delivered = queue
            .drain_with(|p| {
                seen.push(p.message().unwrap().to_string());
                if seen.len() == 1 {
                    queue.append(&msg("late")).unwrap();
                }
            })
            .unwrap();

        assert_eq!(delivered, 2);
        assert_eq!(seen, ["a", "b"]);
        let left = queue.peek().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].message(), Some("late"));
    }

    #[test]
    fn test_drain_skips_malformed_entries() {
        let (store, queue) = queue();
        store
            .put(
                DEFAULT_QUEUE_KEY,
                br#"{"version":1,"entries":[{"message":"a"},42,{"message":"c"}]}"#,
            )
            .unwrap();

        let mut seen = Vec::new();
        let delivered = queue
            .drain_with(|p| seen.push(p.message().unwrap().to_string()))
            .unwrap();

        assert_eq!(delivered, 2);
        assert_eq!(seen, ["a", "c"]);
        assert!(queue.is_empty().unwrap());
    }

    #[test]
    fn test_reads_legacy_bare_array() {
        let (store, queue) = queue();
        store
            .put(DEFAULT_QUEUE_KEY, br#"[{"message":"old"}]"#)
            .unwrap();
        queue.append(&msg("new")).unwrap();

        let texts: Vec<_> = queue
            .peek()
            .unwrap()
            .iter()
            .map(|p| p.message().unwrap().to_string())
            .collect();
        assert_eq!(texts, ["old", "new"]);

        let raw = store.get(DEFAULT_QUEUE_KEY).unwrap().unwrap();
        let doc: Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(doc["version"], QUEUE_FORMAT_VERSION);
    }

    #[test]
    fn test_corrupt_blob_is_replaced_on_append() {
        let (store, queue) = queue();
        store.put(DEFAULT_QUEUE_KEY, b"not json at all").unwrap();
        assert!(queue.is_empty().unwrap());

        queue.append(&msg("fresh")).unwrap();
        assert_eq!(queue.len().unwrap(), 1);
    }

    #[test]
    fn test_max_pending_drops_oldest() {
        let store = MemoryStore::shared();
        let queue = PendingQueue::new(store).with_max_pending(Some(2));
        for text in ["a", "b", "c"] {
            queue.append(&msg(text)).unwrap();
        }

        let texts: Vec<_> = queue
            .peek()
            .unwrap()
            .iter()
            .map(|p| p.message().unwrap().to_string())
            .collect();
        assert_eq!(texts, ["b", "c"]);
    }

    #[test]
    fn test_custom_key() {
        let store = MemoryStore::shared();
        let queue = PendingQueue::new(store.clone()).with_key("custom.queue");
        queue.append(&msg("a")).unwrap();

        assert!(store.contains("custom.queue"));
        assert!(!store.contains(DEFAULT_QUEUE_KEY));
    }
}
