//! Key-value store seam.
//!
//! Everything that must survive a process restart (the pending queue and the
//! callback handle pair) lives behind [`KeyValueStore`]. The runtime crate
//! provides a sled-backed implementation; [`MemoryStore`] is used in tests and
//! for hosts that bring their own persistence.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::StoreResult;

/// A string-keyed byte store with an atomic read-modify-write primitive.
///
/// Implementations must make every mutation atomic from a reader's point of
/// view: a concurrent `get` observes either the old or the new value, never a
/// partial write.
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `key`.
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Replaces the value stored under `key`.
    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Removes `key`, returning the value it held.
    fn take(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Atomically replaces the value under `key` with `f(current)`.
    ///
    /// Returning `None` removes the key. `f` may be invoked more than once if
    /// the backend retries on contention, so it must not have side effects
    /// beyond recording its latest result.
    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<&[u8]>) -> Option<Vec<u8>>,
    ) -> StoreResult<()>;

    /// Forces buffered writes to durable storage.
    fn flush(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Shared handle to a store.
pub type SharedStore = Arc<dyn KeyValueStore>;

/// In-process store guarded by a single mutex.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store already wrapped for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Whether `key` currently holds a value.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.entries.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn take(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.entries.lock().remove(key))
    }

    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<&[u8]>) -> Option<Vec<u8>>,
    ) -> StoreResult<()> {
        let mut entries = self.entries.lock();
        match f(entries.get(key).map(Vec::as_slice)) {
            Some(value) => {
                entries.insert(key.to_string(), value);
            }
            None => {
                entries.remove(key);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_take() {
        let store = MemoryStore::new();
        store.put("k", b"v1").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some(&b"v1"[..]));

        assert_eq!(store.take("k").unwrap().as_deref(), Some(&b"v1"[..]));
        assert!(store.get("k").unwrap().is_none());
        assert!(store.take("k").unwrap().is_none());
    }

    #[test]
    fn test_update_sees_current_value() {
        let store = MemoryStore::new();
        store
            .update("counter", &mut |current| {
                assert!(current.is_none());
                Some(vec![1])
            })
            .unwrap();
        store
            .update("counter", &mut |current| {
                let next = current.map_or(0, |b| b[0]) + 1;
                Some(vec![next])
            })
            .unwrap();
        assert_eq!(store.get("counter").unwrap(), Some(vec![2]));
    }

    #[test]
    fn test_update_returning_none_removes() {
        let store = MemoryStore::new();
        store.put("k", b"v").unwrap();
        store.update("k", &mut |_| None).unwrap();
        assert!(!store.contains("k"));
    }
}
