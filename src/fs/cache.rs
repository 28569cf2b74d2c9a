//! The client-side content cache shared by both cache-consistency regimes.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::time::Instant;

/// A single cached file's content plus the bookkeeping needed by both
/// consistency regimes.
pub struct Entry {
    buffer: Mutex<Vec<u8>>,
    dirty: Mutex<bool>,
    last_validated: Mutex<Instant>,
    /// The server `last_modified` this buffer was last known to match;
    /// compared against a fresh `GetAttribute` by the polling regime.
    server_last_modified: std::sync::atomic::AtomicI64,
}

impl Entry {
    fn new(buffer: Vec<u8>) -> Self {
        Self {
            buffer: Mutex::new(buffer),
            dirty: Mutex::new(false),
            last_validated: Mutex::new(Instant::now()),
            server_last_modified: std::sync::atomic::AtomicI64::new(0),
        }
    }

    /// The server `last_modified` this buffer was last known to match.
    pub fn server_last_modified(&self) -> i64 {
        self.server_last_modified.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Records a fresh `last_modified` observed from the server, as the
    /// polling regime does after a revalidating `GetAttribute`.
    pub fn set_server_last_modified(&self, v: i64) {
        self.server_last_modified.store(v, std::sync::atomic::Ordering::SeqCst);
    }

    /// A copy of the cached content.
    pub fn read(&self) -> Vec<u8> {
        self.buffer.lock().clone()
    }

    /// The cached content's length in bytes.
    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Whether a local write has been buffered but not yet flushed to the
    /// server.
    pub fn is_dirty(&self) -> bool {
        *self.dirty.lock()
    }

    /// When this entry was last confirmed fresh, by a fill, a replace, or an
    /// explicit [`Entry::mark_validated`].
    pub fn last_validated(&self) -> Instant {
        *self.last_validated.lock()
    }

    /// Splices `data` into the buffer at `offset`, extending it if needed,
    /// and marks the entry dirty.
    pub fn splice_at(&self, offset: usize, data: &[u8]) {
        let mut buf = self.buffer.lock();
        let end = offset + data.len();
        if buf.len() < end {
            buf.resize(end, 0);
        }
        buf[offset..end].copy_from_slice(data);
        *self.dirty.lock() = true;
    }

    /// Replaces the buffer wholesale, as happens on a `Read` fill or a
    /// polling-triggered refresh.
    pub fn replace(&self, buffer: Vec<u8>) {
        *self.buffer.lock() = buffer;
        *self.dirty.lock() = false;
        *self.last_validated.lock() = Instant::now();
    }

    /// Resets the validation clock without touching the buffer, as the
    /// polling regime does when a revalidating `GetAttribute` confirms the
    /// cached copy is still current.
    pub fn mark_validated(&self) {
        *self.last_validated.lock() = Instant::now();
    }

    /// Clears the dirty flag after a successful flush to the server.
    pub fn clear_dirty(&self) {
        *self.dirty.lock() = false;
    }
}

/// The client-side content cache, keyed by server-relative path.
///
/// At most one entry exists per server path across all mounted volumes, so
/// two volumes that happen to reference the same server file share one
/// cached copy.
#[derive(Default)]
pub struct Cache {
    entries: DashMap<String, std::sync::Arc<Entry>>,
}

impl Cache {
    /// An empty cache.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// The entry for `path`, if currently cached.
    pub fn get(&self, path: &str) -> Option<std::sync::Arc<Entry>> {
        self.entries.get(path).map(|e| std::sync::Arc::clone(&e))
    }

    /// Returns the existing entry for `path`, or inserts `fill()`'s result
    /// and returns that.
    ///
    /// `fill` runs at most once per miss: if two threads race a miss for the
    /// same path, `DashMap::entry` serializes them so only one `fill` call's
    /// result is kept.
    pub fn get_or_fill<F, E>(&self, path: &str, fill: F) -> Result<std::sync::Arc<Entry>, E>
    where
        F: FnOnce() -> Result<Vec<u8>, E>,
    {
        if let Some(entry) = self.get(path) {
            return Ok(entry);
        }
        match self.entries.entry(path.to_owned()) {
            dashmap::mapref::entry::Entry::Occupied(o) => Ok(std::sync::Arc::clone(o.get())),
            dashmap::mapref::entry::Entry::Vacant(v) => {
                let entry = std::sync::Arc::new(Entry::new(fill()?));
                v.insert(std::sync::Arc::clone(&entry));
                Ok(entry)
            }
        }
    }

    /// Evicts the entry for `path`, forcing the next access to reload from
    /// the server. Used when a `UpdateCallbackPromise(valid=false)`
    /// notification arrives.
    pub fn evict(&self, path: &str) {
        self.entries.remove(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_fill_only_fills_once_per_miss() {
        let cache = Cache::new();
        let calls = std::sync::atomic::AtomicUsize::new(0);

        let e1 = cache
            .get_or_fill::<_, ()>("a", || {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(b"hello".to_vec())
            })
            .unwrap();
        let e2 = cache
            .get_or_fill::<_, ()>("a", || {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(b"should not run".to_vec())
            })
            .unwrap();

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(e1.read(), e2.read());
    }

    #[test]
    fn test_splice_extends_buffer() {
        let entry = Entry::new(b"hello".to_vec());
        entry.splice_at(3, b"LO WORLD");
        assert_eq!(entry.read(), b"helLO WORLD".to_vec());
        assert!(entry.is_dirty());
    }

    #[test]
    fn test_evict_forces_refill() {
        let cache = Cache::new();
        cache
            .get_or_fill::<_, ()>("a", || Ok(b"v1".to_vec()))
            .unwrap();
        cache.evict("a");
        assert!(cache.get("a").is_none());
        let e = cache.get_or_fill::<_, ()>("a", || Ok(b"v2".to_vec())).unwrap();
        assert_eq!(e.read(), b"v2".to_vec());
    }
}
