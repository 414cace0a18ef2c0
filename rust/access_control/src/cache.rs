//! Fixed-capacity LRU cache whose entries also expire after a TTL.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Thread-safe LRU cache with a per-entry time-to-live.
///
/// Expired entries are dropped lazily on lookup or by [`purge_expired`];
/// capacity pressure evicts the least recently used entry.
///
/// [`purge_expired`]: ExpiringLruCache::purge_expired
pub struct ExpiringLruCache<V> {
    entries: Mutex<LruCache<String, Entry<V>>>,
}

impl<V: Clone> ExpiringLruCache<V> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Fetch a live entry and mark it most recently used.
    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    /// Fetch a live entry without touching its LRU position.
    pub fn peek(&self, key: &str) -> Option<V> {
        let entries = self.entries.lock();
        entries
            .peek(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.value.clone())
    }

    /// Insert or replace `key`, live for `ttl` from now. Returns the key of
    /// the entry evicted to make room, if any.
    pub fn add(&self, key: &str, value: V, ttl: Duration) -> Option<String> {
        self.add_at(key, value, ttl, Instant::now())
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.entries.lock().pop(key).map(|e| e.value)
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry; returns the removed keys.
    pub fn purge_expired(&self) -> Vec<String> {
        self.purge_expired_at(Instant::now())
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    fn add_at(&self, key: &str, value: V, ttl: Duration, now: Instant) -> Option<String> {
        let entry = Entry {
            value,
            expires_at: now + ttl,
        };
        // push hands back the replaced entry too; only a different key was evicted
        match self.entries.lock().push(key.to_string(), entry) {
            Some((evicted, _)) if evicted != key => Some(evicted),
            _ => None,
        }
    }

    fn purge_expired_at(&self, now: Instant) -> Vec<String> {
        let mut entries = self.entries.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            entries.pop(key.as_str());
        }
        expired
    }
}
