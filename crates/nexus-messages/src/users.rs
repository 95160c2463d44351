//! Author display-name lookup with a bounded in-memory cache.
//!
//! The cache is shared by every channel a store visits, so it outlives
//! channel switches. It is bounded two ways:
//!
//! - capacity: inserting past it evicts the least recently used entry
//! - TTL: entries older than the TTL are dropped on lookup
//!
//! `IndexMap` keeps entries in access order; the front is always the LRU
//! victim. Lookup failures are never cached, so a later call retries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use tracing::{debug, error};

use crate::backend::MessageBackend;

/// Shown when an author's name cannot be fetched.
pub const UNKNOWN_USER: &str = "Unknown User";

struct CacheEntry {
    username: String,
    inserted: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheMetricsSnapshot {
    /// Hit rate in 0.0–1.0; 0.0 before any lookup.
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct UsernameCache {
    entries: Mutex<IndexMap<String, CacheEntry>>,
    capacity: usize,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl UsernameCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(IndexMap::new()),
            capacity: capacity.max(1),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn get(&self, user_id: &str) -> Option<String> {
        self.get_at(user_id, Instant::now())
    }

    fn get_at(&self, user_id: &str, now: Instant) -> Option<String> {
        let mut map = self.lock();
        let Some(idx) = map.get_index_of(user_id) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let expired = map
            .get_index(idx)
            .is_some_and(|(_, entry)| now.saturating_duration_since(entry.inserted) > self.ttl);
        if expired {
            map.shift_remove_index(idx);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        // Move to back for LRU ordering
        let last = map.len() - 1;
        map.move_index(idx, last);
        self.hits.fetch_add(1, Ordering::Relaxed);
        map.get_index(last).map(|(_, entry)| entry.username.clone())
    }

    pub fn put(&self, user_id: &str, username: &str) {
        self.put_at(user_id, username, Instant::now());
    }

    fn put_at(&self, user_id: &str, username: &str, now: Instant) {
        let mut map = self.lock();
        let entry = CacheEntry {
            username: username.to_string(),
            inserted: now,
        };
        // shift_remove + insert lands the entry at the back
        map.shift_remove(user_id);
        map.insert(user_id.to_string(), entry);

        while map.len() > self.capacity {
            if let Some((evicted, _)) = map.shift_remove_index(0) {
                debug!("Evicted cached username for {}", evicted);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<String, CacheEntry>> {
        // Entries are plain strings; a panic mid-update cannot leave them torn.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resolves user ids to display names through the cache, falling back to
/// one backend query per miss.
pub struct UsernameResolver {
    backend: Arc<dyn MessageBackend>,
    cache: UsernameCache,
}

impl UsernameResolver {
    pub fn new(backend: Arc<dyn MessageBackend>, capacity: usize, ttl: Duration) -> Self {
        Self {
            backend,
            cache: UsernameCache::new(capacity, ttl),
        }
    }

    /// Cached name, or one backend query on a miss. Concurrent misses for
    /// the same id each query; the last answer wins in the cache.
    pub async fn resolve(&self, user_id: &str) -> String {
        if let Some(username) = self.cache.get(user_id) {
            return username;
        }

        match self.backend.fetch_username(user_id).await {
            Ok(username) => {
                self.cache.put(user_id, &username);
                username
            }
            Err(e) => {
                error!("Error fetching user {}: {:#}", user_id, e);
                UNKNOWN_USER.to_string()
            }
        }
    }

    /// Seed the cache with a name already known locally (e.g. the sender's own).
    pub fn remember(&self, user_id: &str, username: &str) {
        self.cache.put(user_id, username);
    }

    pub fn cache(&self) -> &UsernameCache {
        &self.cache
    }
}
