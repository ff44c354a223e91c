//! In-memory response cache with per-entry expiry
//!
//! Provides a `ResponseCache` that stores upstream results keyed by query, with a
//! TTL recorded on each entry. Expired entries are kept so clients can serve them
//! when an upstream is down.

use chrono::{DateTime, Utc};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A single cached value
struct CacheEntry {
    /// The cached data, type-erased
    value: Arc<dyn Any + Send + Sync>,
    /// When the data was cached
    stored_at: DateTime<Utc>,
    /// How long the entry stays fresh
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        // A stored_at in the future (clock skew) counts as age zero.
        let age = (now - self.stored_at).to_std().unwrap_or(Duration::ZERO);
        age >= self.ttl
    }
}

/// Result of reading from cache, including metadata about cache freshness
#[derive(Debug, Clone, PartialEq)]
pub struct CachedData<T> {
    /// The cached data
    pub data: T,
    /// When the data was originally cached (or fetched, for fresh results)
    pub cached_at: DateTime<Utc>,
    /// Whether the entry had outlived its TTL when it was read
    pub is_expired: bool,
}

impl<T> CachedData<T> {
    /// Wraps data that was just fetched from the upstream
    pub fn fresh(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
            is_expired: false,
        }
    }

    pub fn into_inner(self) -> T {
        self.data
    }
}

/// Process-wide store of upstream responses
///
/// Cloning the cache yields another handle to the same entries. Construct one
/// per process and hand clones to every client. Growth is bounded by the
/// number of distinct query keys; nothing is evicted beyond TTL expiry.
#[derive(Clone, Default)]
pub struct ResponseCache {
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
}

impl fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCache")
            .field("entries", &self.len())
            .finish()
    }
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        // Entries stay consistent even if a holder panicked; each op is a single insert/lookup.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a value under `key`, replacing any previous entry
    ///
    /// # Arguments
    /// * `key` - Unique identifier for the entry (e.g., "CME_2024-01-01_2024-01-07")
    /// * `value` - The data to cache
    /// * `ttl` - How long the entry should be considered fresh
    pub fn put<T: Send + Sync + 'static>(&self, key: &str, value: T, ttl: Duration) {
        self.put_at(key, value, ttl, Utc::now());
    }

    fn put_at<T: Send + Sync + 'static>(&self, key: &str, value: T, ttl: Duration, stored_at: DateTime<Utc>) {
        self.lock().insert(
            key.to_string(),
            CacheEntry {
                value: Arc::new(value),
                stored_at,
                ttl,
            },
        );
    }

    /// Returns the value for `key` only while it is still fresh
    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &str) -> Option<T> {
        self.get_at(key, Utc::now())
    }

    fn get_at<T: Clone + Send + Sync + 'static>(&self, key: &str, now: DateTime<Utc>) -> Option<T> {
        self.read_at::<T>(key, now)
            .filter(|cached| !cached.is_expired)
            .map(CachedData::into_inner)
    }

    /// Reads an entry regardless of age
    ///
    /// Returns `Some(CachedData)` with `is_expired = true` if the entry exists but
    /// has expired, allowing callers to fall back to stale data when an upstream
    /// is unavailable. Returns `None` if the key is absent or holds another type.
    pub fn read<T: Clone + Send + Sync + 'static>(&self, key: &str) -> Option<CachedData<T>> {
        self.read_at(key, Utc::now())
    }

    fn read_at<T: Clone + Send + Sync + 'static>(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Option<CachedData<T>> {
        let entries = self.lock();
        let entry = entries.get(key)?;
        let data = entry.value.downcast_ref::<T>()?.clone();
        Some(CachedData {
            data,
            cached_at: entry.stored_at,
            is_expired: entry.is_expired_at(now),
        })
    }

    /// Number of entries, fresh or expired
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry
    pub fn clear(&self) {
        self.lock().clear();
    }
}
