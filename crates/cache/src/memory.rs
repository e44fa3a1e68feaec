//! In-memory state store
//!
//! Default backend. Entries optionally expire after a TTL; when the store is
//! full, expired entries are evicted first, then the oldest entry.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::{Result, StateStore};

/// Maximum number of stored values
const DEFAULT_MAX_SIZE: usize = 10_000;

struct CacheEntry {
    value: Vec<u8>,
    created_at: Instant,
}

/// Process-local store backed by a `HashMap`
pub struct MemoryStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Option<Duration>,
    max_size: usize,
}

impl MemoryStore {
    /// Create a store without expiry
    pub fn new() -> Self {
        Self::with_config(None, DEFAULT_MAX_SIZE)
    }

    /// Create a store with custom TTL and max size
    pub fn with_config(ttl: Option<Duration>, max_size: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_size,
        }
    }

    fn is_live(&self, entry: &CacheEntry, now: Instant) -> bool {
        self.ttl
            .map_or(true, |ttl| now.duration_since(entry.created_at) < ttl)
    }

    /// Get the number of entries, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Remove all expired entries
    pub fn evict_expired(&self) {
        let Some(ttl) = self.ttl else {
            return;
        };
        let now = Instant::now();
        self.entries
            .lock()
            .retain(|_, entry| now.duration_since(entry.created_at) < ttl);
    }

    /// Clear all entries
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn evict_oldest(entries: &mut HashMap<String, CacheEntry>) {
    if let Some(oldest_key) = entries
        .iter()
        .min_by_key(|(_, entry)| entry.created_at)
        .map(|(k, _)| k.clone())
    {
        debug!("State store full, evicting {}", oldest_key);
        entries.remove(&oldest_key);
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        let entries = self.entries.lock();
        Ok(entries
            .get(key)
            .filter(|entry| self.is_live(entry, now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if !entries.contains_key(key) && entries.len() >= self.max_size {
            if let Some(ttl) = self.ttl {
                entries.retain(|_, entry| now.duration_since(entry.created_at) < ttl);
            }
            if entries.len() >= self.max_size {
                evict_oldest(&mut entries);
            }
        }

        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                created_at: now,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        let entry = self.entries.lock().remove(key);
        Ok(entry
            .filter(|entry| self.is_live(entry, now))
            .map(|entry| entry.value))
    }
}
