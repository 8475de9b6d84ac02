use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use log::trace;
use tokio::time::Instant;

use super::Cache;
use crate::error::CacheError;

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    last_access: Instant,
}

type Entries = DashMap<String, Entry>;

/// An in-process cache, optionally evicting entries that were not touched for a while
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: Arc<Entries>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache whose entries are dropped after `idle` without a read or write.
    ///
    /// Spawns a sweeper on the current tokio runtime; it exits once the cache is dropped.
    pub fn with_idle_eviction(idle: Duration, sweep_interval: Duration) -> Self {
        let cache = Self::default();
        let entries = Arc::downgrade(&cache.entries);
        tokio::spawn(sweep(entries, idle, sweep_interval));
        cache
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

async fn sweep(entries: Weak<Entries>, idle: Duration, sweep_interval: Duration) {
    let mut ticker = tokio::time::interval(sweep_interval);
    loop {
        ticker.tick().await;

        let Some(entries) = entries.upgrade() else {
            trace!("Memory cache dropped, stopping eviction sweeper");
            return;
        };

        let now = Instant::now();
        entries.retain(|key, entry| {
            let keep = now.duration_since(entry.last_access) < idle;
            if !keep {
                trace!("Evicting idle cache entry `{key}`");
            }
            keep
        });
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.entries.get_mut(key).map(|mut entry| {
            entry.last_access = Instant::now();
            entry.value.clone()
        }))
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                last_access: Instant::now(),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }
}
