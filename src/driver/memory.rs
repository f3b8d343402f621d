//! Memory Driver Module
//!
//! In-process driver: a HashMap behind a single mutex. Nothing is persisted.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::context::Context;
use crate::driver::{CacheItem, Driver};
use crate::error::Result;

// == Memory Driver ==
/// Stores items in a map guarded by one mutex covering every operation.
#[derive(Debug, Default)]
pub struct MemoryDriver {
    entries: Mutex<HashMap<String, CacheItem>>,
}

impl MemoryDriver {
    // == Constructor ==
    pub fn new() -> Self {
        Self::default()
    }

    // == Length ==
    /// Number of stored items, including expired ones not yet read.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    // == Is Empty ==
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn init(&self) -> Result<()> {
        self.entries.lock().await.clear();
        Ok(())
    }

    // == Get ==
    /// Expired entries are removed under the same lock and reported absent.
    async fn get(&self, ctx: &Context, key: &str) -> Result<Option<CacheItem>> {
        ctx.check()?;
        let mut entries = self.entries.lock().await;

        match entries.get(key) {
            Some(item) if item.is_expired() => {
                entries.remove(key);
                debug!(key, "memory: evicted expired item on read");
                Ok(None)
            }
            Some(item) => Ok(Some(item.clone())),
            None => Ok(None),
        }
    }

    // == Put ==
    async fn put(&self, ctx: &Context, item: CacheItem) -> Result<()> {
        ctx.check()?;
        let mut entries = self.entries.lock().await;
        entries.insert(item.key.clone(), item);
        Ok(())
    }

    // == Add ==
    /// Read and write happen in one critical section.
    async fn add(&self, ctx: &Context, item: CacheItem) -> Result<bool> {
        ctx.check()?;
        let mut entries = self.entries.lock().await;

        if let Some(existing) = entries.get(&item.key) {
            if !existing.is_expired() {
                return Ok(false);
            }
        }

        entries.insert(item.key.clone(), item);
        Ok(true)
    }

    // == Forget ==
    async fn forget(&self, ctx: &Context, key: &str) -> Result<bool> {
        ctx.check()?;
        Ok(self.entries.lock().await.remove(key).is_some())
    }

    // == Flush ==
    async fn flush(&self, ctx: &Context) -> Result<()> {
        ctx.check()?;
        self.entries.lock().await.clear();
        Ok(())
    }
}
