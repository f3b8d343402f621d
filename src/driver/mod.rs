//! Driver Module
//!
//! The storage contract every backend implements, plus the three bundled
//! backends: in-process memory, on-disk files and a remote key-value server.

mod file;
mod item;
mod lock;
mod memory;
pub mod remote;


use async_trait::async_trait;

use crate::context::Context;
use crate::error::Result;

// Re-export public types
pub use file::FileDriver;
pub use item::{CacheItem, Expiry, NEVER_EXPIRES_UNIX};
pub use lock::{KeyGuard, KeyLocks};
pub use memory::MemoryDriver;
pub use remote::{
    ttl_seconds, FlushScope, KvClient, RedisClient, RemoteDriver, RemoteEntry, DEFAULT_PREFIX,
};

// == Driver Trait ==
/// Storage backend contract.
///
/// Expiry is checked lazily: `get` must treat an expired item as absent and
/// remove it before returning. A true miss is `Ok(None)`, never an error.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Backend name used in logs and error context.
    fn name(&self) -> &'static str;

    /// Idempotent setup (create directory, open connection).
    ///
    /// Fails with `BackendUnavailable` when the resource cannot be prepared.
    async fn init(&self) -> Result<()>;

    /// Returns the live item stored under `key`, if any.
    async fn get(&self, ctx: &Context, key: &str) -> Result<Option<CacheItem>>;

    /// Unconditional upsert of value and expiry.
    async fn put(&self, ctx: &Context, item: CacheItem) -> Result<()>;

    /// Stores `item` only if no live value exists for its key.
    ///
    /// Returns whether the write happened; an existing live value is not an
    /// error.
    async fn add(&self, ctx: &Context, item: CacheItem) -> Result<bool>;

    /// Stores `item` with the never-expire sentinel.
    async fn forever(&self, ctx: &Context, item: CacheItem) -> Result<()> {
        self.put(
            ctx,
            CacheItem {
                expires_at: Expiry::Never,
                ..item
            },
        )
        .await
    }

    /// Removes the value under `key`, returning whether anything was removed.
    async fn forget(&self, ctx: &Context, key: &str) -> Result<bool>;

    /// Removes every value owned by this driver (within its namespace).
    async fn flush(&self, ctx: &Context) -> Result<()>;
}
