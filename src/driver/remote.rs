//! Remote Driver Module
//!
//! Adapts the driver contract to a remote key-value server with native
//! per-key TTL. The wire protocol sits behind [`KvClient`]; [`RedisClient`]
//! speaks it to Redis or Valkey.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::driver::{CacheItem, Driver, Expiry};
use crate::error::{Result, StashError};

/// Key prefix used when none is configured.
pub const DEFAULT_PREFIX: &str = "stash:";

// == KV Client ==
/// A value read back from the server with its remaining TTL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub value: Vec<u8>,
    /// `None` when the key has no expiry
    pub ttl: Option<Duration>,
}

/// Primitives the remote driver needs from the server.
///
/// `ttl_secs` of `None` stores without expiry.
#[async_trait]
pub trait KvClient: Send + Sync {
    /// Round-trip used by `init` to verify the server is reachable.
    async fn ping(&self) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<RemoteEntry>>;

    async fn set(&self, key: &str, value: &[u8], ttl_secs: Option<u64>) -> Result<()>;

    /// Atomically writes `key` only if it does not exist (expired keys do not
    /// exist on the server). Returns whether the write happened.
    async fn set_if_absent(&self, key: &str, value: &[u8], ttl_secs: Option<u64>) -> Result<bool>;

    async fn del(&self, key: &str) -> Result<bool>;

    /// Deletes every key starting with `prefix`, returning how many.
    async fn flush_prefix(&self, prefix: &str) -> Result<u64>;

    /// Deletes every key in the server database, regardless of prefix.
    async fn flush_all(&self) -> Result<()>;
}

// == Flush Scope ==
/// What `flush` removes on the remote server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushScope {
    /// Only keys under this driver's prefix. Safe when the prefix is used
    /// by this instance alone.
    #[default]
    Prefix,
    /// The whole server database, including other tenants' keys.
    Database,
}

// == Remote Driver ==
pub struct RemoteDriver<C = RedisClient> {
    client: C,
    prefix: String,
    flush_scope: FlushScope,
}

impl<C: KvClient> RemoteDriver<C> {
    // == Constructor ==
    pub fn new(client: C) -> Self {
        Self {
            client,
            prefix: DEFAULT_PREFIX.to_string(),
            flush_scope: FlushScope::Prefix,
        }
    }

    /// Namespaces every key sent over the wire.
    ///
    /// # Arguments
    /// * `prefix` - Prepended to every key. An empty prefix falls back to
    ///   [`DEFAULT_PREFIX`], since a prefix-scoped flush would otherwise match
    ///   every key on the server.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        if prefix.is_empty() {
            warn!(
                fallback = DEFAULT_PREFIX,
                "remote: empty key prefix rejected, using default"
            );
            self.prefix = DEFAULT_PREFIX.to_string();
        } else {
            self.prefix = prefix;
        }
        self
    }

    pub fn with_flush_scope(mut self, scope: FlushScope) -> Self {
        self.flush_scope = scope;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    fn prefixed_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

/// Seconds of TTL to send for an expiry: `max(1, ceil(expires_at - now))`.
///
/// Past instants clamp to one second rather than being rejected.
pub fn ttl_seconds(expires_at: &Expiry) -> Option<u64> {
    match expires_at {
        Expiry::Never => None,
        Expiry::At(at) => {
            let millis = (*at - Utc::now()).num_milliseconds();
            let secs = (millis + 999).div_euclid(1000);
            Some(secs.max(1) as u64)
        }
    }
}

impl<C> fmt::Debug for RemoteDriver<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteDriver")
            .field("prefix", &self.prefix)
            .field("flush_scope", &self.flush_scope)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<C: KvClient> Driver for RemoteDriver<C> {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn init(&self) -> Result<()> {
        self.client
            .ping()
            .await
            .map_err(|err| StashError::BackendUnavailable {
                backend: "remote",
                source: Box::new(err),
            })?;
        info!(prefix = %self.prefix, "remote driver ready");
        Ok(())
    }

    // == Get ==
    async fn get(&self, ctx: &Context, key: &str) -> Result<Option<CacheItem>> {
        let entry = ctx.run(self.client.get(&self.prefixed_key(key))).await?;

        Ok(entry.map(|entry| {
            let expires_at = match entry.ttl {
                Some(ttl) => Expiry::after(ttl),
                None => Expiry::Never,
            };
            CacheItem::new(key, entry.value, expires_at)
        }))
    }

    // == Put ==
    async fn put(&self, ctx: &Context, item: CacheItem) -> Result<()> {
        let ttl = ttl_seconds(&item.expires_at);
        ctx.run(
            self.client
                .set(&self.prefixed_key(&item.key), &item.value, ttl),
        )
        .await
    }

    // == Add ==
    /// One conditional call on the server; no client-side read.
    async fn add(&self, ctx: &Context, item: CacheItem) -> Result<bool> {
        let ttl = ttl_seconds(&item.expires_at);
        ctx.run(
            self.client
                .set_if_absent(&self.prefixed_key(&item.key), &item.value, ttl),
        )
        .await
    }

    // == Forget ==
    async fn forget(&self, ctx: &Context, key: &str) -> Result<bool> {
        ctx.run(self.client.del(&self.prefixed_key(key))).await
    }

    // == Flush ==
    async fn flush(&self, ctx: &Context) -> Result<()> {
        match self.flush_scope {
            FlushScope::Prefix => {
                let removed = ctx.run(self.client.flush_prefix(&self.prefix)).await?;
                debug!(
                    prefix = %self.prefix,
                    removed,
                    "remote: flushed prefix (assumes no other instance shares it)"
                );
            }
            FlushScope::Database => {
                warn!(
                    prefix = %self.prefix,
                    "remote: flushing the entire server database; keys outside this prefix are removed too"
                );
                ctx.run(self.client.flush_all()).await?;
            }
        }
        Ok(())
    }
}

// == Redis Client ==
const SET_IF_ABSENT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
if tonumber(ARGV[2]) > 0 then
    redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[2])
else
    redis.call('SET', KEYS[1], ARGV[1])
end
return 1
";

const SCAN_BATCH: usize = 500;

/// [`KvClient`] over a multiplexed Redis/Valkey connection.
#[derive(Clone)]
pub struct RedisClient {
    conn: ConnectionManager,
    add_script: redis::Script,
}

impl RedisClient {
    /// Opens a managed connection to `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self> {
        let unavailable = |err: redis::RedisError| StashError::BackendUnavailable {
            backend: "remote",
            source: Box::new(err),
        };

        let client = redis::Client::open(url).map_err(unavailable)?;
        let conn = ConnectionManager::new(client).await.map_err(unavailable)?;

        Ok(Self {
            conn,
            add_script: redis::Script::new(SET_IF_ABSENT),
        })
    }
}

/// Escapes glob metacharacters so a prefix matches literally in `SCAN MATCH`.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl KvClient for RedisClient {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(StashError::remote)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<RemoteEntry>> {
        let mut conn = self.conn.clone();
        let (value, pttl): (Option<Vec<u8>>, i64) = redis::pipe()
            .atomic()
            .cmd("GET")
            .arg(key)
            .cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(StashError::remote)?;

        // PTTL is -1 for keys without expiry, -2 for missing keys.
        Ok(value.map(|value| RemoteEntry {
            value,
            ttl: u64::try_from(pttl).ok().map(Duration::from_millis),
        }))
    }

    async fn set(&self, key: &str, value: &[u8], ttl_secs: Option<u64>) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(secs) = ttl_secs {
            cmd.arg("EX").arg(secs);
        }

        let _: () = cmd
            .query_async(&mut conn)
            .await
            .map_err(StashError::remote)?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl_secs: Option<u64>) -> Result<bool> {
        let mut conn = self.conn.clone();
        let written: i64 = self
            .add_script
            .key(key)
            .arg(value)
            .arg(ttl_secs.unwrap_or(0))
            .invoke_async(&mut conn)
            .await
            .map_err(StashError::remote)?;
        Ok(written == 1)
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(StashError::remote)?;
        Ok(removed > 0)
    }

    async fn flush_prefix(&self, prefix: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", escape_glob(prefix));
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<Vec<u8>>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(StashError::remote)?;

            if !keys.is_empty() {
                let deleted: u64 = redis::cmd("DEL")
                    .arg(&keys)
                    .query_async(&mut conn)
                    .await
                    .map_err(StashError::remote)?;
                removed += deleted;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(removed)
    }

    async fn flush_all(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("FLUSHDB")
            .query_async(&mut conn)
            .await
            .map_err(StashError::remote)?;
        Ok(())
    }
}

// == Unit Tests ==
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::context::CancellationToken;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Instant;

    /// In-process stand-in for a key-value server with TTL support.
    #[derive(Debug, Default)]
    pub(crate) struct FakeKv {
        entries: Mutex<HashMap<String, (Vec<u8>, Option<Instant>)>>,
        pub(crate) last_ttl: Mutex<Option<Option<u64>>>,
        pub(crate) get_calls: AtomicUsize,
        pub(crate) conditional_calls: AtomicUsize,
        pub(crate) unreachable: bool,
    }

    impl FakeKv {
        /// A fake whose `ping` fails.
        pub(crate) fn unreachable() -> Self {
            Self {
                unreachable: true,
                ..Self::default()
            }
        }

        pub(crate) fn seed(&self, key: &str, value: &[u8]) {
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), (value.to_vec(), None));
        }

        pub(crate) fn keys(&self) -> Vec<String> {
            let mut keys: Vec<String> = self.entries.lock().unwrap().keys().cloned().collect();
            keys.sort();
            keys
        }

        fn live(entries: &mut HashMap<String, (Vec<u8>, Option<Instant>)>, key: &str) -> bool {
            match entries.get(key) {
                Some((_, Some(deadline))) if Instant::now() >= *deadline => {
                    entries.remove(key);
                    false
                }
                Some(_) => true,
                None => false,
            }
        }
    }

    fn deadline(ttl_secs: Option<u64>) -> Option<Instant> {
        ttl_secs.map(|secs| Instant::now() + Duration::from_secs(secs))
    }

    #[async_trait]
    impl KvClient for FakeKv {
        async fn ping(&self) -> Result<()> {
            if self.unreachable {
                return Err(StashError::remote("connection refused"));
            }
            Ok(())
        }

        async fn get(&self, key: &str) -> Result<Option<RemoteEntry>> {
            self.get_calls.fetch_add(1, Ordering::SeqCst);
            let mut entries = self.entries.lock().unwrap();
            if !Self::live(&mut entries, key) {
                return Ok(None);
            }
            Ok(entries.get(key).map(|(value, deadline)| RemoteEntry {
                value: value.clone(),
                ttl: deadline.map(|d| d.saturating_duration_since(Instant::now())),
            }))
        }

        async fn set(&self, key: &str, value: &[u8], ttl_secs: Option<u64>) -> Result<()> {
            *self.last_ttl.lock().unwrap() = Some(ttl_secs);
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), (value.to_vec(), deadline(ttl_secs)));
            Ok(())
        }

        async fn set_if_absent(
            &self,
            key: &str,
            value: &[u8],
            ttl_secs: Option<u64>,
        ) -> Result<bool> {
            self.conditional_calls.fetch_add(1, Ordering::SeqCst);
            let mut entries = self.entries.lock().unwrap();
            if Self::live(&mut entries, key) {
                return Ok(false);
            }
            entries.insert(key.to_string(), (value.to_vec(), deadline(ttl_secs)));
            Ok(true)
        }

        async fn del(&self, key: &str) -> Result<bool> {
            Ok(self.entries.lock().unwrap().remove(key).is_some())
        }

        async fn flush_prefix(&self, prefix: &str) -> Result<u64> {
            let mut entries = self.entries.lock().unwrap();
            let before = entries.len();
            entries.retain(|key, _| !key.starts_with(prefix));
            Ok((before - entries.len()) as u64)
        }

        async fn flush_all(&self) -> Result<()> {
            self.entries.lock().unwrap().clear();
            Ok(())
        }
    }

    fn driver() -> RemoteDriver<FakeKv> {
        RemoteDriver::new(FakeKv::default())
    }

    #[tokio::test]
    async fn test_remote_keys_are_prefixed() {
        let ctx = Context::background();
        let driver = driver().with_prefix("app:");

        driver
            .put(&ctx, CacheItem::with_ttl("user", b"v".to_vec(), Duration::from_secs(60)))
            .await
            .unwrap();

        assert_eq!(driver.client().keys(), vec!["app:user".to_string()]);
        let found = driver.get(&ctx, "user").await.unwrap().unwrap();
        assert_eq!(found.key, "user");
        assert_eq!(found.value, b"v");
    }

    #[tokio::test]
    async fn test_remote_default_prefix() {
        let driver = driver();
        assert_eq!(driver.prefix(), DEFAULT_PREFIX);
    }

    #[tokio::test]
    async fn test_remote_empty_prefix_keeps_flush_scoped() {
        let ctx = Context::background();
        let driver = driver().with_prefix("");
        driver.client().seed("other-tenant:session", b"x");
        driver.client().seed("unrelated", b"y");

        assert_eq!(driver.prefix(), DEFAULT_PREFIX);
        driver
            .forever(&ctx, CacheItem::forever("k", b"v".to_vec()))
            .await
            .unwrap();
        driver.flush(&ctx).await.unwrap();

        assert_eq!(
            driver.client().keys(),
            vec!["other-tenant:session".to_string(), "unrelated".to_string()]
        );
    }

    #[tokio::test]
    async fn test_remote_forever_sends_no_ttl() {
        let ctx = Context::background();
        let driver = driver();

        driver
            .forever(&ctx, CacheItem::with_ttl("k", b"v".to_vec(), Duration::from_secs(5)))
            .await
            .unwrap();

        assert_eq!(*driver.client().last_ttl.lock().unwrap(), Some(None));
        let found = driver.get(&ctx, "k").await.unwrap().unwrap();
        assert_eq!(found.expires_at, Expiry::Never);
    }

    #[tokio::test]
    async fn test_remote_past_expiry_clamps_to_one_second() {
        let ctx = Context::background();
        let driver = driver();
        let past = Expiry::At(Utc::now() - chrono::Duration::seconds(30));

        driver
            .put(&ctx, CacheItem::new("k", b"v".to_vec(), past))
            .await
            .unwrap();

        assert_eq!(*driver.client().last_ttl.lock().unwrap(), Some(Some(1)));
    }

    #[test]
    fn test_ttl_seconds_rounds_up() {
        let soon = Expiry::At(Utc::now() + chrono::Duration::milliseconds(1500));
        assert_eq!(ttl_seconds(&soon), Some(2));
        assert_eq!(ttl_seconds(&Expiry::Never), None);
    }

    #[tokio::test]
    async fn test_remote_add_is_single_conditional_call() {
        let ctx = Context::background();
        let driver = driver();

        assert!(driver
            .add(&ctx, CacheItem::with_ttl("k", b"v1".to_vec(), Duration::from_secs(60)))
            .await
            .unwrap());
        assert!(!driver
            .add(&ctx, CacheItem::with_ttl("k", b"v2".to_vec(), Duration::from_secs(60)))
            .await
            .unwrap());

        assert_eq!(driver.client().conditional_calls.load(Ordering::SeqCst), 2);
        assert_eq!(driver.client().get_calls.load(Ordering::SeqCst), 0);
        let found = driver.get(&ctx, "k").await.unwrap().unwrap();
        assert_eq!(found.value, b"v1");
    }

    #[tokio::test]
    async fn test_remote_forget() {
        let ctx = Context::background();
        let driver = driver();

        driver
            .forever(&ctx, CacheItem::forever("k", b"v".to_vec()))
            .await
            .unwrap();

        assert!(driver.forget(&ctx, "k").await.unwrap());
        assert!(!driver.forget(&ctx, "k").await.unwrap());
    }

    #[tokio::test]
    async fn test_remote_prefix_flush_keeps_foreign_keys() {
        let ctx = Context::background();
        let driver = driver().with_prefix("mine:");
        driver.client().seed("theirs:k", b"x");

        driver
            .forever(&ctx, CacheItem::forever("a", b"1".to_vec()))
            .await
            .unwrap();
        driver
            .forever(&ctx, CacheItem::forever("b", b"2".to_vec()))
            .await
            .unwrap();

        driver.flush(&ctx).await.unwrap();

        assert_eq!(driver.client().keys(), vec!["theirs:k".to_string()]);
    }

    #[tokio::test]
    async fn test_remote_database_flush_removes_everything() {
        let ctx = Context::background();
        let driver = driver()
            .with_prefix("mine:")
            .with_flush_scope(FlushScope::Database);
        driver.client().seed("theirs:k", b"x");

        driver.flush(&ctx).await.unwrap();

        assert!(driver.client().keys().is_empty());
    }

    #[tokio::test]
    async fn test_remote_init_unreachable() {
        let driver = RemoteDriver::new(FakeKv::unreachable());

        let err = driver.init().await.unwrap_err();
        assert!(matches!(err, StashError::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_remote_cancelled_call_does_not_reach_server() {
        let token = CancellationToken::new();
        let ctx = Context::with_token(token.clone());
        let driver = driver();
        token.cancel();

        let result = driver
            .put(&ctx, CacheItem::forever("k", b"v".to_vec()))
            .await;

        assert!(matches!(result, Err(StashError::Cancelled)));
        assert!(driver.client().keys().is_empty());
    }

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("stash:"), "stash:");
        assert_eq!(escape_glob("a*b?[c]"), "a\\*b\\?\\[c\\]");
    }
}
