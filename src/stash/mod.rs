//! Stash Facade Module
//!
//! The caller-facing API: serializes values, classifies driver outcomes into
//! hit / miss / error, and adds convenience operations on top of any
//! [`Driver`].

mod result;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::codec::{self, Format, Stashable};
use crate::config::{Config, DriverKind};
use crate::context::Context;
use crate::driver::{CacheItem, Driver, Expiry, FileDriver, MemoryDriver, RedisClient, RemoteDriver};
use crate::error::{Operation, Result, StashError};

pub use result::{CacheResult, Pulled, ResultState};

// == Stash ==
/// Cache facade over a single driver. Cheap to clone; clones share the
/// driver.
#[derive(Clone)]
pub struct Stash {
    driver: Arc<dyn Driver>,
    format: Format,
    op_timeout: Option<Duration>,
}

impl fmt::Debug for Stash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stash")
            .field("driver", &self.driver.name())
            .field("format", &self.format)
            .field("op_timeout", &self.op_timeout)
            .finish()
    }
}

impl Stash {
    // == Constructors ==
    /// Initializes `driver` and wraps it.
    ///
    /// # Arguments
    /// * `driver` - Any backend; `init` runs once here
    ///
    /// # Returns
    /// - `Ok(Stash)` with the JSON format and no operation timeout
    /// - `Err(BackendUnavailable)` if the driver cannot be prepared
    pub async fn new(driver: impl Driver + 'static) -> Result<Self> {
        Self::from_driver(Arc::new(driver)).await
    }

    /// Same as [`Stash::new`] for a driver that is already shared.
    pub async fn from_driver(driver: Arc<dyn Driver>) -> Result<Self> {
        if let Err(err) = driver.init().await {
            let err = match err {
                StashError::BackendUnavailable { .. } => err,
                other => StashError::BackendUnavailable {
                    backend: driver.name(),
                    source: Box::new(other),
                },
            };
            warn!(driver = driver.name(), error = %err, "driver init failed");
            return Err(err);
        }

        Ok(Self {
            driver,
            format: Format::default(),
            op_timeout: None,
        })
    }

    /// Builds the driver selected by `config` and initializes it.
    ///
    /// # Arguments
    /// * `config` - Driver kind, paths, prefix, format and timeout, usually
    ///   from [`Config::from_env`]
    ///
    /// # Returns
    /// - `Err(BackendUnavailable)` if the directory cannot be created or the
    ///   remote server cannot be reached
    pub async fn from_config(config: &Config) -> Result<Self> {
        let stash = match config.driver {
            DriverKind::Memory => Self::new(MemoryDriver::new()).await?,
            DriverKind::File => {
                let mut driver = FileDriver::new(&config.file_path);
                if let Some(prefix) = &config.prefix {
                    driver = driver.with_prefix(prefix.clone());
                }
                Self::new(driver).await?
            }
            DriverKind::Remote => {
                let client = RedisClient::connect(&config.remote_url).await?;
                let driver = RemoteDriver::new(client)
                    .with_prefix(config.remote_prefix())
                    .with_flush_scope(config.flush_scope);
                Self::new(driver).await?
            }
        };

        let stash = stash.with_format(config.format);
        Ok(match config.op_timeout {
            Some(timeout) => stash.with_op_timeout(timeout),
            None => stash,
        })
    }

    /// Sets the generic codec format for structured values.
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Bounds every operation by `timeout` on top of the caller's context.
    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = Some(timeout);
        self
    }

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    pub fn format(&self) -> Format {
        self.format
    }

    fn scoped(&self, ctx: &Context) -> Context {
        match self.op_timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx.clone(),
        }
    }

    fn wrap(&self, op: Operation, key: Option<&str>, err: StashError) -> StashError {
        let err = err.wrap(op, key);
        warn!(
            driver = self.driver.name(),
            %op,
            key = key.unwrap_or_default(),
            error = %err,
            "cache operation failed"
        );
        err
    }

    // == Get ==
    /// Reads `key` without decoding.
    ///
    /// A true miss and an expired item both report [`ResultState::Miss`].
    pub async fn get_raw(&self, ctx: &Context, key: &str) -> CacheResult {
        let ctx = self.scoped(ctx);
        match self.driver.get(&ctx, key).await {
            Ok(Some(item)) => CacheResult::hit(key, item.value),
            Ok(None) => {
                debug!(driver = self.driver.name(), key, "cache miss");
                CacheResult::miss(key)
            }
            Err(err) => CacheResult::error(key, self.wrap(Operation::Get, Some(key), err)),
        }
    }

    /// Reads and decodes `key`.
    ///
    /// A miss is [`StashError::CacheMiss`]; a payload of the wrong shape is
    /// [`StashError::Deserialization`].
    pub async fn get<T: Stashable>(&self, ctx: &Context, key: &str) -> Result<T> {
        self.get_raw(ctx, key).await.decode(self.format)
    }

    /// Reads and decodes `key`, falling back to `fallback` on a miss.
    ///
    /// The fallback value is returned as is, not stored.
    ///
    /// # Arguments
    /// * `fallback` - Called only when no live value exists
    ///
    /// # Returns
    /// - The cached value on a hit
    /// - The result of `fallback().await` on [`StashError::CacheMiss`]
    /// - Any other error (backend, deserialization, cancellation) unchanged
    pub async fn get_or_else<T, F, Fut>(&self, ctx: &Context, key: &str, fallback: F) -> Result<T>
    where
        T: Stashable,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self.get::<T>(ctx, key).await {
            Err(err) if err.is_cache_miss() => fallback().await,
            other => other,
        }
    }

    // == Put ==
    /// Stores `value` for `ttl`, replacing any existing value.
    ///
    /// # Arguments
    /// * `key` - Cache key
    /// * `value` - Encoded through its [`Stashable`] codec
    /// * `ttl` - Lifetime from now. Zero stores an item that is already
    ///   expired; use [`Stash::forever`] for no expiry
    ///
    /// # Returns
    /// - `Err(Serialization)` if `value` cannot be encoded
    /// - `Err(Backend)` wrapping the driver failure
    pub async fn put<T: Stashable>(
        &self,
        ctx: &Context,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<()> {
        let payload = codec::encode(self.format, value)?;
        self.put_bytes(ctx, key, payload, ttl).await
    }

    /// Stores a pre-encoded payload for `ttl`.
    ///
    /// # Arguments
    /// * `payload` - Stored byte for byte; the format is not applied
    /// * `ttl` - Lifetime from now, as in [`Stash::put`]
    pub async fn put_bytes(
        &self,
        ctx: &Context,
        key: &str,
        payload: Vec<u8>,
        ttl: Duration,
    ) -> Result<()> {
        let ctx = self.scoped(ctx);
        self.driver
            .put(&ctx, CacheItem::new(key, payload, Expiry::after(ttl)))
            .await
            .map_err(|err| self.wrap(Operation::Put, Some(key), err))
    }

    // == Add ==
    /// Stores `value` only if no live value exists.
    ///
    /// An expired value counts as absent and is replaced.
    ///
    /// # Returns
    /// - `Ok(true)` if `value` was written
    /// - `Ok(false)` if a live value was already stored (left untouched)
    pub async fn add<T: Stashable>(
        &self,
        ctx: &Context,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<bool> {
        let payload = codec::encode(self.format, value)?;
        self.add_bytes(ctx, key, payload, ttl).await
    }

    /// Byte-level [`Stash::add`] for a pre-encoded payload.
    ///
    /// # Returns
    /// - `Ok(true)` if `payload` was written, `Ok(false)` if a live value exists
    pub async fn add_bytes(
        &self,
        ctx: &Context,
        key: &str,
        payload: Vec<u8>,
        ttl: Duration,
    ) -> Result<bool> {
        let ctx = self.scoped(ctx);
        self.driver
            .add(&ctx, CacheItem::new(key, payload, Expiry::after(ttl)))
            .await
            .map_err(|err| self.wrap(Operation::Add, Some(key), err))
    }

    // == Forever ==
    /// Stores `value` with no expiry.
    pub async fn forever<T: Stashable>(&self, ctx: &Context, key: &str, value: &T) -> Result<()> {
        let payload = codec::encode(self.format, value)?;
        self.forever_bytes(ctx, key, payload).await
    }

    /// Stores a pre-encoded payload with no expiry.
    pub async fn forever_bytes(&self, ctx: &Context, key: &str, payload: Vec<u8>) -> Result<()> {
        let ctx = self.scoped(ctx);
        self.driver
            .forever(&ctx, CacheItem::forever(key, payload))
            .await
            .map_err(|err| self.wrap(Operation::Forever, Some(key), err))
    }

    // == Forget ==
    /// Removes `key`, returning whether anything was removed.
    pub async fn forget(&self, ctx: &Context, key: &str) -> Result<bool> {
        let ctx = self.scoped(ctx);
        self.driver
            .forget(&ctx, key)
            .await
            .map_err(|err| self.wrap(Operation::Forget, Some(key), err))
    }

    // == Flush ==
    /// Removes every value owned by the driver.
    pub async fn flush(&self, ctx: &Context) -> Result<()> {
        let ctx = self.scoped(ctx);
        self.driver
            .flush(&ctx)
            .await
            .map_err(|err| self.wrap(Operation::Flush, None, err))
    }

    // == Has / Missing ==
    /// Whether a live value exists. Backend errors count as "not present";
    /// use [`Stash::get_raw`] to see them.
    pub async fn has(&self, ctx: &Context, key: &str) -> bool {
        let ctx = self.scoped(ctx);
        match self.driver.get(&ctx, key).await {
            Ok(found) => found.is_some(),
            Err(err) => {
                debug!(driver = self.driver.name(), key, error = %err, "has: treating error as absent");
                false
            }
        }
    }

    /// Inverse of [`Stash::has`]; errors count as missing.
    pub async fn missing(&self, ctx: &Context, key: &str) -> bool {
        !self.has(ctx, key).await
    }

    // == Pull ==
    /// Reads `key` and then forgets it.
    ///
    /// On a miss or read error the forget is skipped and the result returned
    /// as is. A failed forget after a hit is reported in
    /// [`Pulled::forget_error`] alongside the payload.
    pub async fn pull_raw(&self, ctx: &Context, key: &str) -> Pulled<CacheResult> {
        let result = self.get_raw(ctx, key).await;
        if !result.is_hit() {
            return Pulled {
                value: result,
                forget_error: None,
            };
        }

        Pulled {
            value: result,
            forget_error: self.forget(ctx, key).await.err(),
        }
    }

    /// Typed [`Stash::pull_raw`].
    ///
    /// The payload is decoded before the forget, so a value of the wrong
    /// shape stays stored.
    ///
    /// # Returns
    /// - `Ok(Pulled)` with the value; `forget_error` is set if the removal
    ///   failed
    /// - `Err(CacheMiss)` if nothing was stored; nothing is forgotten
    pub async fn pull<T: Stashable>(&self, ctx: &Context, key: &str) -> Result<Pulled<T>> {
        let value = self.get::<T>(ctx, key).await?;
        let forget_error = self.forget(ctx, key).await.err();

        Ok(Pulled {
            value,
            forget_error,
        })
    }
}
