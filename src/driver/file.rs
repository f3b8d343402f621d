//! File Driver Module
//!
//! Stores one file per key. File names are the hex SHA-256 of the key; the
//! record is a 10-digit ASCII expiry (unix seconds) followed by the raw
//! payload.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info};

use crate::context::Context;
use crate::driver::{CacheItem, Driver, Expiry, KeyLocks, NEVER_EXPIRES_UNIX};
use crate::error::{Result, StashError};

/// Width of the expiry header in bytes.
pub const HEADER_LEN: usize = 10;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

// == File Driver ==
#[derive(Debug, Clone)]
pub struct FileDriver {
    root: PathBuf,
    prefix: Option<String>,
    locks: KeyLocks,
}

impl FileDriver {
    // == Constructor ==
    /// Creates a driver storing records under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            prefix: None,
            locks: KeyLocks::new(),
        }
    }

    /// Nests records under `root/prefix`. `flush` then only clears that
    /// subdirectory.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.prefix = if prefix.is_empty() { None } else { Some(prefix) };
        self
    }

    /// Directory holding this driver's records.
    pub fn dir(&self) -> PathBuf {
        match &self.prefix {
            Some(prefix) => self.root.join(prefix),
            None => self.root.clone(),
        }
    }

    /// Path of the record for `key`.
    pub fn path_for_key(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir().join(hex::encode(digest))
    }

    // == Record Encoding ==
    fn encode_record(item: &CacheItem) -> Vec<u8> {
        // Already-expired items round down so they stay expired on disk.
        let unix = match item.expires_at {
            Expiry::At(at) if item.is_expired() => at.timestamp().clamp(0, NEVER_EXPIRES_UNIX - 1),
            expiry => expiry.to_unix_ceil(),
        };
        let header = format!("{unix:010}");
        let mut record = Vec::with_capacity(HEADER_LEN + item.value.len());
        record.extend_from_slice(header.as_bytes());
        record.extend_from_slice(&item.value);
        record
    }

    fn parse_header(path: &Path, bytes: &[u8]) -> Result<Expiry> {
        if bytes.len() < HEADER_LEN {
            return Err(StashError::CorruptRecord {
                path: path.to_path_buf(),
                reason: format!("header is {} bytes, expected {HEADER_LEN}", bytes.len()),
            });
        }

        let header = &bytes[..HEADER_LEN];
        if !header.iter().all(u8::is_ascii_digit) {
            return Err(StashError::CorruptRecord {
                path: path.to_path_buf(),
                reason: "header is not a decimal timestamp".to_string(),
            });
        }

        // Ten ASCII digits always fit in an i64.
        let secs = header
            .iter()
            .fold(0i64, |acc, digit| acc * 10 + i64::from(digit - b'0'));
        Ok(Expiry::from_unix(secs))
    }

    // == Unlocked Helpers ==
    // Callers must hold the key's lock.

    async fn read_unlocked(&self, key: &str) -> Result<Option<CacheItem>> {
        let path = self.path_for_key(key);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let expires_at = Self::parse_header(&path, &bytes)?;
        if expires_at.is_expired_at(Utc::now()) {
            self.remove_unlocked(key).await?;
            debug!(key, "file: evicted expired record on read");
            return Ok(None);
        }

        Ok(Some(CacheItem {
            key: key.to_string(),
            value: bytes[HEADER_LEN..].to_vec(),
            expires_at,
        }))
    }

    /// Writes to a temporary sibling, then renames over the record.
    ///
    /// The context is checked once more before the rename so a cancelled
    /// write never becomes visible.
    async fn write_unlocked(&self, ctx: &Context, item: &CacheItem) -> Result<()> {
        let path = self.path_for_key(&item.key);
        let dir = self.dir();
        fs::create_dir_all(&dir).await?;

        let temp = dir.join(format!(
            ".{}.{}.{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("record"),
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        if let Err(err) = fs::write(&temp, Self::encode_record(item)).await {
            let _ = fs::remove_file(&temp).await;
            return Err(err.into());
        }

        if let Err(err) = ctx.check() {
            let _ = fs::remove_file(&temp).await;
            return Err(err);
        }

        if let Err(err) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(err.into());
        }
        Ok(())
    }

    async fn remove_unlocked(&self, key: &str) -> Result<bool> {
        match fs::remove_file(self.path_for_key(key)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl Driver for FileDriver {
    fn name(&self) -> &'static str {
        "file"
    }

    /// Ensures the storage directory exists.
    async fn init(&self) -> Result<()> {
        let dir = self.dir();
        fs::create_dir_all(&dir)
            .await
            .map_err(|err| StashError::BackendUnavailable {
                backend: "file",
                source: Box::new(err),
            })?;
        info!(path = %dir.display(), "file driver ready");
        Ok(())
    }

    // == Get ==
    async fn get(&self, ctx: &Context, key: &str) -> Result<Option<CacheItem>> {
        let _guard = self.locks.acquire(ctx, key).await?;
        self.read_unlocked(key).await
    }

    // == Put ==
    async fn put(&self, ctx: &Context, item: CacheItem) -> Result<()> {
        let _guard = self.locks.acquire(ctx, &item.key).await?;
        self.write_unlocked(ctx, &item).await
    }

    // == Add ==
    /// Liveness check and write share one lock acquisition.
    async fn add(&self, ctx: &Context, item: CacheItem) -> Result<bool> {
        let _guard = self.locks.acquire(ctx, &item.key).await?;

        match self.read_unlocked(&item.key).await {
            Ok(Some(_)) => return Ok(false),
            Ok(None) => {}
            // An unreadable record is treated as absent and replaced.
            Err(StashError::CorruptRecord { path, reason }) => {
                debug!(key = %item.key, path = %path.display(), %reason, "file: replacing corrupt record");
            }
            Err(err) => return Err(err),
        }

        self.write_unlocked(ctx, &item).await?;
        Ok(true)
    }

    // == Forget ==
    async fn forget(&self, ctx: &Context, key: &str) -> Result<bool> {
        let _guard = self.locks.acquire(ctx, key).await?;
        ctx.check()?;
        self.remove_unlocked(key).await
    }

    // == Flush ==
    /// Removes the whole storage subtree and recreates it.
    ///
    /// Waits for in-flight keyed operations and holds new ones back until the
    /// directory exists again.
    async fn flush(&self, ctx: &Context) -> Result<()> {
        let _exclusive = self.locks.exclusive(ctx).await?;
        ctx.check()?;
        let dir = self.dir();

        match fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        fs::create_dir_all(&dir).await?;
        debug!(path = %dir.display(), "file: flushed");
        Ok(())
    }
}
