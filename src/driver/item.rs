//! Cache Item Module
//!
//! Defines the unit a driver stores: key, opaque payload and absolute expiry.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

/// Unix seconds written to disk for items that never expire.
pub const NEVER_EXPIRES_UNIX: i64 = 9_999_999_999;

// == Expiry ==
/// Absolute expiry of an item. Never relative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// The item has no TTL
    Never,
    /// The item expires at this instant
    At(DateTime<Utc>),
}

impl Expiry {
    /// Expiry `ttl` from now. A zero `ttl` yields an already-expired item.
    pub fn after(ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        match Utc::now().checked_add_signed(ttl) {
            Some(at) => Expiry::At(at),
            None => Expiry::Never,
        }
    }

    /// Boundary condition: an item is expired once `now >= expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self {
            Expiry::Never => false,
            Expiry::At(at) => now >= *at,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Remaining lifetime, `None` for never-expiring items.
    ///
    /// Returns `Some(Duration::ZERO)` once expired.
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            Expiry::Never => None,
            Expiry::At(at) => Some((*at - Utc::now()).to_std().unwrap_or(Duration::ZERO)),
        }
    }

    /// Unix seconds, rounded up so a record never reads as expired before
    /// its TTL has elapsed.
    pub fn to_unix_ceil(&self) -> i64 {
        match self {
            Expiry::Never => NEVER_EXPIRES_UNIX,
            Expiry::At(at) => {
                let secs = at.timestamp();
                let unix = if at.timestamp_subsec_nanos() > 0 {
                    secs + 1
                } else {
                    secs
                };
                unix.clamp(0, NEVER_EXPIRES_UNIX - 1)
            }
        }
    }

    /// Inverse of [`Expiry::to_unix_ceil`]; the sentinel maps to `Never`.
    pub fn from_unix(secs: i64) -> Self {
        if secs >= NEVER_EXPIRES_UNIX {
            return Expiry::Never;
        }
        match Utc.timestamp_opt(secs, 0).single() {
            Some(at) => Expiry::At(at),
            None => Expiry::Never,
        }
    }
}

// == Cache Item ==
/// A single stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheItem {
    pub key: String,
    /// Opaque payload; drivers never inspect it
    pub value: Vec<u8>,
    pub expires_at: Expiry,
}

impl CacheItem {
    pub fn new(key: impl Into<String>, value: Vec<u8>, expires_at: Expiry) -> Self {
        Self {
            key: key.into(),
            value,
            expires_at,
        }
    }

    /// Item expiring `ttl` from now.
    pub fn with_ttl(key: impl Into<String>, value: Vec<u8>, ttl: Duration) -> Self {
        Self::new(key, value, Expiry::after(ttl))
    }

    /// Item that never expires.
    pub fn forever(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self::new(key, value, Expiry::Never)
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_expired()
    }
}
