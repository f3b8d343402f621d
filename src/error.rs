//! Error types for the cache facade
//!
//! Provides unified error handling using thiserror.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Boxed error used for causes coming from codecs and remote clients.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// == Operation ==
/// Facade operation that produced a wrapped backend error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Init,
    Get,
    Put,
    Add,
    Forever,
    Forget,
    Flush,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Init => "init",
            Operation::Get => "get",
            Operation::Put => "put",
            Operation::Add => "add",
            Operation::Forever => "forever",
            Operation::Forget => "forget",
            Operation::Flush => "flush",
        };
        f.write_str(name)
    }
}

// == Error Kind ==
/// Coarse classification of a [`StashError`], for branching without
/// matching on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BackendUnavailable,
    CacheMiss,
    Backend,
    CorruptRecord,
    Serialization,
    Deserialization,
    Cancelled,
}

// == Stash Error Enum ==
/// Unified error type for drivers and the facade.
#[derive(Error, Debug)]
pub enum StashError {
    /// The driver could not prepare its backend resource
    #[error("{backend} backend unavailable: {source}")]
    BackendUnavailable {
        backend: &'static str,
        #[source]
        source: BoxError,
    },

    /// No live value is stored under the key
    #[error("cache miss: {key}")]
    CacheMiss { key: String },

    /// A driver failure, wrapped with the facade operation and key
    #[error("{op} failed for {}: {source}", .key.as_deref().unwrap_or("<all keys>"))]
    Backend {
        op: Operation,
        key: Option<String>,
        #[source]
        source: Box<StashError>,
    },

    /// Filesystem failure inside a driver
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network or protocol failure from the remote key-value server
    #[error("remote error: {0}")]
    Remote(#[source] BoxError),

    /// On-disk record with a malformed expiry header
    #[error("corrupt record at {}: {reason}", .path.display())]
    CorruptRecord { path: PathBuf, reason: String },

    /// Value could not be encoded into a payload
    #[error("serialization failed: {0}")]
    Serialization(#[source] BoxError),

    /// Payload did not decode into the requested shape
    #[error("deserialization failed for {key}: {source}")]
    Deserialization {
        key: String,
        #[source]
        source: BoxError,
    },

    /// The operation's context was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// The operation's context deadline passed
    #[error("operation deadline exceeded")]
    DeadlineExceeded,
}

impl StashError {
    /// Wraps a driver error with facade context.
    ///
    /// Misses and cancellations pass through untouched so callers can still
    /// match on them directly.
    pub fn wrap(self, op: Operation, key: Option<&str>) -> Self {
        match self {
            StashError::CacheMiss { .. }
            | StashError::Cancelled
            | StashError::DeadlineExceeded
            | StashError::Backend { .. } => self,
            other => StashError::Backend {
                op,
                key: key.map(str::to_string),
                source: Box::new(other),
            },
        }
    }

    // == Kind ==
    /// Classifies the error, looking through the facade wrapper.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StashError::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            StashError::CacheMiss { .. } => ErrorKind::CacheMiss,
            StashError::Backend { source, .. } => match source.kind() {
                kind @ (ErrorKind::CorruptRecord
                | ErrorKind::Cancelled
                | ErrorKind::BackendUnavailable) => kind,
                _ => ErrorKind::Backend,
            },
            StashError::Io(_) | StashError::Remote(_) => ErrorKind::Backend,
            StashError::CorruptRecord { .. } => ErrorKind::CorruptRecord,
            StashError::Serialization(_) => ErrorKind::Serialization,
            StashError::Deserialization { .. } => ErrorKind::Deserialization,
            StashError::Cancelled | StashError::DeadlineExceeded => ErrorKind::Cancelled,
        }
    }

    /// Returns true if this is an expected "not found" result.
    pub fn is_cache_miss(&self) -> bool {
        self.kind() == ErrorKind::CacheMiss
    }

    pub(crate) fn remote(err: impl Into<BoxError>) -> Self {
        StashError::Remote(err.into())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache facade.
pub type Result<T> = std::result::Result<T, StashError>;
