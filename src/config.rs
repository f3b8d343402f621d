//! Configuration Module
//!
//! Selects and configures the cache driver from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::codec::Format;
use crate::driver::{FlushScope, DEFAULT_PREFIX};

/// Which backend a [`Config`] builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverKind {
    #[default]
    Memory,
    File,
    Remote,
}

impl FromStr for DriverKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(DriverKind::Memory),
            "file" => Ok(DriverKind::File),
            "remote" | "redis" | "valkey" => Ok(DriverKind::Remote),
            other => Err(format!("unknown driver: {other}")),
        }
    }
}

fn parse_flush_scope(value: &str) -> Option<FlushScope> {
    match value.to_ascii_lowercase().as_str() {
        "prefix" => Some(FlushScope::Prefix),
        "database" | "db" => Some(FlushScope::Database),
        _ => None,
    }
}

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend to construct
    pub driver: DriverKind,
    /// Root directory for the file driver
    pub file_path: PathBuf,
    /// File subdirectory or remote key prefix
    pub prefix: Option<String>,
    /// Remote server URL
    pub remote_url: String,
    /// What a remote flush removes
    pub flush_scope: FlushScope,
    /// Generic codec format for structured values
    pub format: Format,
    /// Per-operation deadline, none by default
    pub op_timeout: Option<Duration>,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `STASH_DRIVER` - `memory`, `file` or `remote` (default: memory)
    /// - `STASH_FILE_PATH` - File driver root (default: ./stash-cache)
    /// - `STASH_PREFIX` - File subdirectory / remote key prefix
    /// - `STASH_REMOTE_URL` - Remote server (default: redis://127.0.0.1:6379)
    /// - `STASH_FLUSH_SCOPE` - `prefix` or `database` (default: prefix)
    /// - `STASH_FORMAT` - `json` or `bincode` (default: json)
    /// - `STASH_OP_TIMEOUT_MS` - Per-operation deadline (default: none)
    ///
    /// Unparseable values fall back to their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`Config::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Self {
            driver: lookup("STASH_DRIVER")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.driver),
            file_path: lookup("STASH_FILE_PATH")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.file_path),
            prefix: lookup("STASH_PREFIX")
                .filter(|v| !v.is_empty())
                .or(defaults.prefix),
            remote_url: lookup("STASH_REMOTE_URL")
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.remote_url),
            flush_scope: lookup("STASH_FLUSH_SCOPE")
                .and_then(|v| parse_flush_scope(&v))
                .unwrap_or(defaults.flush_scope),
            format: lookup("STASH_FORMAT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.format),
            op_timeout: lookup("STASH_OP_TIMEOUT_MS")
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .or(defaults.op_timeout),
        }
    }

    /// Key prefix for the remote driver.
    pub fn remote_prefix(&self) -> &str {
        self.prefix.as_deref().unwrap_or(DEFAULT_PREFIX)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            driver: DriverKind::Memory,
            file_path: PathBuf::from("./stash-cache"),
            prefix: None,
            remote_url: "redis://127.0.0.1:6379".to_string(),
            flush_scope: FlushScope::Prefix,
            format: Format::Json,
            op_timeout: None,
        }
    }
}
