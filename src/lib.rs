//! Stash - A cache facade with interchangeable storage drivers
//!
//! Provides get/put/add/forever/forget/flush over in-memory, on-disk and
//! remote key-value backends, with lazy TTL expiration.

pub mod codec;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod stash;

pub use codec::{Codec, Format, Stashable, Structured};
pub use config::{Config, DriverKind};
pub use context::{CancellationToken, Context};
pub use driver::{CacheItem, Driver, Expiry, FileDriver, MemoryDriver, RemoteDriver};
pub use error::{ErrorKind, Operation, Result, StashError};
pub use stash::{CacheResult, Pulled, ResultState, Stash};
