//! Result types returned by the facade's raw reads.

use crate::codec::{self, Format, Stashable};
use crate::error::{Result, StashError};

// == Result State ==
/// Outcome of a read. A payload only exists on a hit.
#[derive(Debug)]
pub enum ResultState {
    Hit(Vec<u8>),
    Miss,
    Error(StashError),
}

// == Cache Result ==
/// Raw outcome of a `get`, before decoding.
#[derive(Debug)]
pub struct CacheResult {
    key: String,
    state: ResultState,
}

impl CacheResult {
    pub(crate) fn hit(key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            state: ResultState::Hit(payload),
        }
    }

    pub(crate) fn miss(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            state: ResultState::Miss,
        }
    }

    pub(crate) fn error(key: impl Into<String>, err: StashError) -> Self {
        Self {
            key: key.into(),
            state: ResultState::Error(err),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> &ResultState {
        &self.state
    }

    pub fn is_hit(&self) -> bool {
        matches!(self.state, ResultState::Hit(_))
    }

    pub fn is_miss(&self) -> bool {
        matches!(self.state, ResultState::Miss)
    }

    /// The stored bytes, only on a hit.
    pub fn payload(&self) -> Option<&[u8]> {
        match &self.state {
            ResultState::Hit(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn err(&self) -> Option<&StashError> {
        match &self.state {
            ResultState::Error(err) => Some(err),
            _ => None,
        }
    }

    /// Converts to a plain result; a miss becomes [`StashError::CacheMiss`].
    pub fn into_result(self) -> Result<Vec<u8>> {
        match self.state {
            ResultState::Hit(payload) => Ok(payload),
            ResultState::Miss => Err(StashError::CacheMiss { key: self.key }),
            ResultState::Error(err) => Err(err),
        }
    }

    /// Decodes a hit into `T`.
    pub fn decode<T: Stashable>(self, format: Format) -> Result<T> {
        let key = self.key.clone();
        let payload = self.into_result()?;
        codec::decode(format, &key, &payload)
    }
}

// == Pulled ==
/// Value read by `pull`, plus the error from the follow-up `forget` if it
/// failed. The read succeeded either way.
#[derive(Debug)]
pub struct Pulled<T> {
    pub value: T,
    pub forget_error: Option<StashError>,
}

impl<T> Pulled<T> {
    /// Whether the pulled key was also removed.
    pub fn is_forgotten(&self) -> bool {
        self.forget_error.is_none()
    }
}
