//! Codec Module
//!
//! Turns typed values into the opaque payload a driver stores, and back.
//!
//! Every storable type declares its [`Codec`]: either its own encode/decode
//! pair ([`Codec::Custom`]) or the facade's generic serde format
//! ([`Codec::Structured`]). Dispatch is on that tag, never on runtime type
//! inspection.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{BoxError, Result, StashError};

// == Format ==
/// Generic structured-data format used by [`Codec::Structured`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// Textual JSON via serde_json
    #[default]
    Json,
    /// Compact binary via bincode
    Bincode,
}

impl Format {
    pub fn encode<T: Serialize>(self, value: &T) -> std::result::Result<Vec<u8>, BoxError> {
        match self {
            Format::Json => Ok(serde_json::to_vec(value)?),
            Format::Bincode => Ok(bincode::serialize(value)?),
        }
    }

    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> std::result::Result<T, BoxError> {
        match self {
            Format::Json => Ok(serde_json::from_slice(bytes)?),
            Format::Bincode => Ok(bincode::deserialize(bytes)?),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Json => f.write_str("json"),
            Format::Bincode => f.write_str("bincode"),
        }
    }
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Format::Json),
            "bincode" => Ok(Format::Bincode),
            other => Err(format!("unknown format: {other}")),
        }
    }
}

// == Codec ==
pub type EncodeFn<T> = fn(&T) -> std::result::Result<Vec<u8>, BoxError>;
pub type DecodeFn<T> = fn(&[u8]) -> std::result::Result<T, BoxError>;
pub type StructuredEncodeFn<T> = fn(Format, &T) -> std::result::Result<Vec<u8>, BoxError>;
pub type StructuredDecodeFn<T> = fn(Format, &[u8]) -> std::result::Result<T, BoxError>;

/// How a type becomes a payload.
pub enum Codec<T> {
    /// The type serializes itself; the facade format is ignored.
    Custom {
        encode: EncodeFn<T>,
        decode: DecodeFn<T>,
    },
    /// The facade's [`Format`] is applied through serde.
    Structured {
        encode: StructuredEncodeFn<T>,
        decode: StructuredDecodeFn<T>,
    },
}

fn structured_encode<T: Serialize>(
    format: Format,
    value: &T,
) -> std::result::Result<Vec<u8>, BoxError> {
    format.encode(value)
}

fn structured_decode<T: DeserializeOwned>(
    format: Format,
    bytes: &[u8],
) -> std::result::Result<T, BoxError> {
    format.decode(bytes)
}

impl<T: Serialize + DeserializeOwned> Codec<T> {
    /// Codec backed by the facade's serde format.
    pub fn structured() -> Self {
        Codec::Structured {
            encode: structured_encode::<T>,
            decode: structured_decode::<T>,
        }
    }
}

impl<T> Codec<T> {
    pub fn custom(encode: EncodeFn<T>, decode: DecodeFn<T>) -> Self {
        Codec::Custom { encode, decode }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, Codec::Custom { .. })
    }

    // == Encode ==
    pub fn encode(&self, format: Format, value: &T) -> Result<Vec<u8>> {
        let encoded = match self {
            Codec::Custom { encode, .. } => encode(value),
            Codec::Structured { encode, .. } => encode(format, value),
        };
        encoded.map_err(StashError::Serialization)
    }

    // == Decode ==
    /// Decodes the payload stored under `key`; `key` only feeds the error.
    pub fn decode(&self, format: Format, key: &str, bytes: &[u8]) -> Result<T> {
        let decoded = match self {
            Codec::Custom { decode, .. } => decode(bytes),
            Codec::Structured { decode, .. } => decode(format, bytes),
        };
        decoded.map_err(|source| StashError::Deserialization {
            key: key.to_string(),
            source,
        })
    }
}

impl<T> fmt::Debug for Codec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::Custom { .. } => f.write_str("Codec::Custom"),
            Codec::Structured { .. } => f.write_str("Codec::Structured"),
        }
    }
}

// == Stashable ==
/// A type that can be stored through the facade.
///
/// Implement [`Stashable::codec`] returning [`Codec::custom`] to control the
/// payload bytes, or [`Codec::structured`] (see [`stashable!`]) to use the
/// facade's serde format.
pub trait Stashable: Sized {
    fn codec() -> Codec<Self>;
}

pub fn encode<T: Stashable>(format: Format, value: &T) -> Result<Vec<u8>> {
    T::codec().encode(format, value)
}

pub fn decode<T: Stashable>(format: Format, key: &str, bytes: &[u8]) -> Result<T> {
    T::codec().decode(format, key, bytes)
}

/// Implements [`Stashable`] with the structured codec for serde types.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct User { id: u64, name: String }
///
/// stash::stashable!(User);
/// ```
#[macro_export]
macro_rules! stashable {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::codec::Stashable for $ty {
                fn codec() -> $crate::codec::Codec<Self> {
                    $crate::codec::Codec::structured()
                }
            }
        )+
    };
}

// Raw bytes are stored untouched.
impl Stashable for Vec<u8> {
    fn codec() -> Codec<Self> {
        Codec::custom(|value| Ok(value.clone()), |bytes| Ok(bytes.to_vec()))
    }
}

// Strings are stored as their UTF-8 bytes so records stay readable.
impl Stashable for String {
    fn codec() -> Codec<Self> {
        Codec::custom(
            |value| Ok(value.as_bytes().to_vec()),
            |bytes| Ok(String::from_utf8(bytes.to_vec())?),
        )
    }
}

stashable!(
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    serde_json::Value,
);

impl<T: Serialize + DeserializeOwned> Stashable for Option<T> {
    fn codec() -> Codec<Self> {
        Codec::structured()
    }
}

impl<V: Serialize + DeserializeOwned> Stashable for HashMap<String, V> {
    fn codec() -> Codec<Self> {
        Codec::structured()
    }
}

impl<V: Serialize + DeserializeOwned> Stashable for BTreeMap<String, V> {
    fn codec() -> Codec<Self> {
        Codec::structured()
    }
}

/// Wrapper storing any serde type with the structured codec, without a
/// [`Stashable`] impl of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Structured<T>(pub T);

impl<T: Serialize + DeserializeOwned> Stashable for Structured<T> {
    fn codec() -> Codec<Self> {
        Codec::structured()
    }
}
