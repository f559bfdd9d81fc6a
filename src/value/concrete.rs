//! This module contains the representation of concrete values that the
//! oracle assigns to symbolic values in a model.

use std::fmt::{Display, Formatter};

use ethnum::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constant::WORD_SIZE_BITS;

/// A concrete assignment for a single symbolic value.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Concrete {
    /// The value of a scalar.
    Scalar(#[serde(with = "word_hex")] U256),

    /// The contents of a buffer.
    Buffer(#[serde(with = "bytes_hex")] Vec<u8>),
}

impl Concrete {
    /// Gets the scalar value, if this is a scalar.
    #[must_use]
    pub fn as_scalar(&self) -> Option<U256> {
        match self {
            Self::Scalar(value) => Some(*value),
            Self::Buffer(_) => None,
        }
    }

    /// Gets the buffer contents, if this is a buffer.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Scalar(_) => None,
            Self::Buffer(bytes) => Some(bytes.as_slice()),
        }
    }
}

impl Display for Concrete {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scalar(value) => write!(f, "{value:#x}"),
            Self::Buffer(bytes) => write!(f, "0x{}", hex::encode(bytes)),
        }
    }
}

/// Gets the mask that keeps the low `width` bits of a word.
#[must_use]
pub fn mask(width: u32) -> U256 {
    if width >= WORD_SIZE_BITS {
        U256::MAX
    } else {
        (U256::ONE << width) - U256::ONE
    }
}

/// Truncates `value` to its low `width` bits.
#[must_use]
pub fn truncate(value: U256, width: u32) -> U256 {
    value & mask(width)
}

/// Serializes words as `0x`-prefixed hexadecimal strings so that artifacts
/// stay readable and independent of the numeric library's own encoding.
pub(crate) mod word_hex {
    use super::{Deserialize, Deserializer, Serializer, U256};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{value:#x}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let text = String::deserialize(deserializer)?;
        U256::from_str_hex(&text).map_err(serde::de::Error::custom)
    }
}

pub(crate) mod bytes_hex {
    use super::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(value)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        let digits = text.strip_prefix("0x").unwrap_or(&text);
        hex::decode(digits).map_err(serde::de::Error::custom)
    }
}
