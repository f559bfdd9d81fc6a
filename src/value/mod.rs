//! This module contains the definition of the [`SymbolicValue`] and the
//! [`ValueFactory`] that mints them.
//!
//! Symbolic values are the free variables of the exploration. They are never
//! mutated once minted, and are referenced (never owned) by the predicates in
//! a [`crate::constraint::ConstraintStore`] and by the accounts of an
//! [`crate::state::ExecutionState`].

pub mod concrete;

use std::{
    fmt::{Display, Formatter},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use serde::{Deserialize, Serialize};

use crate::{
    constant::{BYTE_SIZE_BITS, MAX_BUFFER_BYTES, WORD_SIZE_BITS},
    error::{Error, Result},
};

/// The unique identifier of a symbolic value.
///
/// Identifiers are allocated in strictly increasing order by a single
/// [`ValueFactory`].
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
#[serde(transparent)]
pub struct ValueId(u64);

impl ValueId {
    /// Gets the raw numeric identifier.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for ValueId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// The shape of a symbolic value.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum ValueKind {
    /// A fixed-width bit-vector.
    Scalar,

    /// A byte buffer of fixed length, such as transaction calldata.
    Buffer,
}

impl Display for ValueKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scalar => write!(f, "scalar"),
            Self::Buffer => write!(f, "buffer"),
        }
    }
}

/// A free variable of the symbolic exploration.
///
/// Equality and hashing consider all of the value's attributes, but as the
/// identifier is unique per factory this is equivalent to identity.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SymbolicValue {
    id:    ValueId,
    width: u32,
    kind:  ValueKind,
    name:  Option<Arc<str>>,
}

impl SymbolicValue {
    /// Gets the unique identifier of the value.
    #[must_use]
    pub fn id(&self) -> ValueId {
        self.id
    }

    /// Gets the width of the value in bits.
    ///
    /// For buffers this is eight times the length in bytes.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Gets the length of a buffer value in bytes, or the number of bytes
    /// needed to hold a scalar.
    #[must_use]
    pub fn len_bytes(&self) -> u32 {
        self.width.div_ceil(BYTE_SIZE_BITS)
    }

    /// Gets the kind of the value.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Checks if the value is a buffer.
    #[must_use]
    pub fn is_buffer(&self) -> bool {
        self.kind == ValueKind::Buffer
    }

    /// Gets the human-readable name of the value, if it was given one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl Display for SymbolicValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name}#{}", self.id.0),
            None => write!(f, "{}", self.id),
        }
    }
}

/// The factory through which all symbolic values are created.
///
/// The identifier counter is the only mutable state of the factory, and is
/// accessed atomically so the factory can be shared freely between the
/// scheduler's workers.
#[derive(Debug, Default)]
pub struct ValueFactory {
    next_id: AtomicU64,
}

impl ValueFactory {
    /// Creates a new factory whose first value will have identifier zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints a fresh scalar of `width` bits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidWidth`] if `width` is zero or wider than a word.
    pub fn new_scalar(&self, width: u32) -> Result<SymbolicValue> {
        self.mint(ValueKind::Scalar, width, None)
    }

    /// Mints a fresh scalar of `width` bits carrying `name` for provenance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidWidth`] if `width` is zero or wider than a word.
    pub fn new_named_scalar(&self, width: u32, name: impl Into<String>) -> Result<SymbolicValue> {
        self.mint(ValueKind::Scalar, width, Some(name.into()))
    }

    /// Mints a fresh buffer of `length_bytes` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidWidth`] if `length_bytes` is zero or exceeds
    /// [`MAX_BUFFER_BYTES`].
    pub fn new_buffer(&self, length_bytes: u32) -> Result<SymbolicValue> {
        self.mint(ValueKind::Buffer, length_bytes, None)
    }

    /// Mints a fresh buffer of `length_bytes` bytes carrying `name` for
    /// provenance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidWidth`] if `length_bytes` is zero or exceeds
    /// [`MAX_BUFFER_BYTES`].
    pub fn new_named_buffer(
        &self,
        length_bytes: u32,
        name: impl Into<String>,
    ) -> Result<SymbolicValue> {
        self.mint(ValueKind::Buffer, length_bytes, Some(name.into()))
    }

    /// Gets the number of values minted so far.
    #[must_use]
    pub fn minted(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    fn mint(&self, kind: ValueKind, size: u32, name: Option<String>) -> Result<SymbolicValue> {
        let maximum = match kind {
            ValueKind::Scalar => WORD_SIZE_BITS,
            ValueKind::Buffer => MAX_BUFFER_BYTES,
        };
        if size == 0 || size > maximum {
            return Err(Error::InvalidWidth {
                kind,
                requested: size,
                maximum,
            });
        }

        let width = match kind {
            ValueKind::Scalar => size,
            ValueKind::Buffer => size * BYTE_SIZE_BITS,
        };
        let id = ValueId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let name = name.map(Arc::from);

        Ok(SymbolicValue {
            id,
            width,
            kind,
            name,
        })
    }
}
