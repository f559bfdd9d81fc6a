//! This module contains types useful for dealing with the concrete contracts
//! that are deployed into the explored world.

use std::{
    fmt::{Display, Formatter},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The identifier of a contract registered with the state manager.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
#[serde(transparent)]
pub struct ContractId(u32);

impl ContractId {
    /// Constructs a contract identifier from its raw `value`.
    #[must_use]
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    /// Gets the raw numeric identifier.
    #[must_use]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl Display for ContractId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "contract#{}", self.0)
    }
}

/// A representation of a contract's code as deployed at an account.
///
/// The bytecode is opaque to the library and only ever interpreted by the
/// [`crate::interpreter::Interpreter`]. The `locations` count is the number of
/// distinct program locations that coverage is measured against.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Contract {
    id:        ContractId,
    bytecode:  Arc<[u8]>,
    locations: u32,
}

impl Contract {
    /// Creates a new contract with the provided `id`, `bytecode` and number
    /// of program `locations`.
    pub fn new(id: ContractId, bytecode: impl Into<Arc<[u8]>>, locations: u32) -> Self {
        let bytecode = bytecode.into();
        Self {
            id,
            bytecode,
            locations,
        }
    }

    /// Gets the identifier of the contract.
    #[must_use]
    pub fn id(&self) -> ContractId {
        self.id
    }

    /// Gets a reference to the bytecode of the contract.
    #[must_use]
    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    /// Gets the number of program locations in the contract.
    #[must_use]
    pub fn locations(&self) -> u32 {
        self.locations
    }

    /// Checks if `location` is a valid program location for this contract.
    #[must_use]
    pub fn contains(&self, location: u32) -> bool {
        location < self.locations
    }
}

/// Decodes hex-encoded bytecode, with or without its `0x` prefix.
///
/// # Errors
///
/// Returns [`Error::Other`] if `encoded` is not valid hexadecimal.
pub fn decode_bytecode(encoded: &str) -> Result<Vec<u8>> {
    let digits = encoded.trim();
    let digits = digits.strip_prefix("0x").unwrap_or(digits);
    hex::decode(digits).map_err(|e| Error::other(format!("Could not decode bytecode: {e}")))
}

#[cfg(test)]
mod test {
    use crate::contract::{decode_bytecode, Contract, ContractId};

    #[test]
    fn decodes_prefixed_and_bare_bytecode() -> anyhow::Result<()> {
        assert_eq!(decode_bytecode("0x6001")?, vec![0x60, 0x01]);
        assert_eq!(decode_bytecode("6001\n")?, vec![0x60, 0x01]);
        assert!(decode_bytecode("0xzz").is_err());

        Ok(())
    }

    #[test]
    fn bounds_locations() {
        let contract = Contract::new(ContractId::new(3), vec![0x00], 4);

        assert!(contract.contains(3));
        assert!(!contract.contains(4));
        assert_eq!(contract.id().to_string(), "contract#3");
    }
}
