//! This module contains the per-state view of the world: the accounts that
//! exist in a state, their balances, storage and code.

use std::{
    collections::{btree_map, BTreeMap},
    fmt::{Display, Formatter},
};

use ethnum::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};

use crate::{
    constant::{ADDRESS_WIDTH_BITS, ADDRESS_WIDTH_BYTES, WORD_SIZE_BYTES},
    contract::Contract,
    expr::{Predicate, Term},
    state::storage::Storage,
    value::{SymbolicValue, ValueId},
};

/// A 160-bit account address.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Address([u8; ADDRESS_WIDTH_BYTES]);

impl Address {
    /// Constructs an address from its raw `bytes`.
    #[must_use]
    pub fn new(bytes: [u8; ADDRESS_WIDTH_BYTES]) -> Self {
        Self(bytes)
    }

    /// Constructs an address whose low-order bytes hold `value`.
    #[must_use]
    pub fn from_low_u64(value: u64) -> Self {
        let mut bytes = [0u8; ADDRESS_WIDTH_BYTES];
        bytes[ADDRESS_WIDTH_BYTES - 8..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }

    /// Derives the address of the account created by `creator` when its
    /// creation counter is `nonce`.
    ///
    /// The address is the low 20 bytes of `keccak256(creator ++ nonce)`, where
    /// the nonce is encoded as eight big-endian bytes.
    #[must_use]
    pub fn derive(creator: Address, nonce: u64) -> Self {
        let mut hasher = Keccak256::new();
        hasher.update(creator.0);
        hasher.update(nonce.to_be_bytes());
        let digest = hasher.finalize();

        let mut bytes = [0u8; ADDRESS_WIDTH_BYTES];
        bytes.copy_from_slice(&digest[WORD_SIZE_BYTES as usize - ADDRESS_WIDTH_BYTES..]);
        Self(bytes)
    }

    /// Gets the raw bytes of the address.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; ADDRESS_WIDTH_BYTES] {
        &self.0
    }

    /// Gets the address as a (zero-extended) word.
    #[must_use]
    pub fn to_word(&self) -> U256 {
        let mut word = [0u8; WORD_SIZE_BYTES as usize];
        word[WORD_SIZE_BYTES as usize - ADDRESS_WIDTH_BYTES..].copy_from_slice(&self.0);
        U256::from_be_bytes(word)
    }

    /// Gets the address as a concrete term of address width.
    #[must_use]
    pub fn to_term(&self) -> Term {
        Term::literal(self.to_word(), ADDRESS_WIDTH_BITS)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let digits = text.strip_prefix("0x").unwrap_or(&text);
        let mut bytes = [0u8; ADDRESS_WIDTH_BYTES];
        hex::decode_to_slice(digits, &mut bytes).map_err(serde::de::Error::custom)?;
        Ok(Self(bytes))
    }
}

/// A single account in the world state of an execution state.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Account {
    address: Address,
    balance: Term,
    storage: Storage,
    code:    Option<Contract>,
    nonce:   u64,
}

impl Account {
    /// Creates a new account at `address` holding `balance` and no code.
    #[must_use]
    pub fn new(address: Address, balance: Term) -> Self {
        let storage = Storage::new();
        let code = None;
        let nonce = 0;
        Self {
            address,
            balance,
            storage,
            code,
            nonce,
        }
    }

    /// Deploys `contract` as the code of the account.
    #[must_use]
    pub fn with_code(mut self, contract: Contract) -> Self {
        self.code = Some(contract);
        self
    }

    /// Gets the address of the account.
    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    /// Gets the balance of the account.
    #[must_use]
    pub fn balance(&self) -> &Term {
        &self.balance
    }

    /// Sets the balance of the account to `balance`.
    pub fn set_balance(&mut self, balance: Term) {
        self.balance = balance;
    }

    /// Gets the storage of the account.
    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Gets the storage of the account mutably.
    #[must_use]
    pub fn storage_mut(&mut self) -> &mut Storage {
        &mut self.storage
    }

    /// Gets the code deployed at the account, if any.
    #[must_use]
    pub fn code(&self) -> Option<&Contract> {
        self.code.as_ref()
    }

    /// Gets the number of accounts this account has created.
    #[must_use]
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Increments the creation counter, returning its previous value.
    pub fn bump_nonce(&mut self) -> u64 {
        let nonce = self.nonce;
        self.nonce += 1;
        nonce
    }

    /// Collects the symbolic values held by the account into `values`.
    pub fn collect_values(&self, values: &mut BTreeMap<ValueId, SymbolicValue>) {
        self.balance.collect_values(values);
        self.storage.collect_values(values);
    }
}

/// The accounts that exist in an execution state, keyed by address.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct WorldState {
    accounts: BTreeMap<Address, Account>,
}

impl WorldState {
    /// Creates a world containing no accounts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `account`, replacing any account at the same address.
    pub fn insert(&mut self, account: Account) -> Option<Account> {
        self.accounts.insert(account.address, account)
    }

    /// Gets the account at `address`.
    #[must_use]
    pub fn get(&self, address: &Address) -> Option<&Account> {
        self.accounts.get(address)
    }

    /// Gets the account at `address` mutably.
    #[must_use]
    pub fn get_mut(&mut self, address: &Address) -> Option<&mut Account> {
        self.accounts.get_mut(address)
    }

    /// Checks if an account exists at `address`.
    #[must_use]
    pub fn contains(&self, address: &Address) -> bool {
        self.accounts.contains_key(address)
    }

    /// Gets the number of accounts in the world.
    #[must_use]
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Checks if the world contains no accounts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Iterates over the accounts in address order.
    pub fn accounts(&self) -> btree_map::Values<'_, Address, Account> {
        self.accounts.values()
    }

    /// Moves `value` from the account at `from` to the account at `to`.
    ///
    /// Returns the predicate under which the sender can afford the transfer,
    /// or [`None`] if either account does not exist, in which case the world
    /// is left unchanged.
    pub fn transfer(&mut self, from: &Address, to: &Address, value: &Term) -> Option<Predicate> {
        if !self.contains(from) || !self.contains(to) {
            return None;
        }

        let sender = self.accounts.get_mut(from)?;
        let affordable = sender.balance.uge(value);
        sender.balance = sender.balance.sub(value);

        let receiver = self.accounts.get_mut(to)?;
        receiver.balance = receiver.balance.add(value);

        Some(affordable)
    }

    /// Collects the symbolic values held by every account into `values`.
    pub fn collect_values(&self, values: &mut BTreeMap<ValueId, SymbolicValue>) {
        self.accounts
            .values()
            .for_each(|account| account.collect_values(values));
    }
}
