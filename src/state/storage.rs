//! This module contains the definition of an account's storage container.

use std::collections::{BTreeMap, HashMap};

use crate::{
    expr::Term,
    value::{SymbolicValue, ValueId},
};

/// A representation of the persistent storage of a single account.
///
/// Storage on a real machine is a word-addressable array of words that are
/// all initialised to zero. This does not work for symbolic keys, so storage
/// is split in two.
///
/// 1. Many writes target concrete slot indices. These can be stored and
///    retrieved naturally.
/// 2. Other writes target keys that are computed from symbolic inputs (e.g.
///    for mappings), and so are keyed by the symbolic term itself.
///
/// # Generational Storage
///
/// Each slot stores the total history of writes made to it in the state. The
/// [`Self::generations`] method gets at these for a given key.
///
/// # Aliasing
///
/// Symbolic keys are compared structurally. Two different terms that the
/// oracle could prove equal are treated as different slots, which is the
/// interpreter's concern to resolve if it needs to.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Storage {
    /// Writes to slots whose index is a literal.
    known_slots: HashMap<Term, Vec<Term>>,

    /// Writes to slots whose index depends on symbolic values.
    symbolic_slots: HashMap<Term, Vec<Term>>,
}

impl Storage {
    /// Creates a new, empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` at `key`, shadowing any existing value at that key.
    pub fn store(&mut self, key: Term, value: Term) {
        let target = if key.is_concrete() {
            &mut self.known_slots
        } else {
            &mut self.symbolic_slots
        };
        target.entry(key).or_default().push(value);
    }

    /// Loads the most recently written value at `key`.
    ///
    /// Returns [`None`] if the slot has never been written in this state.
    #[must_use]
    pub fn load(&self, key: &Term) -> Option<&Term> {
        self.slots_for(key).get(key).and_then(|writes| writes.last())
    }

    /// Loads the most recently written value at `key`, or zero for a slot that
    /// has never been written.
    #[must_use]
    pub fn load_or_zero(&self, key: &Term) -> Term {
        self.load(key).cloned().unwrap_or_else(|| Term::word(0u32))
    }

    /// Gets every value written at `key`, oldest first.
    ///
    /// Returns [`Some`] for keys that have seen at least one write, and
    /// otherwise returns [`None`].
    #[must_use]
    pub fn generations(&self, key: &Term) -> Option<&[Term]> {
        self.slots_for(key).get(key).map(Vec::as_slice)
    }

    /// Gets the number of slots that have been written.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.known_slots.len() + self.symbolic_slots.len()
    }

    /// Gets the keys of every slot that has been written.
    #[must_use]
    pub fn keys(&self) -> Vec<&Term> {
        self.known_slots
            .keys()
            .chain(self.symbolic_slots.keys())
            .collect()
    }

    /// Collects every symbolic value appearing in keys or written values into
    /// `values`.
    pub fn collect_values(&self, values: &mut BTreeMap<ValueId, SymbolicValue>) {
        for (key, writes) in self.known_slots.iter().chain(self.symbolic_slots.iter()) {
            key.collect_values(values);
            writes.iter().for_each(|write| write.collect_values(values));
        }
    }

    fn slots_for(&self, key: &Term) -> &HashMap<Term, Vec<Term>> {
        if key.is_concrete() {
            &self.known_slots
        } else {
            &self.symbolic_slots
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{expr::Term, state::storage::Storage, value::ValueFactory};

    #[test]
    fn keeps_generations_per_slot() {
        let mut storage = Storage::new();
        let slot = Term::word(1u32);

        storage.store(slot.clone(), Term::word(10u32));
        storage.store(slot.clone(), Term::word(20u32));

        assert_eq!(storage.load(&slot), Some(&Term::word(20u32)));
        assert_eq!(storage.generations(&slot).map(<[Term]>::len), Some(2));
        assert_eq!(storage.load_or_zero(&Term::word(2u32)), Term::word(0u32));
        assert_eq!(storage.entry_count(), 1);
    }

    #[test]
    fn separates_symbolic_keys() -> anyhow::Result<()> {
        let factory = ValueFactory::new();
        let key_value = factory.new_named_scalar(256, "key")?;
        let key = Term::symbol(&key_value);
        let mut storage = Storage::new();

        storage.store(key.clone(), Term::word(5u32));
        storage.store(Term::word(0u32), Term::word(6u32));

        assert_eq!(storage.load(&key), Some(&Term::word(5u32)));
        assert_eq!(storage.keys().len(), 2);

        let mut values = std::collections::BTreeMap::new();
        storage.collect_values(&mut values);
        assert!(values.contains_key(&key_value.id()));

        Ok(())
    }
}
