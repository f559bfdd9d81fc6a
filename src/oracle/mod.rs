//! This module contains the interface to the solver oracle, which answers
//! satisfiability and model queries over ordered sets of predicates.
//!
//! The oracle is treated as a black box by the rest of the library. Any SMT
//! backend can be used by implementing [`Oracle`], and the library ships with
//! the [`bounded::BoundedOracle`] as a dependency-free reference
//! implementation.

pub mod bounded;
mod interval;

use std::{collections::BTreeMap, fmt::Debug, sync::Arc};

use ethnum::U256;
use serde::{Deserialize, Serialize};

use crate::{
    expr::{eval::Assignment, Predicate},
    value::{concrete::Concrete, SymbolicValue, ValueId},
};

/// The answer to a satisfiability query.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SatResult {
    /// Some assignment satisfies every predicate.
    Sat,

    /// No assignment satisfies every predicate.
    Unsat,

    /// The oracle could not decide within its limits.
    Timeout,
}

/// The answer to a model query.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ModelResult {
    /// A model of the predicates, assigning at least every requested value.
    Model(Model),

    /// No assignment satisfies every predicate.
    Unsat,

    /// The oracle could not decide within its limits.
    Timeout,
}

/// A dynamically dispatched [`Oracle`] that can be shared with the
/// scheduler's worker threads.
pub type DynOracle = Arc<dyn Oracle>;

/// The interface to a solver oracle.
///
/// Implementations must be deterministic: the same query must always produce
/// the same answer (modulo timeouts), as exploration order and test cases are
/// derived from the answers.
pub trait Oracle
where
    Self: Debug + Send + Sync,
{
    /// Checks whether the conjunction of `predicates` is satisfiable.
    fn check_sat(&self, predicates: &[Predicate]) -> SatResult;

    /// Produces a model of the conjunction of `predicates` that assigns a
    /// concrete value to every one of `targets`.
    ///
    /// Targets that the predicates do not constrain may be assigned any value.
    fn model(&self, predicates: &[Predicate], targets: &[SymbolicValue]) -> ModelResult;
}

/// A concrete assignment of values to symbolic values.
///
/// Buffers are assigned in full. Bytes of a buffer that the model does not
/// mention are zero.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Model {
    values: BTreeMap<ValueId, Concrete>,
}

impl Model {
    /// Creates an empty model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns `concrete` to the value with identifier `id`.
    pub fn insert(&mut self, id: ValueId, concrete: Concrete) {
        self.values.insert(id, concrete);
    }

    /// Gets the concrete value assigned to the value with identifier `id`.
    #[must_use]
    pub fn get(&self, id: ValueId) -> Option<&Concrete> {
        self.values.get(&id)
    }

    /// Gets the scalar assigned to the value with identifier `id`.
    #[must_use]
    pub fn scalar_of(&self, id: ValueId) -> Option<U256> {
        self.get(id).and_then(Concrete::as_scalar)
    }

    /// Gets the number of values assigned by the model.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Checks if the model assigns no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over the assignments in order of value identifier.
    pub fn iter(&self) -> impl Iterator<Item = (&ValueId, &Concrete)> {
        self.values.iter()
    }

    /// Restricts the model to the values in `targets`.
    #[must_use]
    pub fn restricted_to(&self, targets: &[SymbolicValue]) -> Model {
        let values = targets
            .iter()
            .filter_map(|target| {
                self.values
                    .get(&target.id())
                    .map(|concrete| (target.id(), concrete.clone()))
            })
            .collect();
        Model { values }
    }
}

impl Assignment for Model {
    fn scalar(&self, value: &SymbolicValue) -> Option<U256> {
        self.scalar_of(value.id())
    }

    fn byte(&self, buffer: &SymbolicValue, index: u32) -> Option<u8> {
        match self.values.get(&buffer.id())? {
            Concrete::Buffer(bytes) => Some(bytes.get(index as usize).copied().unwrap_or(0)),
            Concrete::Scalar(_) => None,
        }
    }
}

impl FromIterator<(ValueId, Concrete)> for Model {
    fn from_iter<T: IntoIterator<Item = (ValueId, Concrete)>>(iter: T) -> Self {
        let values = iter.into_iter().collect();
        Self { values }
    }
}
