//! This module contains the [`ConstraintStore`], the persistent and
//! append-only collection of path constraints carried by every execution
//! state.
//!
//! # Sharing
//!
//! A store is a singly-linked list of predicates that points backwards towards
//! the root. Extending a store allocates a single new node that shares the
//! whole of its parent's list, so forking a state never copies its
//! constraints, and the parent store is never mutated by its children.
//!
//! # Caching
//!
//! Every node caches the satisfiability of the conjunction of all predicates
//! up to and including it. Only definitive answers are cached. A timeout is
//! reported to the caller every time it happens, so that a later query with a
//! more patient oracle can still produce an answer.

use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
    sync::{Arc, OnceLock},
};

use derivative::Derivative;

use crate::{
    error::solver::{Error, Result},
    expr::{display_conjunction, Predicate},
    oracle::{Model, ModelResult, Oracle, SatResult},
    value::{SymbolicValue, ValueId},
};

/// An ordered, persistent collection of path constraints.
///
/// Two stores are equal when they contain the same predicates in the same
/// order, regardless of whether they share any nodes.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConstraintStore {
    head: Option<Arc<Node>>,
    len:  usize,
}

/// A single predicate in the store, along with the cached satisfiability of
/// the store ending at this node.
#[derive(Derivative)]
#[derivative(Debug, Eq, PartialEq)]
struct Node {
    predicate: Predicate,
    parent:    Option<Arc<Node>>,

    #[derivative(Debug = "ignore", PartialEq = "ignore")]
    satisfiable: OnceLock<bool>,
}

impl ConstraintStore {
    /// Creates a new store containing no constraints.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new store containing each of `predicates` in order.
    #[must_use]
    pub fn from_predicates(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        predicates
            .into_iter()
            .fold(Self::new(), |store, predicate| store.extend(predicate))
    }

    /// Creates a new store that holds all of the constraints in `self`
    /// followed by `predicate`.
    ///
    /// `self` is left unchanged. Extending by the constant `true` returns a
    /// store equal to `self`.
    #[must_use]
    pub fn extend(&self, predicate: Predicate) -> Self {
        if predicate.is_const(true) {
            return self.clone();
        }

        let parent = self.head.clone();

        // A store is known unsatisfiable as soon as any prefix is.
        let satisfiable = OnceLock::new();
        if predicate.is_const(false) || self.known_satisfiability() == Some(false) {
            let _ = satisfiable.set(false);
        }

        let node = Node {
            predicate,
            parent,
            satisfiable,
        };
        let head = Some(Arc::new(node));
        let len = self.len + 1;

        Self { head, len }
    }

    /// Checks if the conjunction of all constraints in the store is
    /// satisfiable according to `oracle`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if the oracle cannot decide the query. This
    /// result is not cached.
    pub fn is_satisfiable(&self, oracle: &dyn Oracle) -> Result<bool> {
        let Some(head) = &self.head else {
            return Ok(true);
        };
        if let Some(known) = self.known_satisfiability() {
            return Ok(known);
        }

        let answer = match oracle.check_sat(&self.predicates()) {
            SatResult::Sat => true,
            SatResult::Unsat => false,
            SatResult::Timeout => return Err(Error::Timeout),
        };
        let _ = head.satisfiable.set(answer);

        Ok(answer)
    }

    /// Asks `oracle` for a model of the store that assigns a concrete value to
    /// every one of `targets`.
    ///
    /// Returns `Ok(None)` if the store is unsatisfiable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if the oracle cannot produce a model in
    /// time.
    pub fn solve_for(
        &self,
        oracle: &dyn Oracle,
        targets: &[SymbolicValue],
    ) -> Result<Option<Model>> {
        if self.known_satisfiability() == Some(false) {
            return Ok(None);
        }

        match oracle.model(&self.predicates(), targets) {
            ModelResult::Model(model) => {
                if let Some(head) = &self.head {
                    let _ = head.satisfiable.set(true);
                }
                Ok(Some(model))
            }
            ModelResult::Unsat => {
                if let Some(head) = &self.head {
                    let _ = head.satisfiable.set(false);
                }
                Ok(None)
            }
            ModelResult::Timeout => Err(Error::Timeout),
        }
    }

    /// Gets the constraints in the store in the order in which they were
    /// added.
    #[must_use]
    pub fn predicates(&self) -> Vec<Predicate> {
        let mut predicates = Vec::with_capacity(self.len);
        let mut cursor = self.head.as_deref();
        while let Some(node) = cursor {
            predicates.push(node.predicate.clone());
            cursor = node.parent.as_deref();
        }
        predicates.reverse();
        predicates
    }

    /// Gets the most recently added constraint, if any.
    #[must_use]
    pub fn last(&self) -> Option<&Predicate> {
        self.head.as_ref().map(|node| &node.predicate)
    }

    /// Gets the number of constraints in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Checks if the store contains no constraints.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Gets the symbolic values that appear free in the constraints, ordered
    /// by identifier.
    #[must_use]
    pub fn values(&self) -> BTreeMap<ValueId, SymbolicValue> {
        let mut values = BTreeMap::new();
        let mut cursor = self.head.as_deref();
        while let Some(node) = cursor {
            node.predicate.collect_values(&mut values);
            cursor = node.parent.as_deref();
        }
        values
    }

    /// Checks if `other` is an extension of `self`, sharing its storage.
    #[must_use]
    pub fn is_prefix_of(&self, other: &ConstraintStore) -> bool {
        let Some(head) = &self.head else {
            return true;
        };
        let mut cursor = other.head.as_ref();
        while let Some(node) = cursor {
            if Arc::ptr_eq(node, head) {
                return true;
            }
            cursor = node.parent.as_ref();
        }
        false
    }

    /// Gets the cached satisfiability of the store, if one is known.
    fn known_satisfiability(&self) -> Option<bool> {
        match &self.head {
            None => Some(true),
            Some(head) => head.satisfiable.get().copied(),
        }
    }
}

impl Display for ConstraintStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", display_conjunction(&self.predicates()))
    }
}
