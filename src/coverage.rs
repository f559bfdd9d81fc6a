//! This module contains the [`CoverageTracker`], which accumulates the code
//! locations and branch edges visited by any explored state.
//!
//! Coverage is campaign-wide. It is shared by every worker of the state
//! manager, and nothing (including pruning states or restoring a snapshot)
//! ever removes a recorded visit, so coverage never decreases.

use std::collections::{BTreeSet, HashMap};

use parking_lot::Mutex;

use crate::{
    contract::ContractId,
    error::{Error, Result},
};

/// The coverage of a single contract.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
struct Record {
    /// The number of locations in the contract, fixed at registration.
    total: u32,

    /// The number of times each visited location was visited.
    visits: HashMap<u32, usize>,

    /// The branch edges that were taken, as `(from, to)` pairs.
    branches: BTreeSet<(u32, u32)>,
}

impl Record {
    fn check(&self, id: ContractId, location: u32) -> Result<()> {
        if location < self.total {
            Ok(())
        } else {
            Err(Error::LocationOutOfBounds {
                id,
                location,
                total: self.total,
            })
        }
    }
}

/// A thread-safe tracker of the code visited across all explored states.
#[derive(Debug, Default)]
pub struct CoverageTracker {
    records: Mutex<HashMap<ContractId, Record>>,
}

impl CoverageTracker {
    /// Creates a tracker that knows about no contracts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the contract with identifier `id` as having
    /// `total_locations` code locations.
    ///
    /// Registering an already-known contract keeps its existing record, as the
    /// total is fixed at first registration.
    pub fn register(&self, id: ContractId, total_locations: u32) {
        self.records.lock().entry(id).or_insert_with(|| Record {
            total: total_locations,
            ..Record::default()
        });
    }

    /// Marks `location` in contract `id` as visited.
    ///
    /// Visits are counted, but a location counts towards coverage once no
    /// matter how often it is visited.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the contract is unknown or `location` is out of
    /// bounds for it.
    pub fn record_visit(&self, id: ContractId, location: u32) -> Result<()> {
        let mut records = self.records.lock();
        let record = records.get_mut(&id).ok_or(Error::UnknownContract { id })?;
        record.check(id, location)?;
        record
            .visits
            .entry(location)
            .and_modify(|count| *count = count.saturating_add(1))
            .or_insert(1);

        Ok(())
    }

    /// Marks the branch edge from `from` to `to` in contract `id` as taken.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the contract is unknown or either location is out of
    /// bounds for it.
    pub fn record_branch(&self, id: ContractId, from: u32, to: u32) -> Result<()> {
        let mut records = self.records.lock();
        let record = records.get_mut(&id).ok_or(Error::UnknownContract { id })?;
        record.check(id, from)?;
        record.check(id, to)?;
        record.branches.insert((from, to));

        Ok(())
    }

    /// Gets the percentage of the locations of contract `id` that have been
    /// visited, in the range `0.0..=100.0`.
    ///
    /// A contract with no locations has a coverage of zero.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the contract is unknown.
    #[allow(clippy::cast_precision_loss)] // Location counts fit in a u32
    pub fn coverage_percent(&self, id: ContractId) -> Result<f64> {
        let records = self.records.lock();
        let record = records.get(&id).ok_or(Error::UnknownContract { id })?;
        if record.total == 0 {
            return Ok(0.0);
        }

        let visited = record.visits.len() as f64;
        Ok(visited / f64::from(record.total) * 100.0)
    }

    /// Gets the visited locations of contract `id` in ascending order.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the contract is unknown.
    pub fn visited(&self, id: ContractId) -> Result<Vec<u32>> {
        let records = self.records.lock();
        let record = records.get(&id).ok_or(Error::UnknownContract { id })?;
        let mut locations: Vec<u32> = record.visits.keys().copied().collect();
        locations.sort_unstable();

        Ok(locations)
    }

    /// Gets the number of times `location` in contract `id` has been visited.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the contract is unknown or `location` is out of
    /// bounds for it.
    pub fn visit_count(&self, id: ContractId, location: u32) -> Result<usize> {
        let records = self.records.lock();
        let record = records.get(&id).ok_or(Error::UnknownContract { id })?;
        record.check(id, location)?;

        Ok(record.visits.get(&location).copied().unwrap_or(0))
    }

    /// Gets the branch edges taken in contract `id` in ascending order.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the contract is unknown.
    pub fn branches(&self, id: ContractId) -> Result<Vec<(u32, u32)>> {
        let records = self.records.lock();
        let record = records.get(&id).ok_or(Error::UnknownContract { id })?;

        Ok(record.branches.iter().copied().collect())
    }
}
