//! This module contains the versioned worklist of execution states that the
//! state manager explores, along with its snapshots.
//!
//! # Versioning
//!
//! The worklist holds its states in a map behind an [`Arc`]. A snapshot is a
//! second reference to the current version of that map, and queries iterate
//! over a reference to the version current at the time of the query. A
//! mutation of the worklist while such a reference is alive copies the map
//! (but not the states in it, which are themselves behind [`Arc`]s), so
//! taking a snapshot never copies anything, and a state is only ever copied
//! when it is stepped while a snapshot still refers to it.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{Display, Formatter},
    ops::Bound,
    sync::Arc,
};

use crate::{
    error::{Error, Result},
    manager::{step::Successors, Policy},
    state::{ExecutionState, StateId, Status},
};

/// One version of the worklist's states, keyed by identifier.
pub(crate) type StateMap = BTreeMap<StateId, Arc<ExecutionState>>;

/// The identifier of a snapshot of the worklist.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SnapshotId(u64);

impl SnapshotId {
    /// Gets the raw numeric identifier.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for SnapshotId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "snapshot#{}", self.0)
    }
}

/// A lazy, restartable iterator over the states of one version of the
/// worklist, in ascending order of identifier.
///
/// Cloning the iterator restarts nothing but is cheap, and iterating over a
/// clone from the start visits the same states again, even if the worklist
/// has changed in the meantime.
#[derive(Clone, Debug)]
pub struct States {
    version: Arc<StateMap>,
    filter:  Option<Status>,
    after:   Option<StateId>,
}

impl States {
    pub(crate) fn new(version: Arc<StateMap>, filter: Option<Status>) -> Self {
        let after = None;
        Self {
            version,
            filter,
            after,
        }
    }

    /// Restarts the iteration from the first state.
    #[must_use]
    pub fn restart(mut self) -> Self {
        self.after = None;
        self
    }
}

impl Iterator for States {
    type Item = Arc<ExecutionState>;

    fn next(&mut self) -> Option<Self::Item> {
        let lower = match self.after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        let (id, state) = self
            .version
            .range((lower, Bound::Unbounded))
            .find(|(_, state)| self.filter.map_or(true, |status| state.status() == status))?;
        self.after = Some(*id);

        Some(state.clone())
    }
}

/// The result of checking a batch of stepped states back into the worklist.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct CheckIn {
    /// The identifiers of the states that resulted from the batch.
    pub successors: Vec<StateId>,

    /// The number of states that forked.
    pub forks: usize,

    /// The number of states that were discarded as infeasible.
    pub pruned: usize,
}

/// The collection of all states known to the state manager.
#[derive(Debug, Default)]
pub(crate) struct Worklist {
    /// The current version of the states.
    states: Arc<StateMap>,

    /// The states that are checked out to be stepped and so are absent from
    /// `states`.
    in_flight: BTreeSet<StateId>,

    /// The identifier for the next new state.
    next_state_id: u64,

    /// The snapshots taken so far.
    snapshots: BTreeMap<SnapshotId, Arc<StateMap>>,

    /// The identifier for the next snapshot.
    next_snapshot_id: u64,
}

impl Worklist {
    /// Creates a new worklist containing only `root`, whose identifier must be
    /// the first allocated by the worklist.
    pub fn new(root: ExecutionState) -> Self {
        let mut worklist = Self::default();
        let id = worklist.allocate_id();
        debug_assert_eq!(root.id(), id);
        Arc::make_mut(&mut worklist.states).insert(id, Arc::new(root));
        worklist
    }

    /// Gets the current version of the states.
    pub fn version(&self) -> Arc<StateMap> {
        self.states.clone()
    }

    /// Gets the state with identifier `id`, unless it is checked out.
    pub fn get(&self, id: StateId) -> Option<Arc<ExecutionState>> {
        self.states.get(&id).cloned()
    }

    /// Counts the states with `status`, or all states if it is [`None`].
    pub fn count(&self, status: Option<Status>) -> usize {
        match status {
            None => self.states.len(),
            Some(status) => self.states.values().filter(|s| s.status() == status).count(),
        }
    }

    /// Gets the number of states currently checked out.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Removes the state with identifier `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no such state is in the worklist.
    pub fn remove(&mut self, id: StateId) -> Result<Arc<ExecutionState>> {
        if !self.states.contains_key(&id) {
            return Err(Error::NoSuchState { id });
        }
        Arc::make_mut(&mut self.states)
            .remove(&id)
            .ok_or(Error::NoSuchState { id })
    }

    /// Applies `update` to every running state, removing the states for which
    /// it returns `false`.
    pub fn update_running(&mut self, mut update: impl FnMut(&mut ExecutionState) -> bool) -> usize {
        let running: Vec<StateId> = self.running_ids(Policy::BreadthFirst);
        let states = Arc::make_mut(&mut self.states);
        let mut removed = 0;
        for id in running {
            let keep = match states.get_mut(&id) {
                Some(state) => update(Arc::make_mut(state)),
                None => true,
            };
            if !keep {
                states.remove(&id);
                removed += 1;
            }
        }
        removed
    }

    /// Checks out up to `limit` running states in the order given by
    /// `policy`.
    ///
    /// Checked-out states are absent from the worklist until they are checked
    /// back in, so no other worker can step them at the same time.
    pub fn check_out(&mut self, policy: Policy, limit: usize) -> Vec<Arc<ExecutionState>> {
        let ids: Vec<StateId> = self.running_ids(policy).into_iter().take(limit).collect();
        if ids.is_empty() {
            return Vec::new();
        }

        let states = Arc::make_mut(&mut self.states);
        ids.into_iter()
            .filter_map(|id| {
                let state = states.remove(&id)?;
                self.in_flight.insert(id);
                Some(state)
            })
            .collect()
    }

    /// Checks out the single state with identifier `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the state does not exist or is not running.
    pub fn check_out_one(&mut self, id: StateId) -> Result<Arc<ExecutionState>> {
        match self.states.get(&id) {
            None => Err(Error::NoSuchState { id }),
            Some(state) if !state.is_running() => Err(Error::StateNotRunning { id }),
            Some(_) => {
                let state = Arc::make_mut(&mut self.states)
                    .remove(&id)
                    .ok_or(Error::NoSuchState { id })?;
                self.in_flight.insert(id);
                Ok(state)
            }
        }
    }

    /// Checks the `results` of stepping checked-out states back in.
    ///
    /// Each result is the identifier of a checked-out state and its
    /// successors. Forked children are given fresh identifiers in ascending
    /// order of their parent's identifier, with the child that took the
    /// branch first, so identifiers do not depend on the order in which
    /// workers finished.
    pub fn check_in(&mut self, mut results: Vec<(StateId, Successors)>) -> CheckIn {
        results.sort_by_key(|(id, _)| *id);
        let mut summary = CheckIn::default();

        for (id, successors) in results {
            self.in_flight.remove(&id);
            match successors {
                Successors::Continue(state) => {
                    self.insert(state);
                    summary.successors.push(id);
                }
                Successors::Forked(taken, not_taken) => {
                    summary.forks += 1;
                    for mut child in [taken, not_taken] {
                        let child_id = self.allocate_id();
                        child.set_id(child_id);
                        self.insert(child);
                        summary.successors.push(child_id);
                    }
                }
                Successors::Pruned => summary.pruned += 1,
            }
        }

        summary
    }

    /// Captures the current version of the states.
    pub fn snapshot(&mut self) -> SnapshotId {
        debug_assert!(self.in_flight.is_empty());
        let id = SnapshotId(self.next_snapshot_id);
        self.next_snapshot_id += 1;
        self.snapshots.insert(id, self.states.clone());
        id
    }

    /// Makes the snapshot `id` the current version of the states.
    ///
    /// The snapshot itself is kept, so it can be restored again. State
    /// identifiers keep increasing, so states created after the restore never
    /// reuse the identifier of a state that existed before it.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if this worklist never produced a snapshot `id`, or it
    /// has been discarded.
    pub fn restore(&mut self, id: SnapshotId) -> Result<()> {
        debug_assert!(self.in_flight.is_empty());
        let version = self
            .snapshots
            .get(&id)
            .ok_or(Error::UnknownSnapshot { id })?;
        self.states = version.clone();
        Ok(())
    }

    /// Forgets the snapshot `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if this worklist holds no snapshot `id`.
    pub fn discard_snapshot(&mut self, id: SnapshotId) -> Result<()> {
        self.snapshots
            .remove(&id)
            .map(|_| ())
            .ok_or(Error::UnknownSnapshot { id })
    }

    /// Gets the most recently taken snapshot that has not been discarded.
    pub fn latest_snapshot(&self) -> Option<SnapshotId> {
        self.snapshots.keys().next_back().copied()
    }

    /// Gets the identifiers of the running states in the order given by
    /// `policy`.
    fn running_ids(&self, policy: Policy) -> Vec<StateId> {
        let running = self
            .states
            .iter()
            .filter(|(_, state)| state.is_running())
            .map(|(id, _)| *id);
        match policy {
            Policy::BreadthFirst => running.collect(),
            Policy::DepthFirst => running.rev().collect(),
        }
    }

    fn allocate_id(&mut self) -> StateId {
        let id = StateId::new(self.next_state_id);
        self.next_state_id += 1;
        id
    }

    fn insert(&mut self, state: ExecutionState) {
        Arc::make_mut(&mut self.states).insert(state.id(), Arc::new(state));
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use crate::{
        error::Error,
        manager::{
            step::Successors,
            worklist::{SnapshotId, States, Worklist},
            Policy,
        },
        state::{account::WorldState, ExecutionState, StateId, Status, Termination},
    };

    fn root() -> Worklist {
        Worklist::new(ExecutionState::new(StateId::new(0), WorldState::new()))
    }

    fn fork_root(worklist: &mut Worklist) -> Vec<StateId> {
        let batch = worklist.check_out(Policy::BreadthFirst, 8);
        let results = batch
            .into_iter()
            .map(|state| {
                let id = state.id();
                (id, Successors::Forked((*state).clone(), (*state).clone()))
            })
            .collect();
        worklist.check_in(results).successors
    }

    #[test]
    fn forks_receive_fresh_identifiers() {
        let mut worklist = root();
        let children = fork_root(&mut worklist);

        assert_eq!(children, vec![StateId::new(1), StateId::new(2)]);
        assert_eq!(worklist.count(None), 2);
        assert_eq!(worklist.in_flight(), 0);
    }

    #[test]
    fn checked_out_states_are_hidden() -> anyhow::Result<()> {
        let mut worklist = root();
        let state = worklist.check_out_one(StateId::new(0))?;

        assert_eq!(worklist.count(None), 0);
        assert_eq!(worklist.in_flight(), 1);
        assert!(matches!(
            worklist.check_out_one(StateId::new(0)),
            Err(Error::NoSuchState { .. })
        ));

        worklist.check_in(vec![(state.id(), Successors::Continue((*state).clone()))]);
        assert_eq!(worklist.count(Some(Status::Running)), 1);

        Ok(())
    }

    #[test]
    fn terminal_states_cannot_be_checked_out() {
        let mut worklist = root();
        worklist.update_running(|state| {
            state.finish(Status::Ready, Termination::Exhausted);
            true
        });

        assert!(matches!(
            worklist.check_out_one(StateId::new(0)),
            Err(Error::StateNotRunning { .. })
        ));
        assert!(worklist.check_out(Policy::DepthFirst, 8).is_empty());
    }

    #[test]
    fn snapshots_survive_later_changes() -> anyhow::Result<()> {
        let mut worklist = root();
        let snapshot = worklist.snapshot();
        let before: Vec<_> = States::new(worklist.version(), None).collect();

        fork_root(&mut worklist);
        assert_eq!(worklist.count(None), 2);

        worklist.restore(snapshot)?;
        let after: Vec<_> = States::new(worklist.version(), None).collect();
        assert_eq!(before.len(), after.len());
        assert!(before.iter().zip(&after).all(|(a, b)| Arc::ptr_eq(a, b)));

        // Identifiers are never reused after a restore.
        assert_eq!(fork_root(&mut worklist), vec![StateId::new(3), StateId::new(4)]);

        Ok(())
    }

    #[test]
    fn unknown_snapshots_are_rejected() {
        let mut worklist = root();
        let snapshot = worklist.snapshot();
        worklist.discard_snapshot(snapshot).unwrap();

        assert_eq!(worklist.latest_snapshot(), None);
        assert_eq!(
            worklist.restore(SnapshotId(7)),
            Err(Error::UnknownSnapshot { id: SnapshotId(7) })
        );
        assert!(worklist.discard_snapshot(snapshot).is_err());
    }

    #[test]
    fn state_iterators_are_restartable() {
        let mut worklist = root();
        fork_root(&mut worklist);

        let states = States::new(worklist.version(), Some(Status::Running));
        let first_pass: Vec<_> = states.clone().map(|s| s.id()).collect();
        let mut partial = states.clone();
        partial.next();
        let second_pass: Vec<_> = partial.restart().map(|s| s.id()).collect();

        assert_eq!(first_pass, vec![StateId::new(1), StateId::new(2)]);
        assert_eq!(first_pass, second_pass);
    }

    #[test]
    fn depth_first_prefers_newer_states() {
        let mut worklist = root();
        fork_root(&mut worklist);

        let batch = worklist.check_out(Policy::DepthFirst, 1);
        assert_eq!(batch[0].id(), StateId::new(2));
    }
}
