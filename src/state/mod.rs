//! This module contains the [`ExecutionState`], one path's complete view of
//! the explored world, along with the types that make it up.
//!
//! An execution state is the unit of forking. The state manager owns every
//! state, and hands them out to callers only as shared, read-only
//! [`std::sync::Arc`]s.

pub mod account;
pub mod storage;
pub mod transaction;

use std::{
    collections::{BTreeMap, VecDeque},
    fmt::{Display, Formatter},
};

use serde::{Deserialize, Serialize};

use crate::{
    constraint::ConstraintStore,
    contract::Contract,
    error::execution,
    expr::Predicate,
    state::{
        account::WorldState,
        transaction::{HaltStatus, Transaction},
    },
    value::{SymbolicValue, ValueId},
};

/// The unique identifier of an execution state within a state manager.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
#[serde(transparent)]
pub struct StateId(u64);

impl StateId {
    /// Constructs a state identifier from its raw `value`.
    #[must_use]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Gets the raw numeric identifier.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for StateId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "state#{}", self.0)
    }
}

/// The lifecycle status of an execution state.
///
/// `Running` is the initial status. All other statuses are terminal: a state
/// that has reached one of them is never stepped again, but remains queryable.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Status {
    /// The state can be stepped further.
    Running,

    /// The state finished its transaction sequence normally.
    Ready,

    /// The state was stopped by a revert or an unaffordable transaction.
    Terminated,

    /// The state was stopped by an interpreter fault or an exhausted budget.
    Errored,
}

impl Status {
    /// Checks if the status is terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self != Self::Running
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Ready => write!(f, "ready"),
            Self::Terminated => write!(f, "terminated"),
            Self::Errored => write!(f, "errored"),
        }
    }
}

/// The reason that a state reached its terminal status.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Termination {
    /// The last transaction halted with the given status.
    Halted(HaltStatus),

    /// Every pending transaction was processed.
    Exhausted,

    /// The caller of a transaction could not afford its value.
    InsufficientBalance,

    /// Exploration of the state failed.
    Failed(execution::Error),
}

impl Display for Termination {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Halted(status) => write!(f, "halted with {status}"),
            Self::Exhausted => write!(f, "transaction sequence exhausted"),
            Self::InsufficientBalance => write!(f, "caller could not afford the transaction"),
            Self::Failed(error) => write!(f, "{error}"),
        }
    }
}

/// The execution context of the transaction a state is currently running.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    /// The program counter within the callee's code.
    pub pc: u32,

    /// The code being executed.
    pub contract: Contract,

    /// The transaction being executed.
    pub transaction: Transaction,

    /// The world as it was before the transaction began, restored on revert.
    pub checkpoint: WorldState,
}

/// A representation of a single path through the explored program.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExecutionState {
    /// The identifier of the state.
    id: StateId,

    /// The identifier of the state this one was forked from.
    parent: Option<StateId>,

    /// The lifecycle status of the state.
    status: Status,

    /// Why the state stopped, once it has.
    termination: Option<Termination>,

    /// The path constraints accumulated along this path.
    constraints: ConstraintStore,

    /// This path's view of the world.
    world: WorldState,

    /// The transactions that have finished executing, in order.
    transactions: Vec<Transaction>,

    /// The transactions that have yet to start.
    pending: VecDeque<Transaction>,

    /// The transaction currently executing, if any.
    frame: Option<Frame>,

    /// The number of steps this path has taken.
    steps: usize,
}

impl ExecutionState {
    /// Creates a new running state with identifier `id` over `world`.
    #[must_use]
    pub fn new(id: StateId, world: WorldState) -> Self {
        let parent = None;
        let status = Status::Running;
        let termination = None;
        let constraints = ConstraintStore::new();
        let transactions = Vec::new();
        let pending = VecDeque::new();
        let frame = None;
        let steps = 0;
        Self {
            id,
            parent,
            status,
            termination,
            constraints,
            world,
            transactions,
            pending,
            frame,
            steps,
        }
    }

    /// Gets the identifier of the state.
    #[must_use]
    pub fn id(&self) -> StateId {
        self.id
    }

    /// Gets the identifier of the state this one was forked from, if any.
    #[must_use]
    pub fn parent(&self) -> Option<StateId> {
        self.parent
    }

    /// Gets the status of the state.
    #[must_use]
    pub fn status(&self) -> Status {
        self.status
    }

    /// Checks if the state can still be stepped.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == Status::Running
    }

    /// Gets the reason the state stopped, if it has.
    #[must_use]
    pub fn termination(&self) -> Option<&Termination> {
        self.termination.as_ref()
    }

    /// Gets the path constraints of the state.
    #[must_use]
    pub fn constraints(&self) -> &ConstraintStore {
        &self.constraints
    }

    /// Gets the state's view of the world.
    #[must_use]
    pub fn world(&self) -> &WorldState {
        &self.world
    }

    /// Gets the finished transactions of the state, oldest first.
    #[must_use]
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// Gets the transactions that have not started yet, in execution order.
    pub fn pending(&self) -> impl Iterator<Item = &Transaction> {
        self.pending.iter()
    }

    /// Gets the currently executing frame, if any.
    #[must_use]
    pub fn frame(&self) -> Option<&Frame> {
        self.frame.as_ref()
    }

    /// Gets the program counter of the executing frame, if any.
    #[must_use]
    pub fn pc(&self) -> Option<u32> {
        self.frame.as_ref().map(|frame| frame.pc)
    }

    /// Gets the number of steps this path has taken.
    #[must_use]
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Gets every symbolic value reachable from the state: through its
    /// transactions (finished, executing and pending), its accounts and its
    /// constraints.
    #[must_use]
    pub fn values(&self) -> BTreeMap<ValueId, SymbolicValue> {
        let mut values = BTreeMap::new();
        self.transactions
            .iter()
            .chain(self.frame.iter().map(|frame| &frame.transaction))
            .chain(self.pending.iter())
            .for_each(|tx| tx.collect_values(&mut values));
        self.world.collect_values(&mut values);
        values.extend(self.constraints.values());
        values
    }

    /// Produces a copy of this state constrained by `predicate`, recording
    /// this state as its parent.
    ///
    /// The copy keeps this state's identifier until the state manager assigns
    /// it a new one.
    #[must_use]
    pub fn fork(&self, predicate: Predicate) -> Self {
        self.forked(self.constraints.extend(predicate))
    }

    /// Produces a copy of this state with `constraints`, recording this state
    /// as its parent.
    #[must_use]
    pub(crate) fn forked(&self, constraints: ConstraintStore) -> Self {
        let mut child = self.clone();
        child.become_child(constraints);
        child
    }

    /// Turns this state into its own child with `constraints`, avoiding a
    /// copy when the parent is retired anyway.
    pub(crate) fn become_child(&mut self, constraints: ConstraintStore) {
        self.parent = Some(self.id);
        self.constraints = constraints;
    }

    /// Moves the program counter of the executing frame to `target`.
    pub(crate) fn jump(&mut self, target: u32) {
        if let Some(frame) = self.frame.as_mut() {
            frame.pc = target;
        }
    }

    pub(crate) fn set_id(&mut self, id: StateId) {
        self.id = id;
    }

    pub(crate) fn set_constraints(&mut self, constraints: ConstraintStore) {
        self.constraints = constraints;
    }

    pub(crate) fn world_mut(&mut self) -> &mut WorldState {
        &mut self.world
    }

    pub(crate) fn set_frame(&mut self, frame: Option<Frame>) {
        self.frame = frame;
    }

    pub(crate) fn take_frame(&mut self) -> Option<Frame> {
        self.frame.take()
    }

    pub(crate) fn enqueue(&mut self, transaction: Transaction) {
        self.pending.push_back(transaction);
    }

    pub(crate) fn next_pending(&mut self) -> Option<Transaction> {
        self.pending.pop_front()
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub(crate) fn record(&mut self, transaction: Transaction) {
        self.transactions.push(transaction);
    }

    pub(crate) fn count_step(&mut self) {
        self.steps += 1;
    }

    /// Moves the state to the terminal `status` for `reason`.
    pub(crate) fn finish(&mut self, status: Status, reason: Termination) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.termination = Some(reason);
    }

    /// Moves the state to [`Status::Errored`] because of `error`.
    pub(crate) fn fail(&mut self, error: execution::Error) {
        self.finish(Status::Errored, Termination::Failed(error));
    }
}
