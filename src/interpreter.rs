//! This module contains the interface to the external bytecode interpreter.
//!
//! The library knows nothing about the semantics of individual instructions.
//! Instead, the state manager hands the interpreter a [`StepContext`] for the
//! state being stepped, and the interpreter reports what that single step did
//! as a [`StepOutcome`]. Everything else (forking, pruning, transaction
//! bookkeeping and coverage) is handled by the state manager.

use std::{fmt::Debug, sync::Arc};

use crate::{
    constraint::ConstraintStore,
    contract::Contract,
    expr::{Predicate, Term},
    state::{account::WorldState, transaction::HaltStatus, transaction::Transaction},
    value::ValueFactory,
};

/// A dynamically dispatched [`Interpreter`] that can be shared with the
/// scheduler's worker threads.
pub type DynInterpreter = Arc<dyn Interpreter>;

/// The interface to an interpreter that executes one instruction of contract
/// code at a time.
///
/// Implementations must be deterministic: the same context must always
/// produce the same outcome, or exploration cannot be reproduced.
pub trait Interpreter
where
    Self: Debug + Send + Sync,
{
    /// Executes the instruction at the program counter of `context`.
    ///
    /// The interpreter may modify the world state through the context, but
    /// must report control flow through the returned outcome.
    fn step(&self, context: &mut StepContext<'_>) -> StepOutcome;
}

/// The result of executing a single instruction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StepOutcome {
    /// Execution continues at the next location.
    Advance,

    /// Execution continues at `target`.
    Jump { target: u32 },

    /// Execution continues at `on_true` if `condition` holds, and at
    /// `on_false` otherwise.
    Branch {
        condition: Predicate,
        on_true:   u32,
        on_false:  u32,
    },

    /// The transaction finished executing.
    Halt {
        status:      HaltStatus,
        return_data: Option<Term>,
    },

    /// The interpreter could not execute the instruction.
    Fault { reason: String },
}

/// The view of an execution state that is handed to the interpreter for a
/// single step.
#[derive(Debug)]
pub struct StepContext<'a> {
    world:       &'a mut WorldState,
    transaction: &'a Transaction,
    constraints: &'a ConstraintStore,
    contract:    &'a Contract,
    pc:          u32,
    factory:     &'a ValueFactory,
}

impl<'a> StepContext<'a> {
    /// Constructs a new context for executing `contract` at `pc` as part of
    /// `transaction`.
    #[must_use]
    pub fn new(
        world: &'a mut WorldState,
        transaction: &'a Transaction,
        constraints: &'a ConstraintStore,
        contract: &'a Contract,
        pc: u32,
        factory: &'a ValueFactory,
    ) -> Self {
        Self {
            world,
            transaction,
            constraints,
            contract,
            pc,
            factory,
        }
    }

    /// Gets the world state of the executing path.
    #[must_use]
    pub fn world(&self) -> &WorldState {
        self.world
    }

    /// Gets the world state of the executing path mutably.
    #[must_use]
    pub fn world_mut(&mut self) -> &mut WorldState {
        self.world
    }

    /// Gets the transaction being executed.
    #[must_use]
    pub fn transaction(&self) -> &Transaction {
        self.transaction
    }

    /// Gets the path constraints of the executing path.
    #[must_use]
    pub fn constraints(&self) -> &ConstraintStore {
        self.constraints
    }

    /// Gets the contract being executed.
    #[must_use]
    pub fn contract(&self) -> &Contract {
        self.contract
    }

    /// Gets the program counter of the instruction to execute.
    #[must_use]
    pub fn pc(&self) -> u32 {
        self.pc
    }

    /// Gets the factory through which the interpreter can mint fresh symbolic
    /// values, such as for unknown environment data.
    #[must_use]
    pub fn factory(&self) -> &ValueFactory {
        self.factory
    }
}
