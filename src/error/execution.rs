//! This module contains errors pertaining to the stepping of execution states
//! by the [`crate::manager::StateManager`].
//!
//! None of these errors abort exploration. They are recorded against the
//! state in which they occurred, and that state is moved to
//! [`crate::state::Status::Errored`].

use thiserror::Error;

use crate::state::account::Address;

/// Errors that occur while exploring a single execution state.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("Exploration budget exhausted")]
    BudgetExhausted,

    #[error("State exceeded its limit of {limit} steps")]
    StateStepLimitExceeded { limit: usize },

    #[error("Interpreter fault: {reason}")]
    InterpreterFault { reason: String },

    #[error("Transaction refers to the unknown account {address}")]
    UnknownAccount { address: Address },

    #[error("Program counter overflowed in {location}")]
    ProgramCounterOverflow { location: u32 },
}
