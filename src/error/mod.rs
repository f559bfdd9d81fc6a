//! This module contains the primary error type for the explorer's interface.
//! It also re-exports the more specific error types that are
//! subsystem-specific.

pub mod container;
pub mod execution;
pub mod solver;

use thiserror::Error;

use crate::{
    contract::ContractId,
    manager::SnapshotId,
    state::{account::Address, StateId},
    value::ValueKind,
};

/// The interface result type for the library.
///
/// # Usage
///
/// Any function considered to be part of the public interface of the library
/// should return this result type. Subsystems should return the more-specific
/// child error types as appropriate.
pub type Result<T> = std::result::Result<T, Error>;

/// The interface error type for the library.
///
/// All errors returned from the library interface (and hence encountered by the
/// clients of the library) should be members of this enum.
///
/// The variants that are not wrappers describe violations of the calling
/// contract. They are fatal to the operation that raised them, but never to
/// the exploration campaign as a whole.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum Error {
    /// Errors from the execution subsystem of the library.
    #[error(transparent)]
    Execution(#[from] execution::Error),

    /// Errors from the solver oracle.
    #[error(transparent)]
    Solver(#[from] solver::Error),

    #[error("Cannot create a {kind} of width {requested}; widths must be in 1..={maximum}")]
    InvalidWidth {
        kind:      ValueKind,
        requested: u32,
        maximum:   u32,
    },

    #[error("No snapshot with id {id} was produced by this manager")]
    UnknownSnapshot { id: SnapshotId },

    #[error("No contract with id {id} has been registered")]
    UnknownContract { id: ContractId },

    #[error("Location {location} is out of bounds for {id} with {total} locations")]
    LocationOutOfBounds {
        id:       ContractId,
        location: u32,
        total:    u32,
    },

    #[error("No live state with id {id} exists")]
    NoSuchState { id: StateId },

    #[error("State {id} is not running and cannot be stepped")]
    StateNotRunning { id: StateId },

    #[error("An account named {name:?} already exists")]
    DuplicateAccountName { name: String },

    #[error("No account exists at address {address}")]
    UnknownAccount { address: Address },

    /// Errors raised while persisting artifacts to the workspace.
    #[error("Workspace error: {message}")]
    Workspace { message: String },

    /// An unknown error, represented as a string.
    #[error("Unknown Error: {_0:?}")]
    Other(String),
}

impl Error {
    /// Constructs an unknown error with the provided `message`.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Constructs a workspace error from anything that can be displayed.
    pub fn workspace(error: impl std::fmt::Display) -> Self {
        Self::Workspace {
            message: error.to_string(),
        }
    }
}

/// Make it possible to attach locations to these errors.
impl container::Locatable for Error {
    type Located = LocatedError;

    fn locate(self, state: StateId) -> Self::Located {
        container::Located {
            location: state,
            payload:  self,
        }
    }
}

/// A library error with an associated state.
pub type LocatedError = container::Located<Error>;

/// A container of errors that may occur in the explorer.
pub type Errors = container::Errors<LocatedError>;
