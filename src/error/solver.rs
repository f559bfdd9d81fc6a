//! This module contains errors that arise when querying the solver oracle.

use thiserror::Error;

/// Errors reported by an [`crate::oracle::Oracle`] query.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    /// The oracle could not decide the query within its configured limits.
    ///
    /// Exploration treats this as "satisfiable" so that real bugs are not
    /// silently discarded.
    #[error("Solver timed out")]
    Timeout,
}

/// The result type for oracle-backed operations.
pub type Result<T> = std::result::Result<T, Error>;
