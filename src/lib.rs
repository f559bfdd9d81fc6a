//! This library implements the core of a path-exploring symbolic executor for
//! deterministic, account-based virtual machines. It manages the set of
//! execution states of an exploration campaign, forks them on symbolic
//! branches, accumulates and solves their path constraints, and turns solver
//! models into concrete test cases.
//!
//! The library does not interpret bytecode itself, nor does it contain an SMT
//! solver. Both are provided by the client through the
//! [`interpreter::Interpreter`] and [`oracle::Oracle`] traits respectively,
//! though a bounded reference oracle is available as
//! [`oracle::bounded::BoundedOracle`].
//!
//! # How it Works
//!
//! 1. The client creates accounts, registers contract code, and mints the
//!    symbolic values it needs through the [`manager::StateManager`].
//! 2. Transactions are queued on every running state, after which
//!    [`manager::StateManager::run_until_quiescent`] steps the states in
//!    deterministic batches, delegating every instruction to the interpreter.
//! 3. When the interpreter reports a branch on a symbolic condition, the state
//!    is forked into one child per feasible direction, each with the
//!    condition (or its negation) added to its [`constraint::ConstraintStore`].
//! 4. Once exploration is done, the client asks for test cases for the states
//!    of interest, which are produced from oracle models by the
//!    [`testcase::TestCaseGenerator`] and persisted to a workspace.
//!
//! # Basic Usage
//!
//! ```
//! use std::sync::Arc;
//!
//! use symbolic_explorer::{
//!     expr::Term,
//!     interpreter::{Interpreter, StepContext, StepOutcome},
//!     manager::{Config, StateManager},
//!     oracle::bounded::BoundedOracle,
//!     state::transaction::{HaltStatus, Input, Transaction},
//!     watchdog::LazyWatchdog,
//! };
//!
//! /// Reverts if the transaction carries more than 10 units of value.
//! #[derive(Debug)]
//! struct Guard;
//!
//! impl Interpreter for Guard {
//!     fn step(&self, context: &mut StepContext<'_>) -> StepOutcome {
//!         match context.pc() {
//!             0 => StepOutcome::Branch {
//!                 condition: context.transaction().value().ugt(&Term::word(10u32)),
//!                 on_true:   1,
//!                 on_false:  2,
//!             },
//!             1 => StepOutcome::Halt {
//!                 status:      HaltStatus::Revert,
//!                 return_data: None,
//!             },
//!             _ => StepOutcome::Halt {
//!                 status:      HaltStatus::Return,
//!                 return_data: None,
//!             },
//!         }
//!     }
//! }
//!
//! let manager = StateManager::new(
//!     Config::default(),
//!     Arc::new(BoundedOracle::default()),
//!     Arc::new(Guard),
//!     LazyWatchdog.in_arc(),
//! )?;
//! let user = manager.create_account(Term::word(100u32), "user")?;
//! let guard = manager.register_contract(vec![0x00], 3, user, Term::word(0u32))?;
//! let value = manager.make_symbolic_value(256, "value")?;
//! manager.submit_transaction(Transaction::new(
//!     user,
//!     guard.address,
//!     Term::symbol(&value),
//!     Input::default(),
//! ))?;
//!
//! let summary = manager.run_until_quiescent();
//! assert_eq!(summary.forks, 1);
//! assert_eq!(manager.count_ready_states(), 1);
//! assert_eq!(manager.count_terminated_states(), 1);
//! # Ok::<(), symbolic_explorer::error::Error>(())
//! ```

#![warn(clippy::all, clippy::cargo, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)] // Allows for better API naming

pub mod constant;
pub mod constraint;
pub mod contract;
pub mod coverage;
pub mod error;
pub mod expr;
pub mod interpreter;
pub mod manager;
pub mod oracle;
pub mod state;
pub mod testcase;
pub mod value;
pub mod watchdog;

// Re-exports to provide the library interface.
pub use manager::{Config, StateManager};
