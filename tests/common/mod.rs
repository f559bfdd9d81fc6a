//! This module contains common utilities for simplifying the writing of
//! integration tests for this library.

#![cfg(test)]

use std::{
    fmt::{Debug, Formatter},
    sync::Arc,
};

use parking_lot::RwLock;
use symbolic_explorer::{
    expr::{Predicate, Term},
    interpreter::{Interpreter, StepContext, StepOutcome},
    manager::{Config, Deployment, StateManager},
    oracle::{bounded::BoundedOracle, DynOracle},
    state::{
        account::Address,
        transaction::{HaltStatus, Input, Transaction},
    },
    watchdog::{DynWatchdog, LazyWatchdog},
};

/// Computes the condition of a branch from the context it is executed in.
pub type Condition = Arc<dyn Fn(&StepContext<'_>) -> Predicate + Send + Sync>;

/// A single instruction of a scripted program.
#[derive(Clone)]
#[allow(unused)] // Not every test uses every instruction
pub enum Op {
    /// Continue at the next location.
    Next,

    /// Continue at the given location.
    Goto(u32),

    /// Branch to `on_true` or `on_false` on the computed condition.
    Branch {
        condition: Condition,
        on_true:   u32,
        on_false:  u32,
    },

    /// Finish the transaction.
    Halt(HaltStatus),

    /// Fail with the given reason.
    Fault(&'static str),
}

impl Debug for Op {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Next => write!(f, "Next"),
            Self::Goto(target) => write!(f, "Goto({target})"),
            Self::Branch {
                on_true, on_false, ..
            } => write!(f, "Branch({on_true}, {on_false})"),
            Self::Halt(status) => write!(f, "Halt({status})"),
            Self::Fault(reason) => write!(f, "Fault({reason:?})"),
        }
    }
}

/// Constructs a branch on a condition that does not depend on the context.
#[allow(unused)] // It is actually
pub fn branch_on(condition: Predicate, on_true: u32, on_false: u32) -> Op {
    Op::Branch {
        condition: Arc::new(move |_| condition.clone()),
        on_true,
        on_false,
    }
}

/// An interpreter that runs the same scripted program for every contract.
///
/// The program can be loaded after the interpreter is handed to a manager, so
/// that its conditions can refer to values minted by that manager.
#[derive(Debug, Default)]
pub struct ScriptedInterpreter {
    program: RwLock<Vec<Op>>,
}

impl ScriptedInterpreter {
    /// Replaces the program run by the interpreter.
    pub fn load(&self, program: Vec<Op>) {
        *self.program.write() = program;
    }
}

impl Interpreter for ScriptedInterpreter {
    fn step(&self, context: &mut StepContext<'_>) -> StepOutcome {
        let program = self.program.read();
        let Some(op) = program.get(context.pc() as usize) else {
            return StepOutcome::Fault {
                reason: format!("no instruction at {}", context.pc()),
            };
        };

        match op {
            Op::Next => StepOutcome::Advance,
            Op::Goto(target) => StepOutcome::Jump { target: *target },
            Op::Branch {
                condition,
                on_true,
                on_false,
            } => StepOutcome::Branch {
                condition: condition(&*context),
                on_true:   *on_true,
                on_false:  *on_false,
            },
            Op::Halt(status) => StepOutcome::Halt {
                status:      *status,
                return_data: None,
            },
            Op::Fault(reason) => StepOutcome::Fault {
                reason: (*reason).to_string(),
            },
        }
    }
}

/// A manager with a user account holding 1000 units and one deployed
/// contract running the scripted program.
#[allow(unused)] // It is actually
pub struct Harness {
    pub manager:     StateManager,
    pub interpreter: Arc<ScriptedInterpreter>,
    pub user:        Address,
    pub contract:    Deployment,
}

#[allow(unused)] // It is actually
impl Harness {
    /// Constructs a harness for a contract with `locations` program locations
    /// using the default configuration.
    pub fn new(locations: u32) -> anyhow::Result<Self> {
        Self::with_config(locations, Config::default(), LazyWatchdog.in_arc())
    }

    /// Constructs a harness for a contract with `locations` program locations
    /// using the provided `config` and `watchdog`.
    pub fn with_config(
        locations: u32,
        config: Config,
        watchdog: DynWatchdog,
    ) -> anyhow::Result<Self> {
        let oracle = Arc::new(BoundedOracle::default());
        Self::with_parts(locations, config, oracle, watchdog)
    }

    /// Constructs a harness for a contract with `locations` program locations
    /// whose feasibility questions are answered by `oracle`.
    pub fn with_oracle(locations: u32, oracle: DynOracle) -> anyhow::Result<Self> {
        Self::with_parts(locations, Config::default(), oracle, LazyWatchdog.in_arc())
    }

    fn with_parts(
        locations: u32,
        config: Config,
        oracle: DynOracle,
        watchdog: DynWatchdog,
    ) -> anyhow::Result<Self> {
        let interpreter = Arc::new(ScriptedInterpreter::default());
        let manager = StateManager::new(config, oracle, interpreter.clone(), watchdog)?;
        let user = manager.create_account(Term::word(1_000u32), "user")?;
        let bytecode = vec![0x00; locations as usize];
        let contract = manager.register_contract(bytecode, locations, user, Term::word(0u32))?;

        Ok(Self {
            manager,
            interpreter,
            user,
            contract,
        })
    }

    /// Loads `program` into the interpreter.
    pub fn load(&self, program: Vec<Op>) {
        self.interpreter.load(program);
    }

    /// Queues a call from the user to the scripted contract carrying `value`.
    pub fn call(&self, value: Term) -> anyhow::Result<usize> {
        let tx = Transaction::new(self.user, self.contract.address, value, Input::default());
        Ok(self.manager.submit_transaction(tx)?)
    }
}
