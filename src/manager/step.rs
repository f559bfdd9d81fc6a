//! This module contains the logic for taking a single step of a single
//! execution state.
//!
//! A step is either the start of the next pending transaction, or the
//! execution of one instruction by the interpreter. Stepping owns the state it
//! steps, so workers stepping different states share nothing but the oracle,
//! the interpreter, the value factory and the coverage tracker.

use crate::{
    constraint::ConstraintStore,
    coverage::CoverageTracker,
    error::execution::Error,
    expr::Predicate,
    interpreter::{Interpreter, StepContext, StepOutcome},
    oracle::Oracle,
    state::{
        transaction::HaltStatus,
        ExecutionState,
        Frame,
        StateId,
        Status,
        Termination,
    },
    value::ValueFactory,
};

/// The states that result from stepping a single state.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Successors {
    /// The state continues under its own identifier, possibly having reached a
    /// terminal status.
    Continue(ExecutionState),

    /// The state forked on a branch whose directions are both feasible. The
    /// parent is retired in favour of the two children, the first of which
    /// took the branch.
    Forked(ExecutionState, ExecutionState),

    /// No direction out of the state was feasible.
    Pruned,
}

/// The collaborators needed to step a state.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Stepper<'a> {
    pub oracle:           &'a dyn Oracle,
    pub interpreter:      &'a dyn Interpreter,
    pub factory:          &'a ValueFactory,
    pub coverage:         &'a CoverageTracker,
    pub state_step_limit: usize,
}

impl Stepper<'_> {
    /// Takes a single step of `state`.
    ///
    /// States that are not running are returned unchanged.
    pub fn step(&self, mut state: ExecutionState) -> Successors {
        if !state.is_running() {
            return Successors::Continue(state);
        }
        if state.steps() >= self.state_step_limit {
            state.fail(Error::StateStepLimitExceeded {
                limit: self.state_step_limit,
            });
            return Successors::Continue(state);
        }

        state.count_step();
        match state.take_frame() {
            None => self.begin_transaction(state),
            Some(frame) => self.execute(state, frame),
        }
    }

    /// Starts the next pending transaction of `state`, or marks the state as
    /// ready if there is none.
    fn begin_transaction(&self, mut state: ExecutionState) -> Successors {
        let Some(transaction) = state.next_pending() else {
            state.finish(Status::Ready, Termination::Exhausted);
            return Successors::Continue(state);
        };

        let checkpoint = state.world().clone();
        let (caller, callee) = (transaction.caller(), transaction.callee());
        for address in [caller, callee] {
            if !checkpoint.contains(&address) {
                state.fail(Error::UnknownAccount { address });
                return Successors::Continue(state);
            }
        }

        let Some(affordable) = state
            .world_mut()
            .transfer(&caller, &callee, transaction.value())
        else {
            state.fail(Error::UnknownAccount { address: caller });
            return Successors::Continue(state);
        };

        let constraints = state.constraints().extend(affordable);
        if !self.is_feasible(&constraints, state.id()) {
            tracing::debug!(state = %state.id(), %caller, "caller cannot afford transaction");
            *state.world_mut() = checkpoint;
            state.record(transaction.finished(HaltStatus::Revert, None));
            state.finish(Status::Terminated, Termination::InsufficientBalance);
            return Successors::Continue(state);
        }
        state.set_constraints(constraints);

        let code = state
            .world()
            .get(&callee)
            .and_then(|account| account.code())
            .cloned();
        match code {
            None => {
                state.record(transaction.finished(HaltStatus::Stop, None));
                Self::after_normal_halt(state, HaltStatus::Stop)
            }
            Some(contract) => {
                state.set_frame(Some(Frame {
                    pc: 0,
                    contract,
                    transaction,
                    checkpoint,
                }));
                Successors::Continue(state)
            }
        }
    }

    /// Executes the instruction at the program counter of `frame`.
    fn execute(&self, mut state: ExecutionState, mut frame: Frame) -> Successors {
        let id = state.id();
        if let Err(error) = self.coverage.record_visit(frame.contract.id(), frame.pc) {
            state.set_frame(Some(frame));
            state.fail(Error::InterpreterFault {
                reason: error.to_string(),
            });
            return Successors::Continue(state);
        }

        let outcome = {
            let constraints = state.constraints().clone();
            let mut context = StepContext::new(
                state.world_mut(),
                &frame.transaction,
                &constraints,
                &frame.contract,
                frame.pc,
                self.factory,
            );
            self.interpreter.step(&mut context)
        };

        match outcome {
            StepOutcome::Advance => {
                let Some(next) = frame.pc.checked_add(1) else {
                    let location = frame.pc;
                    state.set_frame(Some(frame));
                    state.fail(Error::ProgramCounterOverflow { location });
                    return Successors::Continue(state);
                };
                frame.pc = next;
                state.set_frame(Some(frame));
                Successors::Continue(state)
            }
            StepOutcome::Jump { target } => {
                frame.pc = target;
                state.set_frame(Some(frame));
                Successors::Continue(state)
            }
            StepOutcome::Branch {
                condition,
                on_true,
                on_false,
            } => {
                let from = frame.pc;
                let contract = frame.contract.id();
                state.set_frame(Some(frame));
                let record = |target: u32| {
                    if let Err(error) = self.coverage.record_branch(contract, from, target) {
                        tracing::debug!(state = %id, %error, "branch target out of bounds");
                    }
                };
                self.branch(state, &condition, on_true, on_false, record)
            }
            StepOutcome::Halt {
                status,
                return_data,
            } => {
                state.record(frame.transaction.finished(status, return_data));
                if status.is_revert() {
                    *state.world_mut() = frame.checkpoint;
                    state.finish(Status::Terminated, Termination::Halted(status));
                    Successors::Continue(state)
                } else {
                    Self::after_normal_halt(state, status)
                }
            }
            StepOutcome::Fault { reason } => {
                tracing::warn!(state = %id, pc = frame.pc, %reason, "interpreter fault");
                state.set_frame(Some(frame));
                state.fail(Error::InterpreterFault { reason });
                Successors::Continue(state)
            }
        }
    }

    /// Forks `state` on `condition`, keeping only the feasible directions.
    fn branch(
        &self,
        mut state: ExecutionState,
        condition: &Predicate,
        on_true: u32,
        on_false: u32,
        record: impl Fn(u32),
    ) -> Successors {
        let id = state.id();

        // Concrete conditions do not fork and need no oracle.
        if let Predicate::Const(taken) = condition {
            let target = if *taken { on_true } else { on_false };
            record(target);
            state.jump(target);
            return Successors::Continue(state);
        }

        let taken = state.constraints().extend(condition.clone());
        let not_taken = state.constraints().extend(condition.not());
        let can_take = self.is_feasible(&taken, id);
        let can_skip = self.is_feasible(&not_taken, id);

        match (can_take, can_skip) {
            (true, true) => {
                record(on_true);
                record(on_false);
                let mut skipped = state.forked(not_taken);
                skipped.jump(on_false);
                state.become_child(taken);
                state.jump(on_true);
                tracing::debug!(state = %id, %condition, "forked on symbolic branch");
                Successors::Forked(state, skipped)
            }
            (true, false) => {
                record(on_true);
                state.set_constraints(taken);
                state.jump(on_true);
                Successors::Continue(state)
            }
            (false, true) => {
                record(on_false);
                state.set_constraints(not_taken);
                state.jump(on_false);
                Successors::Continue(state)
            }
            (false, false) => {
                tracing::debug!(state = %id, "pruned state with no feasible direction");
                Successors::Pruned
            }
        }
    }

    /// Checks whether `constraints` may be satisfiable, treating an undecided
    /// query as satisfiable.
    pub fn is_feasible(&self, constraints: &ConstraintStore, state: StateId) -> bool {
        match constraints.is_satisfiable(self.oracle) {
            Ok(answer) => answer,
            Err(error) => {
                tracing::warn!(%state, %error, "assuming satisfiable after solver failure");
                true
            }
        }
    }

    fn after_normal_halt(mut state: ExecutionState, status: HaltStatus) -> Successors {
        if !state.has_pending() {
            state.finish(Status::Ready, Termination::Halted(status));
        }
        Successors::Continue(state)
    }
}
