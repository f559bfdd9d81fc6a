//! This module is an integration test that checks how states fork, prune and
//! terminate as they are explored.
#![cfg(test)]

use std::time::Duration;

use common::{branch_on, Harness, Op};
use ethnum::U256;
use symbolic_explorer::{
    error::execution,
    expr::Term,
    manager::{Config, Policy, StopReason},
    state::{transaction::HaltStatus, StateId, Status, Termination},
    watchdog::LazyWatchdog,
};

mod common;

#[test]
fn forks_only_into_feasible_directions() -> anyhow::Result<()> {
    // With x below 3, only one direction of `x < 5` is possible.
    let harness = Harness::new(3)?;
    let manager = &harness.manager;
    let x = Term::symbol(&manager.make_symbolic_value(8, "x")?);
    harness.load(vec![
        branch_on(x.ult(&Term::literal(5u32, 8)), 1, 2),
        Op::Halt(HaltStatus::Return),
        Op::Halt(HaltStatus::Revert),
    ]);
    manager.constrain(&x.ult(&Term::literal(3u32, 8)));
    harness.call(Term::word(0u32))?;

    let summary = manager.run_until_quiescent();
    assert_eq!(summary.forks, 0);
    assert_eq!(summary.pruned, 0);
    assert_eq!(manager.count_ready_states(), 1);
    assert_eq!(manager.count_terminated_states(), 0);
    assert_eq!(
        manager.coverage().branches(harness.contract.contract)?,
        vec![(0, 1)]
    );

    // With x below 3, both directions of `x < 2` are possible.
    let harness = Harness::new(3)?;
    let manager = &harness.manager;
    let x = Term::symbol(&manager.make_symbolic_value(8, "x")?);
    harness.load(vec![
        branch_on(x.ult(&Term::literal(2u32, 8)), 1, 2),
        Op::Halt(HaltStatus::Return),
        Op::Halt(HaltStatus::Revert),
    ]);
    manager.constrain(&x.ult(&Term::literal(3u32, 8)));
    harness.call(Term::word(0u32))?;

    let summary = manager.run_until_quiescent();
    assert_eq!(summary.forks, 1);
    assert_eq!(manager.count_ready_states(), 1);
    assert_eq!(manager.count_terminated_states(), 1);
    assert!(manager.state(StateId::new(0)).is_none());

    for state in manager.all_states() {
        assert_eq!(state.parent(), Some(StateId::new(0)));
        assert!(state
            .constraints()
            .is_satisfiable(manager.oracle().as_ref())?);
    }

    Ok(())
}

#[test]
fn forcing_a_value_prunes_the_child_that_needs_it_larger() -> anyhow::Result<()> {
    let harness = Harness::new(3)?;
    let manager = &harness.manager;
    let oracle = manager.oracle().as_ref();
    let x = Term::symbol(&manager.make_symbolic_value(256, "x")?);
    let v = Term::symbol(&manager.make_symbolic_value(256, "v")?);
    harness.load(vec![
        branch_on(x.ugt(&v), 1, 2),
        Op::Halt(HaltStatus::Return),
        Op::Halt(HaltStatus::Return),
    ]);

    assert_eq!(manager.constrain(&x.ugt(&Term::word(0u32))), 0);
    harness.call(Term::word(0u32))?;

    // The first step starts the transaction, the second forks on `x > v`.
    assert_eq!(manager.step(StateId::new(0))?, vec![StateId::new(0)]);
    let children = manager.step(StateId::new(0))?;
    assert_eq!(children, vec![StateId::new(1), StateId::new(2)]);

    let above = manager.state(StateId::new(1)).expect("child exists");
    let below = manager.state(StateId::new(2)).expect("child exists");
    assert!(above.constraints().is_satisfiable(oracle)?);
    assert!(below.constraints().is_satisfiable(oracle)?);
    assert_eq!(above.pc(), Some(1));
    assert_eq!(below.pc(), Some(2));

    // No x can exceed the largest word.
    let pruned = manager.constrain(&v.equals(&Term::word(U256::MAX)));
    assert_eq!(pruned, 1);
    assert!(manager.state(StateId::new(1)).is_none());
    assert_eq!(manager.count_busy_states(), 1);

    let remaining = manager.state(StateId::new(2)).expect("child survives");
    assert!(remaining.constraints().is_satisfiable(oracle)?);
    assert_eq!(remaining.constraints().len(), 3);

    Ok(())
}

#[test]
fn solvable_branches_over_wide_values_are_kept() -> anyhow::Result<()> {
    // Three is invertible modulo 2^256, so some x satisfies `3x == 7`.
    let harness = Harness::new(3)?;
    let manager = &harness.manager;
    let x = Term::symbol(&manager.make_symbolic_value(256, "x")?);
    harness.load(vec![
        branch_on(x.mul(&Term::word(3u32)).equals(&Term::word(7u32)), 1, 2),
        Op::Halt(HaltStatus::Return),
        Op::Halt(HaltStatus::Stop),
    ]);
    harness.call(Term::word(0u32))?;

    let summary = manager.run_until_quiescent();
    assert_eq!(summary.forks, 1);
    assert_eq!(summary.pruned, 0);
    assert_eq!(manager.count_ready_states(), 2);
    assert_eq!(
        manager.coverage().branches(harness.contract.contract)?,
        vec![(0, 1), (0, 2)]
    );

    Ok(())
}

#[test]
fn reverts_restore_the_world() -> anyhow::Result<()> {
    let harness = Harness::new(2)?;
    let manager = &harness.manager;
    harness.load(vec![Op::Next, Op::Halt(HaltStatus::Revert)]);
    harness.call(Term::word(5u32))?;

    manager.run_until_quiescent();
    assert_eq!(manager.count_terminated_states(), 1);

    let state = manager.terminated_states().next().expect("state terminated");
    assert_eq!(
        state.termination(),
        Some(&Termination::Halted(HaltStatus::Revert))
    );
    let user = state.world().get(&harness.user).expect("user exists");
    assert_eq!(user.balance(), &Term::word(1_000u32));
    let contract = state
        .world()
        .get(&harness.contract.address)
        .expect("contract exists");
    assert_eq!(contract.balance(), &Term::word(0u32));

    let recorded = &state.transactions()[0];
    assert_eq!(
        recorded.outcome().map(|o| o.status),
        Some(HaltStatus::Revert)
    );

    Ok(())
}

#[test]
fn unaffordable_transactions_terminate_the_state() -> anyhow::Result<()> {
    let harness = Harness::new(1)?;
    let manager = &harness.manager;
    harness.load(vec![Op::Halt(HaltStatus::Return)]);
    harness.call(Term::word(5_000u32))?;

    manager.run_until_quiescent();
    let state = manager.terminated_states().next().expect("state terminated");
    assert_eq!(state.termination(), Some(&Termination::InsufficientBalance));
    assert_eq!(state.transactions().len(), 1);
    assert!(manager.coverage().visited(harness.contract.contract)?.is_empty());

    Ok(())
}

#[test]
fn successive_transactions_run_in_order() -> anyhow::Result<()> {
    let harness = Harness::new(2)?;
    let manager = &harness.manager;
    harness.load(vec![Op::Next, Op::Halt(HaltStatus::Stop)]);
    harness.call(Term::word(100u32))?;
    harness.call(Term::word(200u32))?;

    manager.run_until_quiescent();
    let state = manager.ready_states().next().expect("state is ready");
    assert_eq!(state.transactions().len(), 2);
    assert_eq!(state.pending().count(), 0);
    assert_eq!(
        state.termination(),
        Some(&Termination::Halted(HaltStatus::Stop))
    );

    let user = state.world().get(&harness.user).expect("user exists");
    assert_eq!(user.balance(), &Term::word(700u32));
    let contract = state
        .world()
        .get(&harness.contract.address)
        .expect("contract exists");
    assert_eq!(contract.balance(), &Term::word(300u32));
    assert_eq!(
        manager
            .coverage()
            .visit_count(harness.contract.contract, 0)?,
        2
    );

    Ok(())
}

#[test]
fn faults_error_only_the_faulting_state() -> anyhow::Result<()> {
    let harness = Harness::new(3)?;
    let manager = &harness.manager;
    let x = Term::symbol(&manager.make_symbolic_value(8, "x")?);
    harness.load(vec![
        branch_on(x.ult(&Term::literal(10u32, 8)), 1, 2),
        Op::Fault("bad opcode"),
        Op::Halt(HaltStatus::Return),
    ]);
    harness.call(Term::word(0u32))?;

    let summary = manager.run_until_quiescent();
    assert_eq!(summary.stop, StopReason::Quiescent);
    assert_eq!(manager.count_errored_states(), 1);
    assert_eq!(manager.count_ready_states(), 1);

    let state = manager.errored_states().next().expect("state errored");
    assert_eq!(
        state.termination(),
        Some(&Termination::Failed(execution::Error::InterpreterFault {
            reason: "bad opcode".into(),
        }))
    );
    let errors = manager.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors.payloads()[0].location, state.id());

    Ok(())
}

#[test]
fn time_budgets_error_running_states() -> anyhow::Result<()> {
    let config = Config::default().with_time_budget(Duration::ZERO);
    let harness = Harness::with_config(1, config, LazyWatchdog.in_arc())?;
    let manager = &harness.manager;
    harness.load(vec![Op::Goto(0)]);
    harness.call(Term::word(0u32))?;

    let summary = manager.run_until_quiescent();
    assert_eq!(summary.stop, StopReason::TimeBudget);
    assert_eq!(summary.exhausted, 1);

    let state = manager.errored_states().next().expect("state errored");
    assert_eq!(state.status(), Status::Errored);
    assert_eq!(
        state.termination(),
        Some(&Termination::Failed(execution::Error::BudgetExhausted))
    );

    Ok(())
}

#[test]
fn exploration_is_independent_of_worker_count() -> anyhow::Result<()> {
    let explore = |workers: usize, policy: Policy| -> anyhow::Result<Vec<_>> {
        let config = Config::default()
            .with_workers(workers)
            .with_batch_size(3)
            .with_policy(policy);
        let harness = Harness::with_config(4, config, LazyWatchdog.in_arc())?;
        let ten = Term::literal(10u32, 8);
        let mut program = Vec::new();
        for (location, name) in (1..).zip(["a", "b", "c"]) {
            let value = Term::symbol(&harness.manager.make_symbolic_value(8, name)?);
            program.push(branch_on(value.ult(&ten), location, location));
        }
        program.push(Op::Halt(HaltStatus::Return));
        harness.load(program);
        harness.call(Term::word(0u32))?;
        harness.manager.run_until_quiescent();

        Ok(harness
            .manager
            .all_states()
            .map(|state| (state.id(), state.constraints().predicates()))
            .collect())
    };

    for policy in [Policy::BreadthFirst, Policy::DepthFirst] {
        let single = explore(1, policy)?;
        let parallel = explore(4, policy)?;
        assert_eq!(single.len(), 8);
        assert_eq!(single, parallel);
    }

    Ok(())
}
