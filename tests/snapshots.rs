//! This module is an integration test that checks snapshotting and restoring
//! the exploration frontier, and its interaction with coverage.
#![cfg(test)]

use common::{branch_on, Harness, Op};
use symbolic_explorer::{
    expr::Term,
    state::{transaction::HaltStatus, ExecutionState, StateId},
};

mod common;

/// Builds a harness whose program forks twice on `x` before halting.
fn forking_harness() -> anyhow::Result<Harness> {
    let harness = Harness::new(5)?;
    let x = Term::symbol(&harness.manager.make_symbolic_value(8, "x")?);
    harness.load(vec![
        branch_on(x.ult(&Term::literal(100u32, 8)), 1, 2),
        Op::Halt(HaltStatus::Return),
        branch_on(x.ult(&Term::literal(200u32, 8)), 3, 4),
        Op::Halt(HaltStatus::Stop),
        Op::Halt(HaltStatus::Revert),
    ]);
    harness.call(Term::word(1u32))?;

    Ok(harness)
}

fn contents(harness: &Harness) -> Vec<ExecutionState> {
    harness
        .manager
        .all_states()
        .map(|state| (*state).clone())
        .collect()
}

#[test]
fn restoring_a_fresh_snapshot_changes_nothing() -> anyhow::Result<()> {
    let harness = forking_harness()?;
    let manager = &harness.manager;
    manager.step(StateId::new(0))?;
    manager.step(StateId::new(0))?;

    let before = contents(&harness);
    let snapshot = manager.snapshot();
    manager.restore(snapshot)?;
    assert_eq!(contents(&harness), before);
    assert_eq!(manager.latest_snapshot(), Some(snapshot));

    Ok(())
}

#[test]
fn restoring_rewinds_exploration() -> anyhow::Result<()> {
    let harness = forking_harness()?;
    let manager = &harness.manager;
    let snapshot = manager.snapshot();
    let before = contents(&harness);

    let summary = manager.run_until_quiescent();
    assert_eq!(summary.forks, 2);
    assert_eq!(manager.count_ready_states(), 2);
    assert_eq!(manager.count_terminated_states(), 1);
    let explored_ids: Vec<_> = manager.all_states().map(|state| state.id()).collect();

    manager.restore(snapshot)?;
    assert_eq!(contents(&harness), before);
    assert_eq!(manager.count_busy_states(), 1);

    // Exploring again gives the same outcome under fresh identifiers.
    manager.run_until_quiescent();
    assert_eq!(manager.count_ready_states(), 2);
    assert_eq!(manager.count_terminated_states(), 1);
    let max_explored = explored_ids.iter().max().copied();
    assert!(manager
        .all_states()
        .all(|state| Some(state.id()) > max_explored));

    // The snapshot survives restoring, until it is discarded.
    manager.restore(snapshot)?;
    assert_eq!(contents(&harness), before);
    manager.discard_snapshot(snapshot)?;
    assert!(manager.restore(snapshot).is_err());
    assert_eq!(manager.latest_snapshot(), None);

    Ok(())
}

#[test]
fn snapshots_are_specific_to_their_manager() -> anyhow::Result<()> {
    let first = forking_harness()?;
    let second = forking_harness()?;

    let foreign = first.manager.snapshot();
    assert!(second.manager.restore(foreign).is_err());

    Ok(())
}

#[test]
fn iterators_see_the_version_they_were_created_from() -> anyhow::Result<()> {
    let harness = forking_harness()?;
    let manager = &harness.manager;

    let busy = manager.busy_states();
    manager.run_until_quiescent();
    assert_eq!(manager.count_busy_states(), 0);

    let ids: Vec<_> = busy.clone().map(|state| state.id()).collect();
    assert_eq!(ids, vec![StateId::new(0)]);
    assert_eq!(busy.restart().count(), 1);

    Ok(())
}

#[test]
fn coverage_never_decreases() -> anyhow::Result<()> {
    let harness = forking_harness()?;
    let manager = &harness.manager;
    let contract = harness.contract.contract;
    let snapshot = manager.snapshot();

    let mut last = manager.global_coverage(contract)?;
    assert!(last.abs() < f64::EPSILON);
    while let Some(state) = manager.busy_states().next() {
        manager.step(state.id())?;
        let current = manager.global_coverage(contract)?;
        assert!(current >= last);
        last = current;
    }
    assert!((last - 100.0).abs() < f64::EPSILON);

    // Coverage is campaign-wide, so rewinding exploration keeps it.
    manager.restore(snapshot)?;
    assert!((manager.global_coverage(contract)? - 100.0).abs() < f64::EPSILON);
    let branches = manager.coverage().branches(contract)?;
    assert_eq!(branches, vec![(0, 1), (0, 2), (2, 3), (2, 4)]);

    // Pruning keeps it too.
    let root = manager.busy_states().next().expect("root is running");
    manager.prune(root.id())?;
    assert!((manager.global_coverage(contract)? - 100.0).abs() < f64::EPSILON);

    Ok(())
}
