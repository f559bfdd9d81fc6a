//! This module contains the [`StateManager`], which owns every execution
//! state of an exploration campaign and drives their exploration.
//!
//! # Scheduling
//!
//! Exploration proceeds in rounds. Each round checks out a batch of running
//! states from the worklist in the order given by the configured [`Policy`],
//! steps every state of the batch once on the manager's worker pool, and
//! checks the results back in. Successor states are given identifiers in the
//! order of their parents' identifiers once the whole batch has finished, so
//! for a deterministic interpreter and oracle the exploration is
//! deterministic regardless of the number of workers.
//!
//! # Locking
//!
//! Stepping holds the read side of a manager-wide gate, while
//! [`StateManager::snapshot`] and [`StateManager::restore`] hold its write
//! side, so no state is ever being stepped while the worklist is captured or
//! replaced. The worklist itself is only locked briefly to check states out
//! and in, and no lock is held while the oracle is consulted.

mod step;
mod worklist;

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use bimap::BiMap;
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;

pub use crate::manager::worklist::{SnapshotId, States};
use crate::{
    constant::{
        DEFAULT_BATCH_SIZE,
        DEFAULT_STATE_STEP_LIMIT,
        DEFAULT_STEP_BUDGET,
        DEFAULT_WORKER_COUNT,
    },
    contract::{Contract, ContractId},
    coverage::CoverageTracker,
    error::{container::Locatable, execution, Error, Errors, LocatedError, Result},
    expr::{Predicate, Term},
    interpreter::DynInterpreter,
    manager::{
        step::{Stepper, Successors},
        worklist::Worklist,
    },
    oracle::DynOracle,
    state::{
        account::{Account, Address, WorldState},
        transaction::Transaction,
        ExecutionState,
        StateId,
        Status,
        Termination,
    },
    testcase::{workspace::DynWorkspace, TestCase, TestCaseGenerator},
    value::{SymbolicValue, ValueFactory},
    watchdog::DynWatchdog,
};

/// The order in which running states are picked for stepping.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Policy {
    /// Oldest states first, in ascending order of identifier.
    #[default]
    BreadthFirst,

    /// Newest states first, in descending order of identifier.
    DepthFirst,
}

/// The configuration for the state manager.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// The number of worker threads that step states in parallel.
    ///
    /// Defaults to [`DEFAULT_WORKER_COUNT`].
    pub workers: usize,

    /// The maximum number of states stepped in a single round.
    ///
    /// Defaults to [`DEFAULT_BATCH_SIZE`].
    pub batch_size: usize,

    /// The order in which states are picked for stepping.
    ///
    /// Defaults to [`Policy::BreadthFirst`].
    pub policy: Policy,

    /// The maximum number of steps, summed over all states, that a single call
    /// to [`StateManager::run_until_quiescent`] may take.
    ///
    /// Defaults to [`DEFAULT_STEP_BUDGET`].
    pub step_budget: usize,

    /// The maximum number of steps that any single state may take.
    ///
    /// Defaults to [`DEFAULT_STATE_STEP_LIMIT`].
    pub state_step_limit: usize,

    /// The maximum wall-clock time that a single call to
    /// [`StateManager::run_until_quiescent`] may take, if any.
    ///
    /// Defaults to [`None`].
    pub time_budget: Option<Duration>,
}

impl Config {
    /// Sets the `workers` config parameter to `value`.
    #[must_use]
    pub fn with_workers(mut self, value: usize) -> Self {
        self.workers = value;
        self
    }

    /// Sets the `batch_size` config parameter to `value`.
    #[must_use]
    pub fn with_batch_size(mut self, value: usize) -> Self {
        self.batch_size = value;
        self
    }

    /// Sets the `policy` config parameter to `value`.
    #[must_use]
    pub fn with_policy(mut self, value: Policy) -> Self {
        self.policy = value;
        self
    }

    /// Sets the `step_budget` config parameter to `value`.
    #[must_use]
    pub fn with_step_budget(mut self, value: usize) -> Self {
        self.step_budget = value;
        self
    }

    /// Sets the `state_step_limit` config parameter to `value`.
    #[must_use]
    pub fn with_state_step_limit(mut self, value: usize) -> Self {
        self.state_step_limit = value;
        self
    }

    /// Sets the `time_budget` config parameter to `value`.
    #[must_use]
    pub fn with_time_budget(mut self, value: Duration) -> Self {
        self.time_budget = Some(value);
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        let workers = DEFAULT_WORKER_COUNT;
        let batch_size = DEFAULT_BATCH_SIZE;
        let policy = Policy::default();
        let step_budget = DEFAULT_STEP_BUDGET;
        let state_step_limit = DEFAULT_STATE_STEP_LIMIT;
        let time_budget = None;
        Self {
            workers,
            batch_size,
            policy,
            step_budget,
            state_step_limit,
            time_budget,
        }
    }
}

/// Why a run of the scheduler stopped.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum StopReason {
    /// No running states remained.
    Quiescent,

    /// The step budget was used up.
    StepBudget,

    /// The time budget was used up.
    TimeBudget,

    /// The watchdog asked for exploration to stop.
    Watchdog,
}

/// A summary of a single call to [`StateManager::run_until_quiescent`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunSummary {
    /// The number of steps taken over all states.
    pub steps: usize,

    /// The number of scheduling rounds.
    pub rounds: usize,

    /// The number of states that forked into two.
    pub forks: usize,

    /// The number of states discarded because no direction out of them was
    /// feasible.
    pub pruned: usize,

    /// The number of running states that were stopped with an exhausted
    /// budget.
    pub exhausted: usize,

    /// Why the run stopped.
    pub stop: StopReason,

    /// How long the run took.
    pub elapsed: Duration,
}

/// A contract deployed by [`StateManager::register_contract`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Deployment {
    /// The identifier of the contract's code.
    pub contract: ContractId,

    /// The address of the account holding the code.
    pub address: Address,
}

/// The campaign-wide record of accounts and contracts.
#[derive(Debug, Default)]
struct Registry {
    /// Every account created, by name.
    names: BiMap<String, Address>,

    /// The code of every registered contract.
    contracts: HashMap<ContractId, Contract>,

    /// The number of accounts created by each account so far.
    nonces: HashMap<Address, u64>,

    /// The number of top-level accounts created so far.
    created: u64,
}

impl Registry {
    fn next_nonce(&mut self, creator: Address) -> u64 {
        let nonce = self.nonces.entry(creator).or_insert(0);
        let current = *nonce;
        *nonce += 1;
        current
    }

    fn is_known(&self, address: &Address) -> bool {
        self.names.contains_right(address) || self.nonces.contains_key(address)
    }
}

/// The owner of every execution state in an exploration campaign.
///
/// The manager starts with a single running root state whose world is empty.
/// Accounts, contracts, constraints and transactions added through the manager
/// apply to every state that is running at the time.
#[derive(Debug)]
pub struct StateManager {
    config:      Config,
    oracle:      DynOracle,
    interpreter: DynInterpreter,
    watchdog:    DynWatchdog,
    factory:     ValueFactory,
    coverage:    CoverageTracker,
    generator:   TestCaseGenerator,
    worklist:    Mutex<Worklist>,
    gate:        RwLock<()>,
    registry:    Mutex<Registry>,
    errors:      Mutex<Errors>,
    pool:        rayon::ThreadPool,
}

impl StateManager {
    /// Constructs a new state manager exploring with `interpreter` and
    /// `oracle`, and polling `watchdog` while it runs.
    ///
    /// Test cases are kept in memory until another workspace is provided
    /// through [`Self::with_workspace`].
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the worker pool cannot be created.
    pub fn new(
        config: Config,
        oracle: DynOracle,
        interpreter: DynInterpreter,
        watchdog: DynWatchdog,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers.max(1))
            .thread_name(|index| format!("explorer-worker-{index}"))
            .build()
            .map_err(|e| Error::other(format!("Could not start the worker pool: {e}")))?;

        let root = ExecutionState::new(StateId::new(0), WorldState::new());
        let worklist = Mutex::new(Worklist::new(root));
        let factory = ValueFactory::new();
        let coverage = CoverageTracker::new();
        let generator = TestCaseGenerator::default();
        let gate = RwLock::new(());
        let registry = Mutex::new(Registry::default());
        let errors = Mutex::new(Errors::new());

        Ok(Self {
            config,
            oracle,
            interpreter,
            watchdog,
            factory,
            coverage,
            generator,
            worklist,
            gate,
            registry,
            errors,
            pool,
        })
    }

    /// Makes the manager persist test cases into `workspace`.
    #[must_use]
    pub fn with_workspace(mut self, workspace: DynWorkspace) -> Self {
        self.generator = TestCaseGenerator::new(workspace);
        self
    }

    /// Gets the configuration of the manager.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Gets the factory through which symbolic values are minted.
    #[must_use]
    pub fn factory(&self) -> &ValueFactory {
        &self.factory
    }

    /// Gets the campaign-wide coverage tracker.
    #[must_use]
    pub fn coverage(&self) -> &CoverageTracker {
        &self.coverage
    }

    /// Gets the oracle used by the manager.
    #[must_use]
    pub fn oracle(&self) -> &DynOracle {
        &self.oracle
    }

    /// Gets the workspace into which test cases are persisted.
    #[must_use]
    pub fn workspace(&self) -> &DynWorkspace {
        self.generator.workspace()
    }

    /// Mints a fresh named scalar of `width` bits.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `width` is not a valid scalar width.
    pub fn make_symbolic_value(
        &self,
        width: u32,
        name: impl Into<String>,
    ) -> Result<SymbolicValue> {
        self.factory.new_named_scalar(width, name)
    }

    /// Mints a fresh named buffer of `length_bytes` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `length_bytes` is not a valid buffer length.
    pub fn make_symbolic_buffer(
        &self,
        length_bytes: u32,
        name: impl Into<String>,
    ) -> Result<SymbolicValue> {
        self.factory.new_named_buffer(length_bytes, name)
    }

    /// Creates an account called `name` holding `balance` in every running
    /// state.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if an account called `name` already exists.
    pub fn create_account(&self, balance: Term, name: impl Into<String>) -> Result<Address> {
        let name = name.into();
        let address = {
            let mut registry = self.registry.lock();
            if registry.names.contains_left(&name) {
                return Err(Error::DuplicateAccountName { name });
            }
            let nonce = registry.created;
            registry.created += 1;
            let address = Address::derive(Address::default(), nonce);
            registry.names.insert(name.clone(), address);
            address
        };

        let _gate = self.gate.read();
        self.worklist.lock().update_running(|state| {
            state
                .world_mut()
                .insert(Account::new(address, balance.clone()));
            true
        });
        tracing::debug!(%name, %address, "created account");

        Ok(address)
    }

    /// Registers `bytecode` with `locations` program locations and deploys it
    /// in every running state to a new account created by `owner`, holding
    /// `balance`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `owner` is not an account known to the manager.
    pub fn register_contract(
        &self,
        bytecode: impl Into<Arc<[u8]>>,
        locations: u32,
        owner: Address,
        balance: Term,
    ) -> Result<Deployment> {
        let (deployment, code) = {
            let mut registry = self.registry.lock();
            if !registry.is_known(&owner) {
                return Err(Error::UnknownAccount { address: owner });
            }

            let contract = ContractId::new(
                u32::try_from(registry.contracts.len())
                    .map_err(|_| Error::other("Too many contracts have been registered"))?,
            );
            let nonce = registry.next_nonce(owner);
            let address = Address::derive(owner, nonce);
            let code = Contract::new(contract, bytecode, locations);
            registry.contracts.insert(contract, code.clone());
            registry.nonces.entry(address).or_insert(0);
            (Deployment { contract, address }, code)
        };

        self.coverage.register(deployment.contract, locations);

        let _gate = self.gate.read();
        self.worklist.lock().update_running(|state| {
            let world = state.world_mut();
            if let Some(account) = world.get_mut(&owner) {
                account.bump_nonce();
            }
            world.insert(Account::new(deployment.address, balance.clone()).with_code(code.clone()));
            true
        });
        tracing::debug!(
            contract = %deployment.contract,
            address = %deployment.address,
            "registered contract"
        );

        Ok(deployment)
    }

    /// Gets the contract with identifier `id`.
    #[must_use]
    pub fn contract(&self, id: ContractId) -> Option<Contract> {
        self.registry.lock().contracts.get(&id).cloned()
    }

    /// Gets the address of the account called `name`.
    #[must_use]
    pub fn account_address(&self, name: &str) -> Option<Address> {
        self.registry.lock().names.get_by_left(name).copied()
    }

    /// Gets the name of the account at `address`.
    #[must_use]
    pub fn account_name(&self, address: &Address) -> Option<String> {
        self.registry.lock().names.get_by_right(address).cloned()
    }

    /// Queues `transaction` on every running state.
    ///
    /// Returns the number of states the transaction was queued on.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the caller or callee is not an account known to the
    /// manager.
    pub fn submit_transaction(&self, transaction: Transaction) -> Result<usize> {
        {
            let registry = self.registry.lock();
            for address in [transaction.caller(), transaction.callee()] {
                if !registry.is_known(&address) {
                    return Err(Error::UnknownAccount { address });
                }
            }
        }

        let _gate = self.gate.read();
        let mut queued = 0;
        self.worklist.lock().update_running(|state| {
            state.enqueue(transaction.clone());
            queued += 1;
            true
        });

        Ok(queued)
    }

    /// Adds `predicate` to the constraints of every running state, pruning
    /// the states in which it cannot hold.
    ///
    /// Returns the number of states that were pruned.
    pub fn constrain(&self, predicate: &Predicate) -> usize {
        let _gate = self.gate.read();
        let batch = self.worklist.lock().check_out(self.config.policy, usize::MAX);
        let stepper = self.stepper();

        let results: Vec<(StateId, Successors)> = batch
            .into_iter()
            .map(|state| {
                let id = state.id();
                let mut state = unshare(state);
                let constraints = state.constraints().extend(predicate.clone());
                if stepper.is_feasible(&constraints, id) {
                    state.set_constraints(constraints);
                    (id, Successors::Continue(state))
                } else {
                    tracing::debug!(state = %id, "pruned state by added constraint");
                    (id, Successors::Pruned)
                }
            })
            .collect();

        self.worklist.lock().check_in(results).pruned
    }

    /// Takes a single step of the running state with identifier `id`.
    ///
    /// Returns the identifiers of the resulting states: the state itself if it
    /// continued, two new states if it forked, and none if it was pruned.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no such state exists or if it is not running.
    pub fn step(&self, id: StateId) -> Result<Vec<StateId>> {
        let _gate = self.gate.read();
        let state = self.worklist.lock().check_out_one(id)?;
        let results = vec![(id, self.stepper().step(unshare(state)))];
        self.record_errors(&results);

        Ok(self.worklist.lock().check_in(results).successors)
    }

    /// Steps running states until none remain, or until the step budget, the
    /// time budget or the watchdog stops exploration.
    ///
    /// When exploration is stopped early, every state that is still running is
    /// moved to [`Status::Errored`] with [`execution::Error::BudgetExhausted`]
    /// so that no state is silently dropped.
    pub fn run_until_quiescent(&self) -> RunSummary {
        let started = Instant::now();
        let poll_interval = self.watchdog.poll_every().max(1);
        let batch_size = self.config.batch_size.max(1);
        let stepper = self.stepper();

        let mut steps = 0;
        let mut rounds = 0;
        let mut forks = 0;
        let mut pruned = 0;

        let stop = loop {
            if rounds % poll_interval == 0 && self.watchdog.should_stop() {
                break StopReason::Watchdog;
            }
            if steps >= self.config.step_budget {
                break StopReason::StepBudget;
            }
            if self
                .config
                .time_budget
                .is_some_and(|budget| started.elapsed() >= budget)
            {
                break StopReason::TimeBudget;
            }

            let _gate = self.gate.read();
            let limit = batch_size.min(self.config.step_budget - steps);
            let batch = self.worklist.lock().check_out(self.config.policy, limit);
            if batch.is_empty() {
                break StopReason::Quiescent;
            }
            steps += batch.len();

            let results: Vec<(StateId, Successors)> = self.pool.install(|| {
                batch
                    .into_par_iter()
                    .map(|state| (state.id(), stepper.step(unshare(state))))
                    .collect()
            });
            self.record_errors(&results);

            let check_in = self.worklist.lock().check_in(results);
            forks += check_in.forks;
            pruned += check_in.pruned;
            rounds += 1;
        };

        let exhausted = if stop == StopReason::Quiescent {
            0
        } else {
            self.exhaust_running()
        };

        let summary = RunSummary {
            steps,
            rounds,
            forks,
            pruned,
            exhausted,
            stop,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            steps,
            rounds,
            forks,
            pruned,
            exhausted,
            stop = ?summary.stop,
            elapsed_ms = summary.elapsed.as_millis(),
            "exploration finished"
        );

        summary
    }

    /// Removes the state with identifier `id` from the worklist, whatever its
    /// status.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no such state exists.
    pub fn prune(&self, id: StateId) -> Result<Arc<ExecutionState>> {
        let _gate = self.gate.read();
        let state = self.worklist.lock().remove(id)?;
        tracing::debug!(state = %id, "pruned state on request");

        Ok(state)
    }

    /// Captures the current worklist, returning the identifier through which
    /// it can be restored.
    pub fn snapshot(&self) -> SnapshotId {
        let _gate = self.gate.write();
        let id = self.worklist.lock().snapshot();
        tracing::debug!(snapshot = %id, "took snapshot");
        id
    }

    /// Replaces the worklist with the one captured by snapshot `id`.
    ///
    /// Coverage is campaign-wide and is not affected.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the snapshot was not produced by this manager or has
    /// been discarded.
    pub fn restore(&self, id: SnapshotId) -> Result<()> {
        let _gate = self.gate.write();
        self.worklist.lock().restore(id)?;
        tracing::debug!(snapshot = %id, "restored snapshot");

        Ok(())
    }

    /// Forgets snapshot `id`, releasing any states only it refers to.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the manager holds no snapshot `id`.
    pub fn discard_snapshot(&self, id: SnapshotId) -> Result<()> {
        let _gate = self.gate.write();
        self.worklist.lock().discard_snapshot(id)
    }

    /// Gets the most recent snapshot that has not been discarded.
    #[must_use]
    pub fn latest_snapshot(&self) -> Option<SnapshotId> {
        self.worklist.lock().latest_snapshot()
    }

    /// Gets the state with identifier `id`.
    #[must_use]
    pub fn state(&self, id: StateId) -> Option<Arc<ExecutionState>> {
        self.worklist.lock().get(id)
    }

    /// Gets the states that finished their transaction sequence normally.
    #[must_use]
    pub fn ready_states(&self) -> States {
        self.states_with(Some(Status::Ready))
    }

    /// Gets the states stopped by a revert or an unaffordable transaction.
    #[must_use]
    pub fn terminated_states(&self) -> States {
        self.states_with(Some(Status::Terminated))
    }

    /// Gets the states stopped by a fault or an exhausted budget.
    #[must_use]
    pub fn errored_states(&self) -> States {
        self.states_with(Some(Status::Errored))
    }

    /// Gets the states that are still running.
    #[must_use]
    pub fn busy_states(&self) -> States {
        self.states_with(Some(Status::Running))
    }

    /// Gets every state, whatever its status.
    #[must_use]
    pub fn all_states(&self) -> States {
        self.states_with(None)
    }

    /// Counts the states that finished their transaction sequence normally.
    #[must_use]
    pub fn count_ready_states(&self) -> usize {
        self.worklist.lock().count(Some(Status::Ready))
    }

    /// Counts the states stopped by a revert or an unaffordable transaction.
    #[must_use]
    pub fn count_terminated_states(&self) -> usize {
        self.worklist.lock().count(Some(Status::Terminated))
    }

    /// Counts the states stopped by a fault or an exhausted budget.
    #[must_use]
    pub fn count_errored_states(&self) -> usize {
        self.worklist.lock().count(Some(Status::Errored))
    }

    /// Counts the states that are still running.
    #[must_use]
    pub fn count_busy_states(&self) -> usize {
        self.worklist.lock().count(Some(Status::Running))
    }

    /// Counts every state, whatever its status.
    #[must_use]
    pub fn count_all_states(&self) -> usize {
        self.worklist.lock().count(None)
    }

    /// Counts the states currently checked out for stepping, which no query
    /// includes until they are checked back in.
    #[must_use]
    pub fn count_in_flight_states(&self) -> usize {
        self.worklist.lock().in_flight()
    }

    /// Generates a test case showing that `condition` can hold in the state
    /// with identifier `id`.
    ///
    /// Returns `Ok(None)`, without side effects, if it cannot.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no such state exists, if the oracle times out while
    /// producing the model, or if the test case cannot be persisted.
    pub fn generate_testcase(
        &self,
        id: StateId,
        condition: &Predicate,
        name: &str,
    ) -> Result<Option<TestCase>> {
        let state = self.state(id).ok_or(Error::NoSuchState { id })?;
        self.generator
            .generate(&state, condition, name, self.oracle.as_ref())
    }

    /// Runs exploration to quiescence and generates one test case for every
    /// ready state or, unless `only_ready` is set, for every terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if generating any of the test cases fails.
    pub fn finalize(&self, only_ready: bool) -> Result<Vec<TestCase>> {
        self.run_until_quiescent();

        let states: Vec<_> = if only_ready {
            self.ready_states().collect()
        } else {
            self.all_states()
                .filter(|state| state.status().is_terminal())
                .collect()
        };

        let mut testcases = Vec::with_capacity(states.len());
        for state in states {
            let name = format!("{}", state.status());
            if let Some(testcase) =
                self.generator
                    .generate(&state, &Predicate::truth(), &name, self.oracle.as_ref())?
            {
                testcases.push(testcase);
            }
        }
        tracing::info!(count = testcases.len(), "finalized exploration");

        Ok(testcases)
    }

    /// Gets the percentage of the locations of `contract` visited by any
    /// state so far.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the contract is unknown.
    pub fn global_coverage(&self, contract: ContractId) -> Result<f64> {
        self.coverage.coverage_percent(contract)
    }

    /// Gets every error encountered by states during exploration, ordered by
    /// state.
    #[must_use]
    pub fn errors(&self) -> Errors {
        self.errors.lock().clone()
    }

    fn stepper(&self) -> Stepper<'_> {
        Stepper {
            oracle:           self.oracle.as_ref(),
            interpreter:      self.interpreter.as_ref(),
            factory:          &self.factory,
            coverage:         &self.coverage,
            state_step_limit: self.config.state_step_limit,
        }
    }

    fn states_with(&self, status: Option<Status>) -> States {
        States::new(self.worklist.lock().version(), status)
    }

    /// Logs the errors of the states that failed in the steps producing
    /// `results`.
    fn record_errors(&self, results: &[(StateId, Successors)]) {
        let failed: Vec<LocatedError> = results
            .iter()
            .filter_map(|(_, successors)| match successors {
                Successors::Continue(state) => match state.termination() {
                    Some(Termination::Failed(error)) => {
                        Some(Error::from(error.clone()).locate(state.id()))
                    }
                    _ => None,
                },
                Successors::Forked(..) | Successors::Pruned => None,
            })
            .collect();
        if !failed.is_empty() {
            self.errors.lock().add_many_located(failed);
        }
    }

    /// Moves every running state to [`Status::Errored`] with an exhausted
    /// budget, returning how many there were.
    fn exhaust_running(&self) -> usize {
        let _gate = self.gate.read();
        let mut failed: Vec<LocatedError> = Vec::new();
        self.worklist.lock().update_running(|state| {
            state.fail(execution::Error::BudgetExhausted);
            failed.push(Error::from(execution::Error::BudgetExhausted).locate(state.id()));
            true
        });

        let count = failed.len();
        self.errors.lock().add_many_located(failed);
        count
    }
}

/// Takes ownership of a checked-out state, copying it only if a snapshot or a
/// query still refers to it.
fn unshare(state: Arc<ExecutionState>) -> ExecutionState {
    Arc::try_unwrap(state).unwrap_or_else(|shared| (*shared).clone())
}
