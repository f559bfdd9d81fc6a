//! This module contains the [`TestCaseGenerator`], which turns a state and a
//! target condition into a concrete, persisted counterexample.
//!
//! # Side Effects
//!
//! Generation never mutates the state it is given. The only side effects of a
//! call are allocating a name and persisting one artifact, and both happen
//! only once the oracle has produced a model. A condition that is
//! unsatisfiable on the state can therefore be tried any number of times.

pub mod workspace;

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use ethnum::U256;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    error::{solver, Result},
    expr::{eval::Assignment, Predicate, Term},
    oracle::{Model, Oracle},
    state::{
        account::Address,
        transaction::{HaltStatus, Input, Transaction},
        ExecutionState,
        StateId,
    },
    testcase::workspace::{DynWorkspace, MemoryWorkspace},
    value::{
        concrete::{bytes_hex, word_hex},
        ValueId,
    },
};

/// A concrete counterexample: an assignment to the symbolic inputs of a state
/// under which a target condition holds.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TestCase {
    /// The unique name of the test case.
    name: String,

    /// The state the test case was generated from.
    state: StateId,

    /// A description of the condition the test case satisfies.
    condition: String,

    /// The concrete value of every symbolic value reachable from the state.
    model: Model,

    /// The names of the named symbolic values in the model.
    value_names: BTreeMap<ValueId, String>,

    /// The state's transactions with every symbolic part made concrete.
    transactions: Vec<ConcreteTransaction>,
}

impl TestCase {
    /// Gets the name of the test case.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the state the test case was generated from.
    #[must_use]
    pub fn state(&self) -> StateId {
        self.state
    }

    /// Gets the description of the satisfied condition.
    #[must_use]
    pub fn condition(&self) -> &str {
        &self.condition
    }

    /// Gets the model of the test case.
    #[must_use]
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Gets the name of the value with identifier `id`, if it has one.
    #[must_use]
    pub fn value_name(&self, id: ValueId) -> Option<&str> {
        self.value_names.get(&id).map(String::as_str)
    }

    /// Gets the concrete transactions of the test case, oldest first.
    #[must_use]
    pub fn transactions(&self) -> &[ConcreteTransaction] {
        &self.transactions
    }
}

/// A transaction with every symbolic part replaced by its value in a model.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ConcreteTransaction {
    /// The sender of the transaction.
    pub caller: Address,

    /// The recipient of the transaction.
    pub callee: Address,

    /// The value transferred from the caller to the callee.
    #[serde(with = "word_hex")]
    pub value: U256,

    /// The calldata, with symbolic bytes replaced by their model values.
    #[serde(with = "bytes_hex")]
    pub input: Vec<u8>,

    /// How execution of the transaction ended, if it finished.
    pub status: Option<HaltStatus>,

    /// The data returned by the transaction, if any.
    #[serde(with = "optional_word_hex", default)]
    pub return_data: Option<U256>,
}

impl ConcreteTransaction {
    /// Makes `transaction` concrete under `model`.
    ///
    /// Parts that the model does not determine are zero.
    #[must_use]
    pub fn from_model(transaction: &Transaction, model: &Model) -> Self {
        let evaluate = |term: &Term| term.evaluate(model).unwrap_or(U256::ZERO);
        let input = match transaction.input() {
            Input::Concrete(bytes) => bytes.clone(),
            Input::Symbolic(buffer) => (0..buffer.len_bytes())
                .map(|index| model.byte(buffer, index).unwrap_or(0))
                .collect(),
        };
        let outcome = transaction.outcome();

        Self {
            caller: transaction.caller(),
            callee: transaction.callee(),
            value: evaluate(transaction.value()),
            input,
            status: outcome.map(|o| o.status),
            return_data: outcome.and_then(|o| o.return_data.as_ref()).map(evaluate),
        }
    }
}

mod optional_word_hex {
    use ethnum::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<U256>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(word) => serializer.serialize_some(&format!("{word:#x}")),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<U256>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|text| U256::from_str_hex(&text).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// The generator of test cases, which names them and persists them to a
/// workspace.
#[derive(Debug)]
pub struct TestCaseGenerator {
    workspace: DynWorkspace,
    counters:  Mutex<HashMap<String, usize>>,
}

impl TestCaseGenerator {
    /// Creates a generator that persists into `workspace`.
    #[must_use]
    pub fn new(workspace: DynWorkspace) -> Self {
        let counters = Mutex::new(HashMap::new());
        Self {
            workspace,
            counters,
        }
    }

    /// Gets the workspace the generator persists into.
    #[must_use]
    pub fn workspace(&self) -> &DynWorkspace {
        &self.workspace
    }

    /// Generates a test case demonstrating that `condition` can hold in
    /// `state`.
    ///
    /// The test case is named `{name}_{n:05}`, where `n` counts the test
    /// cases previously generated with the same `name`, and is persisted to
    /// the workspace before being returned.
    ///
    /// Returns `Ok(None)` if `condition` cannot hold in `state`, in which case
    /// nothing is named or written.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the oracle times out while producing the model, in
    /// which case nothing is written, or if the artifact cannot be persisted,
    /// in which case the name is not used up.
    pub fn generate(
        &self,
        state: &ExecutionState,
        condition: &Predicate,
        name: &str,
        oracle: &dyn Oracle,
    ) -> Result<Option<TestCase>> {
        let store = state.constraints().extend(condition.clone());
        match store.is_satisfiable(oracle) {
            Ok(false) => return Ok(None),
            Ok(true) => {}
            Err(solver::Error::Timeout) => {
                tracing::warn!(
                    state = %state.id(),
                    "satisfiability check timed out, attempting to produce a model anyway"
                );
            }
        }

        let mut values = state.values();
        condition.collect_values(&mut values);
        let targets: Vec<_> = values.values().cloned().collect();

        let Some(model) = store.solve_for(oracle, &targets)? else {
            return Ok(None);
        };

        let value_names = targets
            .iter()
            .filter_map(|value| value.name().map(|n| (value.id(), n.to_string())))
            .collect();
        let transactions = state
            .transactions()
            .iter()
            .map(|tx| ConcreteTransaction::from_model(tx, &model))
            .collect();

        // The name is only used up once its artifact has been written.
        let mut counters = self.counters.lock();
        let counter = counters.entry(name.to_string()).or_insert(0);
        let testcase = TestCase {
            name: format!("{name}_{counter:05}"),
            state: state.id(),
            condition: condition.to_string(),
            model,
            value_names,
            transactions,
        };
        self.workspace.persist(&testcase)?;
        *counter += 1;
        drop(counters);

        tracing::debug!(name = testcase.name(), state = %state.id(), "generated test case");

        Ok(Some(testcase))
    }
}

impl Default for TestCaseGenerator {
    fn default() -> Self {
        Self::new(Arc::new(MemoryWorkspace::new()))
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use crate::{
        error::{Error, Result},
        expr::Term,
        oracle::{bounded::BoundedOracle, Oracle, SatResult},
        state::{account::WorldState, ExecutionState, StateId},
        testcase::{
            workspace::{DirectoryWorkspace, MemoryWorkspace, Workspace},
            TestCase,
            TestCaseGenerator,
        },
        value::ValueFactory,
    };

    /// A workspace whose first write fails.
    #[derive(Debug, Default)]
    struct FailsOnce {
        failed: AtomicBool,
        inner:  MemoryWorkspace,
    }

    impl Workspace for FailsOnce {
        fn persist(&self, testcase: &TestCase) -> Result<()> {
            if self.failed.swap(true, Ordering::SeqCst) {
                self.inner.persist(testcase)
            } else {
                Err(Error::workspace("disk full"))
            }
        }

        fn load(&self, name: &str) -> Result<Option<TestCase>> {
            self.inner.load(name)
        }

        fn names(&self) -> Result<Vec<String>> {
            self.inner.names()
        }
    }

    #[test]
    fn unsatisfiable_conditions_have_no_side_effects() -> anyhow::Result<()> {
        let factory = ValueFactory::new();
        let x = Term::symbol(&factory.new_named_scalar(8, "x")?);
        let state = ExecutionState::new(StateId::new(0), WorldState::new())
            .fork(x.ult(&Term::literal(4u32, 8)));
        let workspace = Arc::new(MemoryWorkspace::new());
        let generator = TestCaseGenerator::new(workspace.clone());
        let oracle = BoundedOracle::default();
        let before = state.clone();

        let condition = x.ugt(&Term::literal(10u32, 8));
        assert!(generator.generate(&state, &condition, "big", &oracle)?.is_none());
        assert!(generator.generate(&state, &condition, "big", &oracle)?.is_none());
        assert!(workspace.is_empty());
        assert_eq!(state, before);

        // Names are only consumed by successful generation.
        let possible = x.equals(&Term::literal(3u32, 8));
        let testcase = generator
            .generate(&state, &possible, "big", &oracle)?
            .expect("condition is satisfiable");
        assert_eq!(testcase.name(), "big_00000");
        assert_eq!(workspace.len(), 1);

        Ok(())
    }

    #[test]
    fn models_satisfy_the_condition() -> anyhow::Result<()> {
        let factory = ValueFactory::new();
        let x = Term::symbol(&factory.new_named_scalar(256, "x")?);
        let v = Term::symbol(&factory.new_named_scalar(256, "v")?);
        let state = ExecutionState::new(StateId::new(0), WorldState::new())
            .fork(x.ugt(&Term::word(0u32)));
        let generator = TestCaseGenerator::default();
        let oracle = BoundedOracle::default();

        let condition = x.ugt(&v);
        let testcase = generator
            .generate(&state, &condition, "x_above_v", &oracle)?
            .expect("condition is satisfiable");

        let substituted = condition.substitute(testcase.model());
        assert_eq!(oracle.check_sat(&[substituted]), SatResult::Sat);
        assert!(testcase.model().len() >= 2);
        assert_eq!(testcase.condition(), condition.to_string());

        let second = generator
            .generate(&state, &condition, "x_above_v", &oracle)?
            .expect("condition is satisfiable");
        assert_eq!(second.name(), "x_above_v_00001");

        Ok(())
    }

    #[test]
    fn directory_workspaces_write_one_file_per_test_case() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let workspace = Arc::new(DirectoryWorkspace::create_in(temp.path())?);
        let generator = TestCaseGenerator::new(workspace.clone());
        let factory = ValueFactory::new();
        let x = Term::symbol(&factory.new_named_scalar(256, "x")?);
        let state = ExecutionState::new(StateId::new(5), WorldState::new());

        let testcase = generator
            .generate(&state, &x.equals(&Term::word(7u32)), "seven", &BoundedOracle::default())?
            .expect("condition is satisfiable");

        assert!(workspace.path_for("seven_00000").is_file());
        assert_eq!(workspace.names()?, vec!["seven_00000".to_string()]);
        assert_eq!(workspace.load("seven_00000")?, Some(testcase));
        assert_eq!(workspace.load("missing")?, None);

        Ok(())
    }

    #[test]
    fn failed_writes_do_not_use_up_names() -> anyhow::Result<()> {
        let factory = ValueFactory::new();
        let x = Term::symbol(&factory.new_named_scalar(8, "x")?);
        let state = ExecutionState::new(StateId::new(0), WorldState::new());
        let workspace = Arc::new(FailsOnce::default());
        let generator = TestCaseGenerator::new(workspace.clone());
        let oracle = BoundedOracle::default();
        let condition = x.equals(&Term::literal(9u32, 8));

        assert!(generator.generate(&state, &condition, "retry", &oracle).is_err());
        assert!(workspace.names()?.is_empty());

        let testcase = generator
            .generate(&state, &condition, "retry", &oracle)?
            .expect("condition is satisfiable");
        assert_eq!(testcase.name(), "retry_00000");
        assert_eq!(workspace.names()?, vec!["retry_00000".to_string()]);

        Ok(())
    }
}
