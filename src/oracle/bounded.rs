//! This module contains a bounded model-search oracle.
//!
//! # How it Works
//!
//! The comparisons of a query are first propagated into a range of possible
//! values for every symbolic atom, which on its own refutes many queries over
//! full-width words. Every atom then gets a finite list of candidate values:
//! the whole of its range for atoms of at most [`Config::exhaustive_width`]
//! bits, and otherwise the ends of its range and the boundary values of its
//! width, together with every literal of the query and its neighbours. A
//! backtracking search then looks for a combination of candidates that
//! satisfies every predicate, checking each predicate as soon as all of its
//! atoms are assigned.
//!
//! # Completeness
//!
//! `Sat` answers are always correct, as they come with a witness. `Unsat`
//! answers are given only when propagation refutes the query, or when every
//! atom was enumerated over its whole range. A search that samples a wider
//! atom and finds nothing has not decided the query, and reports
//! `Timeout` so that callers keep treating it as possibly satisfiable. A
//! real SMT backend should be plugged in through [`Oracle`] to decide more.

use std::{
    collections::{BTreeSet, HashMap},
    time::{Duration, Instant},
};

use ethnum::U256;

use crate::{
    constant::{
        DEFAULT_SOLVER_ASSIGNMENT_LIMIT,
        DEFAULT_SOLVER_CANDIDATES_PER_VALUE,
        DEFAULT_SOLVER_EXHAUSTIVE_WIDTH_BITS,
        DEFAULT_SOLVER_TIMEOUT_MILLIS,
    },
    expr::{eval::Assignment, Atom, Predicate},
    oracle::{interval::Intervals, Model, ModelResult, Oracle, SatResult},
    value::{
        concrete::{mask, truncate, Concrete},
        SymbolicValue,
    },
};

/// The configuration for the bounded oracle.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// The maximum wall-clock time spent on a single query.
    ///
    /// Defaults to [`DEFAULT_SOLVER_TIMEOUT_MILLIS`].
    pub timeout: Duration,

    /// The maximum number of partial assignments explored for a single query.
    ///
    /// Defaults to [`DEFAULT_SOLVER_ASSIGNMENT_LIMIT`].
    pub assignment_limit: usize,

    /// The maximum number of candidates considered for each non-exhaustive
    /// atom.
    ///
    /// Defaults to [`DEFAULT_SOLVER_CANDIDATES_PER_VALUE`].
    pub candidates_per_value: usize,

    /// Atoms no wider than this are enumerated over their whole domain.
    ///
    /// Defaults to [`DEFAULT_SOLVER_EXHAUSTIVE_WIDTH_BITS`].
    pub exhaustive_width: u32,
}

impl Config {
    /// Sets the `timeout` config parameter to `value`.
    #[must_use]
    pub fn with_timeout(mut self, value: Duration) -> Self {
        self.timeout = value;
        self
    }

    /// Sets the `assignment_limit` config parameter to `value`.
    #[must_use]
    pub fn with_assignment_limit(mut self, value: usize) -> Self {
        self.assignment_limit = value;
        self
    }

    /// Sets the `candidates_per_value` config parameter to `value`.
    #[must_use]
    pub fn with_candidates_per_value(mut self, value: usize) -> Self {
        self.candidates_per_value = value;
        self
    }

    /// Sets the `exhaustive_width` config parameter to `value`.
    #[must_use]
    pub fn with_exhaustive_width(mut self, value: u32) -> Self {
        self.exhaustive_width = value;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        let timeout = Duration::from_millis(DEFAULT_SOLVER_TIMEOUT_MILLIS);
        let assignment_limit = DEFAULT_SOLVER_ASSIGNMENT_LIMIT;
        let candidates_per_value = DEFAULT_SOLVER_CANDIDATES_PER_VALUE;
        let exhaustive_width = DEFAULT_SOLVER_EXHAUSTIVE_WIDTH_BITS;
        Self {
            timeout,
            assignment_limit,
            candidates_per_value,
            exhaustive_width,
        }
    }
}

/// The bounded model-search oracle.
#[derive(Clone, Debug, Default)]
pub struct BoundedOracle {
    config: Config,
}

impl BoundedOracle {
    /// Constructs a new oracle with the provided `config`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Gets the configuration of the oracle.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Searches for an assignment satisfying every one of `predicates`.
    fn search(&self, predicates: &[Predicate]) -> Search {
        let Some(intervals) = Intervals::propagate(predicates) else {
            return Search::Refuted;
        };

        let mut atoms = BTreeSet::new();
        let mut literals = BTreeSet::new();
        for predicate in predicates {
            predicate.collect_atoms(&mut atoms);
            predicate.collect_literals(&mut literals);
        }
        let atoms: Vec<Atom> = atoms.into_iter().collect();
        let positions: HashMap<&Atom, usize> =
            atoms.iter().enumerate().map(|(i, atom)| (atom, i)).collect();

        // Each predicate is checked at the depth of the last atom it uses, so
        // that it is fully assigned when it is evaluated.
        let mut checks: Vec<Vec<&Predicate>> = vec![Vec::new(); atoms.len()];
        for predicate in predicates {
            let mut used = BTreeSet::new();
            predicate.collect_atoms(&mut used);
            match used.iter().filter_map(|atom| positions.get(atom)).max() {
                Some(depth) => checks[*depth].push(predicate),
                None => {
                    if predicate.evaluate(&Partial::default()) != Some(true) {
                        return Search::Refuted;
                    }
                }
            }
        }

        let candidates: Vec<Vec<U256>> = atoms
            .iter()
            .map(|atom| self.candidates_for(atom, &intervals, &literals))
            .collect();
        let exhaustive = atoms
            .iter()
            .all(|atom| atom.width() <= self.config.exhaustive_width);

        let mut searcher = Searcher {
            atoms: &atoms,
            candidates: &candidates,
            checks: &checks,
            partial: Partial::default(),
            explored: 0,
            limit: self.config.assignment_limit,
            deadline: Instant::now() + self.config.timeout,
        };

        match searcher.descend(0) {
            Step::Found => Search::Found(searcher.partial),
            Step::Exhausted if exhaustive => Search::Refuted,
            Step::Exhausted => {
                tracing::debug!(
                    atoms = atoms.len(),
                    explored = searcher.explored,
                    "bounded oracle found no model among sampled candidates"
                );
                Search::Undecided
            }
            Step::OutOfBudget => {
                tracing::debug!(
                    atoms = atoms.len(),
                    explored = searcher.explored,
                    "bounded oracle ran out of budget"
                );
                Search::Undecided
            }
        }
    }

    /// Computes the candidate values for `atom`, all of which lie within its
    /// propagated range.
    fn candidates_for(
        &self,
        atom: &Atom,
        intervals: &Intervals,
        literals: &BTreeSet<U256>,
    ) -> Vec<U256> {
        let width = atom.width();
        let (low, high) = intervals.bounds(atom);
        if width <= self.config.exhaustive_width {
            return (low.as_u32()..=high.as_u32()).map(U256::from).collect();
        }

        let max = mask(width);
        let mut ordered = vec![low, high];
        for literal in literals {
            let literal = truncate(*literal, width);
            ordered.push(literal);
            ordered.push(truncate(literal.wrapping_add(U256::ONE), width));
            ordered.push(truncate(literal.wrapping_sub(U256::ONE), width));
        }
        ordered.extend([
            U256::ZERO,
            U256::ONE,
            U256::from(2u32),
            max,
            max - U256::ONE,
            max >> 1u32,
        ]);

        let mut seen = BTreeSet::new();
        let mut chosen: Vec<U256> = ordered
            .into_iter()
            .filter(|value| (low..=high).contains(value) && seen.insert(*value))
            .take(self.config.candidates_per_value.max(1))
            .collect();
        chosen.sort();
        chosen
    }
}

impl Oracle for BoundedOracle {
    fn check_sat(&self, predicates: &[Predicate]) -> SatResult {
        match self.search(predicates) {
            Search::Found(_) => SatResult::Sat,
            Search::Refuted => SatResult::Unsat,
            Search::Undecided => SatResult::Timeout,
        }
    }

    fn model(&self, predicates: &[Predicate], targets: &[SymbolicValue]) -> ModelResult {
        match self.search(predicates) {
            Search::Found(partial) => ModelResult::Model(partial.into_model(targets)),
            Search::Refuted => ModelResult::Unsat,
            Search::Undecided => ModelResult::Timeout,
        }
    }
}

/// The outcome of a complete search.
enum Search {
    /// A witness satisfying every predicate.
    Found(Partial),

    /// The predicates are proven unsatisfiable.
    Refuted,

    /// Neither a witness nor a proof was found.
    Undecided,
}

/// The outcome of searching a subtree.
enum Step {
    Found,
    Exhausted,
    OutOfBudget,
}

/// The state of a backtracking search.
struct Searcher<'a> {
    atoms:      &'a [Atom],
    candidates: &'a [Vec<U256>],
    checks:     &'a [Vec<&'a Predicate>],
    partial:    Partial,
    explored:   usize,
    limit:      usize,
    deadline:   Instant,
}

impl Searcher<'_> {
    fn descend(&mut self, depth: usize) -> Step {
        if depth == self.atoms.len() {
            return Step::Found;
        }

        let atom = &self.atoms[depth];
        for candidate in &self.candidates[depth] {
            self.explored += 1;
            if self.explored > self.limit
                || (self.explored % 1024 == 0 && Instant::now() > self.deadline)
            {
                return Step::OutOfBudget;
            }

            self.partial.values.insert(atom.clone(), *candidate);
            let consistent = self.checks[depth]
                .iter()
                .all(|predicate| predicate.evaluate(&self.partial) == Some(true));
            if consistent {
                match self.descend(depth + 1) {
                    Step::Exhausted => {}
                    other => return other,
                }
            }
        }

        self.partial.values.remove(atom);
        Step::Exhausted
    }
}

/// A partial assignment of candidate values to atoms.
#[derive(Debug, Default)]
struct Partial {
    values: HashMap<Atom, U256>,
}

impl Partial {
    /// Converts the assignment into a model covering every value it assigns
    /// as well as every one of `targets`.
    fn into_model(self, targets: &[SymbolicValue]) -> Model {
        let mut scalars = HashMap::new();
        let mut buffers: HashMap<_, Vec<(u32, u8)>> = HashMap::new();
        for (atom, value) in self.values {
            match atom {
                Atom::Scalar { id, .. } => {
                    scalars.insert(id, value);
                }
                Atom::Byte { id, index } => {
                    buffers
                        .entry(id)
                        .or_default()
                        .push((index, value.as_u8()));
                }
            }
        }

        let mut model = Model::new();
        for target in targets {
            let id = target.id();
            let concrete = if target.is_buffer() {
                let mut bytes = vec![0u8; target.len_bytes() as usize];
                for (index, byte) in buffers.remove(&id).unwrap_or_default() {
                    if let Some(slot) = bytes.get_mut(index as usize) {
                        *slot = byte;
                    }
                }
                Concrete::Buffer(bytes)
            } else {
                Concrete::Scalar(scalars.remove(&id).unwrap_or(U256::ZERO))
            };
            model.insert(id, concrete);
        }

        // Values that constrain the targets but were not asked for are still
        // part of the witness.
        for (id, value) in scalars {
            model.insert(id, Concrete::Scalar(value));
        }
        for (id, assigned) in buffers {
            let len = assigned.iter().map(|(index, _)| *index as usize + 1).max().unwrap_or(0);
            let mut bytes = vec![0u8; len];
            for (index, byte) in assigned {
                bytes[index as usize] = byte;
            }
            model.insert(id, Concrete::Buffer(bytes));
        }

        model
    }
}

impl Assignment for Partial {
    fn scalar(&self, value: &SymbolicValue) -> Option<U256> {
        let id = value.id();
        let width = value.width();
        self.values.get(&Atom::Scalar { id, width }).copied()
    }

    fn byte(&self, buffer: &SymbolicValue, index: u32) -> Option<u8> {
        let id = buffer.id();
        self.values
            .get(&Atom::Byte { id, index })
            .map(|value| value.as_u8())
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use ethnum::U256;

    use crate::{
        expr::{Predicate, Term},
        oracle::{
            bounded::{BoundedOracle, Config},
            ModelResult,
            Oracle,
            SatResult,
        },
        value::ValueFactory,
    };

    #[test]
    fn decides_comparisons_over_words() -> anyhow::Result<()> {
        let factory = ValueFactory::new();
        let x = Term::symbol(&factory.new_named_scalar(256, "x")?);
        let v = Term::symbol(&factory.new_named_scalar(256, "v")?);
        let oracle = BoundedOracle::default();

        let positive = x.ugt(&Term::word(0u32));
        assert_eq!(oracle.check_sat(&[positive.clone(), x.ugt(&v)]), SatResult::Sat);
        assert_eq!(oracle.check_sat(&[positive.clone(), x.ule(&v)]), SatResult::Sat);

        let pinned = v.equals(&Term::word(U256::MAX));
        assert_eq!(oracle.check_sat(&[positive, x.ugt(&v), pinned]), SatResult::Unsat);

        Ok(())
    }

    #[test]
    fn produces_models_that_satisfy_the_query() -> anyhow::Result<()> {
        let factory = ValueFactory::new();
        let x_value = factory.new_named_scalar(256, "x")?;
        let x = Term::symbol(&x_value);
        let query = [
            x.ugt(&Term::word(1000u32)),
            x.ult(&Term::word(1002u32)),
        ];

        let ModelResult::Model(model) = BoundedOracle::default().model(&query, &[x_value.clone()])
        else {
            panic!("Expected a model");
        };

        assert_eq!(model.scalar_of(x_value.id()), Some(U256::from(1001u32)));
        assert_eq!(Predicate::all(&query).evaluate(&model), Some(true));

        Ok(())
    }

    #[test]
    fn enumerates_bytes_exhaustively() -> anyhow::Result<()> {
        let factory = ValueFactory::new();
        let data = factory.new_buffer(4)?;
        let oracle = BoundedOracle::default();
        let first = Term::byte(&data, 0);

        let query = [first.mul(&Term::literal(3u32, 8)).equals(&Term::literal(7u32, 8))];
        let ModelResult::Model(model) = oracle.model(&query, &[data.clone()]) else {
            panic!("Expected a model");
        };
        assert_eq!(Predicate::all(&query).evaluate(&model), Some(true));
        assert_eq!(model.get(data.id()).and_then(|c| c.as_bytes()).map(<[u8]>::len), Some(4));

        let impossible = [
            first.ugt(&Term::literal(10u32, 8)),
            first.ult(&Term::literal(11u32, 8)),
        ];
        assert_eq!(oracle.check_sat(&impossible), SatResult::Unsat);

        Ok(())
    }

    #[test]
    fn leaves_misses_over_sampled_words_undecided() -> anyhow::Result<()> {
        let factory = ValueFactory::new();
        let x_value = factory.new_named_scalar(256, "x")?;
        let x = Term::symbol(&x_value);
        let oracle = BoundedOracle::default();

        // Three is invertible modulo 2^256, so this has a solution that no
        // sampled candidate hits.
        let tripled = [x.mul(&Term::word(3u32)).equals(&Term::word(7u32))];
        assert_eq!(oracle.check_sat(&tripled), SatResult::Timeout);
        assert_eq!(oracle.model(&tripled, &[x_value]), ModelResult::Timeout);

        // The same miss over an exhaustively searched byte is a proof.
        let data = factory.new_buffer(1)?;
        let doubled = [Term::byte(&data, 0)
            .mul(&Term::literal(2u32, 8))
            .equals(&Term::literal(7u32, 8))];
        assert_eq!(oracle.check_sat(&doubled), SatResult::Unsat);

        Ok(())
    }

    #[test]
    fn reports_timeouts_when_out_of_budget() -> anyhow::Result<()> {
        let factory = ValueFactory::new();
        let data = factory.new_buffer(4)?;
        let config = Config::default()
            .with_assignment_limit(100)
            .with_timeout(Duration::from_secs(1));
        let oracle = BoundedOracle::new(config);

        // Requires all four bytes to be 0xff, which is the last candidate.
        let query = [Term::symbol(&data).equals(&Term::literal(u32::MAX, 32))];
        assert_eq!(oracle.check_sat(&query), SatResult::Timeout);

        Ok(())
    }

    #[test]
    fn constant_queries_need_no_search() {
        let oracle = BoundedOracle::default();

        assert_eq!(oracle.check_sat(&[]), SatResult::Sat);
        assert_eq!(oracle.check_sat(&[Predicate::falsity()]), SatResult::Unsat);
    }
}
