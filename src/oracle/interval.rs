//! This module contains interval propagation over the comparisons of a query.
//!
//! Each atom compared against a literal or another atom gets a closed range of
//! the values it may take, and the comparisons narrow these ranges until they
//! stop changing. An empty range proves that the query is unsatisfiable no
//! matter how wide its atoms are, which the bounded search alone cannot do.
//!
//! Predicates that are not comparisons of atoms and literals are ignored.
//! Ignoring a predicate only ever widens the ranges, so a refutation is always
//! sound, while a surviving set of ranges says nothing about satisfiability.

use std::collections::HashMap;

use ethnum::U256;

use crate::{
    expr::{Atom, CompareOp, Predicate, Term},
    value::concrete::mask,
};

/// The number of propagation rounds after which the ranges are used as they
/// are, even if they are still shrinking.
const MAX_ROUNDS: usize = 64;

/// A closed range of unsigned values, which is empty when `low > high`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Range {
    low:  U256,
    high: U256,
}

impl Range {
    const EMPTY: Self = Self {
        low:  U256::ONE,
        high: U256::ZERO,
    };

    fn full(width: u32) -> Self {
        Self {
            low:  U256::ZERO,
            high: mask(width),
        }
    }

    fn exactly(value: U256) -> Self {
        Self {
            low:  value,
            high: value,
        }
    }

    fn is_empty(self) -> bool {
        self.low > self.high
    }

    /// Keeps the values `v` of `self` for which `v op w` holds for at least
    /// one `w` in `other`.
    fn narrow(self, op: CompareOp, other: Range) -> Range {
        if self.is_empty() || other.is_empty() {
            return Self::EMPTY;
        }

        let Self { low, high } = self;
        match op {
            CompareOp::Eq => Self {
                low:  low.max(other.low),
                high: high.min(other.high),
            },
            CompareOp::Ne if other.low == other.high => {
                let excluded = other.low;
                if low == excluded {
                    excluded.checked_add(U256::ONE).map_or(Self::EMPTY, |low| Self { low, high })
                } else if high == excluded {
                    excluded.checked_sub(U256::ONE).map_or(Self::EMPTY, |high| Self { low, high })
                } else {
                    self
                }
            }
            CompareOp::Ne => self,
            CompareOp::Ult => other.high.checked_sub(U256::ONE).map_or(Self::EMPTY, |bound| Self {
                low,
                high: high.min(bound),
            }),
            CompareOp::Ule => Self {
                low,
                high: high.min(other.high),
            },
            CompareOp::Ugt => other.low.checked_add(U256::ONE).map_or(Self::EMPTY, |bound| Self {
                low: low.max(bound),
                high,
            }),
            CompareOp::Uge => Self {
                low: low.max(other.low),
                high,
            },
        }
    }
}

/// One side of a comparison that propagation understands.
#[derive(Clone, Debug, Eq, PartialEq)]
enum Operand {
    Atom(Atom),
    Literal(U256),
}

impl Operand {
    fn of(term: &Term) -> Option<Self> {
        match term {
            Term::Literal { value, .. } => Some(Self::Literal(*value)),
            Term::Symbol(value) if !value.is_buffer() => Some(Self::Atom(Atom::Scalar {
                id:    value.id(),
                width: value.width(),
            })),
            Term::Byte { buffer, index } => Some(Self::Atom(Atom::Byte {
                id:    buffer.id(),
                index: *index,
            })),
            _ => None,
        }
    }
}

/// A comparison with an atom on its left.
#[derive(Clone, Debug)]
struct Comparison {
    left:  Atom,
    op:    CompareOp,
    right: Operand,
}

/// Gets the comparison that holds when the operands of `op` are swapped.
fn swapped(op: CompareOp) -> CompareOp {
    match op {
        CompareOp::Eq => CompareOp::Eq,
        CompareOp::Ne => CompareOp::Ne,
        CompareOp::Ult => CompareOp::Ugt,
        CompareOp::Ule => CompareOp::Uge,
        CompareOp::Ugt => CompareOp::Ult,
        CompareOp::Uge => CompareOp::Ule,
    }
}

fn collect_comparisons(predicate: &Predicate, comparisons: &mut Vec<Comparison>) {
    match predicate {
        Predicate::Compare { op, left, right } => match (Operand::of(left), Operand::of(right)) {
            (Some(Operand::Atom(left)), Some(right)) => comparisons.push(Comparison {
                left,
                op: *op,
                right,
            }),
            (Some(Operand::Literal(literal)), Some(Operand::Atom(right))) => {
                comparisons.push(Comparison {
                    left:  right,
                    op:    swapped(*op),
                    right: Operand::Literal(literal),
                });
            }
            _ => {}
        },
        Predicate::And(left, right) => {
            collect_comparisons(left, comparisons);
            collect_comparisons(right, comparisons);
        }
        Predicate::Const(_) | Predicate::Not(_) | Predicate::Or(..) => {}
    }
}

/// The ranges of the atoms of a query that survived propagation.
#[derive(Clone, Debug, Default)]
pub struct Intervals {
    ranges: HashMap<Atom, Range>,
}

impl Intervals {
    /// Propagates the comparisons in `predicates` to a fixed point.
    ///
    /// Returns [`None`] if the comparisons contradict each other, in which
    /// case `predicates` are unsatisfiable.
    #[must_use]
    pub fn propagate(predicates: &[Predicate]) -> Option<Self> {
        let mut comparisons = Vec::new();
        for predicate in predicates {
            collect_comparisons(predicate, &mut comparisons);
        }

        let mut intervals = Self::default();
        for _ in 0..MAX_ROUNDS {
            let mut changed = false;
            for Comparison { left, op, right } in &comparisons {
                let left_range = intervals.range(left);
                let right_range = match right {
                    Operand::Literal(value) => Range::exactly(*value),
                    Operand::Atom(atom) if atom == left => {
                        // An atom compared with itself is decided outright.
                        if op.apply(U256::ZERO, U256::ZERO) {
                            continue;
                        }
                        return None;
                    }
                    Operand::Atom(atom) => intervals.range(atom),
                };

                let narrowed = left_range.narrow(*op, right_range);
                changed |= intervals.update(left, narrowed)?;
                if let Operand::Atom(atom) = right {
                    let narrowed = right_range.narrow(swapped(*op), narrowed);
                    changed |= intervals.update(atom, narrowed)?;
                }
            }

            if !changed {
                break;
            }
        }

        Some(intervals)
    }

    /// Gets the smallest and largest value that `atom` may take.
    #[must_use]
    pub fn bounds(&self, atom: &Atom) -> (U256, U256) {
        let Range { low, high } = self.range(atom);
        (low, high)
    }

    fn range(&self, atom: &Atom) -> Range {
        self.ranges
            .get(atom)
            .copied()
            .unwrap_or_else(|| Range::full(atom.width()))
    }

    /// Records `range` for `atom`, returning whether it changed, or [`None`]
    /// if it is empty.
    fn update(&mut self, atom: &Atom, range: Range) -> Option<bool> {
        if range.is_empty() {
            return None;
        }
        let changed = self.range(atom) != range;
        if changed {
            self.ranges.insert(atom.clone(), range);
        }
        Some(changed)
    }
}

#[cfg(test)]
mod test {
    use ethnum::U256;

    use crate::{
        expr::{Atom, Term},
        oracle::interval::Intervals,
        value::ValueFactory,
    };

    #[test]
    fn refutes_contradictory_chains_of_wide_values() -> anyhow::Result<()> {
        let factory = ValueFactory::new();
        let x = Term::symbol(&factory.new_scalar(256)?);
        let y = Term::symbol(&factory.new_scalar(256)?);
        let z = Term::symbol(&factory.new_scalar(256)?);

        let chain = [
            x.ult(&y),
            y.ult(&z),
            z.ult(&Term::word(3u32)),
            x.uge(&Term::word(1u32)),
        ];
        assert!(Intervals::propagate(&chain).is_none());

        let pinned = [
            x.ugt(&y),
            y.equals(&Term::word(U256::MAX)),
        ];
        assert!(Intervals::propagate(&pinned).is_none());

        Ok(())
    }

    #[test]
    fn narrows_satisfiable_ranges() -> anyhow::Result<()> {
        let factory = ValueFactory::new();
        let value = factory.new_scalar(256)?;
        let x = Term::symbol(&value);
        let atom = Atom::Scalar {
            id:    value.id(),
            width: 256,
        };

        let query = [
            Term::word(10u32).ult(&x),
            x.ule(&Term::word(20u32)),
            x.not_equals(&Term::word(11u32)),
        ];
        let intervals = Intervals::propagate(&query).expect("query is satisfiable");
        assert_eq!(intervals.bounds(&atom), (U256::from(12u32), U256::from(20u32)));

        Ok(())
    }

    #[test]
    fn ignores_what_it_does_not_understand() -> anyhow::Result<()> {
        let factory = ValueFactory::new();
        let x = Term::symbol(&factory.new_scalar(256)?);

        let tripled = [x.mul(&Term::word(3u32)).equals(&Term::word(7u32))];
        assert!(Intervals::propagate(&tripled).is_some());

        let either = [x.ult(&Term::word(1u32)).or(&x.ugt(&Term::word(5u32)))];
        assert!(Intervals::propagate(&either).is_some());

        Ok(())
    }
}
