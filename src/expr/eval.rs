//! This module contains the concrete evaluation of terms and predicates under
//! an assignment of values to their symbolic atoms.

use ethnum::U256;

use crate::{
    constant::{BYTE_SIZE_BITS, WORD_SIZE_BYTES},
    expr::{BinaryOp, Predicate, Term, UnaryOp},
    value::{concrete::truncate, SymbolicValue},
};

/// A (possibly partial) assignment of concrete values to symbolic atoms.
pub trait Assignment {
    /// Gets the value assigned to the scalar `value`, if any.
    fn scalar(&self, value: &SymbolicValue) -> Option<U256>;

    /// Gets the value assigned to the byte at `index` of `buffer`, if any.
    fn byte(&self, buffer: &SymbolicValue, index: u32) -> Option<u8>;
}

/// The assignment that assigns nothing, used to fold concrete terms.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Empty;

impl Assignment for Empty {
    fn scalar(&self, _: &SymbolicValue) -> Option<U256> {
        None
    }

    fn byte(&self, _: &SymbolicValue, _: u32) -> Option<u8> {
        None
    }
}

impl Term {
    /// Evaluates the term under `assignment`.
    ///
    /// Returns [`None`] if the term refers to an atom that `assignment` does
    /// not assign.
    #[must_use]
    pub fn evaluate(&self, assignment: &impl Assignment) -> Option<U256> {
        let width = self.width();
        let value = match self {
            Self::Literal { value, .. } => *value,
            Self::Symbol(value) if value.is_buffer() => {
                let len = value.len_bytes().min(WORD_SIZE_BYTES);
                let mut word = U256::ZERO;
                for index in 0..len {
                    let byte = assignment.byte(value, index)?;
                    word = (word << BYTE_SIZE_BITS) | U256::from(byte);
                }
                word
            }
            Self::Symbol(value) => assignment.scalar(value)?,
            Self::Byte { buffer, index } => U256::from(assignment.byte(buffer, *index)?),
            Self::Unary { op, operand } => match op {
                UnaryOp::Not => !operand.evaluate(assignment)?,
            },
            Self::Binary { op, left, right } => {
                let l = left.evaluate(assignment)?;
                let r = right.evaluate(assignment)?;
                apply_binary(*op, l, r, width)
            }
        };

        Some(truncate(value, width))
    }
}

fn apply_binary(op: BinaryOp, left: U256, right: U256, width: u32) -> U256 {
    match op {
        BinaryOp::Add => left.wrapping_add(right),
        BinaryOp::Sub => left.wrapping_sub(right),
        BinaryOp::Mul => left.wrapping_mul(right),
        BinaryOp::Div => left.checked_div(right).unwrap_or(U256::ZERO),
        BinaryOp::Rem => left.checked_rem(right).unwrap_or(U256::ZERO),
        BinaryOp::And => left & right,
        BinaryOp::Or => left | right,
        BinaryOp::Xor => left ^ right,
        BinaryOp::Shl | BinaryOp::Shr => {
            if right >= U256::from(width) {
                U256::ZERO
            } else {
                let shift = right.as_u32();
                if op == BinaryOp::Shl {
                    left << shift
                } else {
                    left >> shift
                }
            }
        }
    }
}

impl Predicate {
    /// Evaluates the predicate under `assignment`.
    ///
    /// Returns [`None`] if the truth of the predicate depends on an atom that
    /// `assignment` does not assign.
    #[must_use]
    pub fn evaluate(&self, assignment: &impl Assignment) -> Option<bool> {
        match self {
            Self::Const(value) => Some(*value),
            Self::Compare { op, left, right } => {
                Some(op.apply(left.evaluate(assignment)?, right.evaluate(assignment)?))
            }
            Self::Not(inner) => inner.evaluate(assignment).map(|value| !value),
            // Short-circuit so that a decided side settles the result even when
            // the other side is unassigned.
            Self::And(left, right) => {
                match (left.evaluate(assignment), right.evaluate(assignment)) {
                    (Some(false), _) | (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                }
            }
            Self::Or(left, right) => {
                match (left.evaluate(assignment), right.evaluate(assignment)) {
                    (Some(true), _) | (_, Some(true)) => Some(true),
                    (Some(false), Some(false)) => Some(false),
                    _ => None,
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use ethnum::U256;

    use crate::{
        expr::{
            eval::{Assignment, Empty},
            Term,
        },
        value::{SymbolicValue, ValueFactory, ValueId},
    };

    #[derive(Default)]
    struct Map {
        scalars: HashMap<ValueId, U256>,
        bytes:   HashMap<(ValueId, u32), u8>,
    }

    impl Assignment for Map {
        fn scalar(&self, value: &SymbolicValue) -> Option<U256> {
            self.scalars.get(&value.id()).copied()
        }

        fn byte(&self, buffer: &SymbolicValue, index: u32) -> Option<u8> {
            self.bytes.get(&(buffer.id(), index)).copied()
        }
    }

    #[test]
    fn evaluates_modular_arithmetic() -> anyhow::Result<()> {
        let factory = ValueFactory::new();
        let x = factory.new_scalar(8)?;
        let mut map = Map::default();
        map.scalars.insert(x.id(), U256::from(200u32));

        let doubled = Term::symbol(&x).add(&Term::symbol(&x));
        assert_eq!(doubled.evaluate(&map), Some(U256::from(144u32)));

        let underflow = Term::literal(0u32, 8).sub(&Term::symbol(&x));
        assert_eq!(underflow.evaluate(&map), Some(U256::from(56u32)));

        Ok(())
    }

    #[test]
    fn reads_buffers_big_endian() -> anyhow::Result<()> {
        let factory = ValueFactory::new();
        let data = factory.new_buffer(2)?;
        let mut map = Map::default();
        map.bytes.insert((data.id(), 0), 0x12);
        map.bytes.insert((data.id(), 1), 0x34);

        assert_eq!(Term::symbol(&data).evaluate(&map), Some(U256::from(0x1234u32)));
        assert_eq!(Term::byte(&data, 1).evaluate(&map), Some(U256::from(0x34u32)));

        Ok(())
    }

    #[test]
    fn unassigned_atoms_leave_results_undecided() -> anyhow::Result<()> {
        let factory = ValueFactory::new();
        let x = Term::symbol(&factory.new_scalar(8)?);
        let positive = x.ugt(&Term::literal(0u32, 8));

        assert_eq!(positive.evaluate(&Empty), None);
        let other = Term::symbol(&factory.new_scalar(8)?);
        let both = positive.and(&Term::literal(1u32, 8).equals(&other));
        assert_eq!(both.evaluate(&Empty), None);
        assert_eq!(positive.or(&crate::expr::Predicate::truth()).evaluate(&Empty), Some(true));

        Ok(())
    }
}
