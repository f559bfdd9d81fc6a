//! This module contains the expression language in which path constraints are
//! written.
//!
//! A [`Term`] is a bit-vector expression over [`SymbolicValue`]s and literals,
//! and a [`Predicate`] is a boolean tree over comparisons of terms. Both are
//! immutable and cheap to clone, as their children are shared behind [`Arc`]s.
//!
//! # Semantics
//!
//! All arithmetic is unsigned and modular. The width of a binary operation is
//! the width of its wider operand, and its result is truncated to that width.
//! Division and remainder by zero produce zero, and shifting by at least the
//! width of the shifted value produces zero, matching the EVM.

pub mod eval;

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{Display, Formatter},
    sync::Arc,
};

use ethnum::U256;
use itertools::Itertools;

use crate::{
    constant::{BYTE_SIZE_BITS, WORD_SIZE_BITS, WORD_SIZE_BYTES},
    value::{concrete::truncate, SymbolicValue, ValueId},
};

/// Operations on a single bit-vector operand.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum UnaryOp {
    /// Bitwise negation.
    Not,
}

/// Operations on two bit-vector operands.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::And => "&",
            Self::Or => "|",
            Self::Xor => "^",
            Self::Shl => "<<",
            Self::Shr => ">>",
        }
    }
}

/// Unsigned comparisons between two terms.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CompareOp {
    Eq,
    Ne,
    Ult,
    Ule,
    Ugt,
    Uge,
}

impl CompareOp {
    fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Ult => "<",
            Self::Ule => "<=",
            Self::Ugt => ">",
            Self::Uge => ">=",
        }
    }

    /// Gets the comparison that holds exactly when `self` does not.
    #[must_use]
    pub fn negated(self) -> Self {
        match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Ult => Self::Uge,
            Self::Ule => Self::Ugt,
            Self::Ugt => Self::Ule,
            Self::Uge => Self::Ult,
        }
    }

    /// Applies the comparison to two concrete values.
    #[must_use]
    pub fn apply(self, left: U256, right: U256) -> bool {
        match self {
            Self::Eq => left == right,
            Self::Ne => left != right,
            Self::Ult => left < right,
            Self::Ule => left <= right,
            Self::Ugt => left > right,
            Self::Uge => left >= right,
        }
    }
}

/// A symbolic atom is the smallest unit of a symbolic value that a term can
/// refer to: either a whole scalar, or a single byte of a buffer.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Atom {
    /// A whole scalar value of the given width.
    Scalar { id: ValueId, width: u32 },

    /// One byte of a buffer value.
    Byte { id: ValueId, index: u32 },
}

impl Atom {
    /// Gets the identifier of the value that the atom belongs to.
    #[must_use]
    pub fn id(&self) -> ValueId {
        match self {
            Self::Scalar { id, .. } | Self::Byte { id, .. } => *id,
        }
    }

    /// Gets the width of the atom in bits.
    #[must_use]
    pub fn width(&self) -> u32 {
        match self {
            Self::Scalar { width, .. } => *width,
            Self::Byte { .. } => BYTE_SIZE_BITS,
        }
    }
}

/// A bit-vector expression.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Term {
    /// A concrete value of the given width.
    Literal { value: U256, width: u32 },

    /// A symbolic value.
    ///
    /// Buffers used directly as terms are read as a big-endian number made of
    /// their first (at most) 32 bytes.
    Symbol(SymbolicValue),

    /// The byte at a concrete `index` of a symbolic buffer.
    Byte { buffer: SymbolicValue, index: u32 },

    /// A unary operation.
    Unary { op: UnaryOp, operand: Arc<Term> },

    /// A binary operation.
    Binary {
        op:    BinaryOp,
        left:  Arc<Term>,
        right: Arc<Term>,
    },
}

impl Term {
    /// Constructs a literal of `width` bits, truncating `value` to fit.
    ///
    /// The width is clamped to the range of valid widths.
    #[must_use]
    pub fn literal(value: impl Into<U256>, width: u32) -> Self {
        let width = width.clamp(1, WORD_SIZE_BITS);
        let value = truncate(value.into(), width);
        Self::Literal { value, width }
    }

    /// Constructs a full-width word literal.
    #[must_use]
    pub fn word(value: impl Into<U256>) -> Self {
        Self::literal(value, WORD_SIZE_BITS)
    }

    /// Constructs a term referring to the symbolic `value`.
    #[must_use]
    pub fn symbol(value: &SymbolicValue) -> Self {
        Self::Symbol(value.clone())
    }

    /// Constructs a term reading the byte at `index` from `buffer`.
    #[must_use]
    pub fn byte(buffer: &SymbolicValue, index: u32) -> Self {
        let buffer = buffer.clone();
        Self::Byte { buffer, index }
    }

    /// Gets the width of the term in bits.
    #[must_use]
    pub fn width(&self) -> u32 {
        match self {
            Self::Literal { width, .. } => *width,
            Self::Symbol(value) => value.width().min(WORD_SIZE_BITS),
            Self::Byte { .. } => BYTE_SIZE_BITS,
            Self::Unary { operand, .. } => operand.width(),
            Self::Binary { op, left, right } => match op {
                BinaryOp::Shl | BinaryOp::Shr => left.width(),
                _ => left.width().max(right.width()),
            },
        }
    }

    /// Gets the concrete value of the term if it is a literal.
    #[must_use]
    pub fn as_literal(&self) -> Option<U256> {
        match self {
            Self::Literal { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Checks if the term contains no symbolic values.
    #[must_use]
    pub fn is_concrete(&self) -> bool {
        match self {
            Self::Literal { .. } => true,
            Self::Symbol(_) | Self::Byte { .. } => false,
            Self::Unary { operand, .. } => operand.is_concrete(),
            Self::Binary { left, right, .. } => left.is_concrete() && right.is_concrete(),
        }
    }

    fn binary(&self, op: BinaryOp, other: &Term) -> Term {
        // Adding or subtracting a zero no wider than the other operand is the
        // identity.
        let is_zero = |term: &Term| term.as_literal() == Some(U256::ZERO);
        if matches!(op, BinaryOp::Add | BinaryOp::Sub)
            && is_zero(other)
            && self.width() >= other.width()
        {
            return self.clone();
        }
        if op == BinaryOp::Add && is_zero(self) && other.width() >= self.width() {
            return other.clone();
        }

        let combined = Term::Binary {
            op,
            left: Arc::new(self.clone()),
            right: Arc::new(other.clone()),
        };

        // Fold concrete sub-trees eagerly so that literals stay literals.
        if combined.is_concrete() {
            if let Some(value) = combined.evaluate(&eval::Empty) {
                return Term::literal(value, combined.width());
            }
        }

        combined
    }

    /// Modular addition.
    #[must_use]
    pub fn add(&self, other: &Term) -> Term {
        self.binary(BinaryOp::Add, other)
    }

    /// Modular subtraction.
    #[must_use]
    pub fn sub(&self, other: &Term) -> Term {
        self.binary(BinaryOp::Sub, other)
    }

    /// Modular multiplication.
    #[must_use]
    pub fn mul(&self, other: &Term) -> Term {
        self.binary(BinaryOp::Mul, other)
    }

    /// Unsigned division, producing zero on division by zero.
    #[must_use]
    pub fn div(&self, other: &Term) -> Term {
        self.binary(BinaryOp::Div, other)
    }

    /// Unsigned remainder, producing zero on division by zero.
    #[must_use]
    pub fn rem(&self, other: &Term) -> Term {
        self.binary(BinaryOp::Rem, other)
    }

    /// Bitwise conjunction.
    #[must_use]
    pub fn and(&self, other: &Term) -> Term {
        self.binary(BinaryOp::And, other)
    }

    /// Bitwise disjunction.
    #[must_use]
    pub fn or(&self, other: &Term) -> Term {
        self.binary(BinaryOp::Or, other)
    }

    /// Bitwise exclusive disjunction.
    #[must_use]
    pub fn xor(&self, other: &Term) -> Term {
        self.binary(BinaryOp::Xor, other)
    }

    /// Shifts `self` left by `shift` bits.
    #[must_use]
    pub fn shl(&self, shift: &Term) -> Term {
        self.binary(BinaryOp::Shl, shift)
    }

    /// Shifts `self` right by `shift` bits.
    #[must_use]
    pub fn shr(&self, shift: &Term) -> Term {
        self.binary(BinaryOp::Shr, shift)
    }

    /// Bitwise negation.
    #[must_use]
    pub fn not(&self) -> Term {
        match self {
            Self::Literal { value, width } => Term::literal(!*value, *width),
            _ => Term::Unary {
                op:      UnaryOp::Not,
                operand: Arc::new(self.clone()),
            },
        }
    }

    fn compare(&self, op: CompareOp, other: &Term) -> Predicate {
        match (self.as_literal(), other.as_literal()) {
            (Some(left), Some(right)) => Predicate::Const(op.apply(left, right)),
            // A term always equals itself, whatever its symbolic values are.
            _ if self == other => Predicate::Const(op.apply(U256::ZERO, U256::ZERO)),
            _ => Predicate::Compare {
                op,
                left: self.clone(),
                right: other.clone(),
            },
        }
    }

    /// `self == other`
    #[must_use]
    pub fn equals(&self, other: &Term) -> Predicate {
        self.compare(CompareOp::Eq, other)
    }

    /// `self != other`
    #[must_use]
    pub fn not_equals(&self, other: &Term) -> Predicate {
        self.compare(CompareOp::Ne, other)
    }

    /// Unsigned `self < other`
    #[must_use]
    pub fn ult(&self, other: &Term) -> Predicate {
        self.compare(CompareOp::Ult, other)
    }

    /// Unsigned `self <= other`
    #[must_use]
    pub fn ule(&self, other: &Term) -> Predicate {
        self.compare(CompareOp::Ule, other)
    }

    /// Unsigned `self > other`
    #[must_use]
    pub fn ugt(&self, other: &Term) -> Predicate {
        self.compare(CompareOp::Ugt, other)
    }

    /// Unsigned `self >= other`
    #[must_use]
    pub fn uge(&self, other: &Term) -> Predicate {
        self.compare(CompareOp::Uge, other)
    }

    /// Collects the symbolic values referenced by the term into `values`.
    pub fn collect_values(&self, values: &mut BTreeMap<ValueId, SymbolicValue>) {
        match self {
            Self::Literal { .. } => {}
            Self::Symbol(value) | Self::Byte { buffer: value, .. } => {
                values.entry(value.id()).or_insert_with(|| value.clone());
            }
            Self::Unary { operand, .. } => operand.collect_values(values),
            Self::Binary { left, right, .. } => {
                left.collect_values(values);
                right.collect_values(values);
            }
        }
    }

    /// Collects the symbolic atoms referenced by the term into `atoms`.
    pub fn collect_atoms(&self, atoms: &mut BTreeSet<Atom>) {
        match self {
            Self::Literal { .. } => {}
            Self::Symbol(value) if value.is_buffer() => {
                let id = value.id();
                for index in 0..value.len_bytes().min(WORD_SIZE_BYTES) {
                    atoms.insert(Atom::Byte { id, index });
                }
            }
            Self::Symbol(value) => {
                let id = value.id();
                let width = value.width();
                atoms.insert(Atom::Scalar { id, width });
            }
            Self::Byte { buffer, index } => {
                let id = buffer.id();
                let index = *index;
                atoms.insert(Atom::Byte { id, index });
            }
            Self::Unary { operand, .. } => operand.collect_atoms(atoms),
            Self::Binary { left, right, .. } => {
                left.collect_atoms(atoms);
                right.collect_atoms(atoms);
            }
        }
    }

    /// Collects the literals that appear in the term into `literals`.
    pub fn collect_literals(&self, literals: &mut BTreeSet<U256>) {
        match self {
            Self::Literal { value, .. } => {
                literals.insert(*value);
            }
            Self::Symbol(_) | Self::Byte { .. } => {}
            Self::Unary { operand, .. } => operand.collect_literals(literals),
            Self::Binary { left, right, .. } => {
                left.collect_literals(literals);
                right.collect_literals(literals);
            }
        }
    }

    /// Replaces every symbolic value that `assignment` knows about with its
    /// concrete value, folding the result where possible.
    #[must_use]
    pub fn substitute(&self, assignment: &impl eval::Assignment) -> Term {
        match self {
            Self::Literal { .. } => self.clone(),
            Self::Symbol(_) | Self::Byte { .. } => match self.evaluate(assignment) {
                Some(value) => Term::literal(value, self.width()),
                None => self.clone(),
            },
            Self::Unary { operand, .. } => operand.substitute(assignment).not(),
            Self::Binary { op, left, right } => {
                left.substitute(assignment).binary(*op, &right.substitute(assignment))
            }
        }
    }
}

impl From<&SymbolicValue> for Term {
    fn from(value: &SymbolicValue) -> Self {
        Term::symbol(value)
    }
}

impl Display for Term {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Literal { value, .. } => write!(f, "{value:#x}"),
            Self::Symbol(value) => write!(f, "{value}"),
            Self::Byte { buffer, index } => write!(f, "{buffer}[{index}]"),
            Self::Unary { operand, .. } => write!(f, "~{operand}"),
            Self::Binary { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
        }
    }
}

/// A boolean predicate over terms.
///
/// Predicates are the constraints accumulated along an execution path.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Predicate {
    /// A constant truth value.
    Const(bool),

    /// A comparison of two terms.
    Compare { op: CompareOp, left: Term, right: Term },

    /// Logical negation.
    Not(Arc<Predicate>),

    /// Logical conjunction.
    And(Arc<Predicate>, Arc<Predicate>),

    /// Logical disjunction.
    Or(Arc<Predicate>, Arc<Predicate>),
}

impl Predicate {
    /// The predicate that always holds.
    #[must_use]
    pub fn truth() -> Self {
        Self::Const(true)
    }

    /// The predicate that never holds.
    #[must_use]
    pub fn falsity() -> Self {
        Self::Const(false)
    }

    /// Logical negation, pushing through constants and comparisons.
    #[must_use]
    pub fn not(&self) -> Predicate {
        match self {
            Self::Const(value) => Self::Const(!value),
            Self::Compare { op, left, right } => Self::Compare {
                op:    op.negated(),
                left:  left.clone(),
                right: right.clone(),
            },
            Self::Not(inner) => inner.as_ref().clone(),
            _ => Self::Not(Arc::new(self.clone())),
        }
    }

    /// Logical conjunction.
    #[must_use]
    pub fn and(&self, other: &Predicate) -> Predicate {
        match (self, other) {
            (Self::Const(false), _) | (_, Self::Const(false)) => Self::Const(false),
            (Self::Const(true), other) | (other, Self::Const(true)) => other.clone(),
            _ => Self::And(Arc::new(self.clone()), Arc::new(other.clone())),
        }
    }

    /// Logical disjunction.
    #[must_use]
    pub fn or(&self, other: &Predicate) -> Predicate {
        match (self, other) {
            (Self::Const(true), _) | (_, Self::Const(true)) => Self::Const(true),
            (Self::Const(false), other) | (other, Self::Const(false)) => other.clone(),
            _ => Self::Or(Arc::new(self.clone()), Arc::new(other.clone())),
        }
    }

    /// The conjunction of all of `predicates`, which is `true` when empty.
    #[must_use]
    pub fn all<'a>(predicates: impl IntoIterator<Item = &'a Predicate>) -> Predicate {
        predicates
            .into_iter()
            .fold(Predicate::truth(), |acc, next| acc.and(next))
    }

    /// Checks if this is the constant `value`.
    #[must_use]
    pub fn is_const(&self, value: bool) -> bool {
        matches!(self, Self::Const(v) if *v == value)
    }

    /// Gets the symbolic values referenced by the predicate, ordered by id.
    #[must_use]
    pub fn values(&self) -> BTreeMap<ValueId, SymbolicValue> {
        let mut values = BTreeMap::new();
        self.collect_values(&mut values);
        values
    }

    /// Collects the symbolic values referenced by the predicate into `values`.
    pub fn collect_values(&self, values: &mut BTreeMap<ValueId, SymbolicValue>) {
        match self {
            Self::Const(_) => {}
            Self::Compare { left, right, .. } => {
                left.collect_values(values);
                right.collect_values(values);
            }
            Self::Not(inner) => inner.collect_values(values),
            Self::And(left, right) | Self::Or(left, right) => {
                left.collect_values(values);
                right.collect_values(values);
            }
        }
    }

    /// Collects the symbolic atoms referenced by the predicate into `atoms`.
    pub fn collect_atoms(&self, atoms: &mut BTreeSet<Atom>) {
        match self {
            Self::Const(_) => {}
            Self::Compare { left, right, .. } => {
                left.collect_atoms(atoms);
                right.collect_atoms(atoms);
            }
            Self::Not(inner) => inner.collect_atoms(atoms),
            Self::And(left, right) | Self::Or(left, right) => {
                left.collect_atoms(atoms);
                right.collect_atoms(atoms);
            }
        }
    }

    /// Collects the literals appearing in the predicate into `literals`.
    pub fn collect_literals(&self, literals: &mut BTreeSet<U256>) {
        match self {
            Self::Const(_) => {}
            Self::Compare { left, right, .. } => {
                left.collect_literals(literals);
                right.collect_literals(literals);
            }
            Self::Not(inner) => inner.collect_literals(literals),
            Self::And(left, right) | Self::Or(left, right) => {
                left.collect_literals(literals);
                right.collect_literals(literals);
            }
        }
    }

    /// Replaces every symbolic value that `assignment` knows about with its
    /// concrete value, folding the result where possible.
    #[must_use]
    pub fn substitute(&self, assignment: &impl eval::Assignment) -> Predicate {
        match self {
            Self::Const(_) => self.clone(),
            Self::Compare { op, left, right } => {
                left.substitute(assignment)
                    .compare(*op, &right.substitute(assignment))
            }
            Self::Not(inner) => inner.substitute(assignment).not(),
            Self::And(left, right) => {
                left.substitute(assignment)
                    .and(&right.substitute(assignment))
            }
            Self::Or(left, right) => {
                left.substitute(assignment)
                    .or(&right.substitute(assignment))
            }
        }
    }
}

impl Display for Predicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Const(value) => write!(f, "{value}"),
            Self::Compare { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Self::Not(inner) => write!(f, "!{inner}"),
            Self::And(left, right) => write!(f, "({left} && {right})"),
            Self::Or(left, right) => write!(f, "({left} || {right})"),
        }
    }
}

/// Renders a sequence of predicates as a single conjunction.
#[must_use]
pub fn display_conjunction(predicates: &[Predicate]) -> String {
    if predicates.is_empty() {
        "true".into()
    } else {
        predicates.iter().join(" && ")
    }
}

#[cfg(test)]
mod test {
    use ethnum::U256;

    use crate::{
        expr::{Predicate, Term},
        value::ValueFactory,
    };

    #[test]
    fn folds_concrete_arithmetic() {
        let sum = Term::literal(250u32, 8).add(&Term::literal(10u32, 8));
        assert_eq!(sum, Term::literal(4u32, 8));

        let quotient = Term::word(7u32).div(&Term::word(0u32));
        assert_eq!(quotient.as_literal(), Some(U256::ZERO));

        let shifted = Term::literal(1u32, 8).shl(&Term::literal(9u32, 8));
        assert_eq!(shifted.as_literal(), Some(U256::ZERO));
    }

    #[test]
    fn negation_flips_comparisons() -> anyhow::Result<()> {
        let factory = ValueFactory::new();
        let x = Term::symbol(&factory.new_named_scalar(256, "x")?);
        let v = Term::symbol(&factory.new_named_scalar(256, "v")?);

        assert_eq!(x.ugt(&v).not(), x.ule(&v));
        assert_eq!(x.equals(&v).not().not(), x.equals(&v));
        assert_eq!(Term::word(3u32).ult(&Term::word(4u32)), Predicate::truth());

        Ok(())
    }

    #[test]
    fn simplifies_identities() -> anyhow::Result<()> {
        let factory = ValueFactory::new();
        let balance = Term::symbol(&factory.new_named_scalar(256, "balance")?);
        let byte = Term::symbol(&factory.new_scalar(8)?);
        let zero = Term::word(0u32);

        let after = balance.sub(&zero).sub(&zero);
        assert_eq!(after, balance);
        assert_eq!(zero.add(&balance), balance);
        assert_eq!(after.ult(&balance), Predicate::falsity());
        assert_eq!(after.uge(&balance), Predicate::truth());

        // A wider zero widens the result, so it is kept.
        assert_ne!(byte.add(&zero), byte);
        assert_eq!(byte.add(&zero).width(), 256);

        Ok(())
    }

    #[test]
    fn conjunction_absorbs_constants() -> anyhow::Result<()> {
        let factory = ValueFactory::new();
        let x = Term::symbol(&factory.new_scalar(8)?);
        let positive = x.ugt(&Term::literal(0u32, 8));

        assert_eq!(Predicate::truth().and(&positive), positive);
        assert_eq!(positive.and(&Predicate::falsity()), Predicate::falsity());
        assert_eq!(Predicate::all([&positive]), positive);

        Ok(())
    }

    #[test]
    fn collects_values_and_atoms() -> anyhow::Result<()> {
        let factory = ValueFactory::new();
        let x = factory.new_scalar(64)?;
        let data = factory.new_buffer(4)?;
        let predicate = Term::symbol(&x).equals(&Term::byte(&data, 2));

        let values = predicate.values();
        assert_eq!(values.len(), 2);
        assert!(values.contains_key(&x.id()));
        assert!(values.contains_key(&data.id()));

        let mut atoms = std::collections::BTreeSet::new();
        predicate.collect_atoms(&mut atoms);
        assert_eq!(atoms.len(), 2);

        Ok(())
    }

    #[test]
    fn displays_readably() -> anyhow::Result<()> {
        let factory = ValueFactory::new();
        let x = Term::symbol(&factory.new_named_scalar(256, "x")?);
        let predicate = x.ugt(&Term::word(0u32));

        assert_eq!(predicate.to_string(), "(x#0 > 0x0)");

        Ok(())
    }
}
