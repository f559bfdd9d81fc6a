//! This module contains the representation of the transactions that are
//! executed against an execution state.

use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
};

use serde::{Deserialize, Serialize};

use crate::{
    expr::Term,
    state::account::Address,
    value::{SymbolicValue, ValueId},
};

/// The way in which a transaction's execution ended.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltStatus {
    /// Execution returned normally with data.
    Return,

    /// Execution stopped normally without data.
    Stop,

    /// Execution reverted, undoing every effect of the transaction.
    Revert,
}

impl HaltStatus {
    /// Checks if this status undoes the effects of the transaction.
    #[must_use]
    pub fn is_revert(self) -> bool {
        self == Self::Revert
    }
}

impl Display for HaltStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Return => write!(f, "RETURN"),
            Self::Stop => write!(f, "STOP"),
            Self::Revert => write!(f, "REVERT"),
        }
    }
}

/// The input data of a transaction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Input {
    /// Concrete calldata.
    Concrete(Vec<u8>),

    /// Calldata held in a symbolic buffer.
    Symbolic(SymbolicValue),
}

impl Input {
    /// Gets the symbolic buffer holding the input, if it is symbolic.
    #[must_use]
    pub fn as_symbolic(&self) -> Option<&SymbolicValue> {
        match self {
            Self::Concrete(_) => None,
            Self::Symbolic(buffer) => Some(buffer),
        }
    }
}

impl Default for Input {
    fn default() -> Self {
        Self::Concrete(Vec::new())
    }
}

/// The result of executing a transaction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Outcome {
    /// How execution ended.
    pub status: HaltStatus,

    /// The data returned by execution, if any.
    pub return_data: Option<Term>,
}

/// A transaction sent from one account to another.
///
/// Once its [`Outcome`] has been recorded in a state's transaction log, the
/// transaction is never mutated again.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transaction {
    caller:  Address,
    callee:  Address,
    value:   Term,
    input:   Input,
    outcome: Option<Outcome>,
}

impl Transaction {
    /// Creates a new transaction from `caller` to `callee` that transfers
    /// `value` and carries `input`.
    #[must_use]
    pub fn new(caller: Address, callee: Address, value: Term, input: Input) -> Self {
        let outcome = None;
        Self {
            caller,
            callee,
            value,
            input,
            outcome,
        }
    }

    /// Gets the sender of the transaction.
    #[must_use]
    pub fn caller(&self) -> Address {
        self.caller
    }

    /// Gets the recipient of the transaction.
    #[must_use]
    pub fn callee(&self) -> Address {
        self.callee
    }

    /// Gets the value transferred by the transaction.
    #[must_use]
    pub fn value(&self) -> &Term {
        &self.value
    }

    /// Gets the input data of the transaction.
    #[must_use]
    pub fn input(&self) -> &Input {
        &self.input
    }

    /// Gets the outcome of the transaction, if it has finished executing.
    #[must_use]
    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    /// Produces the finished form of the transaction.
    #[must_use]
    pub(crate) fn finished(mut self, status: HaltStatus, return_data: Option<Term>) -> Self {
        self.outcome = Some(Outcome {
            status,
            return_data,
        });
        self
    }

    /// Collects the symbolic values that the transaction refers to into
    /// `values`.
    pub fn collect_values(&self, values: &mut BTreeMap<ValueId, SymbolicValue>) {
        self.value.collect_values(values);
        if let Input::Symbolic(buffer) = &self.input {
            values.entry(buffer.id()).or_insert_with(|| buffer.clone());
        }
        if let Some(Outcome {
            return_data: Some(data),
            ..
        }) = &self.outcome
        {
            data.collect_values(values);
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{
        expr::Term,
        state::{
            account::Address,
            transaction::{HaltStatus, Input, Transaction},
        },
        value::ValueFactory,
    };

    #[test]
    fn collects_values_from_every_part() -> anyhow::Result<()> {
        let factory = ValueFactory::new();
        let value = factory.new_named_scalar(256, "value")?;
        let data = factory.new_named_buffer(4, "data")?;
        let result = factory.new_scalar(256)?;

        let tx = Transaction::new(
            Address::from_low_u64(1),
            Address::from_low_u64(2),
            Term::symbol(&value),
            Input::Symbolic(data.clone()),
        )
        .finished(HaltStatus::Return, Some(Term::symbol(&result)));

        let mut values = std::collections::BTreeMap::new();
        tx.collect_values(&mut values);

        assert_eq!(values.len(), 3);
        assert_eq!(tx.outcome().map(|o| o.status), Some(HaltStatus::Return));
        assert_eq!(tx.input().as_symbolic(), Some(&data));

        Ok(())
    }
}
