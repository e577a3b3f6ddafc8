//! Pipeline errors

use thiserror::Error;

use crate::types::{Kind, OpCategory};

/// Pipeline result type
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error raised by a caller-supplied function (predicate, map, combiner)
/// or by the backing source while an element is being pulled.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct OpError(pub String);

impl OpError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Pipeline errors
///
/// Structural errors are detected at build or rewrite time and never reach
/// execution. Execution errors abort the in-flight run and carry the
/// category of the node that raised them.
#[derive(Debug, Error)]
pub enum Error {
    #[error("kind mismatch at {at}: expected {expected}, found {found}")]
    KindMismatch {
        expected: Kind,
        found: Kind,
        at: OpCategory,
    },

    #[error("{terminal} does not accept {kind} input")]
    UnsupportedTerminal { terminal: OpCategory, kind: Kind },

    #[error("{category} over {kind} requires an explicit comparator")]
    ComparatorRequired { category: OpCategory, kind: Kind },

    #[error("terminal already left the unexecuted state; rearm to run again")]
    AlreadyExecuted,

    #[error("rewrite rejected: {reason}")]
    RewriteRejected { reason: String },

    #[error("{category} operation failed")]
    Op {
        category: OpCategory,
        #[source]
        source: OpError,
    },

    #[error("parallel execution requires a bounded source")]
    UnboundedParallelSource,
}
