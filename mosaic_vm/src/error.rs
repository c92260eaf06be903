//! Dispatch-time errors.
//!
//! Every failure is recoverable: it is returned to the invoking machinery,
//! which decides whether it becomes a guest-level exception or a call to a
//! method-missing handler. Nothing here retries.

use crate::call_shape::CallShape;
use mosaic_core::{ConvertError, NativeError, Symbol};
use std::fmt;
use thiserror::Error;

/// What was attempted when overload resolution failed.
#[derive(Debug, Clone, PartialEq)]
pub struct CallFailure {
    /// Receiver type (or the type itself for type-level calls).
    pub receiver: Symbol,
    pub name: Symbol,
    pub shape: CallShape,
    /// Names of the argument types, options bag last.
    pub argument_types: Vec<Symbol>,
    /// Rendered signatures of every overload considered, in declaration order.
    pub candidates: Vec<String>,
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}#{}` called with (", self.receiver, self.name)?;
        for (i, ty) in self.argument_types.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", ty)?;
        }
        f.write_str(")")?;
        if self.shape.has_block() {
            f.write_str(" &block")?;
        }
        if !self.candidates.is_empty() {
            write!(f, "; candidates: {}", self.candidates.join(" | "))?;
        }
        Ok(())
    }
}

/// Failure of a message send.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    /// No entry for the name along the lookup chain.
    #[error("undefined method `{name}' for {receiver}")]
    Unbound { receiver: Symbol, name: Symbol },

    #[error("private method `{name}' called for {receiver}")]
    PrivateMethod { receiver: Symbol, name: Symbol },

    #[error("protected method `{name}' called for {receiver}")]
    ProtectedMethod { receiver: Symbol, name: Symbol },

    /// No overload accepts this many arguments.
    #[error("wrong number of arguments: {0}")]
    ArgumentCountMismatch(Box<CallFailure>),

    /// Some overload accepts the count but none the argument types.
    #[error("no applicable overload: {0}")]
    NoApplicableOverload(Box<CallFailure>),

    #[error("block required: {0}")]
    BlockRequired(Box<CallFailure>),

    /// A block was passed to overloads that never take one, under the strict
    /// block policy.
    #[error("unexpected block: {0}")]
    UnexpectedBlock(Box<CallFailure>),

    /// A registered converter refused or raised.
    #[error("cannot convert argument {position} of `{name}' from {from} to {to}: {reason}")]
    Conversion {
        name: Symbol,
        position: usize,
        from: Symbol,
        to: Symbol,
        #[source]
        reason: ConvertError,
    },

    /// The selected native raised.
    #[error(transparent)]
    Native(#[from] NativeError),
}

impl DispatchError {
    /// The structured failure for resolution errors.
    pub fn call_failure(&self) -> Option<&CallFailure> {
        match self {
            DispatchError::ArgumentCountMismatch(f)
            | DispatchError::NoApplicableOverload(f)
            | DispatchError::BlockRequired(f)
            | DispatchError::UnexpectedBlock(f) => Some(f),
            _ => None,
        }
    }

    /// Whether the name did not resolve, as opposed to resolving and failing.
    #[inline]
    pub fn is_unbound(&self) -> bool {
        matches!(self, DispatchError::Unbound { .. })
    }
}

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;
