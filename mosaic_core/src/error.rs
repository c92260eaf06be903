//! Errors raised from inside native code.
//!
//! Native overloads and converters are opaque to the dispatch core; when one
//! of them fails it reports a [`NativeError`], which the dispatcher wraps and
//! hands back to the interpreter unchanged.

use thiserror::Error;

/// Failure raised by a native callable or block.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NativeError {
    /// Wrong argument type reached the native body.
    #[error("TypeError: {0}")]
    Type(String),

    /// Argument value was rejected.
    #[error("ArgumentError: {0}")]
    Argument(String),

    /// A nested send through the call context failed.
    #[error("{0}")]
    Dispatch(String),

    /// Any other guest-level exception, by class name.
    #[error("{kind}: {message}")]
    Raised { kind: String, message: String },
}

impl NativeError {
    /// Shorthand for a `TypeError`.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type(message.into())
    }

    /// Shorthand for an `ArgumentError`.
    pub fn argument(message: impl Into<String>) -> Self {
        Self::Argument(message.into())
    }

    /// Raise a guest exception of the given class.
    pub fn raised(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Raised {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Failure of a registered argument converter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConvertError {
    /// The converter does not apply to this particular value.
    #[error("conversion not applicable")]
    NotApplicable,

    /// The converter ran and raised.
    #[error("conversion failed: {0}")]
    Failed(#[from] NativeError),
}
