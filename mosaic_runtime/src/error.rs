//! Registration-time errors.
//!
//! These abort the startup phase. Every check runs before the graph is
//! touched, so a failed registration leaves nothing partially visible.

use crate::object::overload::OverloadShapeError;
use mosaic_core::{ModuleId, Symbol};
use thiserror::Error;

/// Failure while defining types, bundles, methods or converters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistrationError {
    /// A type or bundle with this name already exists.
    #[error("duplicate type or bundle name `{name}`")]
    DuplicateType { name: Symbol },

    /// The new edge would make a module its own ancestor.
    #[error("cyclic ancestry: `{module}` cannot inherit from or include `{ancestor}`")]
    CyclicAncestry { module: Symbol, ancestor: Symbol },

    /// Id does not belong to this graph.
    #[error("unknown module {0:?}")]
    UnknownModule(ModuleId),

    /// Name does not belong to this graph.
    #[error("unknown type or bundle `{0}`")]
    UnknownName(Symbol),

    /// A bundle was used where a superclass was expected.
    #[error("`{name}` is a bundle, not a class")]
    NotAClass { name: Symbol },

    /// A class was used where a bundle was expected.
    #[error("`{name}` is a class, not a bundle")]
    NotABundle { name: Symbol },

    /// Overload slot layout is malformed.
    #[error("invalid overload for `{name}`: {source}")]
    InvalidOverload {
        name: Symbol,
        #[source]
        source: OverloadShapeError,
    },

    /// `register_method` was given nothing to register.
    #[error("no overloads given for `{name}`")]
    NoOverloads { name: Symbol },

    /// Alias or visibility change of a name that does not resolve.
    #[error("undefined method `{name}' for `{module}`")]
    UndefinedMethod { module: Symbol, name: Symbol },
}

/// Result type for registration operations.
pub type RegistrationResult<T> = Result<T, RegistrationError>;

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_core::intern;

    #[test]
    fn test_error_messages() {
        let err = RegistrationError::DuplicateType { name: intern("Dog") };
        assert_eq!(err.to_string(), "duplicate type or bundle name `Dog`");

        let err = RegistrationError::CyclicAncestry {
            module: intern("A"),
            ancestor: intern("B"),
        };
        assert!(err.to_string().contains("cyclic ancestry"));

        let err = RegistrationError::InvalidOverload {
            name: intern("add"),
            source: OverloadShapeError("bad layout".to_string()),
        };
        assert_eq!(err.to_string(), "invalid overload for `add`: bad layout");
    }
}
