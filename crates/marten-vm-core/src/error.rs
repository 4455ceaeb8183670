//! Property access error types

use crate::key::PropertyKey;
use crate::types::ValueType;
use crate::value::Value;
use thiserror::Error;

/// Errors raised by property lookup, linking and storage
#[derive(Debug, Clone, Error)]
pub enum PropertyError {
    /// A `let`/`const` binding was touched before its declaration ran
    #[error("ReferenceError: Cannot access '{0}' before initialization")]
    UndeclaredBinding(PropertyKey),

    /// Strict-mode write through an accessor property without a setter
    #[error("TypeError: Cannot set property {0} which has only a getter")]
    NoSetter(PropertyKey),

    /// Read of a scope binding that exists nowhere on the scope chain
    #[error("ReferenceError: {0} is not defined")]
    NotDefined(PropertyKey),

    /// Strict-mode assignment that would create a new global variable
    #[error("ReferenceError: assignment to undeclared variable {0}")]
    StrictAssignmentToUndeclared(PropertyKey),

    /// Strict-mode addition of a property to a non-extensible object
    #[error("TypeError: Cannot add property {0}, object is not extensible")]
    NonExtensibleWrite(PropertyKey),

    /// Strict-mode write to a read-only property
    #[error("TypeError: Cannot assign to read only property '{0}'")]
    NotWritable(PropertyKey),

    /// Strict-mode delete of a non-configurable property
    #[error("TypeError: Cannot delete property '{0}'")]
    NotConfigurable(PropertyKey),

    /// Generic type error
    #[error("TypeError: {0}")]
    TypeError(String),

    /// An optimistic call site received a value wider than it asked for
    #[error("Unwarranted optimism: {value:?} does not fit {expected}")]
    UnwarrantedOptimism {
        /// The value that did not fit
        value: Value,
        /// The representation the call site was compiled for
        expected: ValueType,
    },

    /// A user callable threw
    #[error("Uncaught exception: {0:?}")]
    Exception(Value),

    /// Internal error
    #[error("InternalError: {0}")]
    Internal(String),
}

impl PropertyError {
    /// Create a type error
    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::TypeError(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error maps to a script-level `ReferenceError`
    pub fn is_reference_error(&self) -> bool {
        matches!(
            self,
            Self::UndeclaredBinding(_)
                | Self::NotDefined(_)
                | Self::StrictAssignmentToUndeclared(_)
        )
    }

    /// Whether this error maps to a script-level `TypeError`
    pub fn is_type_error(&self) -> bool {
        matches!(
            self,
            Self::NoSetter(_)
                | Self::NonExtensibleWrite(_)
                | Self::NotWritable(_)
                | Self::NotConfigurable(_)
                | Self::TypeError(_)
        )
    }
}

/// Result type for property operations
pub type PropertyResult<T> = Result<T, PropertyError>;

/// A store did not fit the slot's current representation.
///
/// Never escapes the crate: setters catch it and redo the write on the slow path,
/// which widens or coerces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WideningRefused;
