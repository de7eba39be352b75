#![forbid(unsafe_code)]

//! Error taxonomy for the model core.
//!
//! # Failure Modes
//!
//! | Class | Variants | Behavior |
//! |-------|----------|----------|
//! | Schema/usage | `UnknownType`, `UnknownPath`, `TypeMismatch`, `ConstantProperty`, ... | Returned at the call site, never retried |
//! | Cascade safety | `TransferLimitExceeded`, `DepthLimitExceeded` | Returned from scope disposal; in-flight change may be discarded |
//! | Calculation | `RuleFailed` | Replaced by the configured fallback, otherwise logged and propagated |

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = ModelError> = std::result::Result<T, E>;

/// Errors raised by the model, its rules and its execution scope.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    /// No type with this name is registered in the model.
    #[error("type '{type_name}' is not defined in the model")]
    UnknownType { type_name: String },

    /// A type with this name is already registered.
    #[error("type '{type_name}' is already defined")]
    DuplicateType { type_name: String },

    /// The type (or one of its ancestors) already declares this property.
    #[error("property '{property}' is already defined on type '{type_name}'")]
    DuplicateProperty { type_name: String, property: String },

    /// A path segment did not name a property of the current type.
    #[error("path '{path}' is invalid for type '{type_name}': '{segment}' is not a property")]
    UnknownPath {
        path: String,
        type_name: String,
        segment: String,
    },

    /// Path text could not be parsed.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// A `<Cast>` annotation named a type outside the step's hierarchy.
    #[error("path '{path}' casts to '{cast}', which is not a subtype of '{expected}'")]
    InvalidCast {
        path: String,
        cast: String,
        expected: String,
    },

    /// A property was used with an instance of a type that does not declare it.
    #[error("property '{path}' cannot be used with {entity}, an instance of '{actual_type}'")]
    EntityTypeMismatch {
        path: String,
        entity: String,
        actual_type: String,
    },

    /// A value's run-time kind does not match the declared property type.
    #[error("cannot set {entity}.{property} to {value}: expected {expected}, found {actual}")]
    TypeMismatch {
        entity: String,
        property: String,
        expected: String,
        actual: String,
        value: String,
    },

    /// Writes to constant properties are rejected.
    #[error("property '{path}' is constant and cannot be assigned")]
    ConstantProperty { path: String },

    /// Writes to calculated properties are rejected unless they come from the owning rule.
    #[error("property '{path}' is calculated and cannot be assigned")]
    CalculatedProperty { path: String },

    /// List properties must be mutated through their observable list.
    #[error("list property '{path}' cannot be replaced; mutate its list or use update_list")]
    ListAssignment { path: String },

    /// The property already has a calculation rule.
    #[error("property '{path}' already has a calculation rule")]
    AlreadyCalculated { path: String },

    /// Exit handlers kept handing work to one another without settling.
    #[error("exceeded maximum scope event transfer count ({limit}); rules are re-triggering each other without converging")]
    TransferLimitExceeded { limit: usize },

    /// Scopes nested deeper than the configured bound.
    #[error("exceeded maximum scope nesting depth ({limit}); a call is re-entering the model recursively")]
    DepthLimitExceeded { limit: usize },

    /// A rule kind that writes a property was declared without one.
    #[error("rule '{rule}' needs a target property")]
    MissingTarget { rule: String },

    /// A rule body failed and no fallback value was configured.
    #[error("rule '{rule}' failed: {message}")]
    RuleFailed { rule: String, message: String },

    /// The path crosses a list-valued step and has no single value.
    #[error("path '{path}' fans out over a list and has no single value")]
    NotSingleValued { path: String },

    /// The owning model was dropped while a handle to one of its parts survived.
    #[error("the owning model has been dropped")]
    ModelDropped,

    /// Error raised from inside a user-supplied rule body.
    #[error("{0}")]
    Custom(String),
}

impl ModelError {
    /// Convenience constructor for errors raised by rule bodies.
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }

    /// Whether this error is a cascade-safety violation raised by the execution scope.
    #[must_use]
    pub fn is_cascade_limit(&self) -> bool {
        matches!(
            self,
            Self::TransferLimitExceeded { .. } | Self::DepthLimitExceeded { .. }
        )
    }
}
