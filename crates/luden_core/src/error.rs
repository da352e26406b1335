//! Error types for reflection and registration

use crate::value::ValueType;
use thiserror::Error;

/// Reflective access failures.
///
/// These are data-dependent: they show up when tools inspect user-authored
/// or partially migrated data, and callers handle them locally.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReflectionError {
    /// Type name is not registered
    #[error("Type '{0}' is not registered")]
    UnknownType(String),

    /// Type has no property with this name
    #[error("Type '{type_name}' has no property '{property}'")]
    UnknownProperty {
        type_name: String,
        property: String,
    },

    /// No constructor accepts the supplied arguments
    #[error("No constructor of '{type_name}' accepts ({})", .arguments.join(", "))]
    NoMatchingConstructor {
        type_name: String,
        arguments: Vec<String>,
    },

    /// Value or instance does not have the expected type
    #[error("Type mismatch on '{context}': expected {expected}, found {found}")]
    TypeMismatch {
        context: String,
        expected: String,
        found: String,
    },

    /// Property has no setter
    #[error("Property '{property}' of '{type_name}' is read-only")]
    ReadOnly {
        type_name: String,
        property: String,
    },
}

impl ReflectionError {
    /// Create an unknown property error
    pub fn unknown_property(type_name: impl Into<String>, property: impl Into<String>) -> Self {
        ReflectionError::UnknownProperty {
            type_name: type_name.into(),
            property: property.into(),
        }
    }

    /// Create a type mismatch error against a declared value type
    pub fn type_mismatch(
        context: impl Into<String>,
        expected: &ValueType,
        found: impl Into<String>,
    ) -> Self {
        ReflectionError::TypeMismatch {
            context: context.into(),
            expected: expected.to_string(),
            found: found.into(),
        }
    }
}

/// Registration failures, surfaced when a type or script is added
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A structurally different type with this name is already registered
    #[error("Type '{0}' is already registered with a different signature")]
    DuplicateType(String),

    /// A script with this name is already registered
    #[error("Script '{0}' is already registered")]
    DuplicateScript(String),

    /// A script registration was malformed (bad name, incomplete factory)
    #[error("Invalid script registration '{name}': {reason}")]
    InvalidScript {
        name: String,
        reason: String,
    },
}
