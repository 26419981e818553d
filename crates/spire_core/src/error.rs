//! Engine error taxonomy.
//!
//! Errors are `Clone` because a failed cache entry re-delivers the same error
//! to every requester of its key.

use crate::key::Key;
use crate::value::TypeTag;

/// Engine result type
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// No rule or union member can compute the requested product
    #[error("No rule found to compute {product} for subject type {subject_type}")]
    NoRule {
        /// Requested product type
        product: String,
        /// Declared or runtime subject type
        subject_type: String,
    },

    /// A union capability has no member for the subject's concrete type
    #[error("Union {capability} has no member registered for type {subject_type}")]
    UnhandledType {
        /// Union capability type
        capability: String,
        /// Concrete subject type encountered
        subject_type: String,
    },

    /// More than one union member matches a subject's concrete type
    #[error(
        "Union {capability} has {} members for type {subject_type}: {}",
        .candidates.len(),
        .candidates.join(", ")
    )]
    AmbiguousUnion {
        /// Union capability type
        capability: String,
        /// Concrete subject type
        subject_type: String,
        /// Names of the matching member rules
        candidates: Vec<String>,
    },

    /// A key re-entered its own in-progress resolution chain
    #[error("Dependency cycle detected: {}", .chain.join(" -> "))]
    DependencyCycle {
        /// Keys on the cycle, starting and ending with the re-entered key
        chain: Vec<String>,
    },

    /// A rule body failed
    #[error("Rule {rule} failed computing {key}: {message}")]
    RuleExecution {
        /// Rule name
        rule: String,
        /// Key being computed
        key: String,
        /// Failure message
        message: String,
    },

    /// Invalid rule registration
    #[error("Configuration error: {reason}")]
    Configuration {
        /// What is wrong
        reason: String,
    },

    /// A rule issued a request it did not declare
    #[error("Rule {rule} requested {product} for {subject_type} without declaring it")]
    UndeclaredRequest {
        /// Requesting rule
        rule: String,
        /// Requested product type
        product: String,
        /// Declared or runtime subject type
        subject_type: String,
    },

    /// No goal with the given name
    #[error("No goal named {name} is registered")]
    UnknownGoal {
        /// Goal name
        name: String,
    },

    /// A value had another type than expected
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected type
        expected: String,
        /// Actual type
        actual: String,
    },

    /// The run was aborted and refuses new resolutions
    #[error("Run aborted")]
    Aborted,

    /// Internal error (for unexpected errors)
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl EngineError {
    /// Missing rule for a (product, subject type) signature
    #[must_use]
    pub fn no_rule(product: TypeTag, subject_type: TypeTag) -> Self {
        Self::NoRule {
            product: product.to_string(),
            subject_type: subject_type.to_string(),
        }
    }

    /// Union without a member for the concrete type
    #[must_use]
    pub fn unhandled_type(capability: TypeTag, subject_type: TypeTag) -> Self {
        Self::UnhandledType {
            capability: capability.to_string(),
            subject_type: subject_type.to_string(),
        }
    }

    /// Mismatch between an expected and an actual type
    #[must_use]
    pub fn type_mismatch(expected: TypeTag, actual: TypeTag) -> Self {
        Self::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Configuration error
    #[must_use]
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Failure raised by a rule body
    ///
    /// The rule name and key are filled in by the engine when the failure
    /// leaves the rule that raised it.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::RuleExecution {
            rule: String::new(),
            key: String::new(),
            message: message.into(),
        }
    }

    /// Attribute an unattributed rule failure to the rule and key that raised it
    #[must_use]
    pub fn attributed(self, rule_name: &str, at: &Key) -> Self {
        match self {
            Self::RuleExecution { rule, key, message } if rule.is_empty() => {
                let key = if key.is_empty() { at.to_string() } else { key };
                Self::RuleExecution {
                    rule: rule_name.to_string(),
                    key,
                    message,
                }
            }
            other => other,
        }
    }

    /// Structural errors describe a broken rule set rather than a failed
    /// computation, and abort the enclosing run
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::NoRule { .. }
                | Self::UnhandledType { .. }
                | Self::AmbiguousUnion { .. }
                | Self::DependencyCycle { .. }
                | Self::Configuration { .. }
                | Self::UndeclaredRequest { .. }
                | Self::UnknownGoal { .. }
                | Self::TypeMismatch { .. }
        )
    }
}
