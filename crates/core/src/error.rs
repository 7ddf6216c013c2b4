//! Domain error model.

use thiserror::Error;

/// Domain-level error.
///
/// Shared primitives only fail on malformed identifiers; stock rules report
/// through their own error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

/// Coarse error taxonomy shared by every layer that reports failures.
///
/// Callers decide retry and presentation by category, never by message text.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Bad input shape or range; rejected before any write.
    Validation,
    /// The referenced record does not exist.
    NotFound,
    /// The input is well-formed but a business rule forbids it.
    BusinessRule,
    /// A concurrent writer won; retrying may succeed.
    Concurrency,
    /// Transport or durability failure; the write did not apply.
    Storage,
}

impl DomainError {
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::InvalidId(_) => "invalid_id",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            DomainError::InvalidId(_) => ErrorCategory::Validation,
        }
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
