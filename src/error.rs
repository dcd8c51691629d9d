//! Unified error handling for the transaction core.
//!
//! `CoreError` covers *implementation* failures — a collaborator returned an
//! inconsistent result, configuration failed validation at load time, a Director
//! invariant was about to be violated. It is distinct from [`crate::error_responder::ErrorKind`],
//! which is the HTTP-visible error taxonomy a transaction can resolve to; that one is
//! data the Director routes through, not a Rust `Result` error.

use std::fmt;

/// Unified error type for the core's own fallible operations.
#[derive(Debug)]
pub enum CoreError {
    /// Configuration failed to parse or validate.
    Configuration(String),

    /// A collaborator (DNS, cache, parent selector, ...) returned a result that
    /// violates its own contract (e.g. `resolved_p = true` with no address).
    Collaborator(String),

    /// A Director invariant was about to be violated. Never expected outside tests.
    Internal(String),

    /// Config-schema validation error surfaced from `validator`.
    Validation(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Configuration(msg) => write!(f, "configuration error: {msg}"),
            CoreError::Collaborator(msg) => write!(f, "collaborator contract violation: {msg}"),
            CoreError::Internal(msg) => write!(f, "internal invariant violation: {msg}"),
            CoreError::Validation(msg) => write!(f, "validation error: {msg}"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<serde_yaml::Error> for CoreError {
    fn from(err: serde_yaml::Error) -> Self {
        CoreError::Configuration(err.to_string())
    }
}

impl From<validator::ValidationErrors> for CoreError {
    fn from(err: validator::ValidationErrors) -> Self {
        CoreError::Validation(err.to_string())
    }
}

/// Result type alias for core operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Helper trait for adding context to errors as they cross a collaborator boundary.
pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> CoreResult<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: fmt::Display,
{
    fn with_context(self, context: &str) -> CoreResult<T> {
        self.map_err(|e| CoreError::Internal(format!("{context}: {e}")))
    }
}
