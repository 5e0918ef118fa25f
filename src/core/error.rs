//! Unified error handling for capflow
//!
//! Lookup outcomes are not errors in this sense: they travel as
//! [`ErrorCode`](super::types::ErrorCode) values through the batch reduction.
//! `EngineError` covers everything that fails at the API level.

use std::fmt;

/// Unified error types for the engine
#[derive(Debug)]
pub enum EngineError {
    /// Configuration-related errors
    Configuration(String),

    /// File and I/O errors
    Io(std::io::Error),

    /// Validation errors (malformed targets, bad input)
    Validation(String),

    /// The lookup backend refused to start a lookup
    Backend(String),

    /// The request manager has been destroyed
    Destroyed,

    /// Internal system errors
    Internal(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            EngineError::Io(err) => write!(f, "I/O error: {err}"),
            EngineError::Validation(msg) => write!(f, "Validation error: {msg}"),
            EngineError::Backend(msg) => write!(f, "Lookup backend error: {msg}"),
            EngineError::Destroyed => write!(f, "Request manager destroyed"),
            EngineError::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err)
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Helper trait for adding context to foreign errors
pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> EngineResult<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: fmt::Display,
{
    fn with_context(self, context: &str) -> EngineResult<T> {
        self.map_err(|e| EngineError::Internal(format!("{context}: {e}")))
    }
}

/// Convenience macros for error creation
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::core::error::EngineError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::error::EngineError::Configuration(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! backend_error {
    ($msg:expr) => {
        $crate::core::error::EngineError::Backend($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::error::EngineError::Backend(format!($fmt, $($arg)*))
    };
}
