//! Error types for ordercache operations

use std::time::Duration;
use thiserror::Error;

/// Durable store adapter errors.
///
/// Every variant means the store could not answer; "row absent" is not an
/// error and is reported as `Ok(None)` by the adapters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Store operation {operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
}

/// Event source adapter errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("Failed to receive from event stream: {reason}")]
    Receive { reason: String },

    #[error("Event stream receive timed out after {timeout:?}")]
    Timeout { timeout: Duration },
}

/// Payload validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Malformed payload: {reason}")]
    MalformedPayload { reason: String },

    #[error("Payload must be a JSON object")]
    NotAnObject,

    #[error("Required field missing: {field}")]
    MissingKey { field: &'static str },

    #[error("Field {field} must be a non-empty string")]
    EmptyKey { field: &'static str },

    #[error("Embedded key {found} does not match stored key {expected}")]
    KeyMismatch { expected: String, found: String },
}

/// Caller-visible error category.
///
/// One per failure class a resolve or ingest can end in; the HTTP layer maps
/// each to a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    CorruptData,
    StoreUnavailable,
    StreamError,
}

impl ErrorKind {
    /// Stable label used for log fields and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::CorruptData => "corrupt_data",
            ErrorKind::StoreUnavailable => "store_unavailable",
            ErrorKind::StreamError => "stream_error",
        }
    }
}

/// Master error type for all ordercache errors.
#[derive(Debug, Clone, Error)]
pub enum OrderError {
    #[error("Order not found: {key}")]
    NotFound { key: String },

    #[error("Invalid input: {0}")]
    InvalidInput(#[from] ValidationError),

    #[error("Corrupt data for order {key}: {source}")]
    CorruptData {
        key: String,
        #[source]
        source: ValidationError,
    },

    #[error("Store error: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),
}

impl OrderError {
    pub fn not_found(key: impl Into<String>) -> Self {
        OrderError::NotFound { key: key.into() }
    }

    pub fn corrupt(key: impl Into<String>, source: ValidationError) -> Self {
        OrderError::CorruptData {
            key: key.into(),
            source,
        }
    }

    /// The category this error falls into.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrderError::NotFound { .. } => ErrorKind::NotFound,
            OrderError::InvalidInput(_) => ErrorKind::InvalidInput,
            OrderError::CorruptData { .. } => ErrorKind::CorruptData,
            OrderError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            OrderError::Stream(_) => ErrorKind::StreamError,
        }
    }
}

/// Result type alias for ordercache operations.
pub type OrderResult<T> = Result<T, OrderError>;

// =============================================================================
// TESTS
// =============================================================================
