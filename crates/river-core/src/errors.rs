//! Error types for the River transport core
//!
//! This module contains all error types used by the SDK transport layer,
//! including cryptographic errors, transport errors, durable queue errors and
//! the main RiverError type that unifies them all.

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Specific cryptographic error types
#[derive(Debug, thiserror::Error)]
pub enum CryptographicError {
    /// AEAD open failed: wrong key material or tampered ciphertext
    #[error("Authentication failed: ciphertext rejected by AEAD open")]
    AuthenticationFailed,
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
    /// Retryable with fresh randomness
    #[error("Factorization of {composite} failed after {rounds} rounds")]
    FactorizationFailed { composite: u64, rounds: u32 },
    #[error("Value {value} is not a splittable composite")]
    InvalidComposite { value: u64 },
}

/// Specific transport error types
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Send failed for request {request_id}: {reason}")]
    SendFailed { request_id: u64, reason: String },
    #[error("Network is disconnected")]
    Disconnected,
    #[error("Network I/O error: {0}")]
    NetworkIo(#[from] std::io::Error),
}

/// Specific durable queue error types
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue at {path} is unavailable: {reason}")]
    Unavailable { path: String, reason: String },
    #[error("Queue I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupted queue record at offset {offset}: {reason}")]
    Corrupted { offset: u64, reason: String },
    #[error("Dispatch queue is stopped")]
    Stopped,
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Core error types for the River transport core
#[derive(Debug, thiserror::Error)]
pub enum RiverError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptographicError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Expected, non-fatal absence (empty queue, missing callback)
    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Request {request_id} timed out after {duration_ms}ms")]
    Timeout { request_id: u64, duration_ms: u64 },

    #[error("Buffer full (capacity: {capacity})")]
    BufferFull { capacity: usize },

    /// Configuration error
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl RiverError {
    /// Create a not-found error describing what was missing
    pub fn not_found<T: Into<String>>(what: T) -> Self {
        RiverError::NotFound { what: what.into() }
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        RiverError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a timeout error for a request
    pub fn timeout(request_id: u64, duration: core::time::Duration) -> Self {
        RiverError::Timeout {
            request_id,
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Create a send failure error
    pub fn send_failed<R: Into<String>>(request_id: u64, reason: R) -> Self {
        RiverError::Transport(TransportError::SendFailed {
            request_id,
            reason: reason.into(),
        })
    }

    /// Create a queue unavailable error
    pub fn queue_unavailable<P: Into<String>, R: Into<String>>(path: P, reason: R) -> Self {
        RiverError::Queue(QueueError::Unavailable {
            path: path.into(),
            reason: reason.into(),
        })
    }

    /// Create a corrupted record error
    pub fn corrupted<R: Into<String>>(offset: u64, reason: R) -> Self {
        RiverError::Queue(QueueError::Corrupted {
            offset,
            reason: reason.into(),
        })
    }

    /// Create an authentication failure error
    pub fn authentication_failed() -> Self {
        RiverError::Crypto(CryptographicError::AuthenticationFailed)
    }

    /// Whether this error is worth retrying with the same inputs or fresh randomness.
    ///
    /// Authentication failures are never retryable: they indicate a key mismatch
    /// or tampering.
    pub fn is_retryable(&self) -> bool {
        match self {
            RiverError::Transport(_) | RiverError::Timeout { .. } => true,
            RiverError::Crypto(CryptographicError::FactorizationFailed { .. }) => true,
            RiverError::Queue(QueueError::Io(_)) => true,
            _ => false,
        }
    }
}

impl From<std::io::Error> for RiverError {
    fn from(err: std::io::Error) -> Self {
        RiverError::Queue(QueueError::Io(err))
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, RiverError>;
pub type RiverResult<T> = Result<T>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(RiverError::send_failed(1, "socket closed").is_retryable());
        assert!(RiverError::timeout(1, core::time::Duration::from_secs(1)).is_retryable());
        assert!(RiverError::Crypto(CryptographicError::FactorizationFailed {
            composite: 10403,
            rounds: 4
        })
        .is_retryable());
        assert!(!RiverError::authentication_failed().is_retryable());
        assert!(!RiverError::not_found("callback").is_retryable());
    }

    #[test]
    fn test_timeout_message() {
        let err = RiverError::timeout(42, core::time::Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Request 42 timed out after 1500ms");
    }
}
