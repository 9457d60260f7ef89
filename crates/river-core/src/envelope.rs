//! Envelope and pending request records
//!
//! A [`MessageEnvelope`] is the addressed unit of wire data. A [`PendingRequest`]
//! wraps an envelope with the bookkeeping the durable queue persists.

use core::time::Duration;
use serde::{Deserialize, Serialize};

use crate::types::{Constructor, Timestamp};
use crate::Result;

// ----------------------------------------------------------------------------
// Message Envelope
// ----------------------------------------------------------------------------

/// Type tag, request id and opaque payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub constructor: Constructor,
    pub request_id: u64,
    pub payload: Vec<u8>,
}

impl MessageEnvelope {
    pub fn new(constructor: Constructor, request_id: u64, payload: Vec<u8>) -> Self {
        Self {
            constructor,
            request_id,
            payload,
        }
    }
}

// ----------------------------------------------------------------------------
// Pending Request
// ----------------------------------------------------------------------------

/// A request waiting in the durable queue for (another) dispatch attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub id: u64,
    /// Zero means "use the dispatcher default"
    pub timeout: Duration,
    pub envelope: MessageEnvelope,
    /// Dispatch attempts that ended in a timeout
    pub attempts: u32,
    pub inserted_at: Timestamp,
}

impl PendingRequest {
    /// Wrap an envelope; the request id is taken from the envelope
    pub fn new(envelope: MessageEnvelope, timeout: Duration) -> Self {
        Self {
            id: envelope.request_id,
            timeout,
            envelope,
            attempts: 0,
            inserted_at: Timestamp::now(),
        }
    }

    /// Constructor tag of the wrapped envelope
    pub fn constructor(&self) -> Constructor {
        self.envelope.constructor
    }

    /// Encode for the durable queue
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode a durable queue record
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_request_takes_envelope_id() {
        let envelope = MessageEnvelope::new(Constructor::MESSAGES_SEND, 77, b"hi".to_vec());
        let request = PendingRequest::new(envelope, Duration::from_secs(5));
        assert_eq!(request.id, 77);
        assert_eq!(request.constructor(), Constructor::MESSAGES_SEND);
        assert_eq!(request.attempts, 0);
    }

    #[test]
    fn test_truncated_record_is_rejected() {
        let envelope = MessageEnvelope::new(Constructor::CONTACTS_GET, 1, vec![0u8; 64]);
        let bytes = PendingRequest::new(envelope, Duration::ZERO).to_bytes().unwrap();
        assert!(PendingRequest::from_bytes(&bytes[..bytes.len() / 2]).is_err());
    }
}
