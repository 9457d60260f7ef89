//! External collaborators of the dispatch queue
//!
//! The queue never talks to sockets, databases or UI toolkits directly. It
//! goes through these traits so applications (and tests) plug in their own.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use core::time::Duration;
use parking_lot::Mutex;
use river_core::{Constructor, MessageEnvelope, NetworkQuality, PendingRequest, RiverResult};

// ----------------------------------------------------------------------------
// Network
// ----------------------------------------------------------------------------

/// Outbound side of the connection plus its quality signal
#[async_trait]
pub trait NetworkPort: Send + Sync {
    /// Current connection quality; the distributor only sends on usable links
    fn quality(&self) -> NetworkQuality;

    /// Send an envelope; a failed send is requeued by the caller
    async fn send(&self, envelope: &MessageEnvelope) -> RiverResult<()>;
}

// ----------------------------------------------------------------------------
// Message Store
// ----------------------------------------------------------------------------

/// An outgoing user message the message store still considers unsent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub message_id: i64,
    pub request_id: u64,
    pub constructor: Constructor,
    pub payload: Vec<u8>,
}

impl PendingMessage {
    pub fn new(message_id: i64, request_id: u64, constructor: Constructor, payload: Vec<u8>) -> Self {
        Self {
            message_id,
            request_id,
            constructor,
            payload,
        }
    }

    /// Queue record for this message under `request_id`
    pub fn to_pending_request(&self, request_id: u64, timeout: Duration) -> PendingRequest {
        let envelope = MessageEnvelope::new(self.constructor, request_id, self.payload.clone());
        PendingRequest::new(envelope, timeout)
    }
}

/// Read side of the application's message database
pub trait PendingMessageStore: Send + Sync {
    /// Every message still waiting for a server acknowledgement
    fn pending_messages(&self) -> RiverResult<Vec<PendingMessage>>;

    /// Whether the message sent under `request_id` is still unacknowledged
    fn is_pending(&self, request_id: u64) -> bool;

    /// Record that a pending message is now sent under a new request id
    fn reassign_request_id(&self, message_id: i64, request_id: u64) -> RiverResult<()>;
}

/// In-memory [`PendingMessageStore`]
#[derive(Debug, Default)]
pub struct MemoryPendingStore {
    messages: Mutex<BTreeMap<i64, PendingMessage>>,
}

impl MemoryPendingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, message: PendingMessage) {
        self.messages.lock().insert(message.message_id, message);
    }

    /// Mark a message acknowledged; it stops being pending
    pub fn acknowledge(&self, message_id: i64) -> Option<PendingMessage> {
        self.messages.lock().remove(&message_id)
    }

    /// Acknowledge whatever message is pending under `request_id`
    pub fn acknowledge_request(&self, request_id: u64) -> Option<PendingMessage> {
        let mut messages = self.messages.lock();
        let message_id = messages
            .values()
            .find(|m| m.request_id == request_id)
            .map(|m| m.message_id)?;
        messages.remove(&message_id)
    }

    pub fn get(&self, message_id: i64) -> Option<PendingMessage> {
        self.messages.lock().get(&message_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

impl PendingMessageStore for MemoryPendingStore {
    fn pending_messages(&self) -> RiverResult<Vec<PendingMessage>> {
        Ok(self.messages.lock().values().cloned().collect())
    }

    fn is_pending(&self, request_id: u64) -> bool {
        self.messages
            .lock()
            .values()
            .any(|m| m.request_id == request_id)
    }

    fn reassign_request_id(&self, message_id: i64, request_id: u64) -> RiverResult<()> {
        match self.messages.lock().get_mut(&message_id) {
            Some(message) => {
                message.request_id = request_id;
                Ok(())
            }
            None => Err(river_core::RiverError::not_found(format!(
                "pending message {}",
                message_id
            ))),
        }
    }
}

// ----------------------------------------------------------------------------
// UI Thread and Deferred Responses
// ----------------------------------------------------------------------------

/// A callback to run on the application's UI thread
pub type UiJob = Box<dyn FnOnce() + Send>;

/// Hands callbacks flagged as UI callbacks to the UI thread
pub trait UiDispatcher: Send + Sync {
    fn dispatch(&self, job: UiJob);
}

/// Receives responses to requests that were sent without a live callback,
/// for example after a restart or a retry
pub type DeferredRequestHandler = Arc<dyn Fn(u64, MessageEnvelope) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_tracks_request_ids() {
        let store = MemoryPendingStore::new();
        store.insert(PendingMessage::new(1, 100, Constructor::MESSAGES_SEND, b"a".to_vec()));
        store.insert(PendingMessage::new(2, 200, Constructor::MESSAGES_SEND, b"b".to_vec()));

        assert!(store.is_pending(100));
        store.reassign_request_id(1, 101).unwrap();
        assert!(!store.is_pending(100));
        assert!(store.is_pending(101));

        assert_eq!(store.acknowledge_request(101).unwrap().message_id, 1);
        assert_eq!(store.len(), 1);
        assert!(store.reassign_request_id(1, 102).is_err());
    }

    #[test]
    fn test_pending_message_request_uses_new_id() {
        let message = PendingMessage::new(7, 1, Constructor::MESSAGES_SEND_MEDIA, b"img".to_vec());
        let request = message.to_pending_request(55, Duration::ZERO);

        assert_eq!(request.id, 55);
        assert_eq!(request.envelope.request_id, 55);
        assert_eq!(request.constructor(), Constructor::MESSAGES_SEND_MEDIA);
        assert_eq!(request.envelope.payload, b"img".to_vec());
    }
}
