//! Request/response correlation
//!
//! Every request that expects an answer gets a [`CallbackRecord`] keyed by its
//! request id. The record owns a single-use response slot: the inbound path
//! writes the response into it exactly once and the executor waiting on the
//! request reads it exactly once.

use std::collections::HashMap;
use std::sync::Arc;

use core::time::Duration;
use parking_lot::Mutex;
use river_core::{Constructor, MessageEnvelope, Timestamp};
use tokio::sync::oneshot;
use tracing::debug;

/// Invoked with the response envelope
pub type SuccessHandler = Arc<dyn Fn(MessageEnvelope) + Send + Sync>;

/// Invoked when no response arrived in time, or the send itself failed
pub type TimeoutHandler = Arc<dyn Fn() + Send + Sync>;

// ----------------------------------------------------------------------------
// Callback Record
// ----------------------------------------------------------------------------

/// Callbacks and response slot for one outstanding request
pub struct CallbackRecord {
    pub request_id: u64,
    pub constructor: Constructor,
    pub on_success: Option<SuccessHandler>,
    pub on_timeout: Option<TimeoutHandler>,
    pub created_at: Timestamp,
    pub timeout: Duration,
    /// Run the callbacks through the UI dispatcher instead of inline
    pub ui_callback: bool,
    sender: Mutex<Option<oneshot::Sender<MessageEnvelope>>>,
    receiver: Mutex<Option<oneshot::Receiver<MessageEnvelope>>>,
}

impl CallbackRecord {
    /// Record without handlers and with a fresh response slot
    pub fn new(request_id: u64, constructor: Constructor, timeout: Duration) -> Self {
        let (sender, receiver) = oneshot::channel();
        Self {
            request_id,
            constructor,
            on_success: None,
            on_timeout: None,
            created_at: Timestamp::now(),
            timeout,
            ui_callback: false,
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
        }
    }

    pub fn with_success_handler(mut self, handler: SuccessHandler) -> Self {
        self.on_success = Some(handler);
        self
    }

    pub fn with_timeout_handler(mut self, handler: TimeoutHandler) -> Self {
        self.on_timeout = Some(handler);
        self
    }

    pub fn with_ui_callback(mut self, ui_callback: bool) -> Self {
        self.ui_callback = ui_callback;
        self
    }

    /// Write the response into the slot
    ///
    /// Returns `false` when the slot was already written or its reader is gone.
    pub fn deliver(&self, response: MessageEnvelope) -> bool {
        match self.sender.lock().take() {
            Some(sender) => sender.send(response).is_ok(),
            None => false,
        }
    }

    /// Take the reading end of the slot; only the first call gets it
    pub fn take_receiver(&self) -> Option<oneshot::Receiver<MessageEnvelope>> {
        self.receiver.lock().take()
    }

    /// Whether the slot has already been written
    pub fn is_answered(&self) -> bool {
        self.sender.lock().is_none()
    }
}

impl core::fmt::Debug for CallbackRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CallbackRecord")
            .field("request_id", &self.request_id)
            .field("constructor", &self.constructor)
            .field("has_success_handler", &self.on_success.is_some())
            .field("has_timeout_handler", &self.on_timeout.is_some())
            .field("created_at", &self.created_at)
            .field("timeout", &self.timeout)
            .field("ui_callback", &self.ui_callback)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Callback Registry
// ----------------------------------------------------------------------------

/// Map of outstanding requests, at most one record per request id
#[derive(Debug, Default)]
pub struct CallbackRegistry {
    records: Mutex<HashMap<u64, Arc<CallbackRecord>>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, replacing any previous record with the same id
    pub fn register(&self, record: CallbackRecord) -> Arc<CallbackRecord> {
        let record = Arc::new(record);
        let previous = self
            .records
            .lock()
            .insert(record.request_id, Arc::clone(&record));
        if previous.is_some() {
            debug!("Replaced callback record for request {}", record.request_id);
        }
        record
    }

    pub fn get(&self, request_id: u64) -> Option<Arc<CallbackRecord>> {
        self.records.lock().get(&request_id).cloned()
    }

    /// Remove a record; removing an absent id is a no-op
    pub fn remove(&self, request_id: u64) -> Option<Arc<CallbackRecord>> {
        self.records.lock().remove(&request_id)
    }

    /// Route an inbound response to the record waiting for it
    ///
    /// Returns `false` when no record matches or the record was already answered.
    pub fn deliver(&self, response: MessageEnvelope) -> bool {
        let record = self.get(response.request_id);
        match record {
            Some(record) => record.deliver(response),
            None => false,
        }
    }

    /// Retire a record whose wait has ended and close its slot
    ///
    /// A response written before the slot closed is returned; later ones are
    /// refused by [`CallbackRegistry::deliver`].
    pub fn settle(
        &self,
        request_id: u64,
        mut receiver: oneshot::Receiver<MessageEnvelope>,
    ) -> Option<MessageEnvelope> {
        self.remove(request_id);
        receiver.close();
        receiver.try_recv().ok()
    }

    pub fn contains(&self, request_id: u64) -> bool {
        self.records.lock().contains_key(&request_id)
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn response(id: u64) -> MessageEnvelope {
        MessageEnvelope::new(Constructor::MESSAGES_SEND, id, b"ok".to_vec())
    }

    #[test]
    fn test_double_removal_is_noop() {
        let registry = CallbackRegistry::new();
        registry.register(CallbackRecord::new(1, Constructor::CONTACTS_GET, Duration::ZERO));

        assert!(registry.remove(1).is_some());
        assert!(registry.remove(1).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_replaces_existing_record() {
        let registry = CallbackRegistry::new();
        let first = registry.register(CallbackRecord::new(
            5,
            Constructor::CONTACTS_GET,
            Duration::from_secs(1),
        ));
        let second = registry.register(CallbackRecord::new(
            5,
            Constructor::CONTACTS_GET,
            Duration::from_secs(2),
        ));

        assert_eq!(registry.len(), 1);
        let current = registry.get(5).unwrap();
        assert!(Arc::ptr_eq(&current, &second));
        assert!(!Arc::ptr_eq(&current, &first));
    }

    #[tokio::test]
    async fn test_slot_accepts_a_single_response() {
        let registry = CallbackRegistry::new();
        let record = registry.register(CallbackRecord::new(
            9,
            Constructor::MESSAGES_SEND,
            Duration::from_secs(1),
        ));
        let receiver = record.take_receiver().expect("first take");
        assert!(record.take_receiver().is_none());

        assert!(registry.deliver(response(9)));
        assert!(record.is_answered());
        assert!(!registry.deliver(response(9)));

        let delivered = receiver.await.unwrap();
        assert_eq!(delivered.request_id, 9);
    }

    #[test]
    fn test_settle_recovers_response_written_before_close() {
        let registry = CallbackRegistry::new();
        let record = registry.register(CallbackRecord::new(
            11,
            Constructor::MESSAGES_SEND,
            Duration::from_millis(1),
        ));
        let receiver = record.take_receiver().unwrap();

        // Response lands after the wait expired but before the record is retired
        assert!(registry.deliver(response(11)));

        let recovered = registry.settle(11, receiver).expect("response recovered");
        assert_eq!(recovered.request_id, 11);
        assert!(!registry.contains(11));
    }

    #[test]
    fn test_settle_refuses_late_response_to_held_record() {
        let registry = CallbackRegistry::new();
        let record = registry.register(CallbackRecord::new(
            12,
            Constructor::MESSAGES_SEND,
            Duration::from_millis(1),
        ));
        let receiver = record.take_receiver().unwrap();

        assert!(registry.settle(12, receiver).is_none());

        // A router that looked the record up before it was retired
        assert!(!record.deliver(response(12)));
        assert!(!registry.deliver(response(12)));
    }

    #[test]
    fn test_deliver_without_record_is_refused() {
        let registry = CallbackRegistry::new();
        assert!(!registry.deliver(response(42)));
    }

    #[test]
    fn test_handlers_are_kept_on_record() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let record = CallbackRecord::new(3, Constructor::AUTH_LOGIN, Duration::ZERO)
            .with_timeout_handler(Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .with_ui_callback(true);

        assert!(record.on_success.is_none());
        assert!(record.ui_callback);
        (record.on_timeout.as_ref().unwrap())();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
