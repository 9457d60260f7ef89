//! Bounded in-memory FIFO buffers
//!
//! Used by the inbound path to park envelopes (responses without a waiting
//! callback, batched updates) until the application drains them.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::envelope::MessageEnvelope;
use crate::{Result, RiverError};

/// Thread-safe FIFO with a fixed capacity
#[derive(Debug)]
pub struct BoundedFifo<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
}

/// Buffer of inbound message envelopes
pub type MessageBuffer = BoundedFifo<MessageEnvelope>;

/// Buffer of inbound update batches
pub type UpdateBuffer = BoundedFifo<Vec<MessageEnvelope>>;

impl<T> BoundedFifo<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Append one item; fails when the buffer is full
    pub fn push(&self, item: T) -> Result<()> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return Err(RiverError::BufferFull {
                capacity: self.capacity,
            });
        }
        items.push_back(item);
        Ok(())
    }

    /// Append a batch atomically: either every item fits or none is added
    pub fn push_many(&self, batch: Vec<T>) -> Result<()> {
        let mut items = self.items.lock();
        if items.len() + batch.len() > self.capacity {
            return Err(RiverError::BufferFull {
                capacity: self.capacity,
            });
        }
        items.extend(batch);
        Ok(())
    }

    /// Take the oldest item
    pub fn pop(&self) -> Result<T> {
        self.items
            .lock()
            .pop_front()
            .ok_or_else(|| RiverError::not_found("buffered item"))
    }

    /// Take every buffered item, oldest first
    pub fn pop_all(&self) -> Vec<T> {
        self.items.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Constructor;

    fn envelope(id: u64) -> MessageEnvelope {
        MessageEnvelope::new(Constructor::ERROR, id, Vec::new())
    }

    #[test]
    fn test_fifo_order_and_empty_pop() {
        let buffer = MessageBuffer::new(4);
        buffer.push(envelope(1)).unwrap();
        buffer.push(envelope(2)).unwrap();

        assert_eq!(buffer.pop().unwrap().request_id, 1);
        assert_eq!(buffer.pop().unwrap().request_id, 2);
        assert!(matches!(buffer.pop(), Err(RiverError::NotFound { .. })));
    }

    #[test]
    fn test_capacity_is_enforced() {
        let buffer = MessageBuffer::new(2);
        buffer.push_many(vec![envelope(1), envelope(2)]).unwrap();
        assert!(matches!(
            buffer.push(envelope(3)),
            Err(RiverError::BufferFull { capacity: 2 })
        ));

        let ids: Vec<u64> = buffer.pop_all().iter().map(|e| e.request_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_push_many_is_all_or_nothing() {
        let buffer = UpdateBuffer::new(1);
        buffer.push(vec![envelope(1)]).unwrap();
        assert!(buffer.push_many(vec![vec![envelope(2)]]).is_err());
        assert_eq!(buffer.len(), 1);
    }
}
