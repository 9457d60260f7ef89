//! River Core
//!
//! Foundational types for the River messaging SDK transport: wire envelopes and
//! queued request records, transport cryptography (message-key derivation,
//! AES-256-GCM seal/open, composite factorization), time-based request ids,
//! the per-constructor retry policy table, bounded in-memory buffers and the
//! dispatch configuration. Everything here is synchronous; the async dispatch
//! machinery lives in `river-runtime`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod buffer;
pub mod config;
pub mod crypto;
pub mod envelope;
pub mod errors;
pub mod policy;
pub mod sequence;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use buffer::{BoundedFifo, MessageBuffer, UpdateBuffer};
pub use config::{DispatchConfig, DispatchConfigBuilder};
pub use crypto::{MessageKey, SealedPayload, SharedSecret};
pub use envelope::{MessageEnvelope, PendingRequest};
pub use errors::{CryptographicError, QueueError, Result, RiverError, RiverResult, TransportError};
pub use policy::{RetryPolicy, RetryPolicyTable, RetryRule, TimeoutAction};
pub use sequence::{sequential_unique_id, SequenceIdGenerator};
pub use types::{Constructor, NetworkQuality, Timestamp};
