//! River Runtime
//!
//! Durable request dispatch for the River messaging SDK:
//! - `DispatchQueue`: crash-tolerant request queue drained by a distributor
//!   task that follows network availability, with bounded executors and
//!   per-constructor retry rules
//! - `CallbackRegistry`: correlation of inbound responses with outstanding
//!   requests
//! - Ports (`NetworkPort`, `PendingMessageStore`, `UiDispatcher`) through which
//!   the queue reaches the rest of the application
//!
//! Types, cryptography and configuration come from `river-core`.

pub mod builder;
pub mod cancellation;
pub mod dispatcher;
pub mod ports;
pub mod registry;
pub mod storage;

pub use builder::DispatchQueueBuilder;
pub use cancellation::CancellationSet;
pub use dispatcher::{CommandRequest, DispatchQueue, ResponseRoute};
pub use ports::{
    DeferredRequestHandler, MemoryPendingStore, NetworkPort, PendingMessage, PendingMessageStore,
    UiDispatcher, UiJob,
};
pub use registry::{CallbackRecord, CallbackRegistry, SuccessHandler, TimeoutHandler};
pub use storage::DurableQueue;

// Re-export core types for convenience
pub use river_core::{
    Constructor, DispatchConfig, MessageEnvelope, NetworkQuality, PendingRequest, RetryPolicy,
    RetryPolicyTable, RetryRule, RiverError, RiverResult, TimeoutAction,
};
