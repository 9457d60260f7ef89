//! Dispatch Queue Builder
//!
//! Wires a configuration and the application's ports into a [`DispatchQueue`].

use std::sync::Arc;

use river_core::{DispatchConfig, MessageEnvelope, RetryPolicy, RetryPolicyTable, RiverResult};
use tokio::runtime::Handle;
use tracing::info;

use crate::dispatcher::{DispatchParts, DispatchQueue};
use crate::ports::{DeferredRequestHandler, NetworkPort, PendingMessageStore, UiDispatcher};
use crate::storage::DurableQueue;

// ----------------------------------------------------------------------------
// Dispatch Queue Builder
// ----------------------------------------------------------------------------

/// Builder for [`DispatchQueue`]
pub struct DispatchQueueBuilder {
    config: DispatchConfig,
    network: Arc<dyn NetworkPort>,
    store: Option<Arc<dyn PendingMessageStore>>,
    policy: Arc<dyn RetryPolicy>,
    deferred: Option<DeferredRequestHandler>,
    ui: Option<Arc<dyn UiDispatcher>>,
}

impl DispatchQueueBuilder {
    /// Start with the messenger retry policy and no optional ports
    pub fn new(config: DispatchConfig, network: Arc<dyn NetworkPort>) -> Self {
        Self {
            config,
            network,
            store: None,
            policy: Arc::new(RetryPolicyTable::messenger_defaults()),
            deferred: None,
            ui: None,
        }
    }

    /// Message store consulted for pending sends
    pub fn with_store(mut self, store: Arc<dyn PendingMessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Receiver for responses that arrive without a registered callback
    pub fn with_deferred_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(u64, MessageEnvelope) + Send + Sync + 'static,
    {
        self.deferred = Some(Arc::new(handler));
        self
    }

    pub fn with_ui_dispatcher(mut self, ui: Arc<dyn UiDispatcher>) -> Self {
        self.ui = Some(ui);
        self
    }

    /// Validate the configuration, open the queue and build the handle
    ///
    /// Must run inside a Tokio runtime; the handle spawns its tasks there.
    /// The queue is not drained until [`DispatchQueue::start`] is called.
    pub async fn build(self) -> RiverResult<DispatchQueue> {
        self.config.validate()?;

        let queue = DurableQueue::open_with_retry(
            &self.config.data_dir,
            self.config.open_attempts,
            self.config.open_retry_delay,
        )
        .await?;
        info!(
            "Opened dispatch queue at {} ({} queued requests)",
            self.config.data_dir.display(),
            queue.len()
        );

        Ok(DispatchQueue::from_parts(DispatchParts {
            config: self.config,
            queue,
            network: self.network,
            store: self.store,
            policy: self.policy,
            deferred: self.deferred,
            ui: self.ui,
            runtime: Handle::current(),
        }))
    }
}
