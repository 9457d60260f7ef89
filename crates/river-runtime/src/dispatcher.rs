//! Durable dispatch queue
//!
//! Requests are appended to the on-disk queue and drained by a single
//! distributor task. The distributor waits while the network is unusable,
//! skips cancelled requests and hands every other request to an executor
//! task. Executors are bounded by a semaphore; each one sends its request and
//! races the response slot against the request timeout. On timeout the retry
//! policy decides whether the request goes back to the queue.
//!
//! Realtime requests bypass the queue entirely and are sent immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use core::time::Duration;
use parking_lot::Mutex;
use river_core::{
    Constructor, DispatchConfig, MessageBuffer, MessageEnvelope, PendingRequest, QueueError,
    RetryPolicy, RiverError, RiverResult, SequenceIdGenerator, TimeoutAction,
};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::cancellation::CancellationSet;
use crate::ports::{DeferredRequestHandler, NetworkPort, PendingMessageStore, UiDispatcher, UiJob};
use crate::registry::{CallbackRecord, CallbackRegistry, SuccessHandler, TimeoutHandler};
use crate::storage::DurableQueue;

// ----------------------------------------------------------------------------
// Command Requests
// ----------------------------------------------------------------------------

/// An application request together with its callbacks
pub struct CommandRequest {
    pub request_id: u64,
    pub constructor: Constructor,
    pub payload: Vec<u8>,
    /// Zero selects the configured default
    pub timeout: Duration,
    pub on_success: Option<SuccessHandler>,
    pub on_timeout: Option<TimeoutHandler>,
    pub ui_callback: bool,
}

impl CommandRequest {
    pub fn new(request_id: u64, constructor: Constructor, payload: Vec<u8>) -> Self {
        Self {
            request_id,
            constructor,
            payload,
            timeout: Duration::ZERO,
            on_success: None,
            on_timeout: None,
            ui_callback: false,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn on_success<F>(mut self, handler: F) -> Self
    where
        F: Fn(MessageEnvelope) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(handler));
        self
    }

    pub fn on_timeout<F>(mut self, handler: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_timeout = Some(Arc::new(handler));
        self
    }

    /// Run the callbacks through the UI dispatcher
    pub fn ui_callback(mut self, ui_callback: bool) -> Self {
        self.ui_callback = ui_callback;
        self
    }

    fn into_parts(self, timeout: Duration) -> (CallbackRecord, MessageEnvelope) {
        let mut record = CallbackRecord::new(self.request_id, self.constructor, timeout)
            .with_ui_callback(self.ui_callback);
        record.on_success = self.on_success;
        record.on_timeout = self.on_timeout;
        let envelope = MessageEnvelope::new(self.constructor, self.request_id, self.payload);
        (record, envelope)
    }
}

impl core::fmt::Debug for CommandRequest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CommandRequest")
            .field("request_id", &self.request_id)
            .field("constructor", &self.constructor)
            .field("payload_len", &self.payload.len())
            .field("timeout", &self.timeout)
            .field("ui_callback", &self.ui_callback)
            .finish()
    }
}

/// Where an inbound response ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseRoute {
    /// Handed to the request waiting for it
    Delivered,
    /// Nobody waits for it; parked in the orphaned response buffer
    Orphaned,
    /// Nobody waits for it and the orphaned response buffer is full
    Discarded,
}

// ----------------------------------------------------------------------------
// Shared State
// ----------------------------------------------------------------------------

pub(crate) struct DispatchParts {
    pub config: DispatchConfig,
    pub queue: DurableQueue,
    pub network: Arc<dyn NetworkPort>,
    pub store: Option<Arc<dyn PendingMessageStore>>,
    pub policy: Arc<dyn RetryPolicy>,
    pub deferred: Option<DeferredRequestHandler>,
    pub ui: Option<Arc<dyn UiDispatcher>>,
    pub runtime: Handle,
}

struct Shared {
    config: DispatchConfig,
    queue: DurableQueue,
    registry: CallbackRegistry,
    cancellations: CancellationSet,
    network: Arc<dyn NetworkPort>,
    store: Option<Arc<dyn PendingMessageStore>>,
    policy: Arc<dyn RetryPolicy>,
    deferred: Option<DeferredRequestHandler>,
    ui: Option<Arc<dyn UiDispatcher>>,
    runtime: Handle,
    /// Distributor state: `true` while a distributor task is draining
    running: Mutex<bool>,
    started: AtomicBool,
    stopped: AtomicBool,
    permits: Arc<Semaphore>,
    sequence: SequenceIdGenerator,
    orphans: MessageBuffer,
}

// ----------------------------------------------------------------------------
// Dispatch Queue
// ----------------------------------------------------------------------------

/// Handle to the dispatch machinery; cheap to clone
#[derive(Clone)]
pub struct DispatchQueue {
    shared: Arc<Shared>,
}

impl DispatchQueue {
    pub(crate) fn from_parts(parts: DispatchParts) -> Self {
        let permits = Arc::new(Semaphore::new(parts.config.max_in_flight));
        let orphans = MessageBuffer::new(parts.config.orphan_buffer_capacity);
        Self {
            shared: Arc::new(Shared {
                config: parts.config,
                queue: parts.queue,
                registry: CallbackRegistry::new(),
                cancellations: CancellationSet::new(),
                network: parts.network,
                store: parts.store,
                policy: parts.policy,
                deferred: parts.deferred,
                ui: parts.ui,
                runtime: parts.runtime,
                running: Mutex::new(false),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                permits,
                sequence: SequenceIdGenerator::new(),
                orphans,
            }),
        }
    }

    /// Persist a request and schedule it for dispatch
    ///
    /// The callback record is registered before the request reaches the queue,
    /// so a fast response always finds it. Fails only when the request cannot
    /// be persisted or the queue was stopped.
    pub fn execute_command(&self, request: CommandRequest) -> RiverResult<()> {
        let shared = &self.shared;
        if shared.stopped.load(Ordering::SeqCst) {
            return Err(QueueError::Stopped.into());
        }

        let timeout = request.timeout;
        let (record, envelope) = request.into_parts(timeout);
        let request_id = envelope.request_id;
        let constructor = envelope.constructor;
        shared.registry.register(record);

        let pending = PendingRequest::new(envelope, timeout);
        if let Err(e) = shared.queue.enqueue(&pending) {
            shared.registry.remove(request_id);
            error!("Failed to persist request {}: {}", request_id, e);
            return Err(e);
        }
        debug!("Enqueued request {} ({})", request_id, constructor);

        shared.arm();
        Ok(())
    }

    /// Send a request immediately, bypassing the queue
    ///
    /// With `blocking` the call waits for the response (or the realtime
    /// timeout) and reports the outcome; otherwise the exchange runs detached
    /// and only the callbacks observe it.
    pub async fn execute_realtime_command(
        &self,
        request: CommandRequest,
        blocking: bool,
    ) -> RiverResult<()> {
        if self.shared.stopped.load(Ordering::SeqCst) {
            return Err(QueueError::Stopped.into());
        }

        let (record, envelope) = request.into_parts(self.shared.config.realtime_timeout);
        let record = self.shared.registry.register(record);

        if blocking {
            self.shared.run_realtime(record, envelope).await
        } else {
            let shared = Arc::clone(&self.shared);
            self.shared.runtime.spawn(async move {
                if let Err(e) = shared.run_realtime(record, envelope).await {
                    debug!("Detached realtime request failed: {}", e);
                }
            });
            Ok(())
        }
    }

    /// Skip the next dispatch attempt of a queued request
    ///
    /// Requests already handed to an executor are not affected.
    pub fn cancel_request(&self, request_id: u64) {
        info!("Cancelling request {}", request_id);
        self.shared.cancellations.cancel_next_attempt(request_id);
    }

    /// Whether a cancellation mark is waiting to be consumed
    pub fn is_request_cancelled(&self, request_id: u64) -> bool {
        self.shared.cancellations.is_marked(request_id)
    }

    /// Reconcile the persisted queue with the message store, then start
    /// draining it
    pub fn start(&self) -> RiverResult<()> {
        let shared = &self.shared;
        if shared.stopped.load(Ordering::SeqCst) {
            return Err(QueueError::Stopped.into());
        }
        if shared.started.load(Ordering::SeqCst) {
            return Ok(());
        }

        shared.reconcile()?;
        shared.started.store(true, Ordering::SeqCst);
        info!("Dispatch queue started with {} queued requests", shared.queue.len());
        shared.arm();
        Ok(())
    }

    /// Stop dispatching and flush the queue to disk
    ///
    /// The distributor exits at its next pass and new requests are refused.
    /// Executors already running finish their current attempt.
    pub fn stop(&self) -> RiverResult<()> {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Stopping dispatch queue");
        self.shared.queue.sync()
    }

    /// Discard every persisted request
    pub fn drop_queue(&self) -> RiverResult<()> {
        self.shared.queue.clear()
    }

    /// Route an inbound response to the request waiting for it
    pub fn deliver_response(&self, response: MessageEnvelope) -> ResponseRoute {
        let shared = &self.shared;
        if shared.registry.deliver(response.clone()) {
            return ResponseRoute::Delivered;
        }

        let request_id = response.request_id;
        match shared.orphans.push(response) {
            Ok(()) => {
                debug!("No callback waiting for response {}, buffered", request_id);
                ResponseRoute::Orphaned
            }
            Err(e) => {
                warn!("Discarding response {}: {}", request_id, e);
                ResponseRoute::Discarded
            }
        }
    }

    /// Take every buffered response that had no waiting callback
    pub fn drain_orphaned_responses(&self) -> Vec<MessageEnvelope> {
        self.shared.orphans.pop_all()
    }

    pub fn registry(&self) -> &CallbackRegistry {
        &self.shared.registry
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    /// Snapshot of the queued requests, oldest first
    pub fn queued_requests(&self) -> RiverResult<Vec<PendingRequest>> {
        self.shared.queue.peek_all()
    }

    /// Whether a distributor task is currently draining the queue
    pub fn is_running(&self) -> bool {
        *self.shared.running.lock()
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.shared.config
    }
}

impl core::fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("data_dir", &self.shared.config.data_dir)
            .field("queued", &self.shared.queue.len())
            .field("callbacks", &self.shared.registry.len())
            .field("running", &self.is_running())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Distributor
// ----------------------------------------------------------------------------

impl Shared {
    /// Spawn the distributor unless one is already draining
    ///
    /// Callers append to the queue first and arm afterwards. The distributor
    /// checks for an empty queue under the same lock before going idle, so
    /// an append can never be left behind without a distributor.
    fn arm(self: &Arc<Self>) {
        if !self.started.load(Ordering::SeqCst) || self.stopped.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut running = self.running.lock();
            if *running {
                return;
            }
            *running = true;
        }

        let shared = Arc::clone(self);
        self.runtime.spawn(async move { shared.distribute().await });
    }

    async fn distribute(self: Arc<Self>) {
        debug!("Distributor started");
        loop {
            if !self.wait_for_network().await {
                *self.running.lock() = false;
                debug!("Distributor exiting, queue stopped");
                return;
            }

            {
                let mut running = self.running.lock();
                if self.queue.is_empty() {
                    *running = false;
                    debug!("Queue drained, distributor idle");
                    return;
                }
            }

            let request = match self.queue.dequeue() {
                Ok(Some(request)) => request,
                Ok(None) => continue,
                Err(e) => {
                    error!("Failed to dequeue request, pausing distributor: {}", e);
                    *self.running.lock() = false;
                    return;
                }
            };

            if self.cancellations.take(request.id) {
                info!("Request {} was cancelled, discarding", request.id);
                self.registry.remove(request.id);
                continue;
            }

            let permit = match Arc::clone(&self.permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    self.requeue(&request);
                    *self.running.lock() = false;
                    return;
                }
            };

            if self.stopped.load(Ordering::SeqCst) {
                self.requeue(&request);
                continue;
            }

            let shared = Arc::clone(&self);
            self.runtime.spawn(async move {
                shared.execute(request).await;
                drop(permit);
            });
        }
    }

    /// Poll until the network is usable; `false` once the queue is stopped
    async fn wait_for_network(&self) -> bool {
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return false;
            }
            let quality = self.network.quality();
            if quality.is_usable() {
                return true;
            }
            debug!("Network is {}, distributor waiting", quality);
            tokio::time::sleep(self.config.network_poll_interval).await;
        }
    }

    // ------------------------------------------------------------------------
    // Executor
    // ------------------------------------------------------------------------

    async fn execute(self: Arc<Self>, mut request: PendingRequest) {
        let request_id = request.id;
        let timeout = if request.timeout.is_zero() {
            self.config.default_request_timeout
        } else {
            request.timeout
        };
        let record = match self.registry.get(request_id) {
            Some(record) => record,
            None => self.registry.register(self.deferred_record(&request, timeout)),
        };

        if let Err(e) = self.network.send(&request.envelope).await {
            warn!("Send of request {} failed, requeueing: {}", request_id, e);
            self.requeue(&request);
            return;
        }

        let mut receiver = match record.take_receiver() {
            Some(receiver) => receiver,
            None => {
                warn!("Response slot of request {} already taken", request_id);
                return;
            }
        };

        let answered = match tokio::time::timeout(timeout, &mut receiver).await {
            Ok(Ok(response)) => {
                self.registry.remove(request_id);
                Some(response)
            }
            _ => self.registry.settle(request_id, receiver),
        };

        match answered {
            Some(response) => self.complete(&record, response),
            None => {
                warn!(
                    "Request {} ({}) timed out after {:?}",
                    request_id,
                    request.constructor(),
                    timeout
                );
                self.fire_timeout(&record);

                request.attempts = request.attempts.saturating_add(1);
                self.apply_retry_rule(request);
            }
        }
    }

    /// Record for a request nobody registered a callback for in this process
    fn deferred_record(&self, request: &PendingRequest, timeout: Duration) -> CallbackRecord {
        let record = CallbackRecord::new(request.id, request.constructor(), timeout);
        match &self.deferred {
            Some(handler) => {
                let handler = Arc::clone(handler);
                let request_id = request.id;
                record.with_success_handler(Arc::new(move |response| handler(request_id, response)))
            }
            None => record,
        }
    }

    fn apply_retry_rule(self: &Arc<Self>, request: PendingRequest) {
        let rule = self.policy.rule_for(request.constructor());
        if !rule.allows_attempt(request.attempts) {
            info!(
                "Dropping request {} after {} timed out attempts",
                request.id, request.attempts
            );
            return;
        }

        match rule.on_timeout {
            TimeoutAction::Drop => {
                debug!("Request {} not retried", request.id);
            }
            TimeoutAction::Requeue => self.requeue(&request),
            TimeoutAction::RequeueWhilePending => {
                let pending = self
                    .store
                    .as_ref()
                    .map(|store| store.is_pending(request.id))
                    .unwrap_or(false);
                if pending {
                    self.requeue(&request);
                } else {
                    debug!("Request {} no longer pending, not retried", request.id);
                }
            }
        }
    }

    /// Put a request back at the tail of the queue
    fn requeue(self: &Arc<Self>, request: &PendingRequest) {
        match self.queue.enqueue(request) {
            Ok(()) => {
                debug!("Requeued request {}", request.id);
                self.arm();
            }
            Err(e) => error!("Failed to requeue request {}: {}", request.id, e),
        }
    }

    // ------------------------------------------------------------------------
    // Realtime Path
    // ------------------------------------------------------------------------

    async fn run_realtime(
        &self,
        record: Arc<CallbackRecord>,
        envelope: MessageEnvelope,
    ) -> RiverResult<()> {
        let request_id = envelope.request_id;
        let timeout = record.timeout;
        let mut receiver = record.take_receiver().ok_or_else(|| {
            RiverError::not_found(format!("response slot for request {}", request_id))
        })?;

        if let Err(e) = self.network.send(&envelope).await {
            warn!("Realtime send of request {} failed: {}", request_id, e);
            self.registry.remove(request_id);
            self.fire_timeout(&record);
            return Err(if matches!(e, RiverError::Transport(_)) {
                e
            } else {
                RiverError::send_failed(request_id, e.to_string())
            });
        }

        let answered = match tokio::time::timeout(timeout, &mut receiver).await {
            Ok(Ok(response)) => {
                self.registry.remove(request_id);
                Some(response)
            }
            _ => self.registry.settle(request_id, receiver),
        };

        match answered {
            Some(response) => {
                self.complete(&record, response);
                Ok(())
            }
            None => {
                warn!("Realtime request {} timed out after {:?}", request_id, timeout);
                self.fire_timeout(&record);
                Err(RiverError::timeout(request_id, timeout))
            }
        }
    }

    // ------------------------------------------------------------------------
    // Callbacks
    // ------------------------------------------------------------------------

    fn complete(&self, record: &CallbackRecord, response: MessageEnvelope) {
        match &record.on_success {
            Some(handler) => {
                let handler = Arc::clone(handler);
                self.run_callback(record.ui_callback, Box::new(move || handler(response)));
            }
            None => warn!(
                "Response to request {} has no handler, dropping",
                record.request_id
            ),
        }
    }

    fn fire_timeout(&self, record: &CallbackRecord) {
        if let Some(handler) = &record.on_timeout {
            let handler = Arc::clone(handler);
            self.run_callback(record.ui_callback, Box::new(move || handler()));
        }
    }

    fn run_callback(&self, ui_callback: bool, job: UiJob) {
        match (&self.ui, ui_callback) {
            (Some(ui), true) => ui.dispatch(job),
            _ => job(),
        }
    }

    // ------------------------------------------------------------------------
    // Startup Reconciliation
    // ------------------------------------------------------------------------

    /// Replace stale persisted sends with fresh copies from the message store
    fn reconcile(&self) -> RiverResult<()> {
        // Without a store there is nothing to rebuild sends from, so the
        // persisted ones are the only copy and stay queued.
        let Some(store) = &self.store else {
            info!(
                "Reconciled queue: no message store, {} requests kept",
                self.queue.len()
            );
            return Ok(());
        };

        // Read the store before touching the queue so a store error leaves
        // the persisted requests in place.
        let pending = store.pending_messages()?;

        let drained = self.queue.drain()?;
        let (stale, kept): (Vec<_>, Vec<_>) = drained
            .into_iter()
            .partition(|request| self.policy.rule_for(request.constructor()).reconcile_on_start);

        let mut rebuilt = 0usize;
        let rebuild = pending.into_iter().try_for_each(|message| {
            let request_id = self.sequence.next_request_id();
            store.reassign_request_id(message.message_id, request_id)?;
            self.queue
                .enqueue(&message.to_pending_request(request_id, Duration::ZERO))?;
            rebuilt += 1;
            Ok::<_, RiverError>(())
        });

        if let Err(e) = rebuild {
            // Put back what was drained; the stale sends too, since their
            // replacements may not all have been queued.
            warn!("Queue reconciliation failed after {} rebuilt sends: {}", rebuilt, e);
            for request in stale.iter().chain(kept.iter()) {
                self.queue.enqueue(request)?;
            }
            return Err(e);
        }

        for request in &kept {
            self.queue.enqueue(request)?;
        }

        info!(
            "Reconciled queue: {} stale sends discarded, {} rebuilt from message store, {} kept",
            stale.len(),
            rebuilt,
            kept.len()
        );
        Ok(())
    }
}
