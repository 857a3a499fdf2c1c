//! Execution channel.
//!
//! Owns the lifecycle of one execution context at a time:
//!
//! ```text
//! Uninitialized -> Initializing -> Ready
//!                      |             |
//!                      v             v (transport failure)
//!                    Failed <--------+
//!
//! any state -> Closed (close())
//! Failed | Closed -> Initializing (next open())
//! ```
//!
//! Opening spawns a context and runs the init handshake. Only after the
//! context answers `ready` does a dispatcher task start fanning its messages
//! out to subscribers. Every attempt carries a generation number; an attempt
//! or dispatcher whose generation is stale (because `close()` ran in the
//! meantime) changes nothing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use vproc_models::{WorkerRequest, WorkerResponse};

use crate::context::{ContextEvent, ContextHandle, ContextSpawner};
use crate::error::ChannelError;
use crate::metrics;

/// Lifecycle of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
    Closed,
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::Uninitialized => "uninitialized",
            ChannelState::Initializing => "initializing",
            ChannelState::Ready => "ready",
            ChannelState::Failed => "failed",
            ChannelState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What subscribers receive.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Message(WorkerResponse),
    /// The context started by `generation` died; the channel has already
    /// closed itself
    TransportError { generation: u64, reason: String },
}

pub type EventHandler = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

type AttemptOutcome = Option<Result<(), ChannelError>>;

struct Inner {
    state: ChannelState,
    generation: u64,
    requests: Option<mpsc::UnboundedSender<WorkerRequest>>,
    dispatcher: Option<JoinHandle<()>>,
    attempt: Option<watch::Receiver<AttemptOutcome>>,
}

struct Shared {
    inner: Mutex<Inner>,
    handlers: Mutex<Vec<(u64, EventHandler)>>,
    next_handler_id: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn handlers(&self) -> MutexGuard<'_, Vec<(u64, EventHandler)>> {
        self.handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Deliver to every handler in registration order. Handlers run without
    /// any channel lock held, so they may subscribe, send or close.
    fn notify(&self, event: &ChannelEvent) {
        let handlers: Vec<EventHandler> = self
            .handlers()
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            handler(event);
        }
    }

    /// Transport failure of the context started by `generation`.
    fn fail(&self, generation: u64, reason: &str) {
        {
            let mut inner = self.lock();
            if inner.generation != generation || inner.state != ChannelState::Ready {
                return;
            }
            inner.state = ChannelState::Failed;
            inner.requests = None;
            // Detach rather than abort: this usually runs on the dispatcher itself
            inner.dispatcher = None;
        }
        warn!(reason, "Execution context failed");
        metrics::record_transport_failure();
        self.notify(&ChannelEvent::TransportError {
            generation,
            reason: reason.to_string(),
        });
    }
}

/// Removes its handler when dropped.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    shared: Weak<Shared>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handlers().retain(|(id, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Request/response channel to one execution context at a time.
pub struct ExecutionChannel {
    shared: Arc<Shared>,
    spawner: Arc<dyn ContextSpawner>,
    init_timeout: Duration,
}

impl ExecutionChannel {
    pub fn new(spawner: Arc<dyn ContextSpawner>, init_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: ChannelState::Uninitialized,
                    generation: 0,
                    requests: None,
                    dispatcher: None,
                    attempt: None,
                }),
                handlers: Mutex::new(Vec::new()),
                next_handler_id: AtomicU64::new(1),
            }),
            spawner,
            init_timeout,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.shared.lock().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ChannelState::Ready
    }

    /// Generation of the current (or last) context. Bumped by every open
    /// attempt and by `close()`.
    pub fn generation(&self) -> u64 {
        self.shared.lock().generation
    }

    /// Bring the channel to `Ready`.
    ///
    /// No-op when already ready. Concurrent callers share the in-flight
    /// attempt and all see its outcome. After a failure or `close()` this
    /// starts over with a fresh context. The attempt runs on its own task,
    /// so dropping the returned future does not cancel it.
    pub async fn open(&self) -> Result<(), ChannelError> {
        let mut outcome = {
            let mut inner = self.shared.lock();
            match (inner.state, inner.attempt.clone()) {
                (ChannelState::Ready, _) => return Ok(()),
                (ChannelState::Initializing, Some(attempt)) => attempt,
                _ => self.start_attempt(&mut inner),
            }
        };

        let result = match outcome.wait_for(Option::is_some).await {
            Ok(done) => done.clone().unwrap_or(Err(ChannelError::Closed)),
            Err(_) => Err(ChannelError::Closed),
        };
        result
    }

    fn start_attempt(&self, inner: &mut Inner) -> watch::Receiver<AttemptOutcome> {
        inner.generation += 1;
        inner.state = ChannelState::Initializing;
        let generation = inner.generation;

        let (done_tx, done_rx) = watch::channel(None);
        inner.attempt = Some(done_rx.clone());

        debug!(generation, "Starting execution context");
        let shared = Arc::clone(&self.shared);
        let spawner = Arc::clone(&self.spawner);
        let timeout = self.init_timeout;
        tokio::spawn(async move {
            let result = establish(shared, spawner, timeout, generation).await;
            done_tx.send_replace(Some(result));
        });

        done_rx
    }

    /// Fire-and-forget. Dropped when the channel is not ready.
    pub fn send(&self, request: WorkerRequest) -> bool {
        self.send_if(request, None)
    }

    /// Like [`send`](Self::send), but only to the context of `generation`.
    /// Dropped when that context has since been replaced or closed.
    pub fn send_on(&self, generation: u64, request: WorkerRequest) -> bool {
        self.send_if(request, Some(generation))
    }

    fn send_if(&self, request: WorkerRequest, generation: Option<u64>) -> bool {
        let inner = self.shared.lock();
        if generation.is_some_and(|g| g != inner.generation) {
            debug!(
                message = request.type_name(),
                "Context replaced since submission, message dropped"
            );
            return false;
        }
        match (&inner.state, &inner.requests) {
            (ChannelState::Ready, Some(requests)) => {
                let type_name = request.type_name();
                if requests.send(request).is_err() {
                    debug!(message = type_name, "Execution context gone, message dropped");
                    return false;
                }
                true
            }
            _ => {
                debug!(
                    state = %inner.state,
                    message = request.type_name(),
                    "Channel not ready, message dropped"
                );
                false
            }
        }
    }

    /// Register a handler for every inbound event.
    pub fn subscribe(&self, handler: EventHandler) -> Subscription {
        let id = self.shared.next_handler_id.fetch_add(1, Ordering::Relaxed);
        self.shared.handlers().push((id, handler));
        Subscription {
            shared: Arc::downgrade(&self.shared),
            id,
        }
    }

    /// Terminate the context and stop dispatching. Messages still in flight
    /// are dropped. Safe to call repeatedly.
    pub fn close(&self) {
        let mut inner = self.shared.lock();
        if inner.state == ChannelState::Closed {
            return;
        }
        let previous = inner.state;
        inner.state = ChannelState::Closed;
        inner.generation += 1;
        inner.requests = None;
        inner.attempt = None;
        if let Some(dispatcher) = inner.dispatcher.take() {
            dispatcher.abort();
        }
        if previous != ChannelState::Uninitialized {
            info!(from = %previous, "Execution channel closed");
        }
    }
}

impl Drop for ExecutionChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ExecutionChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionChannel")
            .field("state", &self.state())
            .field("init_timeout", &self.init_timeout)
            .finish_non_exhaustive()
    }
}

/// Spawn a context and run the handshake; commit the result if the attempt
/// is still current.
async fn establish(
    shared: Arc<Shared>,
    spawner: Arc<dyn ContextSpawner>,
    timeout: Duration,
    generation: u64,
) -> Result<(), ChannelError> {
    let outcome = match spawner.spawn() {
        Ok(context) => handshake(context, timeout).await,
        Err(e) => Err(e),
    };

    let mut inner = shared.lock();
    if inner.generation != generation {
        debug!(generation, "Initialization superseded by close");
        return Err(ChannelError::Closed);
    }
    inner.attempt = None;

    match outcome {
        Ok((requests, events)) => {
            inner.state = ChannelState::Ready;
            inner.requests = Some(requests);
            inner.dispatcher = Some(tokio::spawn(dispatch(
                Arc::clone(&shared),
                events,
                generation,
            )));
            metrics::record_channel_init("ready");
            info!(generation, "Execution context ready");
            Ok(())
        }
        Err(e) => {
            inner.state = ChannelState::Failed;
            let outcome = match e {
                ChannelError::InitTimeout(_) => "timeout",
                _ => "failed",
            };
            metrics::record_channel_init(outcome);
            warn!(generation, error = %e, "Execution context failed to initialize");
            Err(e)
        }
    }
}

type ReadyContext = (
    mpsc::UnboundedSender<WorkerRequest>,
    mpsc::UnboundedReceiver<ContextEvent>,
);

async fn handshake(context: ContextHandle, timeout: Duration) -> Result<ReadyContext, ChannelError> {
    let ContextHandle {
        requests,
        mut events,
    } = context;

    requests
        .send(WorkerRequest::init())
        .map_err(|_| ChannelError::ContextExited)?;

    let wait_ready = async {
        loop {
            match events.recv().await {
                Some(ContextEvent::Message(WorkerResponse::Ready { id })) if id.is_init() => {
                    return Ok(());
                }
                Some(ContextEvent::Message(WorkerResponse::Error { id, error })) if id.is_init() => {
                    return Err(ChannelError::init_failed(error));
                }
                Some(ContextEvent::Message(other)) => {
                    trace!(message = other.type_name(), "Ignoring message before ready");
                }
                Some(ContextEvent::TransportError(reason)) => {
                    return Err(ChannelError::init_failed(reason));
                }
                None => return Err(ChannelError::ContextExited),
            }
        }
    };

    let answered = tokio::time::timeout(timeout, wait_ready).await;
    match answered {
        Ok(Ok(())) => Ok((requests, events)),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(ChannelError::InitTimeout(timeout)),
    }
}

async fn dispatch(
    shared: Arc<Shared>,
    mut events: mpsc::UnboundedReceiver<ContextEvent>,
    generation: u64,
) {
    while let Some(event) = events.recv().await {
        match event {
            ContextEvent::Message(message) => shared.notify(&ChannelEvent::Message(message)),
            ContextEvent::TransportError(reason) => {
                shared.fail(generation, &reason);
                return;
            }
        }
    }
    shared.fail(generation, "execution context exited");
}
