//! Scripted execution contexts for integration tests.
//!
//! The spawner hands every context it starts to the test, which then plays
//! the part of the engine: it reads requests and sends responses by hand.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use vproc_media::{CapabilityDetector, HostFacts, StaticProbe};
use vproc_models::{JobId, MediaMetadata, SourceMedia, WorkerRequest, WorkerResponse};
use vproc_orchestrator::{
    ChannelError, ContextEvent, ContextHandle, ContextSpawner, JobOrchestrator,
    OrchestratorConfig,
};

const WAIT: Duration = Duration::from_secs(5);

pub struct ScriptedContext {
    pub requests: mpsc::UnboundedReceiver<WorkerRequest>,
    pub events: mpsc::UnboundedSender<ContextEvent>,
}

impl ScriptedContext {
    pub async fn next_request(&mut self) -> WorkerRequest {
        tokio::time::timeout(WAIT, self.requests.recv())
            .await
            .expect("timed out waiting for a request")
            .expect("request stream closed")
    }

    /// Answer the init handshake with `ready`.
    pub async fn accept_init(&mut self) {
        match self.next_request().await {
            WorkerRequest::Init { id } => assert!(id.is_init()),
            other => panic!("Expected init, got {other:?}"),
        }
        self.reply(WorkerResponse::ready());
    }

    /// Read the next job request and return its id.
    pub async fn next_job(&mut self) -> JobId {
        let request = self.next_request().await;
        assert!(request.kind().is_some(), "Expected a job, got {request:?}");
        request.id().clone()
    }

    pub fn reply(&self, response: WorkerResponse) {
        let _ = self.events.send(ContextEvent::Message(response));
    }

    pub fn progress(&self, id: &JobId, percent: u8, stage: &str) {
        self.reply(WorkerResponse::progress(id.clone(), percent, stage));
    }

    pub fn complete(&self, id: &JobId, blob: &[u8]) {
        self.reply(WorkerResponse::complete(
            id.clone(),
            blob.to_vec(),
            MediaMetadata::new(1280, 720, blob.len() as u64),
        ));
    }

    pub fn crash(&self, reason: &str) {
        let _ = self
            .events
            .send(ContextEvent::TransportError(reason.to_string()));
    }

    /// Whether the orchestrator has let go of this context.
    pub async fn wait_closed(&mut self) {
        loop {
            match tokio::time::timeout(WAIT, self.requests.recv()).await {
                Ok(None) => return,
                Ok(Some(_)) => continue,
                Err(_) => panic!("context was not closed"),
            }
        }
    }
}

pub struct ScriptedSpawner {
    handoff: Mutex<mpsc::UnboundedSender<ScriptedContext>>,
    spawns: AtomicUsize,
}

impl ScriptedSpawner {
    pub fn spawns(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }
}

impl ContextSpawner for ScriptedSpawner {
    fn spawn(&self) -> Result<ContextHandle, ChannelError> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        self.handoff
            .lock()
            .unwrap()
            .send(ScriptedContext {
                requests: request_rx,
                events: event_tx,
            })
            .map_err(|_| ChannelError::spawn_failed("test dropped the context receiver"))?;
        Ok(ContextHandle::new(request_tx, event_rx))
    }
}

pub fn scripted() -> (Arc<ScriptedSpawner>, mpsc::UnboundedReceiver<ScriptedContext>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let spawner = Arc::new(ScriptedSpawner {
        handoff: Mutex::new(tx),
        spawns: AtomicUsize::new(0),
    });
    (spawner, rx)
}

pub async fn next_context(contexts: &mut mpsc::UnboundedReceiver<ScriptedContext>) -> ScriptedContext {
    tokio::time::timeout(WAIT, contexts.recv())
        .await
        .expect("timed out waiting for a context")
        .expect("spawner dropped")
}

pub fn desktop() -> HostFacts {
    HostFacts {
        shared_memory: true,
        execution_context: true,
        memory_mb: 16_384,
        cores: 8,
        mobile: false,
    }
}

pub fn low_end() -> HostFacts {
    HostFacts {
        memory_mb: 1024,
        cores: 2,
        ..desktop()
    }
}

pub fn orchestrator(
    spawner: Arc<ScriptedSpawner>,
    facts: HostFacts,
    config: OrchestratorConfig,
) -> Arc<JobOrchestrator> {
    let detector = CapabilityDetector::new(StaticProbe(facts)).with_policy(config.policy);
    Arc::new(JobOrchestrator::new(config, detector, spawner))
}

/// Orchestrator on a desktop host with the handshake already done.
pub async fn ready_orchestrator() -> (
    Arc<JobOrchestrator>,
    ScriptedContext,
    mpsc::UnboundedReceiver<ScriptedContext>,
    Arc<ScriptedSpawner>,
) {
    let (spawner, mut contexts) = scripted();
    let orch = orchestrator(spawner.clone(), desktop(), OrchestratorConfig::default());

    let (ready, context) = tokio::join!(orch.initialize(), async {
        let mut context = next_context(&mut contexts).await;
        context.accept_init().await;
        context
    });
    assert!(ready);
    (orch, context, contexts, spawner)
}

pub fn clip() -> SourceMedia {
    SourceMedia::new("clip.mov", b"not really a movie".to_vec())
}

pub fn photo() -> SourceMedia {
    SourceMedia::new("photo.png", b"not really a png".to_vec())
}
