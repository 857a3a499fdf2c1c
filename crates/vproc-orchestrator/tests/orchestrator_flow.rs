//! End-to-end orchestrator behavior against a scripted execution context.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::*;
use vproc_models::{
    JobState, OptimizeOptions, ThumbnailOptions, TranscodeOptions, WorkerRequest, WorkerResponse,
};
use vproc_orchestrator::{ChannelState, OrchestratorConfig, OrchestratorError, ProgressFn};

#[tokio::test]
async fn test_progress_then_complete() {
    let (orch, mut ctx, _contexts, _spawner) = ready_orchestrator().await;

    let seen: Arc<Mutex<Vec<(u8, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let on_progress: ProgressFn = Arc::new(move |percent, stage| {
        sink.lock().unwrap().push((percent, stage.to_string()));
    });

    let handle = orch
        .transcode(clip(), TranscodeOptions::default(), Some(on_progress))
        .await
        .unwrap();

    let id = ctx.next_job().await;
    assert_eq!(&id, handle.id());
    for percent in [10, 45, 80] {
        ctx.progress(&id, percent, "transcoding");
    }
    ctx.complete(&id, b"encoded");

    let result = handle.await.unwrap();
    assert_eq!(result.blob, b"encoded");
    assert!(result.processed_locally);
    assert_eq!(result.metadata.size_bytes, 7);

    let seen = seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            (10, "transcoding".to_string()),
            (45, "transcoding".to_string()),
            (80, "transcoding".to_string()),
        ]
    );
    assert_eq!(orch.pending_count(), 0);
}

#[tokio::test]
async fn test_fail_fast_without_capability() {
    let (spawner, _contexts) = scripted();
    let orch = orchestrator(spawner.clone(), low_end(), OrchestratorConfig::default());

    assert!(!orch.can_run_locally());
    assert!(orch.should_prefer_server_fallback());

    let err = orch
        .optimize_image(photo(), OptimizeOptions::default(), None)
        .await
        .unwrap_err();
    assert_eq!(err, OrchestratorError::ClientProcessingUnavailable);
    assert_eq!(err.to_string(), "CLIENT_PROCESSING_UNAVAILABLE");

    // No context was ever started
    assert_eq!(spawner.spawns(), 0);
    assert_eq!(orch.channel_state(), ChannelState::Uninitialized);
    assert!(!orch.initialize().await);
}

#[tokio::test]
async fn test_fail_fast_without_shared_memory() {
    let (spawner, _contexts) = scripted();
    let facts = vproc_media::HostFacts {
        shared_memory: false,
        ..desktop()
    };
    let orch = orchestrator(spawner.clone(), facts, OrchestratorConfig::default());

    let err = orch
        .transcode(clip(), TranscodeOptions::default(), None)
        .await
        .unwrap_err();
    assert_eq!(err, OrchestratorError::ClientProcessingUnavailable);
    assert_eq!(spawner.spawns(), 0);
}

#[tokio::test]
async fn test_desktop_runs_locally() {
    let (spawner, _contexts) = scripted();
    let orch = orchestrator(spawner, desktop(), OrchestratorConfig::default());
    let snapshot = orch.detect_capabilities();
    assert!(!snapshot.is_low_end_device);
    assert!(orch.can_run_locally());
    assert!(!orch.should_prefer_server_fallback());
}

#[tokio::test]
async fn test_init_error_becomes_unavailable_on_submit() {
    let (spawner, mut contexts) = scripted();
    let orch = orchestrator(spawner.clone(), desktop(), OrchestratorConfig::default());

    let (submitted, _) = tokio::join!(
        orch.extract_thumbnail(clip(), ThumbnailOptions::default(), None),
        async {
            let mut ctx = next_context(&mut contexts).await;
            assert!(matches!(ctx.next_request().await, WorkerRequest::Init { .. }));
            ctx.reply(WorkerResponse::error(
                vproc_models::JobId::init(),
                "FFmpeg not found: ffmpeg",
            ));
        }
    );

    assert_eq!(
        submitted.unwrap_err(),
        OrchestratorError::ClientProcessingUnavailable
    );
    assert_eq!(orch.channel_state(), ChannelState::Failed);
    assert_eq!(orch.pending_count(), 0);
}

#[tokio::test]
async fn test_init_timeout_is_reported() {
    let (spawner, mut contexts) = scripted();
    let config = OrchestratorConfig::default().with_init_timeout(Duration::from_millis(50));
    let orch = orchestrator(spawner, desktop(), config);

    // Context starts but never answers
    let (result, _ctx) = tokio::join!(orch.try_initialize(), next_context(&mut contexts));
    let err = result.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Initialization(vproc_orchestrator::ChannelError::InitTimeout(_))
    ));
    assert!(err.is_unavailable());
    assert_eq!(orch.channel_state(), ChannelState::Failed);
}

#[tokio::test]
async fn test_concurrent_initialize_shares_one_context() {
    let (spawner, mut contexts) = scripted();
    let orch = orchestrator(spawner.clone(), desktop(), OrchestratorConfig::default());

    let (a, b, c, _) = tokio::join!(orch.initialize(), orch.initialize(), orch.initialize(), async {
        let mut ctx = next_context(&mut contexts).await;
        ctx.accept_init().await;
        ctx
    });
    assert!(a && b && c);
    assert_eq!(spawner.spawns(), 1);

    // Already ready: no further handshake
    assert!(orch.initialize().await);
    assert_eq!(spawner.spawns(), 1);
}

#[tokio::test]
async fn test_abort_releases_caller_immediately() {
    let (orch, mut ctx, _contexts, _spawner) = ready_orchestrator().await;

    let handle = orch
        .transcode(clip(), TranscodeOptions::default(), None)
        .await
        .unwrap();
    let id = ctx.next_job().await;
    ctx.progress(&id, 30, "transcoding");

    assert!(orch.abort(&id));
    assert_eq!(handle.await, Err(OrchestratorError::Cancelled));
    assert_eq!(orch.pending_count(), 0);

    // The context is told to stop
    match ctx.next_request().await {
        WorkerRequest::Abort { id: aborted } => assert_eq!(aborted, id),
        other => panic!("Expected abort, got {other:?}"),
    }

    // Late messages for the aborted id are ignored
    ctx.progress(&id, 90, "transcoding");
    ctx.complete(&id, b"too late");
    assert!(!orch.abort(&id));
}

#[tokio::test]
async fn test_engine_error_rejects_only_that_job() {
    let (orch, mut ctx, _contexts, _spawner) = ready_orchestrator().await;

    let bad = orch
        .optimize_image(photo(), OptimizeOptions::default(), None)
        .await
        .unwrap();
    let good = orch
        .optimize_image(photo(), OptimizeOptions::default(), None)
        .await
        .unwrap();
    let bad_id = ctx.next_job().await;
    let good_id = ctx.next_job().await;

    ctx.reply(WorkerResponse::error(bad_id.clone(), "Unsupported format"));
    // Duplicate terminal messages change nothing
    ctx.complete(&bad_id, b"ignored");
    ctx.complete(&good_id, b"fine");

    assert_eq!(bad.await, Err(OrchestratorError::job("Unsupported format")));
    assert_eq!(good.await.unwrap().blob, b"fine");
    assert!(orch.is_ready());
}

#[tokio::test]
async fn test_transport_failure_rejects_pending_and_reinitializes() {
    let (orch, mut ctx, mut contexts, spawner) = ready_orchestrator().await;

    let first = orch
        .transcode(clip(), TranscodeOptions::default(), None)
        .await
        .unwrap();
    let second = orch
        .extract_thumbnail(clip(), ThumbnailOptions::default(), None)
        .await
        .unwrap();
    ctx.next_job().await;
    ctx.next_job().await;

    ctx.crash("worker crashed");

    assert!(matches!(first.await, Err(OrchestratorError::Transport(_))));
    assert!(matches!(second.await, Err(OrchestratorError::Transport(_))));
    assert_eq!(orch.pending_count(), 0);
    assert_eq!(orch.channel_state(), ChannelState::Failed);

    // Next submission brings up a fresh context
    let (handle, mut fresh) = tokio::join!(
        orch.optimize_image(photo(), OptimizeOptions::default(), None),
        async {
            let mut fresh = next_context(&mut contexts).await;
            fresh.accept_init().await;
            fresh
        }
    );
    let handle = handle.unwrap();
    let id = fresh.next_job().await;
    fresh.complete(&id, b"again");
    assert_eq!(handle.await.unwrap().blob, b"again");
    assert_eq!(spawner.spawns(), 2);
}

#[tokio::test]
async fn test_context_exit_counts_as_transport_failure() {
    let (orch, mut ctx, _contexts, _spawner) = ready_orchestrator().await;

    let handle = orch
        .optimize_image(photo(), OptimizeOptions::default(), None)
        .await
        .unwrap();
    ctx.next_job().await;
    drop(ctx);

    assert!(matches!(handle.await, Err(OrchestratorError::Transport(_))));
    assert_eq!(orch.channel_state(), ChannelState::Failed);
}

#[tokio::test]
async fn test_pending_jobs_snapshot() {
    let (orch, mut ctx, _contexts, _spawner) = ready_orchestrator().await;

    let handle = orch
        .transcode(clip(), TranscodeOptions::default(), None)
        .await
        .unwrap();
    let id = ctx.next_job().await;

    let jobs = orch.pending_jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].state, JobState::Pending);
    assert_eq!(jobs[0].kind, vproc_models::JobKind::Transcode);

    ctx.progress(&id, 45, "transcoding");
    for _ in 0..100 {
        if orch.pending_jobs()[0].progress_percent == 45 {
            break;
        }
        tokio::task::yield_now().await;
    }
    let jobs = orch.pending_jobs();
    assert_eq!(jobs[0].state, JobState::Running);
    assert_eq!(jobs[0].stage.as_deref(), Some("transcoding"));

    ctx.complete(&id, b"x");
    handle.await.unwrap();
    assert!(orch.pending_jobs().is_empty());
}

#[tokio::test]
async fn test_cleanup_is_repeatable_and_allows_reinit() {
    // Never initialized
    let (spawner, mut contexts) = scripted();
    let idle = orchestrator(spawner, desktop(), OrchestratorConfig::default());
    idle.cleanup();
    idle.cleanup();

    let (orch, mut ctx, _, _) = ready_orchestrator().await;
    let handle = orch
        .optimize_image(photo(), OptimizeOptions::default(), None)
        .await
        .unwrap();
    ctx.next_job().await;

    orch.cleanup();
    assert_eq!(handle.await, Err(OrchestratorError::Cancelled));
    assert_eq!(orch.channel_state(), ChannelState::Closed);
    orch.cleanup();
    ctx.wait_closed().await;

    // The idle orchestrator still comes up after cleanup
    let (ready, _) = tokio::join!(idle.initialize(), async {
        let mut ctx = next_context(&mut contexts).await;
        ctx.accept_init().await;
        ctx
    });
    assert!(ready);
}

#[tokio::test]
async fn test_dropping_orchestrator_cancels_pending() {
    let (orch, mut ctx, _contexts, _spawner) = ready_orchestrator().await;
    let handle = orch
        .optimize_image(photo(), OptimizeOptions::default(), None)
        .await
        .unwrap();
    ctx.next_job().await;

    drop(orch);
    assert_eq!(handle.await, Err(OrchestratorError::Cancelled));
}
