//! Checks whether this host can process media locally.
//!
//! Logs the capability snapshot, then brings up an execution context and
//! completes the init handshake. Exits non-zero when local processing is
//! unavailable.

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vproc_orchestrator::{JobOrchestrator, OrchestratorConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;

    let config = OrchestratorConfig::from_env();
    info!(
        work_dir = %config.work_dir.display(),
        ffmpeg = %config.ffmpeg_binary,
        init_timeout_secs = config.init_timeout.as_secs(),
        "vproc-selfcheck: starting"
    );

    ensure_workdir(&config.work_dir).await?;

    let orchestrator = JobOrchestrator::local(config);
    let snapshot = orchestrator.detect_capabilities();
    info!(
        shared_memory = snapshot.supports_shared_memory,
        execution_context = snapshot.supports_execution_context,
        memory_mb = snapshot.estimated_memory_mb,
        cores = snapshot.logical_cores,
        mobile = snapshot.is_mobile,
        low_end = snapshot.is_low_end_device,
        prefer_server = orchestrator.should_prefer_server_fallback(),
        "Capabilities"
    );

    if let Err(e) = orchestrator.try_initialize().await {
        error!(error = %e, "vproc-selfcheck: local processing unavailable");
        orchestrator.cleanup();
        return Err(anyhow::anyhow!("local processing unavailable: {}", e));
    }

    info!(state = %orchestrator.channel_state(), "vproc-selfcheck: ok");
    orchestrator.cleanup();
    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,vproc_orchestrator=info,vproc_media=info"))?;

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }
    Ok(())
}

async fn ensure_workdir(path: &std::path::Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| anyhow::anyhow!("cannot create work dir {}: {}", path.display(), e))
}
