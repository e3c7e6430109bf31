//! Orchestrator invocations: single payloads and the wake loop.
//!
//! Each invocation builds its own orchestrator from configuration, so a
//! changed size table or timeout takes effect on the next alert or wake.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{debug, info};

use replscale_autoscale::{
    OrchestratorSettings, OutboxNotifier, ResizeOrchestrator, ScaleResult, ScanFactory,
    StoreInfra, StoreOperationLock, StoreScheduler, WakeRunner, run_wake_loop,
};
use replscale_core::{ScalerConfig, SizeTable};
use replscale_state::StateStore;

/// Load `replscale.toml` (or the defaults) and apply environment overrides.
pub fn load_config(path: &Path) -> anyhow::Result<ScalerConfig> {
    let mut config = ScalerConfig::load_or_default(path)
        .with_context(|| format!("loading {}", path.display()))?;
    config.apply_env();
    debug!(?config, "configuration loaded");
    Ok(config)
}

pub fn open_store(config: &ScalerConfig) -> anyhow::Result<StateStore> {
    let path = &config.state.path;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating state directory {}", parent.display()))?;
    }
    StateStore::open(path).with_context(|| format!("opening state store {}", path.display()))
}

/// Wire an orchestrator to the store-backed collaborators.
pub fn build_orchestrator(config: &ScalerConfig, store: &StateStore) -> ScaleResult<ResizeOrchestrator> {
    let sizes = SizeTable::from_file(&config.size_table.path)?;
    let orchestrator = ResizeOrchestrator::new(
        Arc::new(StoreInfra::new(store.clone())),
        Arc::new(StoreScheduler::new(store.clone())),
        Arc::new(OutboxNotifier::new(store.clone(), config.notify.topic.clone())),
        sizes,
    )
    .with_settings(OrchestratorSettings::from(&config.orchestrator));

    if config.orchestrator.exclusive_operations {
        return Ok(orchestrator.with_operation_lock(Arc::new(StoreOperationLock::new(store.clone()))));
    }
    Ok(orchestrator)
}

fn read_payload(source: &str) -> anyhow::Result<serde_json::Value> {
    let raw = if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading payload from stdin")?;
        buf
    } else {
        std::fs::read_to_string(source).with_context(|| format!("reading payload {source}"))?
    };
    serde_json::from_str(&raw).context("payload is not JSON")
}

/// Dispatch one payload and print the outcome.
pub async fn handle(config: &ScalerConfig, store: &StateStore, source: &str) -> anyhow::Result<()> {
    let payload = read_payload(source)?;
    let orchestrator = build_orchestrator(config, store)?;
    let outcome = orchestrator.dispatch(&payload).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

/// Fire due wakes every `tick_secs` until Ctrl-C.
///
/// The store is only open while a scan runs, so `handle` and the
/// inventory commands keep working alongside the loop.
pub async fn run(config: ScalerConfig, tick_secs: u64) -> anyhow::Result<()> {
    // Fail fast on a broken size table or state path instead of on the first scan.
    {
        let store = open_store(&config)?;
        build_orchestrator(&config, &store)?;
    }

    let factory: ScanFactory = Box::new(move || {
        let store = StateStore::open(&config.state.path)?;
        let orchestrator = build_orchestrator(&config, &store)?;
        Ok((WakeRunner::new(store), orchestrator))
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner_handle = tokio::spawn(run_wake_loop(
        Duration::from_secs(tick_secs.max(1)),
        factory,
        shutdown_rx,
    ));

    tokio::signal::ctrl_c()
        .await
        .context("installing Ctrl-C handler")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    runner_handle.await?;

    info!("replscaled stopped");
    Ok(())
}
