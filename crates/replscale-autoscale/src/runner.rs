//! Wake runner — fires store-backed wakes.
//!
//! Plays the role of the external scheduler for the local provider: every
//! tick it looks for wakes whose period has elapsed and re-enters the
//! orchestrator with each wake's payload, exactly as a cloud timer would.
//! A wake is stamped as fired before its payload is dispatched, so a
//! failed invocation is retried one period later rather than immediately.
//!
//! `run_wake_loop` opens the store for each scan and drops it afterwards.
//! redb holds an exclusive file lock while open, so other processes (an
//! alert relay, `instance settle`) get the file between scans.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use replscale_state::StateStore;

use crate::collaborators::{Clock, SystemClock};
use crate::dispatch::DispatchOutcome;
use crate::error::{ScaleError, ScaleResult};
use crate::orchestrator::ResizeOrchestrator;

/// Opens the store and wires a runner and orchestrator to it for one scan.
pub type ScanFactory =
    Box<dyn Fn() -> ScaleResult<(WakeRunner, ResizeOrchestrator)> + Send + Sync>;

pub struct WakeRunner {
    store: StateStore,
    clock: Arc<dyn Clock>,
}

impl WakeRunner {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Fire every due wake once.
    ///
    /// Each wake is an independent invocation: a failure is logged and
    /// reported for that wake only.
    pub async fn fire_due(
        &self,
        orchestrator: &ResizeOrchestrator,
    ) -> ScaleResult<Vec<(String, ScaleResult<DispatchOutcome>)>> {
        let now = self.clock.now_secs();
        let wakes = self
            .store
            .list_wakes()
            .map_err(|e| ScaleError::Schedule(e.to_string()))?;
        let mut fired = Vec::new();

        for wake in wakes.into_iter().filter(|w| w.is_due(now)) {
            let still_installed = self
                .store
                .mark_wake_fired(&wake.key, now)
                .map_err(|e| ScaleError::Schedule(e.to_string()))?;
            if !still_installed {
                continue;
            }

            debug!(key = %wake.key, "firing wake");
            let outcome = orchestrator.dispatch(&wake.payload).await;
            if let Err(e) = &outcome {
                warn!(key = %wake.key, error = %e, "wake invocation failed, retrying next period");
            }
            fired.push((wake.key, outcome));
        }

        Ok(fired)
    }
}

/// Scan for due wakes every `interval` until `shutdown` flips.
///
/// Everything built by `factory` is dropped at the end of each scan.
pub async fn run_wake_loop(
    interval: Duration,
    factory: ScanFactory,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    info!(interval_secs = interval.as_secs(), "wake runner started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let (runner, orchestrator) = match factory() {
                    Ok(scan) => scan,
                    Err(e) => {
                        warn!(error = %e, "cannot prepare wake scan, retrying next tick");
                        continue;
                    }
                };
                if let Err(e) = runner.fire_due(&orchestrator).await {
                    error!(error = %e, "wake scan failed");
                }
            }
            _ = shutdown.changed() => {
                info!("wake runner shutting down");
                break;
            }
        }
    }
}
