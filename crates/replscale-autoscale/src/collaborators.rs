//! Seams between the orchestrator and the outside world.
//!
//! The orchestrator owns no clients of its own. Each invocation hands it
//! implementations of these traits; `crate::local` provides store-backed
//! ones and a cloud deployment would provide provider-backed ones.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use replscale_core::{InstanceDetails, TaskSnapshot};

use crate::error::{NotifyError, ScaleResult};

/// Reads and mutates the replication instance and its tasks.
#[async_trait::async_trait]
pub trait InfraClient: Send + Sync {
    /// Fails with `InstanceNotFound` when the name is unknown.
    async fn get_instance(&self, name: &str) -> ScaleResult<InstanceDetails>;

    async fn list_tasks_bound_to(&self, instance_arn: &str) -> ScaleResult<Vec<TaskSnapshot>>;

    /// Request a class change. Completion is observed by polling.
    async fn resize_instance(&self, instance_arn: &str, class: &str) -> ScaleResult<()>;

    /// Put the named alarm back into its non-alarming state.
    async fn reset_alarm(&self, alarm_name: &str) -> ScaleResult<()>;
}

/// Installs and removes the periodic wake that re-enters the orchestrator.
#[async_trait::async_trait]
pub trait WakeScheduler: Send + Sync {
    /// Install a wake delivering `payload` every `period_secs`.
    async fn install_recurring_wake(
        &self,
        key: &str,
        period_secs: u64,
        payload: serde_json::Value,
    ) -> ScaleResult<()>;

    /// Remove a wake. Returns false if no wake was installed under `key`.
    async fn remove_recurring_wake(&self, key: &str) -> ScaleResult<bool>;

    /// Whether a wake is currently installed under `key`.
    async fn is_installed(&self, key: &str) -> ScaleResult<bool>;
}

/// Best-effort status messages.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, subject: &str, body: &str) -> Result<(), NotifyError>;
}

/// Durable per-instance "operation in progress" marker.
#[async_trait::async_trait]
pub trait OperationLock: Send + Sync {
    /// Atomically claim the marker. Returns false if it is already held.
    async fn try_acquire(&self, instance: &str) -> ScaleResult<bool>;

    async fn release(&self, instance: &str) -> ScaleResult<()>;
}

/// Wall clock in fractional epoch seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;

    fn now_secs(&self) -> u64 {
        self.now().max(0.0) as u64
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            bits: AtomicU64::new(start.to_bits()),
        }
    }

    pub fn set(&self, now: f64) {
        self.bits.store(now.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, secs: f64) {
        self.set(self.now() + secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}
