//! Store-backed collaborators.
//!
//! These implement every orchestrator seam on top of a `StateStore`, so
//! the daemon runs without a cloud account and tests run against the
//! in-memory redb backend. Resizes are not applied by themselves: the
//! instance stays `modifying` until something settles it
//! (`replscaled instance settle`, or a test).

use std::sync::Arc;

use tracing::{debug, info};

use replscale_core::{InstanceDetails, STATUS_MODIFYING, TaskSnapshot};
use replscale_state::{AlarmState, StateError, StateStore, WakeEntry};

use crate::collaborators::{Clock, InfraClient, Notifier, OperationLock, SystemClock, WakeScheduler};
use crate::error::{NotifyError, ScaleError, ScaleResult};

fn infra_err(e: StateError) -> ScaleError {
    ScaleError::InfraUnavailable(e.to_string())
}

/// Replication instances, tasks and alarms held in the store.
#[derive(Clone)]
pub struct StoreInfra {
    store: StateStore,
    clock: Arc<dyn Clock>,
}

impl StoreInfra {
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
}

#[async_trait::async_trait]
impl InfraClient for StoreInfra {
    async fn get_instance(&self, name: &str) -> ScaleResult<InstanceDetails> {
        self.store
            .get_instance(name)
            .map_err(infra_err)?
            .map(|record| record.details())
            .ok_or_else(|| ScaleError::InstanceNotFound(name.to_string()))
    }

    async fn list_tasks_bound_to(&self, instance_arn: &str) -> ScaleResult<Vec<TaskSnapshot>> {
        let tasks = self
            .store
            .list_tasks_for_instance(instance_arn)
            .map_err(infra_err)?;
        Ok(tasks.iter().map(|t| t.snapshot()).collect())
    }

    async fn resize_instance(&self, instance_arn: &str, class: &str) -> ScaleResult<()> {
        let record = self
            .store
            .request_resize(instance_arn, class, STATUS_MODIFYING, self.clock.now_secs())
            .map_err(|e| match e {
                StateError::NotFound { key, .. } => ScaleError::InstanceNotFound(key),
                other => infra_err(other),
            })?;
        info!(instance = %record.name, %class, "resize accepted by local provider");
        Ok(())
    }

    async fn reset_alarm(&self, alarm_name: &str) -> ScaleResult<()> {
        self.store
            .set_alarm_state(
                alarm_name,
                AlarmState::Ok,
                "resetting so that it can get triggered again later",
                self.clock.now_secs(),
            )
            .map_err(infra_err)
    }
}

/// Wakes persisted in the store and fired by `WakeRunner`.
#[derive(Clone)]
pub struct StoreScheduler {
    store: StateStore,
    clock: Arc<dyn Clock>,
}

impl StoreScheduler {
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
}

#[async_trait::async_trait]
impl WakeScheduler for StoreScheduler {
    async fn install_recurring_wake(
        &self,
        key: &str,
        period_secs: u64,
        payload: serde_json::Value,
    ) -> ScaleResult<()> {
        let wake = WakeEntry {
            key: key.to_string(),
            period_secs,
            payload,
            installed_at: self.clock.now_secs(),
            last_fired_at: None,
        };
        self.store
            .put_wake(&wake)
            .map_err(|e| ScaleError::Schedule(e.to_string()))
    }

    async fn remove_recurring_wake(&self, key: &str) -> ScaleResult<bool> {
        self.store
            .delete_wake(key)
            .map_err(|e| ScaleError::Schedule(e.to_string()))
    }

    async fn is_installed(&self, key: &str) -> ScaleResult<bool> {
        self.store
            .get_wake(key)
            .map(|wake| wake.is_some())
            .map_err(|e| ScaleError::Schedule(e.to_string()))
    }
}

/// Appends notifications to the store's outbox under a topic.
///
/// With no topic configured, messages are only logged.
#[derive(Clone)]
pub struct OutboxNotifier {
    store: StateStore,
    topic: Option<String>,
    clock: Arc<dyn Clock>,
}

impl OutboxNotifier {
    pub fn new(store: StateStore, topic: Option<String>) -> Self {
        Self {
            store,
            topic,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait::async_trait]
impl Notifier for OutboxNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        let Some(topic) = &self.topic else {
            debug!(%subject, "no notification topic configured");
            return Ok(());
        };
        self.store
            .append_notification(topic, subject, body, self.clock.now_secs())
            .map(|_| ())
            .map_err(|e| NotifyError(e.to_string()))
    }
}

/// Operation markers kept in the store.
#[derive(Clone)]
pub struct StoreOperationLock {
    store: StateStore,
    clock: Arc<dyn Clock>,
}

impl StoreOperationLock {
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
}

#[async_trait::async_trait]
impl OperationLock for StoreOperationLock {
    async fn try_acquire(&self, instance: &str) -> ScaleResult<bool> {
        self.store
            .try_claim_operation(instance, self.clock.now_secs())
            .map_err(|e| ScaleError::Lock(e.to_string()))
    }

    async fn release(&self, instance: &str) -> ScaleResult<()> {
        self.store
            .release_operation(instance)
            .map(|_| ())
            .map_err(|e| ScaleError::Lock(e.to_string()))
    }
}
