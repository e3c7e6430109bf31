//! Resize orchestrator — drives one resize from alert to a terminal state.
//!
//! ```text
//! Idle ──alert──▶ Polling (wake installed, OperationRecord as payload)
//!                   │ every wake
//!                   ├── instance not available / task not recovered ─▶ Polling
//!                   ├── instance available, matched tasks recovered  ─▶ Converged
//!                   └── elapsed > timeout                            ─▶ TimedOut
//! ```
//!
//! No state survives between invocations except the wake payload and the
//! provider's own resources, so every tick recomputes its decision from
//! the record and fresh reads. Side effects happen only when the resize
//! is accepted and at the two terminal transitions.
//!
//! Two alerts for the same instance can both pass the availability check
//! before either resize lands. Unless an `OperationLock` is configured,
//! the only guard against a double start is that the provider flips the
//! instance out of `available` soon after the first resize request.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use replscale_core::config::OrchestratorConfig;
use replscale_core::{
    DEFAULT_TIMEOUT_SECS, InstanceClass, NextClass, POLL_PERIOD_SECS, PressureSignal, SizeTable,
    TaskSnapshot, select_next_class,
};

use crate::collaborators::{Clock, InfraClient, Notifier, OperationLock, SystemClock, WakeScheduler};
use crate::error::ScaleResult;
use crate::record::OperationRecord;

/// A pressure alert for one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub alarm_name: String,
    pub instance_name: String,
    pub signal: PressureSignal,
}

/// Result of handling an alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    /// Resize requested and wake installed.
    Started {
        instance: String,
        from_class: InstanceClass,
        to_class: InstanceClass,
        wake_key: String,
    },
    /// The instance is busy or unhealthy.
    NotAvailable { instance: String, status: String },
    /// Scaling in the signal's direction is switched off.
    Disabled { instance: String, signal: PressureSignal },
    /// No further step on the ladder.
    NoAction {
        instance: String,
        class: InstanceClass,
        signal: PressureSignal,
    },
    /// Another operation holds the instance's marker.
    AlreadyInProgress { instance: String },
}

/// Why a tick decided to keep waiting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum WaitReason {
    InstanceNotAvailable { status: String },
    TaskNotRecovered {
        arn: String,
        expected: String,
        actual: String,
    },
}

/// Result of a poll tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    Waiting {
        instance: String,
        #[serde(flatten)]
        reason: WaitReason,
    },
    Converged { instance: String, elapsed_secs: f64 },
    TimedOut { instance: String, elapsed_secs: f64 },
}

/// Tunables for one orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    pub timeout_secs: u64,
    pub poll_period_secs: u64,
    pub alarm_prefix: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            poll_period_secs: POLL_PERIOD_SECS,
            alarm_prefix: "dms".to_string(),
        }
    }
}

impl From<&OrchestratorConfig> for OrchestratorSettings {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            timeout_secs: config.timeout_secs,
            poll_period_secs: POLL_PERIOD_SECS,
            alarm_prefix: config.alarm_prefix.clone(),
        }
    }
}

/// Find the first pre-resize task whose current status differs.
///
/// Only tasks present in both snapshots are compared; tasks created or
/// deleted since the resize started never hold up convergence.
pub fn first_unrecovered<'a>(
    before: &'a [TaskSnapshot],
    after: &[TaskSnapshot],
) -> Option<(&'a TaskSnapshot, String)> {
    let current: HashMap<&str, &str> = after
        .iter()
        .map(|t| (t.arn.as_str(), t.status.as_str()))
        .collect();
    before.iter().find_map(|task| match current.get(task.arn.as_str()) {
        Some(status) if *status != task.status => Some((task, status.to_string())),
        _ => None,
    })
}

/// The resize state machine, wired to its collaborators.
pub struct ResizeOrchestrator {
    infra: Arc<dyn InfraClient>,
    scheduler: Arc<dyn WakeScheduler>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    lock: Option<Arc<dyn OperationLock>>,
    sizes: SizeTable,
    settings: OrchestratorSettings,
}

impl ResizeOrchestrator {
    pub fn new(
        infra: Arc<dyn InfraClient>,
        scheduler: Arc<dyn WakeScheduler>,
        notifier: Arc<dyn Notifier>,
        sizes: SizeTable,
    ) -> Self {
        Self {
            infra,
            scheduler,
            notifier,
            clock: Arc::new(SystemClock),
            lock: None,
            sizes,
            settings: OrchestratorSettings::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Claim a durable marker per instance before resizing.
    pub fn with_operation_lock(mut self, lock: Arc<dyn OperationLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    // ── Entry ──────────────────────────────────────────────────────

    /// Handle a pressure alert: pick the next class, request the resize
    /// and install the wake that will track it.
    pub async fn start(&self, alert: &Alert) -> ScaleResult<StartOutcome> {
        let name = alert.instance_name.as_str();
        let instance = self.infra.get_instance(name).await?;

        if !instance.is_available() {
            info!(
                instance = %name,
                status = %instance.status,
                "instance not available, skipping resize"
            );
            return Ok(StartOutcome::NotAvailable {
                instance: name.to_string(),
                status: instance.status,
            });
        }

        let target = match select_next_class(&instance.class, alert.signal, &self.sizes) {
            Ok(NextClass::Resize(class)) => class,
            Ok(NextClass::Disabled) => {
                info!(instance = %name, signal = %alert.signal, "scaling disabled for this direction");
                return Ok(StartOutcome::Disabled {
                    instance: name.to_string(),
                    signal: alert.signal,
                });
            }
            Ok(NextClass::NoAction) => {
                info!(
                    instance = %name,
                    class = %instance.class,
                    signal = %alert.signal,
                    "no further class on the ladder"
                );
                return Ok(StartOutcome::NoAction {
                    instance: name.to_string(),
                    class: instance.class,
                    signal: alert.signal,
                });
            }
            Err(e) => {
                error!(
                    instance = %name,
                    class = %instance.class,
                    signal = %alert.signal,
                    error = %e,
                    "size table cannot place this instance"
                );
                return Err(e.into());
            }
        };

        if let Some(lock) = &self.lock
            && !lock.try_acquire(name).await?
        {
            info!(instance = %name, "operation already in progress");
            return Ok(StartOutcome::AlreadyInProgress {
                instance: name.to_string(),
            });
        }

        match self.request_resize(alert, &instance.arn, &target).await {
            Ok(record) => {
                info!(
                    instance = %name,
                    from = %instance.class,
                    to = %target,
                    tasks = record.task_snapshots.len(),
                    "resize requested, tracking via wake"
                );
                Ok(StartOutcome::Started {
                    instance: name.to_string(),
                    from_class: instance.class,
                    to_class: target,
                    wake_key: record.wake_key(),
                })
            }
            Err(e) => {
                self.release_marker(name).await;
                Err(e)
            }
        }
    }

    async fn request_resize(
        &self,
        alert: &Alert,
        instance_arn: &str,
        target: &str,
    ) -> ScaleResult<OperationRecord> {
        let name = alert.instance_name.as_str();
        let snapshots = self.infra.list_tasks_bound_to(instance_arn).await?;

        self.infra.resize_instance(instance_arn, target).await?;

        self.notify_best_effort(
            &format!("Instance modification started: {name}"),
            &format!("Instance modification started: {name} (target class {target}, alarm {})", alert.alarm_name),
        )
        .await;

        let record = OperationRecord::new(
            name,
            &alert.alarm_name,
            snapshots,
            self.clock.now(),
            Some(target.to_string()),
        );
        let payload = record.to_payload()?;
        if let Err(e) = self
            .scheduler
            .install_recurring_wake(&record.wake_key(), self.settings.poll_period_secs, payload)
            .await
        {
            error!(
                instance = %name,
                error = %e,
                "resize requested but tracking wake could not be installed"
            );
            return Err(e);
        }
        Ok(record)
    }

    // ── Poll tick ──────────────────────────────────────────────────

    /// Re-evaluate an in-flight operation.
    ///
    /// Convergence is checked first; the timeout is only considered when
    /// the operation has not converged on this tick, so exactly one
    /// terminal transition can fire. Past the timeout, a failure anywhere
    /// on the convergence path ends the operation as timed out.
    pub async fn tick(&self, record: &OperationRecord) -> ScaleResult<TickOutcome> {
        let now = self.clock.now();
        let elapsed_secs = record.elapsed(now);
        let timed_out = record.is_timed_out(now, self.settings.timeout_secs);

        let reason = match self.check_convergence(record).await {
            Ok(None) => match self.converge(record, elapsed_secs).await {
                Ok(()) => {
                    return Ok(TickOutcome::Converged {
                        instance: record.instance_name.clone(),
                        elapsed_secs,
                    });
                }
                Err(e) if timed_out => {
                    warn!(
                        instance = %record.instance_name,
                        error = %e,
                        "converged but could not finish after timeout, abandoning operation"
                    );
                    self.time_out(record, elapsed_secs).await?;
                    return Ok(TickOutcome::TimedOut {
                        instance: record.instance_name.clone(),
                        elapsed_secs,
                    });
                }
                Err(e) => return Err(e),
            },
            Ok(Some(reason)) => reason,
            Err(e) if timed_out => {
                warn!(
                    instance = %record.instance_name,
                    error = %e,
                    "poll failed after timeout, abandoning operation"
                );
                self.time_out(record, elapsed_secs).await?;
                return Ok(TickOutcome::TimedOut {
                    instance: record.instance_name.clone(),
                    elapsed_secs,
                });
            }
            Err(e) => return Err(e),
        };

        if timed_out {
            self.time_out(record, elapsed_secs).await?;
            return Ok(TickOutcome::TimedOut {
                instance: record.instance_name.clone(),
                elapsed_secs,
            });
        }

        debug!(
            instance = %record.instance_name,
            elapsed = elapsed_secs,
            ?reason,
            "still waiting for resize"
        );
        Ok(TickOutcome::Waiting {
            instance: record.instance_name.clone(),
            reason,
        })
    }

    /// `None` when converged, otherwise what is still pending.
    async fn check_convergence(&self, record: &OperationRecord) -> ScaleResult<Option<WaitReason>> {
        let instance = self.infra.get_instance(&record.instance_name).await?;
        if !instance.is_available() {
            return Ok(Some(WaitReason::InstanceNotAvailable {
                status: instance.status,
            }));
        }

        let current = self.infra.list_tasks_bound_to(&instance.arn).await?;
        Ok(first_unrecovered(&record.task_snapshots, &current).map(|(task, actual)| {
            WaitReason::TaskNotRecovered {
                arn: task.arn.clone(),
                expected: task.status.clone(),
                actual,
            }
        }))
    }

    async fn converge(&self, record: &OperationRecord, elapsed_secs: f64) -> ScaleResult<()> {
        let name = record.instance_name.as_str();
        // A late tick must not reset an alarm that fired again since.
        if !self.scheduler.is_installed(&record.wake_key()).await? {
            debug!(instance = %name, "wake already removed, duplicate tick");
            return Ok(());
        }
        self.infra.reset_alarm(&record.alarm_name).await?;
        if !self.finish(record).await? {
            debug!(instance = %name, "wake removed concurrently, duplicate tick");
            return Ok(());
        }
        info!(instance = %name, elapsed = elapsed_secs, "resize converged");
        self.notify_best_effort(
            &format!("Instance modification completed: {name}"),
            &format!(
                "Instance upgrade/downgrade successful: {name}{}",
                target_suffix(record)
            ),
        )
        .await;
        Ok(())
    }

    async fn time_out(&self, record: &OperationRecord, elapsed_secs: f64) -> ScaleResult<()> {
        let name = record.instance_name.as_str();
        if !self.finish(record).await? {
            debug!(instance = %name, "wake already removed, duplicate tick");
            return Ok(());
        }
        warn!(
            instance = %name,
            elapsed = elapsed_secs,
            timeout = self.settings.timeout_secs,
            "resize timed out"
        );
        self.notify_best_effort(
            &format!("DMS Instance upgrade/downgrade timed out for: {name}"),
            &format!(
                "Instance upgrade/downgrade timed out after {} seconds: {name}{}",
                self.settings.timeout_secs,
                target_suffix(record)
            ),
        )
        .await;
        Ok(())
    }

    /// Release the marker and tear down the wake. Returns whether the
    /// wake was still installed.
    async fn finish(&self, record: &OperationRecord) -> ScaleResult<bool> {
        if let Some(lock) = &self.lock {
            lock.release(&record.instance_name).await?;
        }
        self.scheduler.remove_recurring_wake(&record.wake_key()).await
    }

    async fn release_marker(&self, instance: &str) {
        if let Some(lock) = &self.lock
            && let Err(e) = lock.release(instance).await
        {
            warn!(%instance, error = %e, "failed to release operation marker");
        }
    }

    async fn notify_best_effort(&self, subject: &str, body: &str) {
        if let Err(e) = self.notifier.notify(subject, body).await {
            warn!(%subject, error = %e, "notification dropped");
        }
    }
}

fn target_suffix(record: &OperationRecord) -> String {
    record
        .target_class
        .as_deref()
        .map(|c| format!(" (target class {c})"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use replscale_core::{STATUS_AVAILABLE, STATUS_MODIFYING};
    use replscale_state::{AlarmState, InstanceRecord, StateStore, TaskRecord};

    use crate::collaborators::ManualClock;
    use crate::error::{NotifyError, ScaleError};
    use crate::local::{OutboxNotifier, StoreInfra, StoreOperationLock, StoreScheduler};
    use crate::record::wake_key;

    const BUNDLED: &str = include_str!("../../../config/instance_types.json");
    const T0: f64 = 1_000_000.0;

    struct Harness {
        store: StateStore,
        clock: Arc<ManualClock>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                store: StateStore::open_in_memory().unwrap(),
                clock: Arc::new(ManualClock::new(T0)),
            }
        }

        fn seed_instance(&self, name: &str, class: &str, status: &str) {
            self.store
                .put_instance(&InstanceRecord {
                    name: name.to_string(),
                    arn: format!("arn:rep:{name}"),
                    class: class.to_string(),
                    status: status.to_string(),
                    pending_class: None,
                    updated_at: 0,
                })
                .unwrap();
        }

        fn seed_task(&self, id: &str, instance: &str, status: &str) {
            self.store
                .put_task(&TaskRecord {
                    task_id: id.to_string(),
                    arn: format!("arn:task:{id}"),
                    instance_arn: format!("arn:rep:{instance}"),
                    status: status.to_string(),
                    updated_at: 0,
                })
                .unwrap();
        }

        fn settle(&self, name: &str) {
            self.store
                .settle_instance(name, STATUS_AVAILABLE, self.clock.now_secs())
                .unwrap();
        }

        fn infra(&self) -> StoreInfra {
            StoreInfra::new(self.store.clone()).with_clock(self.clock.clone())
        }

        fn build(&self, infra: Arc<dyn InfraClient>, notifier: Arc<dyn Notifier>) -> ResizeOrchestrator {
            ResizeOrchestrator::new(
                infra,
                Arc::new(StoreScheduler::new(self.store.clone()).with_clock(self.clock.clone())),
                notifier,
                SizeTable::from_json_str(BUNDLED).unwrap(),
            )
            .with_clock(self.clock.clone())
        }

        fn orchestrator(&self) -> ResizeOrchestrator {
            self.build(
                Arc::new(self.infra()),
                Arc::new(
                    OutboxNotifier::new(self.store.clone(), Some("ops".to_string()))
                        .with_clock(self.clock.clone()),
                ),
            )
        }

        fn exclusive_orchestrator(&self) -> ResizeOrchestrator {
            self.orchestrator().with_operation_lock(Arc::new(
                StoreOperationLock::new(self.store.clone()).with_clock(self.clock.clone()),
            ))
        }

        fn installed_record(&self, instance: &str) -> OperationRecord {
            let wake = self.store.get_wake(&wake_key(instance)).unwrap().expect("wake installed");
            assert_eq!(wake.period_secs, POLL_PERIOD_SECS);
            OperationRecord::from_payload(&wake.payload).unwrap()
        }

        fn subjects(&self) -> Vec<String> {
            self.store
                .list_notifications()
                .unwrap()
                .into_iter()
                .map(|n| n.subject)
                .collect()
        }
    }

    fn alert(instance: &str, signal: PressureSignal) -> Alert {
        Alert {
            alarm_name: format!("dms_{signal}"),
            instance_name: instance.to_string(),
            signal,
        }
    }

    struct FailingNotifier;

    #[async_trait::async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _subject: &str, _body: &str) -> Result<(), NotifyError> {
            Err(NotifyError("topic unreachable".to_string()))
        }
    }

    struct UnreachableInfra;

    #[async_trait::async_trait]
    impl InfraClient for UnreachableInfra {
        async fn get_instance(&self, _name: &str) -> ScaleResult<replscale_core::InstanceDetails> {
            Err(ScaleError::InfraUnavailable("connection refused".to_string()))
        }
        async fn list_tasks_bound_to(&self, _arn: &str) -> ScaleResult<Vec<TaskSnapshot>> {
            Err(ScaleError::InfraUnavailable("connection refused".to_string()))
        }
        async fn resize_instance(&self, _arn: &str, _class: &str) -> ScaleResult<()> {
            Err(ScaleError::InfraUnavailable("connection refused".to_string()))
        }
        async fn reset_alarm(&self, _alarm: &str) -> ScaleResult<()> {
            Err(ScaleError::InfraUnavailable("connection refused".to_string()))
        }
    }

    /// Reads succeed, the resize request is rejected.
    struct RejectingResize(StoreInfra);

    #[async_trait::async_trait]
    impl InfraClient for RejectingResize {
        async fn get_instance(&self, name: &str) -> ScaleResult<replscale_core::InstanceDetails> {
            self.0.get_instance(name).await
        }
        async fn list_tasks_bound_to(&self, arn: &str) -> ScaleResult<Vec<TaskSnapshot>> {
            self.0.list_tasks_bound_to(arn).await
        }
        async fn resize_instance(&self, _arn: &str, _class: &str) -> ScaleResult<()> {
            Err(ScaleError::InfraUnavailable("throttled".to_string()))
        }
        async fn reset_alarm(&self, alarm: &str) -> ScaleResult<()> {
            self.0.reset_alarm(alarm).await
        }
    }

    /// Reads and resizes succeed, alarm resets are refused.
    struct AlarmResetDenied(StoreInfra);

    #[async_trait::async_trait]
    impl InfraClient for AlarmResetDenied {
        async fn get_instance(&self, name: &str) -> ScaleResult<replscale_core::InstanceDetails> {
            self.0.get_instance(name).await
        }
        async fn list_tasks_bound_to(&self, arn: &str) -> ScaleResult<Vec<TaskSnapshot>> {
            self.0.list_tasks_bound_to(arn).await
        }
        async fn resize_instance(&self, arn: &str, class: &str) -> ScaleResult<()> {
            self.0.resize_instance(arn, class).await
        }
        async fn reset_alarm(&self, _alarm: &str) -> ScaleResult<()> {
            Err(ScaleError::InfraUnavailable("AccessDenied".to_string()))
        }
    }

    // ── Convergence check ──────────────────────────────────────────

    #[test]
    fn unrecovered_compares_matched_arns_only() {
        let before = vec![
            TaskSnapshot::new("t1", "arn1", "running"),
            TaskSnapshot::new("t2", "arn2", "stopped"),
            TaskSnapshot::new("t3", "arn3", "running"),
        ];
        // t3 is gone, t4 is new; both are ignored.
        let mut after = vec![
            TaskSnapshot::new("t1", "arn1", "running"),
            TaskSnapshot::new("t2", "arn2", "stopped"),
            TaskSnapshot::new("t4", "arn4", "starting"),
        ];
        assert!(first_unrecovered(&before, &after).is_none());

        after[1].status = "starting".to_string();
        let (task, actual) = first_unrecovered(&before, &after).unwrap();
        assert_eq!(task.arn, "arn2");
        assert_eq!(actual, "starting");
    }

    // ── Entry ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn alert_resizes_and_installs_wake() {
        let h = Harness::new();
        h.seed_instance("repl-1", "dms.c4.2xlarge", STATUS_AVAILABLE);
        h.seed_task("t1", "repl-1", "running");

        let outcome = h
            .orchestrator()
            .start(&alert("repl-1", PressureSignal::CpuHigh))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            StartOutcome::Started {
                instance: "repl-1".to_string(),
                from_class: "dms.c4.2xlarge".to_string(),
                to_class: "dms.c4.4xlarge".to_string(),
                wake_key: wake_key("repl-1"),
            }
        );

        let instance = h.store.get_instance("repl-1").unwrap().unwrap();
        assert_eq!(instance.status, STATUS_MODIFYING);
        assert_eq!(instance.pending_class.as_deref(), Some("dms.c4.4xlarge"));

        let record = h.installed_record("repl-1");
        assert_eq!(record.alarm_name, "dms_cpu_high");
        assert_eq!(record.start_time, T0);
        assert_eq!(
            record.task_snapshots,
            vec![TaskSnapshot::new("t1", "arn:task:t1", "running")]
        );
        assert_eq!(h.subjects(), ["Instance modification started: repl-1"]);
    }

    #[tokio::test]
    async fn top_of_ladder_does_nothing() {
        let h = Harness::new();
        h.seed_instance("repl-1", "dms.r4.8xlarge", STATUS_AVAILABLE);

        let outcome = h
            .orchestrator()
            .start(&alert("repl-1", PressureSignal::CpuHigh))
            .await
            .unwrap();
        assert!(matches!(outcome, StartOutcome::NoAction { .. }));
        assert!(h.store.list_wakes().unwrap().is_empty());
        assert!(h.subjects().is_empty());
        assert_eq!(h.store.get_instance("repl-1").unwrap().unwrap().status, STATUS_AVAILABLE);
    }

    #[tokio::test]
    async fn unavailable_instance_is_left_alone() {
        let h = Harness::new();
        h.seed_instance("repl-1", "dms.c4.large", STATUS_MODIFYING);

        let outcome = h
            .orchestrator()
            .start(&alert("repl-1", PressureSignal::MemoryHigh))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            StartOutcome::NotAvailable {
                instance: "repl-1".to_string(),
                status: STATUS_MODIFYING.to_string(),
            }
        );
        assert!(h.store.list_wakes().unwrap().is_empty());
    }

    #[tokio::test]
    async fn disabled_direction_is_not_an_error() {
        let h = Harness::new();
        h.seed_instance("repl-1", "dms.c4.large", STATUS_AVAILABLE);
        let mut table = SizeTable::from_json_str(BUNDLED).unwrap();
        table.scale_down_enabled = false;

        let orchestrator = ResizeOrchestrator::new(
            Arc::new(h.infra()),
            Arc::new(StoreScheduler::new(h.store.clone())),
            Arc::new(FailingNotifier),
            table,
        );
        let outcome = orchestrator
            .start(&alert("repl-1", PressureSignal::CpuLow))
            .await
            .unwrap();
        assert!(matches!(outcome, StartOutcome::Disabled { signal: PressureSignal::CpuLow, .. }));
        assert!(h.store.list_wakes().unwrap().is_empty());
    }

    #[tokio::test]
    async fn class_missing_from_table_is_config_error() {
        let h = Harness::new();
        h.seed_instance("repl-1", "dms.x1.custom", STATUS_AVAILABLE);

        let err = h
            .orchestrator()
            .start(&alert("repl-1", PressureSignal::CpuHigh))
            .await
            .unwrap_err();
        assert!(err.is_config());
        assert!(h.store.list_wakes().unwrap().is_empty());
        assert_eq!(h.store.get_instance("repl-1").unwrap().unwrap().pending_class, None);
    }

    #[tokio::test]
    async fn unknown_instance_is_reported() {
        let h = Harness::new();
        let err = h
            .orchestrator()
            .start(&alert("ghost", PressureSignal::CpuHigh))
            .await
            .unwrap_err();
        assert!(matches!(err, ScaleError::InstanceNotFound(n) if n == "ghost"));
    }

    #[tokio::test]
    async fn notification_failure_does_not_block_start() {
        let h = Harness::new();
        h.seed_instance("repl-1", "dms.c4.large", STATUS_AVAILABLE);

        let orchestrator = h.build(Arc::new(h.infra()), Arc::new(FailingNotifier));
        let outcome = orchestrator
            .start(&alert("repl-1", PressureSignal::CpuHigh))
            .await
            .unwrap();
        assert!(matches!(outcome, StartOutcome::Started { .. }));
        assert!(h.store.get_wake(&wake_key("repl-1")).unwrap().is_some());
    }

    // ── Poll ticks ─────────────────────────────────────────────────

    #[tokio::test]
    async fn converges_once_instance_and_tasks_settle() {
        let h = Harness::new();
        h.seed_instance("repl-1", "dms.c4.2xlarge", STATUS_AVAILABLE);
        h.seed_task("t1", "repl-1", "running");
        let orchestrator = h.orchestrator();
        orchestrator
            .start(&alert("repl-1", PressureSignal::CpuHigh))
            .await
            .unwrap();
        let record = h.installed_record("repl-1");

        h.clock.advance(60.0);
        let outcome = orchestrator.tick(&record).await.unwrap();
        assert!(matches!(
            outcome,
            TickOutcome::Waiting { reason: WaitReason::InstanceNotAvailable { .. }, .. }
        ));

        h.clock.advance(60.0);
        h.settle("repl-1");
        let outcome = orchestrator.tick(&record).await.unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Converged {
                instance: "repl-1".to_string(),
                elapsed_secs: 120.0,
            }
        );

        assert!(h.store.list_wakes().unwrap().is_empty());
        assert_eq!(
            h.store.get_alarm("dms_cpu_high").unwrap().unwrap().state,
            AlarmState::Ok
        );
        assert_eq!(
            h.store.get_instance("repl-1").unwrap().unwrap().class,
            "dms.c4.4xlarge"
        );
        assert_eq!(
            h.subjects(),
            [
                "Instance modification started: repl-1",
                "Instance modification completed: repl-1",
            ]
        );
    }

    #[tokio::test]
    async fn waits_for_diverged_task() {
        let h = Harness::new();
        h.seed_instance("repl-1", "dms.c4.large", STATUS_AVAILABLE);
        h.seed_task("t1", "repl-1", "running");
        h.seed_task("t2", "repl-1", "stopped");
        let orchestrator = h.orchestrator();
        orchestrator
            .start(&alert("repl-1", PressureSignal::CpuHigh))
            .await
            .unwrap();
        let record = h.installed_record("repl-1");

        h.settle("repl-1");
        h.seed_task("t1", "repl-1", "starting");
        h.clock.advance(60.0);
        let outcome = orchestrator.tick(&record).await.unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Waiting {
                instance: "repl-1".to_string(),
                reason: WaitReason::TaskNotRecovered {
                    arn: "arn:task:t1".to_string(),
                    expected: "running".to_string(),
                    actual: "starting".to_string(),
                },
            }
        );
        assert!(h.store.get_wake(&wake_key("repl-1")).unwrap().is_some());

        h.seed_task("t1", "repl-1", "running");
        h.clock.advance(60.0);
        let outcome = orchestrator.tick(&record).await.unwrap();
        assert!(matches!(outcome, TickOutcome::Converged { .. }));
    }

    #[tokio::test]
    async fn vanished_and_new_tasks_do_not_block() {
        let h = Harness::new();
        h.seed_instance("repl-1", "dms.c4.large", STATUS_AVAILABLE);
        h.seed_task("t1", "repl-1", "running");
        let orchestrator = h.orchestrator();
        orchestrator
            .start(&alert("repl-1", PressureSignal::CpuHigh))
            .await
            .unwrap();
        let record = h.installed_record("repl-1");

        h.store.delete_task("arn:task:t1").unwrap();
        h.seed_task("t9", "repl-1", "creating");
        h.settle("repl-1");
        h.clock.advance(60.0);

        let outcome = orchestrator.tick(&record).await.unwrap();
        assert!(matches!(outcome, TickOutcome::Converged { .. }));
    }

    #[tokio::test]
    async fn times_out_while_instance_still_modifying() {
        let h = Harness::new();
        h.seed_instance("repl-1", "dms.c4.large", STATUS_MODIFYING);
        let record = OperationRecord::new("repl-1", "dms_cpu_high", vec![], T0, None);
        StoreScheduler::new(h.store.clone())
            .install_recurring_wake(&record.wake_key(), 60, record.to_payload().unwrap())
            .await
            .unwrap();

        h.clock.set(T0 + 1300.0);
        let outcome = h.orchestrator().tick(&record).await.unwrap();
        assert_eq!(
            outcome,
            TickOutcome::TimedOut {
                instance: "repl-1".to_string(),
                elapsed_secs: 1300.0,
            }
        );
        assert!(h.store.list_wakes().unwrap().is_empty());
        assert_eq!(h.subjects(), ["DMS Instance upgrade/downgrade timed out for: repl-1"]);
        assert!(h.store.get_alarm("dms_cpu_high").unwrap().is_none());
    }

    #[tokio::test]
    async fn timeout_boundary_keeps_waiting() {
        let h = Harness::new();
        h.seed_instance("repl-1", "dms.c4.large", STATUS_MODIFYING);
        let record = OperationRecord::new("repl-1", "dms_cpu_high", vec![], T0, None);

        h.clock.set(T0 + 1200.0);
        let outcome = h.orchestrator().tick(&record).await.unwrap();
        assert!(matches!(outcome, TickOutcome::Waiting { .. }));
        assert!(h.subjects().is_empty());
    }

    #[tokio::test]
    async fn configured_timeout_is_used() {
        let h = Harness::new();
        h.seed_instance("repl-1", "dms.c4.large", STATUS_MODIFYING);
        let record = OperationRecord::new("repl-1", "dms_cpu_high", vec![], T0, None);

        h.clock.set(T0 + 301.0);
        let orchestrator = h.orchestrator().with_settings(OrchestratorSettings {
            timeout_secs: 300,
            ..OrchestratorSettings::default()
        });
        let outcome = orchestrator.tick(&record).await.unwrap();
        assert!(matches!(outcome, TickOutcome::TimedOut { .. }));
    }

    #[tokio::test]
    async fn convergence_wins_over_timeout_on_same_tick() {
        let h = Harness::new();
        h.seed_instance("repl-1", "dms.c4.large", STATUS_AVAILABLE);
        let orchestrator = h.orchestrator();
        orchestrator
            .start(&alert("repl-1", PressureSignal::CpuHigh))
            .await
            .unwrap();
        let record = h.installed_record("repl-1");

        h.settle("repl-1");
        h.clock.advance(5000.0);
        let outcome = orchestrator.tick(&record).await.unwrap();
        assert!(matches!(outcome, TickOutcome::Converged { .. }));
        assert_eq!(
            h.subjects(),
            [
                "Instance modification started: repl-1",
                "Instance modification completed: repl-1",
            ]
        );
    }

    #[tokio::test]
    async fn duplicate_tick_after_convergence_is_quiet() {
        let h = Harness::new();
        h.seed_instance("repl-1", "dms.c4.large", STATUS_AVAILABLE);
        let orchestrator = h.orchestrator();
        orchestrator
            .start(&alert("repl-1", PressureSignal::CpuHigh))
            .await
            .unwrap();
        let record = h.installed_record("repl-1");
        h.settle("repl-1");

        orchestrator.tick(&record).await.unwrap();
        h.store
            .set_alarm_state("dms_cpu_high", AlarmState::Alarm, "threshold crossed", 0)
            .unwrap();

        let again = orchestrator.tick(&record).await.unwrap();
        assert!(matches!(again, TickOutcome::Converged { .. }));
        assert_eq!(h.subjects().len(), 2);
        assert_eq!(
            h.store.get_alarm("dms_cpu_high").unwrap().unwrap().state,
            AlarmState::Alarm
        );
    }

    #[tokio::test]
    async fn failing_alarm_reset_retries_then_times_out() {
        let h = Harness::new();
        h.seed_instance("repl-1", "dms.c4.large", STATUS_AVAILABLE);
        let notifier = Arc::new(
            OutboxNotifier::new(h.store.clone(), Some("ops".to_string())).with_clock(h.clock.clone()),
        );
        let orchestrator = h.build(Arc::new(AlarmResetDenied(h.infra())), notifier);
        orchestrator
            .start(&alert("repl-1", PressureSignal::CpuHigh))
            .await
            .unwrap();
        let record = h.installed_record("repl-1");
        h.settle("repl-1");

        h.clock.advance(600.0);
        let err = orchestrator.tick(&record).await.unwrap_err();
        assert!(matches!(err, ScaleError::InfraUnavailable(_)));
        assert_eq!(h.store.list_wakes().unwrap().len(), 1);

        h.clock.advance(700.0);
        let outcome = orchestrator.tick(&record).await.unwrap();
        assert_eq!(
            outcome,
            TickOutcome::TimedOut {
                instance: "repl-1".to_string(),
                elapsed_secs: 1300.0,
            }
        );
        assert!(h.store.list_wakes().unwrap().is_empty());
        assert_eq!(
            h.subjects(),
            [
                "Instance modification started: repl-1",
                "DMS Instance upgrade/downgrade timed out for: repl-1",
            ]
        );
    }

    #[tokio::test]
    async fn waiting_tick_is_idempotent() {
        let h = Harness::new();
        h.seed_instance("repl-1", "dms.c4.large", STATUS_MODIFYING);
        let record = OperationRecord::new("repl-1", "dms_cpu_high", vec![], T0, None);
        let orchestrator = h.orchestrator();

        let first = orchestrator.tick(&record).await.unwrap();
        let second = orchestrator.tick(&record).await.unwrap();
        assert_eq!(first, second);
        assert!(h.subjects().is_empty());
    }

    #[tokio::test]
    async fn unreachable_provider_fails_tick_until_timeout() {
        let h = Harness::new();
        let record = OperationRecord::new("repl-1", "dms_cpu_high", vec![], T0, None);
        StoreScheduler::new(h.store.clone())
            .install_recurring_wake(&record.wake_key(), 60, record.to_payload().unwrap())
            .await
            .unwrap();
        let notifier = Arc::new(OutboxNotifier::new(h.store.clone(), Some("ops".to_string())));
        let orchestrator = h.build(Arc::new(UnreachableInfra), notifier);

        h.clock.set(T0 + 600.0);
        let err = orchestrator.tick(&record).await.unwrap_err();
        assert!(matches!(err, ScaleError::InfraUnavailable(_)));
        assert_eq!(h.store.list_wakes().unwrap().len(), 1);

        h.clock.set(T0 + 1201.0);
        let outcome = orchestrator.tick(&record).await.unwrap();
        assert!(matches!(outcome, TickOutcome::TimedOut { .. }));
        assert!(h.store.list_wakes().unwrap().is_empty());
    }

    // ── Operation marker ───────────────────────────────────────────

    #[tokio::test]
    async fn marker_blocks_second_start_until_terminal() {
        let h = Harness::new();
        h.seed_instance("repl-1", "dms.c4.large", STATUS_AVAILABLE);
        let orchestrator = h.exclusive_orchestrator();

        let first = orchestrator
            .start(&alert("repl-1", PressureSignal::CpuHigh))
            .await
            .unwrap();
        assert!(matches!(first, StartOutcome::Started { .. }));
        let record = h.installed_record("repl-1");

        // A second alert that still sees the instance as available.
        h.store
            .settle_instance("repl-1", STATUS_AVAILABLE, h.clock.now_secs())
            .unwrap();
        let second = orchestrator
            .start(&alert("repl-1", PressureSignal::MemoryHigh))
            .await
            .unwrap();
        assert_eq!(
            second,
            StartOutcome::AlreadyInProgress {
                instance: "repl-1".to_string()
            }
        );

        orchestrator.tick(&record).await.unwrap();
        assert!(h.store.get_operation("repl-1").unwrap().is_none());
    }

    #[tokio::test]
    async fn marker_released_when_resize_rejected() {
        let h = Harness::new();
        h.seed_instance("repl-1", "dms.c4.large", STATUS_AVAILABLE);
        let notifier = Arc::new(OutboxNotifier::new(h.store.clone(), Some("ops".to_string())));
        let orchestrator = h
            .build(Arc::new(RejectingResize(h.infra())), notifier)
            .with_operation_lock(Arc::new(StoreOperationLock::new(h.store.clone())));

        let err = orchestrator
            .start(&alert("repl-1", PressureSignal::CpuHigh))
            .await
            .unwrap_err();
        assert!(matches!(err, ScaleError::InfraUnavailable(_)));
        assert!(h.store.get_operation("repl-1").unwrap().is_none());
        assert!(h.store.list_wakes().unwrap().is_empty());
        assert!(h.subjects().is_empty());
    }
}
