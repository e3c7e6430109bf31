//! Records persisted by the replscale store.
//!
//! The first three stand in for the cloud provider's view of the world;
//! the rest belong to the orchestrator's own plumbing.

use serde::{Deserialize, Serialize};

use replscale_core::{InstanceClass, InstanceDetails, TaskSnapshot};

// ── Provider inventory ────────────────────────────────────────────

/// A replication instance as the local provider tracks it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub name: String,
    pub arn: String,
    pub class: InstanceClass,
    pub status: String,
    /// Class requested by a resize that has not been applied yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_class: Option<InstanceClass>,
    pub updated_at: u64,
}

impl InstanceRecord {
    pub fn details(&self) -> InstanceDetails {
        InstanceDetails {
            name: self.name.clone(),
            arn: self.arn.clone(),
            class: self.class.clone(),
            status: self.status.clone(),
        }
    }
}

/// A replication task bound to an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub arn: String,
    pub instance_arn: String,
    pub status: String,
    pub updated_at: u64,
}

impl TaskRecord {
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot::new(&self.task_id, &self.arn, &self.status)
    }
}

/// Alarm state values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmState {
    Ok,
    Alarm,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmRecord {
    pub name: String,
    pub state: AlarmState,
    pub reason: String,
    pub updated_at: u64,
}

// ── Orchestrator plumbing ─────────────────────────────────────────

/// A recurring wake and the payload it re-delivers on every firing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WakeEntry {
    pub key: String,
    pub period_secs: u64,
    pub payload: serde_json::Value,
    pub installed_at: u64,
    #[serde(default)]
    pub last_fired_at: Option<u64>,
}

impl WakeEntry {
    /// Whether the wake should fire at `now`.
    ///
    /// A fresh wake first fires one period after installation.
    pub fn is_due(&self, now: u64) -> bool {
        let since = self.last_fired_at.unwrap_or(self.installed_at);
        now.saturating_sub(since) >= self.period_secs
    }
}

/// One message accepted by the outbox notifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub seq: u64,
    pub topic: String,
    pub subject: String,
    pub body: String,
    pub sent_at: u64,
}

/// Marker held while a resize is in flight for an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationMarker {
    pub instance: String,
    pub claimed_at: u64,
}
