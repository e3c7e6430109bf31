//! OperationRecord — the whole memory of an in-flight resize.
//!
//! The record is written once when a resize is accepted, carried verbatim
//! as the payload of every wake, and dropped at the terminal transition.
//! Field names match the payload shape already in use by deployed wakes:
//!
//! ```json
//! {
//!   "replication_instance": "repl-1",
//!   "alarm_name": "dms_cpu_high",
//!   "existing_tasks": [
//!     {"ReplicationTaskIdentifier": "t1", "Status": "running", "ReplicationTaskArn": "arn1"}
//!   ],
//!   "start_time": 1700000000.25
//! }
//! ```

use serde::{Deserialize, Serialize};

use replscale_core::{InstanceClass, TaskSnapshot};

use crate::error::ScaleResult;

/// Key of the recurring wake tracking `instance_name`.
pub fn wake_key(instance_name: &str) -> String {
    format!("resize-wake-{instance_name}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    #[serde(rename = "replication_instance")]
    pub instance_name: String,
    pub alarm_name: String,
    /// Task statuses captured before the resize was requested.
    #[serde(rename = "existing_tasks", default)]
    pub task_snapshots: Vec<TaskSnapshot>,
    /// Epoch seconds at which the resize was requested.
    pub start_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_class: Option<InstanceClass>,
}

impl OperationRecord {
    pub fn new(
        instance_name: &str,
        alarm_name: &str,
        task_snapshots: Vec<TaskSnapshot>,
        start_time: f64,
        target_class: Option<InstanceClass>,
    ) -> Self {
        Self {
            instance_name: instance_name.to_string(),
            alarm_name: alarm_name.to_string(),
            task_snapshots,
            start_time,
            target_class,
        }
    }

    pub fn wake_key(&self) -> String {
        wake_key(&self.instance_name)
    }

    pub fn to_payload(&self) -> ScaleResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_payload(payload: &serde_json::Value) -> ScaleResult<Self> {
        Ok(Self::deserialize(payload)?)
    }

    /// Seconds since the resize was requested.
    pub fn elapsed(&self, now: f64) -> f64 {
        now - self.start_time
    }

    /// Strictly past the budget; reaching it exactly is not a timeout.
    pub fn is_timed_out(&self, now: f64, timeout_secs: u64) -> bool {
        self.elapsed(now) > timeout_secs as f64
    }
}
