//! Shared types used across replscale crates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Instance class identifier, e.g. `dms.c4.2xlarge`.
pub type InstanceClass = String;

/// Status value the provider reports for an instance that accepts changes.
pub const STATUS_AVAILABLE: &str = "available";

/// Status the local provider reports while a resize is being applied.
pub const STATUS_MODIFYING: &str = "modifying";

/// Sentinel used in the size table for "no further step on this ladder".
pub const NO_ACTION: &str = "no_action";

/// Period of the self-scheduled wake, in seconds.
pub const POLL_PERIOD_SECS: u64 = 60;

/// Default time budget for a resize before it is abandoned.
pub const DEFAULT_TIMEOUT_SECS: u64 = 1200;

// ── Pressure signals ──────────────────────────────────────────────

/// Resource-pressure condition raised by an alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureSignal {
    CpuHigh,
    CpuLow,
    MemoryHigh,
    MemoryLow,
}

/// Which way a signal moves the instance along the ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDirection {
    Up,
    Down,
}

impl PressureSignal {
    pub const ALL: [PressureSignal; 4] = [
        PressureSignal::CpuHigh,
        PressureSignal::CpuLow,
        PressureSignal::MemoryHigh,
        PressureSignal::MemoryLow,
    ];

    pub fn direction(self) -> ScaleDirection {
        match self {
            PressureSignal::CpuHigh | PressureSignal::MemoryHigh => ScaleDirection::Up,
            PressureSignal::CpuLow | PressureSignal::MemoryLow => ScaleDirection::Down,
        }
    }

    /// The signal with the same resource axis and the opposite direction.
    pub fn opposite(self) -> PressureSignal {
        match self {
            PressureSignal::CpuHigh => PressureSignal::CpuLow,
            PressureSignal::CpuLow => PressureSignal::CpuHigh,
            PressureSignal::MemoryHigh => PressureSignal::MemoryLow,
            PressureSignal::MemoryLow => PressureSignal::MemoryHigh,
        }
    }

    /// Key used for this signal inside the size table.
    pub fn as_str(self) -> &'static str {
        match self {
            PressureSignal::CpuHigh => "cpu_high",
            PressureSignal::CpuLow => "cpu_low",
            PressureSignal::MemoryHigh => "memory_high",
            PressureSignal::MemoryLow => "memory_low",
        }
    }

    /// Parse a table key (`cpu_high`, also `cpu-high`).
    pub fn parse(s: &str) -> Option<PressureSignal> {
        match s.replace('-', "_").as_str() {
            "cpu_high" => Some(PressureSignal::CpuHigh),
            "cpu_low" => Some(PressureSignal::CpuLow),
            "memory_high" => Some(PressureSignal::MemoryHigh),
            "memory_low" => Some(PressureSignal::MemoryLow),
            _ => None,
        }
    }

    /// Map an alarm name such as `dms_cpu_high` or `dms-cpu-high` to a signal.
    ///
    /// The name must be `prefix`, one separator (`_` or `-`), then the
    /// signal. Returns `None` for anything else.
    pub fn from_alarm_name(alarm_name: &str, prefix: &str) -> Option<PressureSignal> {
        let rest = alarm_name.strip_prefix(prefix)?;
        let rest = rest.strip_prefix('_').or_else(|| rest.strip_prefix('-'))?;
        PressureSignal::parse(rest)
    }
}

impl fmt::Display for PressureSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Provider resources ────────────────────────────────────────────

/// What the orchestrator needs to know about a replication instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDetails {
    pub name: String,
    pub arn: String,
    pub class: InstanceClass,
    pub status: String,
}

impl InstanceDetails {
    pub fn is_available(&self) -> bool {
        self.status == STATUS_AVAILABLE
    }
}

/// Narrowed view of a replication task, small enough to ride in a wake payload.
///
/// `status` is opaque: it is only ever compared for equality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    #[serde(rename = "ReplicationTaskIdentifier", alias = "task_id")]
    pub task_id: String,
    #[serde(rename = "ReplicationTaskArn", alias = "arn")]
    pub arn: String,
    #[serde(rename = "Status", alias = "status")]
    pub status: String,
}

impl TaskSnapshot {
    pub fn new(task_id: &str, arn: &str, status: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            arn: arn.to_string(),
            status: status.to_string(),
        }
    }
}
