//! redb table definitions for the replscale store.
//!
//! Every table maps a `&str` key to a JSON-encoded record.

use redb::TableDefinition;

/// Shape shared by all tables.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Replication instances keyed by instance name.
pub const INSTANCES: JsonTable = TableDefinition::new("instances");

/// Replication tasks keyed by task ARN.
pub const TASKS: JsonTable = TableDefinition::new("tasks");

/// Alarm states keyed by alarm name.
pub const ALARMS: JsonTable = TableDefinition::new("alarms");

/// Recurring wakes keyed by wake key.
pub const WAKES: JsonTable = TableDefinition::new("wakes");

/// Sent notifications keyed by zero-padded sequence number.
pub const OUTBOX: JsonTable = TableDefinition::new("outbox");

/// In-flight operation markers keyed by instance name.
pub const OPERATIONS: JsonTable = TableDefinition::new("operations");
