//! Inbound payload routing.
//!
//! One entry point receives both pressure alerts and the orchestrator's own
//! wakes. A payload carrying `replication_instance` is a wake; a payload
//! whose `AlarmName` maps to a known signal is an alert. Anything else is
//! ignored without error, since the channel may carry unrelated traffic.
//!
//! Alerts relayed through a notification topic arrive wrapped as
//! `{"Records": [{"Sns": {"Message": "<json>"}}]}` and are unwrapped first.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use replscale_core::PressureSignal;

use crate::error::ScaleResult;
use crate::orchestrator::{Alert, ResizeOrchestrator, StartOutcome, TickOutcome};
use crate::record::OperationRecord;

/// What an inbound payload turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Alert(Alert),
    Poll(OperationRecord),
    /// Carries the wake marker but does not decode as a record.
    Malformed(String),
    Ignored(String),
}

/// Result of a dispatched invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Alert(StartOutcome),
    Poll(TickOutcome),
    Ignored { reason: String },
}

/// Decode the message inside a topic envelope, if there is one.
fn unwrap_envelope(payload: &Value) -> Option<Value> {
    let message = payload
        .get("Records")?
        .get(0)?
        .get("Sns")?
        .get("Message")?
        .as_str()?;
    serde_json::from_str(message).ok()
}

fn dimension_value(message: &Value) -> Option<&str> {
    let dimension = message.get("Trigger")?.get("Dimensions")?.get(0)?;
    dimension
        .get("value")
        .or_else(|| dimension.get("Value"))?
        .as_str()
}

/// Classify a payload without touching any collaborator.
pub fn classify(payload: &Value, alarm_prefix: &str) -> Inbound {
    let unwrapped = unwrap_envelope(payload);
    let message = unwrapped.as_ref().unwrap_or(payload);

    if message.get("replication_instance").is_some() {
        return match OperationRecord::from_payload(message) {
            Ok(record) => Inbound::Poll(record),
            Err(e) => Inbound::Malformed(format!("undecodable wake payload: {e}")),
        };
    }

    let Some(alarm_name) = message.get("AlarmName").and_then(Value::as_str) else {
        return Inbound::Ignored("neither a wake nor an alarm".to_string());
    };
    let Some(signal) = PressureSignal::from_alarm_name(alarm_name, alarm_prefix) else {
        return Inbound::Ignored(format!("unrecognised alarm {alarm_name}"));
    };
    let Some(instance_name) = dimension_value(message) else {
        return Inbound::Ignored(format!("alarm {alarm_name} names no instance"));
    };

    Inbound::Alert(Alert {
        alarm_name: alarm_name.to_string(),
        instance_name: instance_name.to_string(),
        signal,
    })
}

impl ResizeOrchestrator {
    /// Route one inbound payload to `start` or `tick`.
    pub async fn dispatch(&self, payload: &Value) -> ScaleResult<DispatchOutcome> {
        match classify(payload, &self.settings().alarm_prefix) {
            Inbound::Alert(alert) => {
                debug!(alarm = %alert.alarm_name, instance = %alert.instance_name, "pressure alert");
                Ok(DispatchOutcome::Alert(self.start(&alert).await?))
            }
            Inbound::Poll(record) => {
                debug!(instance = %record.instance_name, "scheduled wake");
                Ok(DispatchOutcome::Poll(self.tick(&record).await?))
            }
            Inbound::Malformed(reason) => {
                warn!(%reason, "ignoring malformed wake");
                Ok(DispatchOutcome::Ignored { reason })
            }
            Inbound::Ignored(reason) => {
                debug!(%reason, "ignoring payload");
                Ok(DispatchOutcome::Ignored { reason })
            }
        }
    }
}
