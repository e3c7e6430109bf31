//! Size table — the instance-class ladder per pressure signal.
//!
//! The table is a single JSON object: two enable flags plus one entry per
//! instance class mapping every signal to the next class or `no_action`.
//!
//! ```json
//! {
//!   "autoscaling_up_enabled": "true",
//!   "autoscaling_down_enabled": "true",
//!   "dms.c4.2xlarge": {
//!     "cpu_high": "dms.c4.4xlarge", "cpu_low": "dms.c4.xlarge",
//!     "memory_high": "dms.c4.4xlarge", "memory_low": "dms.c4.xlarge"
//!   }
//! }
//! ```
//!
//! Tables are validated when loaded so that selection never meets a
//! missing entry at runtime: every class declares all four signals, and
//! every target is itself a declared class.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::types::{InstanceClass, NO_ACTION, PressureSignal, ScaleDirection};

/// One cell of the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    To(InstanceClass),
    NoAction,
}

/// Validated, read-only size table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeTable {
    pub scale_up_enabled: bool,
    pub scale_down_enabled: bool,
    classes: BTreeMap<InstanceClass, BTreeMap<PressureSignal, Step>>,
}

/// The provider file writes flags as strings; booleans are accepted too.
#[derive(Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Text(String),
}

#[derive(Deserialize)]
struct RawSizeTable {
    autoscaling_up_enabled: Option<Flag>,
    autoscaling_down_enabled: Option<Flag>,
    #[serde(flatten)]
    classes: BTreeMap<String, BTreeMap<String, String>>,
}

impl SizeTable {
    /// Parse and validate a table from its JSON text.
    pub fn from_json_str(json: &str) -> CoreResult<Self> {
        let raw: RawSizeTable = serde_json::from_str(json)?;
        Self::from_raw(raw)
    }

    /// Read, parse and validate a table file.
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| CoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let table = Self::from_json_str(&content)?;
        debug!(?path, classes = table.classes.len(), "size table loaded");
        Ok(table)
    }

    fn from_raw(raw: RawSizeTable) -> CoreResult<Self> {
        let scale_up_enabled = parse_flag("autoscaling_up_enabled", raw.autoscaling_up_enabled)?;
        let scale_down_enabled =
            parse_flag("autoscaling_down_enabled", raw.autoscaling_down_enabled)?;

        let mut classes = BTreeMap::new();
        for (class, row) in &raw.classes {
            let mut steps = BTreeMap::new();
            for (key, target) in row {
                let signal = PressureSignal::parse(key).ok_or_else(|| {
                    CoreError::SizeTableInvalid(format!("{class}: unknown signal {key:?}"))
                })?;
                let step = if target == NO_ACTION {
                    Step::NoAction
                } else {
                    Step::To(target.clone())
                };
                steps.insert(signal, step);
            }
            for signal in PressureSignal::ALL {
                if !steps.contains_key(&signal) {
                    return Err(CoreError::SizeTableInvalid(format!(
                        "{class}: missing entry for {signal}"
                    )));
                }
            }
            classes.insert(class.clone(), steps);
        }

        // Every class the ladder can reach must itself be a row.
        for (class, steps) in &classes {
            for (signal, step) in steps {
                if let Step::To(target) = step
                    && !classes.contains_key(target)
                {
                    return Err(CoreError::SizeTableInvalid(format!(
                        "{class}: {signal} points at undeclared class {target}"
                    )));
                }
            }
        }

        Ok(Self {
            scale_up_enabled,
            scale_down_enabled,
            classes,
        })
    }

    /// Whether scaling in `direction` is switched on.
    pub fn is_enabled(&self, direction: ScaleDirection) -> bool {
        match direction {
            ScaleDirection::Up => self.scale_up_enabled,
            ScaleDirection::Down => self.scale_down_enabled,
        }
    }

    /// Look up the step for `(class, signal)`.
    pub fn step(&self, class: &str, signal: PressureSignal) -> CoreResult<&Step> {
        let row = self
            .classes
            .get(class)
            .ok_or_else(|| CoreError::UnknownClass(class.to_string()))?;
        // Rows are complete after validation.
        row.get(&signal)
            .ok_or_else(|| CoreError::SizeTableInvalid(format!("{class}: missing entry for {signal}")))
    }

    /// Declared classes in sorted order.
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }
}

fn parse_flag(name: &str, flag: Option<Flag>) -> CoreResult<bool> {
    match flag {
        Some(Flag::Bool(b)) => Ok(b),
        Some(Flag::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(CoreError::SizeTableInvalid(format!(
                "{name} must be true or false, got {other:?}"
            ))),
        },
        None => Err(CoreError::SizeTableInvalid(format!("missing {name}"))),
    }
}
