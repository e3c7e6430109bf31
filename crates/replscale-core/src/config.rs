//! replscale.toml configuration parser.
//!
//! Every section is optional; missing values fall back to defaults.
//! After loading, `apply_env` lets the process environment override the
//! handful of settings operators usually set per deployment.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CoreError, CoreResult};
use crate::types::DEFAULT_TIMEOUT_SECS;

/// Environment variable overriding `orchestrator.timeout_secs`.
pub const ENV_TIMEOUT: &str = "MODIFICATION_TIMEOUT";
/// Environment variable overriding `notify.topic`.
pub const ENV_TOPIC: &str = "TOPIC_ARN";
/// Environment variable overriding `size_table.path`.
pub const ENV_SIZE_TABLE: &str = "SIZE_TABLE_PATH";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalerConfig {
    pub size_table: SizeTableConfig,
    pub orchestrator: OrchestratorConfig,
    pub notify: NotifyConfig,
    pub state: StateConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizeTableConfig {
    pub path: PathBuf,
}

impl Default for SizeTableConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("config/instance_types.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Seconds after which an unfinished resize is abandoned.
    pub timeout_secs: u64,
    /// Alarm names are `<alarm_prefix>_<signal>` or `<alarm_prefix>-<signal>`.
    pub alarm_prefix: String,
    /// Claim a durable per-instance marker before resizing.
    pub exclusive_operations: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            alarm_prefix: "dms".to_string(),
            exclusive_operations: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Destination topic. Notifications are skipped when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/replscale/replscale.redb"),
        }
    }
}

impl ScalerConfig {
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| CoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load `path` if it exists, otherwise start from the defaults.
    pub fn load_or_default(path: &Path) -> CoreResult<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml_string(&self) -> CoreResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Starting point for `replscaled config init`.
    pub fn scaffold(topic: Option<&str>) -> Self {
        let mut config = Self::default();
        config.notify.topic = topic.map(str::to_string);
        config
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`.
    ///
    /// A value that does not parse is ignored with a warning and the
    /// current setting is kept.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(timeout) = parse_override::<u64>(ENV_TIMEOUT, lookup(ENV_TIMEOUT)) {
            self.orchestrator.timeout_secs = timeout;
        }
        if let Some(topic) = lookup(ENV_TOPIC).filter(|t| !t.trim().is_empty()) {
            self.notify.topic = Some(topic);
        }
        if let Some(path) = lookup(ENV_SIZE_TABLE).filter(|p| !p.trim().is_empty()) {
            self.size_table.path = PathBuf::from(path);
        }
    }
}

fn parse_override<T: FromStr>(key: &str, raw: Option<String>) -> Option<T> {
    let raw = raw?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(%key, value = %raw, "ignoring unparseable override");
            None
        }
    }
}
