use crate::error::{Result, TreeopsError};
use crate::paths;
use crate::types::LifecycleAction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Pacing delay between groups when the config does not set one.
pub const DEFAULT_DELAY_BETWEEN_GROUPS: u64 = 120;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// QueueConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Worker role stamped on every stage request.
    #[serde(default = "default_role")]
    pub role: String,
    /// Entries left `running` longer than this are redelivered on worker start.
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
}

fn default_role() -> String {
    "ems_operations".to_string()
}

fn default_stale_after() -> u64 {
    600
}

fn default_tick_interval() -> u64 {
    5
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            role: default_role(),
            stale_after_secs: default_stale_after(),
            tick_interval_secs: default_tick_interval(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_delay_between_groups")]
    pub delay_between_groups: u64,
    /// Per-action override of `delay_between_groups`, keyed by action name.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub action_delays: HashMap<String, u64>,
    #[serde(default)]
    pub queue: QueueConfig,
}

fn default_version() -> u32 {
    1
}

fn default_delay_between_groups() -> u64 {
    DEFAULT_DELAY_BETWEEN_GROUPS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            delay_between_groups: DEFAULT_DELAY_BETWEEN_GROUPS,
            action_delays: HashMap::new(),
            queue: QueueConfig::default(),
        }
    }
}

impl Config {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(TreeopsError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        for key in self.action_delays.keys() {
            if !LifecycleAction::is_valid(key) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "unknown action '{key}' in action_delays (expected one of: {})",
                        LifecycleAction::all()
                            .iter()
                            .map(|a| a.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                });
            }
        }

        if self.queue.tick_interval_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "queue.tick_interval_secs must be greater than zero".to_string(),
            });
        }

        if self.queue.role.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "queue.role is empty; stages carry no routing role".to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
