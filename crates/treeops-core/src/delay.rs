use crate::config::{Config, DEFAULT_DELAY_BETWEEN_GROUPS};
use crate::types::LifecycleAction;
use std::collections::HashMap;
use std::time::Duration;

/// Pacing between the groups of a run.
///
/// The delay depends only on the action and the group about to be
/// submitted, never on how long the previous group took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayPolicy {
    between_groups: Duration,
    per_action: HashMap<LifecycleAction, Duration>,
}

impl Default for DelayPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(DEFAULT_DELAY_BETWEEN_GROUPS))
    }
}

impl DelayPolicy {
    pub fn fixed(between_groups: Duration) -> Self {
        Self {
            between_groups,
            per_action: HashMap::new(),
        }
    }

    /// Build from config. Unknown action keys are ignored here; `Config::validate`
    /// reports them.
    pub fn from_config(config: &Config) -> Self {
        let per_action = config
            .action_delays
            .iter()
            .filter_map(|(k, secs)| {
                k.parse::<LifecycleAction>()
                    .ok()
                    .map(|a| (a, Duration::from_secs(*secs)))
            })
            .collect();
        Self {
            between_groups: Duration::from_secs(config.delay_between_groups),
            per_action,
        }
    }

    pub fn with_action(mut self, action: LifecycleAction, delay: Duration) -> Self {
        self.per_action.insert(action, delay);
        self
    }

    /// Delay before the stage for `next_group` is delivered. Zero means
    /// immediate delivery.
    pub fn delay_for(&self, action: LifecycleAction, _next_group: usize) -> Duration {
        self.per_action
            .get(&action)
            .copied()
            .unwrap_or(self.between_groups)
    }
}
