use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// LifecycleAction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    Start,
    Stop,
    Suspend,
    ShutdownGuest,
}

impl LifecycleAction {
    pub fn all() -> &'static [LifecycleAction] {
        &[
            LifecycleAction::Start,
            LifecycleAction::Stop,
            LifecycleAction::Suspend,
            LifecycleAction::ShutdownGuest,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleAction::Start => "start",
            LifecycleAction::Stop => "stop",
            LifecycleAction::Suspend => "suspend",
            LifecycleAction::ShutdownGuest => "shutdown_guest",
        }
    }

    /// Start walks from the root toward the leaves; every stop-class action
    /// walks back from the leaves.
    pub fn direction(self) -> Direction {
        match self {
            LifecycleAction::Start => Direction::Forward,
            LifecycleAction::Stop | LifecycleAction::Suspend | LifecycleAction::ShutdownGuest => {
                Direction::Backward
            }
        }
    }

    pub fn is_valid(s: &str) -> bool {
        s.parse::<LifecycleAction>().is_ok()
    }
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LifecycleAction {
    type Err = crate::error::TreeopsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(LifecycleAction::Start),
            "stop" => Ok(LifecycleAction::Stop),
            "suspend" => Ok(LifecycleAction::Suspend),
            "shutdown_guest" => Ok(LifecycleAction::ShutdownGuest),
            _ => Err(crate::error::TreeopsError::InvalidAction(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

/// Walk order through the groups of a run. Serialized as `1` / `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i8")]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn step(self) -> i8 {
        match self {
            Direction::Forward => 1,
            Direction::Backward => -1,
        }
    }
}

impl From<Direction> for i8 {
    fn from(d: Direction) -> Self {
        d.step()
    }
}

impl TryFrom<i8> for Direction {
    type Error = crate::error::TreeopsError;

    fn try_from(v: i8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Direction::Forward),
            -1 => Ok(Direction::Backward),
            other => Err(crate::error::TreeopsError::InvalidDirection(other)),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:+}", self.step())
    }
}

// ---------------------------------------------------------------------------
// ResourceKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Vm,
    Service,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Vm => "vm",
            ResourceKind::Service => "service",
        }
    }

    /// Label used in log lines, e.g. `Vm:12:web-01`.
    pub fn label(self) -> &'static str {
        match self {
            ResourceKind::Vm => "Vm",
            ResourceKind::Service => "Service",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_is_the_only_forward_action() {
        assert_eq!(LifecycleAction::Start.direction(), Direction::Forward);
        for action in [
            LifecycleAction::Stop,
            LifecycleAction::Suspend,
            LifecycleAction::ShutdownGuest,
        ] {
            assert_eq!(action.direction(), Direction::Backward, "{action}");
        }
    }

    #[test]
    fn action_parses_snake_case() {
        assert_eq!(
            "shutdown_guest".parse::<LifecycleAction>().unwrap(),
            LifecycleAction::ShutdownGuest
        );
        assert!("reboot".parse::<LifecycleAction>().is_err());
        for a in LifecycleAction::all() {
            assert_eq!(a.as_str().parse::<LifecycleAction>().unwrap(), *a);
        }
    }

    #[test]
    fn direction_serializes_as_signed_step() {
        assert_eq!(serde_json::to_string(&Direction::Forward).unwrap(), "1");
        assert_eq!(serde_json::to_string(&Direction::Backward).unwrap(), "-1");
        let d: Direction = serde_json::from_str("-1").unwrap();
        assert_eq!(d, Direction::Backward);
        assert!(serde_json::from_str::<Direction>("0").is_err());
    }
}
