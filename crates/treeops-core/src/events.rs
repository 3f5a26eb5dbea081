//! Lifecycle events published to external observers.
//!
//! Publishing is fire-and-forget: the scheduler logs a failed publish and
//! moves on.

use crate::error::{Result, TreeopsError};
use crate::paths;
use crate::tree::NodeId;
use crate::types::LifecycleAction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// EventName
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventName {
    RequestServiceStart,
    ServiceStarted,
    RequestServiceStop,
    ServiceStopped,
}

impl EventName {
    pub fn as_str(self) -> &'static str {
        match self {
            EventName::RequestServiceStart => "request_service_start",
            EventName::ServiceStarted => "service_started",
            EventName::RequestServiceStop => "request_service_stop",
            EventName::ServiceStopped => "service_stopped",
        }
    }

    /// Event raised when a run of `action` is requested, if any.
    pub fn requested(action: LifecycleAction) -> Option<EventName> {
        match action {
            LifecycleAction::Start => Some(EventName::RequestServiceStart),
            LifecycleAction::Stop => Some(EventName::RequestServiceStop),
            LifecycleAction::Suspend | LifecycleAction::ShutdownGuest => None,
        }
    }

    /// Event raised when a run of `action` reaches its last group, if any.
    pub fn completed(action: LifecycleAction) -> Option<EventName> {
        match action {
            LifecycleAction::Start => Some(EventName::ServiceStarted),
            LifecycleAction::Stop => Some(EventName::ServiceStopped),
            LifecycleAction::Suspend | LifecycleAction::ShutdownGuest => None,
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// LifecycleEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub name: EventName,
    pub root: NodeId,
    pub action: LifecycleAction,
    pub at: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(name: EventName, root: NodeId, action: LifecycleAction) -> Self {
        Self {
            name,
            root,
            action,
            at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// EventNotifier
// ---------------------------------------------------------------------------

pub trait EventNotifier {
    fn publish(&self, event: &LifecycleEvent) -> Result<()>;
}

/// Appends events as JSON lines to `.treeops/events.jsonl`.
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(root: &Path) -> Self {
        Self {
            path: paths::events_path(root),
        }
    }

    /// All recorded events, oldest first. A missing log is empty.
    pub fn read_all(&self) -> Result<Vec<LifecycleEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(&self.path)?;
        let mut events = Vec::new();
        for line in data.lines().filter(|l| !l.trim().is_empty()) {
            events.push(serde_json::from_str(line)?);
        }
        Ok(events)
    }
}

impl EventNotifier for EventLog {
    fn publish(&self, event: &LifecycleEvent) -> Result<()> {
        let line = serde_json::to_string(event)?;
        crate::io::append_line(&self.path, &line)
            .map_err(|e| TreeopsError::EventSink(format!("{}: {e}", self.path.display())))
    }
}

/// Keeps published events in memory.
#[derive(Default)]
pub struct MemoryNotifier {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn names(&self) -> Vec<EventName> {
        self.events().into_iter().map(|e| e.name).collect()
    }
}

impl EventNotifier for MemoryNotifier {
    fn publish(&self, event: &LifecycleEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|e| TreeopsError::EventSink(e.to_string()))?
            .push(event.clone());
        Ok(())
    }
}
