//! Durable stage queue.
//!
//! The scheduler only sees the [`DurableQueue`] trait and the
//! [`StageRequest`] submission record. `StageQueue` is the redb-backed
//! implementation and `worker` delivers its due entries.

pub mod db;
pub mod entry;
pub mod worker;

pub use db::StageQueue;
pub use entry::{EntryStatus, QueueEntry};
pub use worker::{TickSummary, Worker};

use crate::error::Result;
use crate::tree::NodeId;
use crate::types::{Direction, LifecycleAction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Class name stamped on every stage request.
pub const STAGE_CLASS: &str = "Service";
/// Handler that processes one stage.
pub const PROCESS_STAGE_METHOD: &str = "process_group_action";

/// Dedup key collapsing duplicate in-flight stages for the same root.
pub fn task_key(root: NodeId) -> String {
    format!("{}_{root}", STAGE_CLASS.to_lowercase())
}

// ---------------------------------------------------------------------------
// StageArgs
// ---------------------------------------------------------------------------

/// `[action, group_index, direction]` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    into = "(LifecycleAction, usize, Direction)",
    from = "(LifecycleAction, usize, Direction)"
)]
pub struct StageArgs {
    pub action: LifecycleAction,
    pub group_index: usize,
    pub direction: Direction,
}

impl From<StageArgs> for (LifecycleAction, usize, Direction) {
    fn from(a: StageArgs) -> Self {
        (a.action, a.group_index, a.direction)
    }
}

impl From<(LifecycleAction, usize, Direction)> for StageArgs {
    fn from((action, group_index, direction): (LifecycleAction, usize, Direction)) -> Self {
        Self {
            action,
            group_index,
            direction,
        }
    }
}

// ---------------------------------------------------------------------------
// StageRequest
// ---------------------------------------------------------------------------

/// One deferred unit of work: "process group `args.group_index` of the run
/// rooted at `instance_id`".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRequest {
    pub class_name: String,
    pub instance_id: NodeId,
    pub method_name: String,
    pub role: String,
    pub task_id: String,
    pub args: StageArgs,
    /// Absent for immediate delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deliver_on: Option<DateTime<Utc>>,
    /// Affinity hint: zone of the first VM under the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
}

impl StageRequest {
    pub fn new(root: NodeId, args: StageArgs, role: impl Into<String>) -> Self {
        Self {
            class_name: STAGE_CLASS.to_string(),
            instance_id: root,
            method_name: PROCESS_STAGE_METHOD.to_string(),
            role: role.into(),
            task_id: task_key(root),
            args,
            deliver_on: None,
            zone: None,
        }
    }

    pub fn deliver_on(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.deliver_on = at;
        self
    }

    pub fn zone(mut self, zone: Option<String>) -> Self {
        self.zone = zone;
        self
    }
}

// ---------------------------------------------------------------------------
// DurableQueue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum PutOutcome {
    Inserted(Uuid),
    /// A pending entry with the same task key already exists.
    Collapsed(Uuid),
}

impl PutOutcome {
    pub fn id(&self) -> Uuid {
        match self {
            PutOutcome::Inserted(id) | PutOutcome::Collapsed(id) => *id,
        }
    }
}

/// Accepts deferred stages and delivers each at least once, at or after
/// its `deliver_on` time, across process restarts.
pub trait DurableQueue {
    fn put(&self, request: StageRequest) -> Result<PutOutcome>;
}
