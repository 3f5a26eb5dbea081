//! Queue entry data model.
//!
//! A `QueueEntry` wraps one submitted [`StageRequest`] with its delivery
//! bookkeeping. The worker claims due entries, runs the stage handler and
//! records the outcome on the entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::StageRequest;

// ---------------------------------------------------------------------------
// EntryStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of an entry.
///
/// Transitions: `Pending → Running → Completed | Failed`
///
/// The worker writes `Running` *before* invoking the handler. On restart,
/// entries stuck in `Running` are put back to `Pending` so the stage is
/// delivered again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryStatus {
    /// Waiting for its delivery time.
    Pending,
    /// Claimed by a worker (or the worker crashed mid-stage).
    Running,
    /// Handler returned; `result` is the stage outcome.
    Completed { result: serde_json::Value },
    /// Handler failed; the run is stalled until the entry is retried.
    Failed { reason: String },
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Running => "running",
            EntryStatus::Completed { .. } => "completed",
            EntryStatus::Failed { .. } => "failed",
        }
    }
}

// ---------------------------------------------------------------------------
// QueueEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub request: StageRequest,
    pub status: EntryStatus,
    /// Number of times the entry has been claimed.
    #[serde(default)]
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(request: StageRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            request,
            status: EntryStatus::Pending,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Timestamp the entry becomes deliverable; the redb key prefix.
    pub fn due_at(&self) -> DateTime<Utc> {
        self.request.deliver_on.unwrap_or(self.created_at)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.status, EntryStatus::Pending)
    }
}
