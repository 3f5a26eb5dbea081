//! Delivery loop body: claim due stages and hand each to the stage handler.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{Result, TreeopsError};

use super::{StageQueue, StageRequest, PROCESS_STAGE_METHOD};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
}

pub struct Worker<'q> {
    queue: &'q StageQueue,
}

impl<'q> Worker<'q> {
    pub fn new(queue: &'q StageQueue) -> Self {
        Self { queue }
    }

    /// Deliver every stage due by `now`, in delivery order.
    ///
    /// A handler error marks that entry `Failed` and does not stop the tick;
    /// only queue storage errors are returned.
    pub fn tick<F>(&self, now: DateTime<Utc>, mut handler: F) -> Result<TickSummary>
    where
        F: FnMut(&StageRequest) -> Result<serde_json::Value>,
    {
        let mut summary = TickSummary::default();
        for entry in self.queue.claim_due(now)? {
            summary.claimed += 1;
            let request = &entry.request;

            if request.method_name != PROCESS_STAGE_METHOD {
                let err = TreeopsError::UnknownMethod(request.method_name.clone());
                warn!(entry = %entry.id, error = %err, "dropping stage");
                self.queue.fail(entry.id, err.to_string())?;
                summary.failed += 1;
                continue;
            }

            match handler(request) {
                Ok(result) => {
                    self.queue.complete(entry.id, result)?;
                    summary.completed += 1;
                }
                Err(e) => {
                    error!(
                        entry = %entry.id,
                        root = request.instance_id,
                        action = %request.args.action,
                        group = request.args.group_index,
                        error = %e,
                        "stage failed"
                    );
                    self.queue.fail(entry.id, e.to_string())?;
                    summary.failed += 1;
                }
            }
        }
        if summary.claimed > 0 {
            info!(
                claimed = summary.claimed,
                completed = summary.completed,
                failed = summary.failed,
                "worker tick"
            );
        }
        Ok(summary)
    }
}
