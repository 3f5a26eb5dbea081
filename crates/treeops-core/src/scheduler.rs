//! Stage scheduler: the control loop of an orchestration run.
//!
//! A run never executes in one call stack. A lifecycle verb validates the
//! subtree and queues the first stage; each delivered stage dispatches one
//! group, then either queues the next group (after the pacing delay) or
//! completes the run.
//!
//! ```text
//! Pending ──verb──► Dispatching(first, d) ──► Advancing(next) ──queue──► Dispatching(next, d)
//!                          │                                                   │
//!                          └──────────── no next group ──► Completed(action) ◄─┘
//!
//! any stage ── ineligible resources ──► Err (no event, no next stage)
//! ```

use crate::delay::DelayPolicy;
use crate::dispatch::{Dispatcher, GroupReport, StageContext};
use crate::error::{ResourceError, Result, TreeopsError};
use crate::events::{EventName, EventNotifier, LifecycleEvent};
use crate::partition::GroupPartition;
use crate::queue::{DurableQueue, PutOutcome, StageArgs, StageRequest};
use crate::resource::ResourceCatalog;
use crate::tree::{NodeId, ResourceRef, ServiceTree};
use crate::types::{Direction, LifecycleAction};
use chrono::Utc;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Where a run stands after a verb or a stage returns.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    /// The stage for `group_index` is waiting in the queue.
    Advancing {
        group_index: usize,
        entry: PutOutcome,
    },
    Completed { action: LifecycleAction },
}

/// Result of one delivered stage, stored on its queue entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageOutcome {
    pub root: NodeId,
    pub action: LifecycleAction,
    pub direction: Direction,
    /// Group actually dispatched; `None` when nothing was left to dispatch.
    pub group_index: Option<usize>,
    pub report: GroupReport,
    pub state: RunState,
}

pub struct StageScheduler<'a> {
    tree: &'a ServiceTree,
    catalog: &'a mut dyn ResourceCatalog,
    queue: &'a dyn DurableQueue,
    notifier: &'a dyn EventNotifier,
    delay: DelayPolicy,
    role: String,
}

impl<'a> StageScheduler<'a> {
    pub fn new(
        tree: &'a ServiceTree,
        catalog: &'a mut dyn ResourceCatalog,
        queue: &'a dyn DurableQueue,
        notifier: &'a dyn EventNotifier,
    ) -> Self {
        Self {
            tree,
            catalog,
            queue,
            notifier,
            delay: DelayPolicy::default(),
            role: "ems_operations".to_string(),
        }
    }

    pub fn with_delay(mut self, delay: DelayPolicy) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    // -----------------------------------------------------------------------
    // Lifecycle verbs
    // -----------------------------------------------------------------------

    pub fn start(&mut self, root: NodeId) -> Result<RunState> {
        self.request(LifecycleAction::Start, root)
    }

    pub fn stop(&mut self, root: NodeId) -> Result<RunState> {
        self.request(LifecycleAction::Stop, root)
    }

    pub fn suspend(&mut self, root: NodeId) -> Result<RunState> {
        self.request(LifecycleAction::Suspend, root)
    }

    pub fn shutdown_guest(&mut self, root: NodeId) -> Result<RunState> {
        self.request(LifecycleAction::ShutdownGuest, root)
    }

    /// Begin a run of `action` over the subtree of `root`.
    ///
    /// Returns once the first stage is accepted by the queue. A subtree
    /// without resources completes immediately and queues nothing.
    pub fn request(&mut self, action: LifecycleAction, root: NodeId) -> Result<RunState> {
        self.tree.get(root)?;
        if let Some(name) = EventName::requested(action) {
            self.publish(name, root, action);
        }

        let partition = GroupPartition::build(self.tree, root)?;
        self.validate_all(root, &partition)?;

        let direction = action.direction();
        match partition.first_group_index(direction) {
            Some(first) => {
                let args = StageArgs {
                    action,
                    group_index: first,
                    direction,
                };
                let entry = self.submit(root, args, Duration::ZERO)?;
                info!(root, action = %action, group = first, direction = %direction, "run requested");
                Ok(RunState::Advancing {
                    group_index: first,
                    entry,
                })
            }
            None => {
                debug!(root, action = %action, "no resources under service");
                Ok(self.complete(action, root))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Stage handler
    // -----------------------------------------------------------------------

    /// Queue-facing entry point; the outcome becomes the entry's result.
    pub fn handle(&mut self, request: &StageRequest) -> Result<serde_json::Value> {
        let outcome = self.process_stage(request)?;
        Ok(serde_json::to_value(outcome)?)
    }

    /// Dispatch the group named by `request` and schedule what follows.
    pub fn process_stage(&mut self, request: &StageRequest) -> Result<StageOutcome> {
        let root = request.instance_id;
        let StageArgs {
            action,
            group_index,
            direction,
        } = request.args;
        let root_node = self.tree.get(root)?;

        let partition = GroupPartition::build(self.tree, root)?;
        let Some(index) = partition.resume_index(group_index, direction) else {
            debug!(root, action = %action, group = group_index, "nothing left to dispatch");
            let state = self.complete(action, root);
            return Ok(StageOutcome {
                root,
                action,
                direction,
                group_index: None,
                report: GroupReport::default(),
                state,
            });
        };
        if index != group_index {
            warn!(root, requested = group_index, resumed = index, "tree changed; resuming from last group");
        }
        let Some(group) = partition.group(index) else {
            return Err(TreeopsError::Queue(format!("group {index} vanished for service {root}")));
        };

        let ctx = StageContext {
            root,
            root_name: &root_node.name,
            action,
            group_index: index,
        };
        let mut report = {
            let mut dispatcher = Dispatcher::new(&mut *self.catalog);
            if let Err(e) = dispatcher.validate(root, group) {
                error!(root, action = %action, group = index, error = %e, "stage aborted");
                return Err(e);
            }
            dispatcher.dispatch(&ctx, group)
        };

        for nested in std::mem::take(&mut report.delegated) {
            match self.request(action, nested) {
                Ok(_) => report.delegated.push(nested),
                Err(e) => {
                    error!(root, nested, action = %action, error = %e, "nested service run failed");
                    report.failed += 1;
                    let err = ResourceError::Nested(e.to_string());
                    report
                        .failures
                        .push(format!("{}: {err}", ResourceRef::Service { id: nested }));
                }
            }
        }

        info!(
            root,
            action = %action,
            group = index,
            performed = report.performed,
            skipped = report.skipped,
            failed = report.failed,
            "stage dispatched"
        );

        let state = match partition.next_group_index(index, direction) {
            Some(next) => {
                let delay = self.delay.delay_for(action, next);
                let args = StageArgs {
                    action,
                    group_index: next,
                    direction,
                };
                let entry = self.submit(root, args, delay)?;
                RunState::Advancing {
                    group_index: next,
                    entry,
                }
            }
            None => self.complete(action, root),
        };

        Ok(StageOutcome {
            root,
            action,
            direction,
            group_index: Some(index),
            report,
            state,
        })
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn validate_all(&mut self, root: NodeId, partition: &GroupPartition) -> Result<()> {
        let mut dispatcher = Dispatcher::new(&mut *self.catalog);
        let reasons: Vec<String> = partition
            .groups()
            .iter()
            .flat_map(|g| dispatcher.ineligible(g))
            .collect();
        if reasons.is_empty() {
            Ok(())
        } else {
            Err(TreeopsError::IneligibleResources { root, reasons })
        }
    }

    fn submit(&mut self, root: NodeId, args: StageArgs, delay: Duration) -> Result<PutOutcome> {
        let deliver_on = if delay.is_zero() {
            None
        } else {
            let delay = chrono::Duration::from_std(delay)
                .map_err(|e| TreeopsError::Queue(e.to_string()))?;
            Some(Utc::now() + delay)
        };
        let request = StageRequest::new(root, args, self.role.clone())
            .deliver_on(deliver_on)
            .zone(self.affinity_zone(root)?);
        self.queue.put(request)
    }

    /// Zone of the first VM under `root`, so the stage runs near its resources.
    fn affinity_zone(&mut self, root: NodeId) -> Result<Option<String>> {
        let Some(first) = self.tree.all_vms(root)?.into_iter().next() else {
            return Ok(None);
        };
        Ok(self
            .catalog
            .resolve(&ResourceRef::Vm { id: first })
            .and_then(|r| r.zone().map(str::to_string)))
    }

    fn complete(&mut self, action: LifecycleAction, root: NodeId) -> RunState {
        info!(root, action = %action, "run completed");
        if let Some(name) = EventName::completed(action) {
            self.publish(name, root, action);
        }
        RunState::Completed { action }
    }

    fn publish(&self, name: EventName, root: NodeId, action: LifecycleAction) {
        let event = LifecycleEvent::new(name, root, action);
        if let Err(e) = self.notifier.publish(&event) {
            warn!(event = %name, root, error = %e, "failed to publish lifecycle event");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
