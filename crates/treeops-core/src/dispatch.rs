//! Best-effort fan-out of one lifecycle action over one group.
//!
//! Each resource is handled on its own: an unsupported action is skipped, a
//! failing resource is logged and counted, and neither stops the rest of the
//! group. Only [`Dispatcher::validate`] can fail a stage as a whole.

use crate::error::{ResourceError, Result, TreeopsError};
use crate::partition::Group;
use crate::resource::{ActionOutcome, ResourceCatalog};
use crate::tree::NodeId;
use crate::types::LifecycleAction;
use serde::Serialize;
use tracing::{error, info, warn};

/// What a single stage did to its group. Logged and stored on the queue
/// entry; never turned into a failure of the run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupReport {
    pub performed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub missing: usize,
    /// Nested services whose own run must be requested.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub delegated: Vec<NodeId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
}

/// Identity of the stage being dispatched, for log context.
#[derive(Debug, Clone)]
pub struct StageContext<'a> {
    pub root: NodeId,
    pub root_name: &'a str,
    pub action: LifecycleAction,
    pub group_index: usize,
}

pub struct Dispatcher<'a> {
    catalog: &'a mut dyn ResourceCatalog,
}

impl<'a> Dispatcher<'a> {
    pub fn new(catalog: &'a mut dyn ResourceCatalog) -> Self {
        Self { catalog }
    }

    /// Re-check that every resource in `group` is still eligible.
    pub fn validate(&mut self, root: NodeId, group: &Group) -> Result<()> {
        let reasons = self.ineligible(group);
        if reasons.is_empty() {
            Ok(())
        } else {
            Err(TreeopsError::IneligibleResources { root, reasons })
        }
    }

    /// Reasons for every ineligible resource in `group`; empty when all pass.
    pub fn ineligible(&mut self, group: &Group) -> Vec<String> {
        let mut reasons = Vec::new();
        for attachment in &group.attachments {
            if let Some(resource) = self.catalog.resolve(&attachment.resource) {
                if let Err(e) = resource.validate() {
                    reasons.push(format!("{}: {e}", resource.display_name()));
                }
            }
        }
        reasons
    }

    /// Apply `ctx.action` to every resource in `group`.
    pub fn dispatch(&mut self, ctx: &StageContext<'_>, group: &Group) -> GroupReport {
        let mut report = GroupReport::default();
        let service = format!("{}:{}", ctx.root_name, ctx.root);

        for attachment in &group.attachments {
            let Some(mut resource) = self.catalog.resolve(&attachment.resource) else {
                warn!(
                    service = %service,
                    resource = %attachment.resource,
                    owner = attachment.owner,
                    group = ctx.group_index,
                    "resource no longer exists; skipping"
                );
                report.missing += 1;
                continue;
            };
            let rsc_name = resource.display_name();

            match resource.perform(ctx.action) {
                Ok(ActionOutcome::Performed) => {
                    info!(
                        action = %ctx.action,
                        service = %service,
                        resource = %rsc_name,
                        group = ctx.group_index,
                        "processing action"
                    );
                    report.performed += 1;
                }
                Ok(ActionOutcome::Unsupported) => {
                    info!(
                        action = %ctx.action,
                        service = %service,
                        resource = %rsc_name,
                        group = ctx.group_index,
                        "skipping action: not supported by resource"
                    );
                    report.skipped += 1;
                }
                Ok(ActionOutcome::Delegated(nested)) => {
                    info!(
                        action = %ctx.action,
                        service = %service,
                        resource = %rsc_name,
                        group = ctx.group_index,
                        "delegating action to nested service"
                    );
                    report.delegated.push(nested);
                }
                Err(e) => {
                    record_failure(&mut report, ctx, &service, &rsc_name, &e);
                }
            }
        }
        report
    }
}

fn record_failure(
    report: &mut GroupReport,
    ctx: &StageContext<'_>,
    service: &str,
    rsc_name: &str,
    err: &ResourceError,
) {
    error!(
        action = %ctx.action,
        service = %service,
        resource = %rsc_name,
        group = ctx.group_index,
        error = %err,
        "error while processing resource"
    );
    report.failed += 1;
    report.failures.push(format!("{rsc_name}: {err}"));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
