use crate::output::print_json;
use anyhow::Context;
use chrono::Utc;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};
use treeops_core::{
    config::Config,
    delay::DelayPolicy,
    events::EventLog,
    inventory::Inventory,
    queue::{StageQueue, StageRequest, TickSummary, Worker},
    resource::LocalCatalog,
    scheduler::StageScheduler,
    tree::ServiceTree,
};

/// Deliver due stages. With `once`, drain whatever is due now and exit;
/// otherwise poll every `queue.tick_interval_secs` until Ctrl-C.
///
/// The queue is opened per tick and closed before sleeping, so other
/// commands can submit and retry stages while the worker runs.
pub fn run(root: &Path, once: bool, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;

    let recovered = {
        let queue = super::open_queue(root)?;
        queue
            .recover_stale(Duration::from_secs(config.queue.stale_after_secs))
            .context("failed to recover interrupted stages")?
    };

    if once {
        let summary = drain(root)?;
        if json {
            print_json(&serde_json::json!({ "recovered": recovered, "processed": summary }))?;
        } else {
            println!(
                "Processed {} stage(s): {} completed, {} failed",
                summary.claimed, summary.completed, summary.failed
            );
        }
        return Ok(());
    }

    let interval = Duration::from_secs(config.queue.tick_interval_secs.max(1));
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        info!(root = %root.display(), every = ?interval, "worker started");
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = tick(root) {
                        warn!(error = %format!("{e:#}"), "worker tick failed");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("worker stopped");
                    break;
                }
            }
        }
    });
    Ok(())
}

/// Tick until nothing is due, so zero-delay runs finish in one invocation.
fn drain(root: &Path) -> anyhow::Result<TickSummary> {
    let mut total = TickSummary::default();
    loop {
        let summary = tick(root)?;
        if summary.claimed == 0 {
            return Ok(total);
        }
        total.claimed += summary.claimed;
        total.completed += summary.completed;
        total.failed += summary.failed;
    }
}

/// One delivery pass over a freshly opened queue.
fn tick(root: &Path) -> anyhow::Result<TickSummary> {
    let config = Config::load(root).context("failed to load config")?;
    let delay = DelayPolicy::from_config(&config);
    let events = EventLog::new(root);
    let queue = super::open_queue(root)?;

    let summary = Worker::new(&queue).tick(Utc::now(), |request| {
        run_stage(root, &queue, &events, &delay, &config.queue.role, request)
    })?;
    Ok(summary)
}

/// Handle one stage against the tree and inventory as they are on disk now.
///
/// VM power changes are merged into the inventory and written before the
/// worker marks the entry done, so a crash afterwards redelivers the stage
/// rather than losing its effects.
fn run_stage(
    root: &Path,
    queue: &StageQueue,
    events: &EventLog,
    delay: &DelayPolicy,
    role: &str,
    request: &StageRequest,
) -> treeops_core::Result<serde_json::Value> {
    let tree = ServiceTree::load(root)?;
    let mut working = Inventory::load(root)?;
    let started = Utc::now();

    let result = {
        let mut catalog = LocalCatalog::new(&mut working, &tree);
        let mut scheduler = StageScheduler::new(&tree, &mut catalog, queue, events)
            .with_delay(delay.clone())
            .with_role(role);
        scheduler.handle(request)
    };

    let mut current = Inventory::load(root)?;
    let merged = current.merge_power_changes(&working, started);
    if merged > 0 {
        current.save(root)?;
        debug!(root = request.instance_id, vms = merged, "saved power changes");
    }
    result
}
