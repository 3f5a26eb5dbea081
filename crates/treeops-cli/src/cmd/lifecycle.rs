use crate::output::print_json;
use anyhow::Context;
use std::path::Path;
use treeops_core::{
    config::Config,
    delay::DelayPolicy,
    events::EventLog,
    inventory::Inventory,
    resource::LocalCatalog,
    scheduler::{RunState, StageScheduler},
    tree::{NodeId, ServiceTree},
    types::LifecycleAction,
};

/// Request a run of `action` over the subtree of service `id`.
pub fn run(root: &Path, action: LifecycleAction, id: NodeId, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let tree = ServiceTree::load(root).context("failed to load service tree")?;
    let mut inventory = Inventory::load(root).context("failed to load vm inventory")?;
    let queue = super::open_queue(root)?;
    let events = EventLog::new(root);

    let mut catalog = LocalCatalog::new(&mut inventory, &tree);
    let mut scheduler = StageScheduler::new(&tree, &mut catalog, &queue, &events)
        .with_delay(DelayPolicy::from_config(&config))
        .with_role(config.queue.role.clone());
    let state = scheduler
        .request(action, id)
        .with_context(|| format!("cannot {action} service {id}"))?;

    if json {
        return print_json(&state);
    }
    match state {
        RunState::Advancing { group_index, entry } => {
            println!(
                "Queued {action} of service {id}: group {group_index} (entry {})",
                entry.id()
            );
        }
        RunState::Completed { .. } => {
            println!("Service {id} has no resources; {action} completed");
        }
    }
    Ok(())
}
