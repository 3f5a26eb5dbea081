use crate::output::{or_dash, print_json, print_table};
use anyhow::Context;
use clap::{Args, Subcommand};
use std::path::Path;
use treeops_core::{
    inventory::Inventory,
    partition::GroupPartition,
    tree::{NodeId, ResourceRef, ServiceTree},
};

#[derive(Subcommand)]
pub enum ServiceSubcommand {
    /// Create a service node
    Add {
        name: String,
        /// Parent service id (omit for a root service)
        #[arg(long)]
        parent: Option<NodeId>,
    },
    /// List every service node
    List,
    /// Show one service with its attachments and children
    Show { id: NodeId },
    /// Remove a service and its whole subtree
    Remove { id: NodeId },
    /// Attach a VM or a nested service to a service
    Attach {
        id: NodeId,
        #[command(flatten)]
        target: Target,
    },
    /// Detach a VM or a nested service from a service
    Detach {
        id: NodeId,
        #[command(flatten)]
        target: Target,
    },
    /// Show the dispatch groups of a service's subtree
    Groups { id: NodeId },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
pub struct Target {
    /// VM id
    #[arg(long)]
    vm: Option<u64>,
    /// Service id, driven as a nested service
    #[arg(long)]
    service: Option<NodeId>,
}

impl Target {
    fn resource(&self) -> anyhow::Result<ResourceRef> {
        match (self.vm, self.service) {
            (Some(id), None) => Ok(ResourceRef::Vm { id }),
            (None, Some(id)) => Ok(ResourceRef::Service { id }),
            _ => anyhow::bail!("exactly one of --vm or --service is required"),
        }
    }
}

pub fn run(root: &Path, subcmd: ServiceSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ServiceSubcommand::Add { name, parent } => add(root, &name, parent, json),
        ServiceSubcommand::List => list(root, json),
        ServiceSubcommand::Show { id } => show(root, id, json),
        ServiceSubcommand::Remove { id } => remove(root, id, json),
        ServiceSubcommand::Attach { id, target } => attach(root, id, target.resource()?, json),
        ServiceSubcommand::Detach { id, target } => detach(root, id, target.resource()?, json),
        ServiceSubcommand::Groups { id } => groups(root, id, json),
    }
}

fn load_tree(root: &Path) -> anyhow::Result<ServiceTree> {
    ServiceTree::load(root).context("failed to load service tree")
}

// ---------------------------------------------------------------------------
// add / remove
// ---------------------------------------------------------------------------

fn add(root: &Path, name: &str, parent: Option<NodeId>, json: bool) -> anyhow::Result<()> {
    let mut tree = load_tree(root)?;
    let id = tree.add_service(name, parent)?;
    tree.save(root).context("failed to save service tree")?;

    if json {
        print_json(tree.get(id)?)?;
    } else {
        match parent {
            Some(p) => println!("Created service {id}: {name} (parent {p})"),
            None => println!("Created service {id}: {name}"),
        }
    }
    Ok(())
}

fn remove(root: &Path, id: NodeId, json: bool) -> anyhow::Result<()> {
    let mut tree = load_tree(root)?;
    let removed = tree.remove_service(id)?;
    tree.save(root).context("failed to save service tree")?;

    if json {
        print_json(&serde_json::json!({ "removed": removed }))?;
    } else {
        let ids: Vec<String> = removed.iter().map(|r| r.to_string()).collect();
        println!("Removed services: {}", ids.join(", "));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// list / show
// ---------------------------------------------------------------------------

fn list(root: &Path, json: bool) -> anyhow::Result<()> {
    let tree = load_tree(root)?;

    if json {
        let nodes: Vec<_> = tree.nodes.values().collect();
        return print_json(&nodes);
    }
    if tree.nodes.is_empty() {
        println!("No services.");
        return Ok(());
    }

    let mut rows = Vec::new();
    for node in tree.nodes.values() {
        rows.push(vec![
            node.id.to_string(),
            node.name.clone(),
            or_dash(node.parent),
            node.attachments.len().to_string(),
            tree.total_vms(node.id)?.to_string(),
        ]);
    }
    print_table(&["ID", "NAME", "PARENT", "ATTACHED", "TOTAL VMS"], rows);
    Ok(())
}

fn show(root: &Path, id: NodeId, json: bool) -> anyhow::Result<()> {
    let tree = load_tree(root)?;
    let node = tree.get(id)?;
    let children: Vec<NodeId> = tree.children(id).iter().map(|c| c.id).collect();
    let total_vms = tree.total_vms(id)?;
    let root_id = tree.root_of(id)?;

    if json {
        let value = serde_json::json!({
            "service": node,
            "children": children,
            "root": root_id,
            "total_vms": total_vms,
        });
        return print_json(&value);
    }

    println!("Service:   {} ({})", node.name, node.id);
    println!("Parent:    {}", or_dash(node.parent));
    println!("Root:      {root_id}");
    if children.is_empty() {
        println!("Children:  (none)");
    } else {
        let ids: Vec<String> = children.iter().map(|c| c.to_string()).collect();
        println!("Children:  {}", ids.join(", "));
    }
    println!("Total VMs: {total_vms}");
    if node.attachments.is_empty() {
        println!("Attached:  (none)");
    } else {
        println!("Attached:");
        for a in &node.attachments {
            println!("  {}", a.resource);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// attach / detach
// ---------------------------------------------------------------------------

fn attach(root: &Path, id: NodeId, resource: ResourceRef, json: bool) -> anyhow::Result<()> {
    let mut tree = load_tree(root)?;
    if let ResourceRef::Vm { id: vm } = resource {
        let inventory = Inventory::load(root).context("failed to load vm inventory")?;
        inventory.get(vm)?;
    }
    tree.attach(id, resource)?;
    tree.save(root).context("failed to save service tree")?;

    if json {
        print_json(&serde_json::json!({ "service": id, "attached": resource }))?;
    } else {
        println!("Attached {resource} to service {id}");
    }
    Ok(())
}

fn detach(root: &Path, id: NodeId, resource: ResourceRef, json: bool) -> anyhow::Result<()> {
    let mut tree = load_tree(root)?;
    tree.detach(id, resource)?;
    tree.save(root).context("failed to save service tree")?;

    if json {
        print_json(&serde_json::json!({ "service": id, "detached": resource }))?;
    } else {
        println!("Detached {resource} from service {id}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// groups
// ---------------------------------------------------------------------------

fn groups(root: &Path, id: NodeId, json: bool) -> anyhow::Result<()> {
    let tree = load_tree(root)?;
    let partition = GroupPartition::build(&tree, id)?;

    if json {
        return print_json(&partition);
    }
    if partition.is_empty() {
        println!("Service {id} has no resources.");
        return Ok(());
    }

    let rows = partition
        .groups()
        .iter()
        .enumerate()
        .map(|(i, g)| {
            let resources: Vec<String> = g.attachments.iter().map(|a| a.resource.to_string()).collect();
            vec![i.to_string(), g.depth.to_string(), resources.join(" ")]
        })
        .collect();
    print_table(&["GROUP", "DEPTH", "RESOURCES"], rows);
    Ok(())
}
