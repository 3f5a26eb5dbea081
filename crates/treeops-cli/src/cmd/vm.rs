use crate::output::{or_dash, print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use std::path::Path;
use treeops_core::{
    inventory::{Inventory, VmId},
    tree::{ResourceRef, ServiceTree},
};

#[derive(Subcommand)]
pub enum VmSubcommand {
    /// Register a VM (powered off)
    Add {
        name: String,
        /// Zone the VM runs in; stages for its service are routed there
        #[arg(long)]
        zone: Option<String>,
        /// The guest has no tools, so shutdown-guest is skipped for it
        #[arg(long)]
        no_guest_tools: bool,
    },
    /// List VMs with their power state and owning service
    List,
    /// Convert a VM to a template; it can no longer be orchestrated
    Template { id: VmId },
}

pub fn run(root: &Path, subcmd: VmSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        VmSubcommand::Add {
            name,
            zone,
            no_guest_tools,
        } => add(root, &name, zone, !no_guest_tools, json),
        VmSubcommand::List => list(root, json),
        VmSubcommand::Template { id } => template(root, id, json),
    }
}

fn load_inventory(root: &Path) -> anyhow::Result<Inventory> {
    Inventory::load(root).context("failed to load vm inventory")
}

fn add(
    root: &Path,
    name: &str,
    zone: Option<String>,
    guest_tools: bool,
    json: bool,
) -> anyhow::Result<()> {
    let mut inventory = load_inventory(root)?;
    let id = inventory.add_vm(name, zone, guest_tools);
    inventory.save(root).context("failed to save vm inventory")?;

    if json {
        print_json(inventory.get(id)?)?;
    } else {
        println!("Registered vm {id}: {name}");
    }
    Ok(())
}

fn list(root: &Path, json: bool) -> anyhow::Result<()> {
    let inventory = load_inventory(root)?;
    let tree = ServiceTree::load(root).context("failed to load service tree")?;

    if json {
        let vms: Vec<_> = inventory
            .vms
            .values()
            .map(|vm| {
                serde_json::json!({
                    "vm": vm,
                    "service": tree.owner_of(&ResourceRef::Vm { id: vm.id }),
                })
            })
            .collect();
        return print_json(&vms);
    }
    if inventory.vms.is_empty() {
        println!("No vms.");
        return Ok(());
    }

    let rows = inventory
        .vms
        .values()
        .map(|vm| {
            vec![
                vm.id.to_string(),
                vm.name.clone(),
                vm.power_state.to_string(),
                or_dash(vm.zone.as_deref()),
                if vm.template { "yes" } else { "no" }.to_string(),
                or_dash(tree.owner_of(&ResourceRef::Vm { id: vm.id })),
            ]
        })
        .collect();
    print_table(&["ID", "NAME", "STATE", "ZONE", "TEMPLATE", "SERVICE"], rows);
    Ok(())
}

fn template(root: &Path, id: VmId, json: bool) -> anyhow::Result<()> {
    let mut inventory = load_inventory(root)?;
    inventory.mark_template(id)?;
    inventory.save(root).context("failed to save vm inventory")?;

    if json {
        print_json(inventory.get(id)?)?;
    } else {
        println!("Vm {id} is now a template");
    }
    Ok(())
}
