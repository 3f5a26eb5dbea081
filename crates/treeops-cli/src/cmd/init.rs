use anyhow::Context;
use serde::Serialize;
use std::path::{Path, PathBuf};
use treeops_core::{config::Config, inventory::Inventory, io, paths, tree::ServiceTree};

pub fn run(root: &Path) -> anyhow::Result<()> {
    println!("Initializing treeops in: {}", root.display());

    let dir = paths::treeops_dir(root);
    io::ensure_dir(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    seed(paths::config_path(root), paths::CONFIG_FILE, &Config::default())?;
    seed(paths::tree_path(root), paths::TREE_FILE, &ServiceTree::new())?;
    seed(paths::inventory_path(root), paths::INVENTORY_FILE, &Inventory::new())?;

    let existed = paths::queue_path(root).exists();
    super::open_queue(root)?;
    report(!existed, paths::QUEUE_FILE);

    Ok(())
}

/// Write `value` as YAML unless the file already exists.
fn seed<T: Serialize>(path: PathBuf, label: &str, value: &T) -> anyhow::Result<()> {
    let data = serde_yaml::to_string(value)?;
    let created = io::write_if_missing(&path, data.as_bytes())
        .with_context(|| format!("failed to write {label}"))?;
    report(created, label);
    Ok(())
}

fn report(created: bool, label: &str) {
    if created {
        println!("  created: {label}");
    } else {
        println!("  exists:  {label}");
    }
}
