use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const TREEOPS_DIR: &str = ".treeops";

pub const CONFIG_FILE: &str = ".treeops/config.yaml";
pub const TREE_FILE: &str = ".treeops/tree.yaml";
pub const INVENTORY_FILE: &str = ".treeops/vms.yaml";
pub const QUEUE_FILE: &str = ".treeops/queue.db";
pub const EVENTS_FILE: &str = ".treeops/events.jsonl";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn treeops_dir(root: &Path) -> PathBuf {
    root.join(TREEOPS_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn tree_path(root: &Path) -> PathBuf {
    root.join(TREE_FILE)
}

pub fn inventory_path(root: &Path) -> PathBuf {
    root.join(INVENTORY_FILE)
}

pub fn queue_path(root: &Path) -> PathBuf {
    root.join(QUEUE_FILE)
}

pub fn events_path(root: &Path) -> PathBuf {
    root.join(EVENTS_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/proj");
        assert_eq!(
            config_path(root),
            PathBuf::from("/tmp/proj/.treeops/config.yaml")
        );
        assert_eq!(queue_path(root), PathBuf::from("/tmp/proj/.treeops/queue.db"));
        assert_eq!(
            events_path(root),
            PathBuf::from("/tmp/proj/.treeops/events.jsonl")
        );
    }
}
