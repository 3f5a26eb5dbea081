use crate::output::{print_json, print_table};
use std::path::Path;
use treeops_core::{events::EventLog, TreeopsError};

pub fn run(root: &Path, limit: Option<usize>, json: bool) -> anyhow::Result<()> {
    if !treeops_core::paths::treeops_dir(root).is_dir() {
        return Err(TreeopsError::NotInitialized.into());
    }
    let mut events = EventLog::new(root).read_all()?;
    if let Some(n) = limit {
        let skip = events.len().saturating_sub(n);
        events.drain(..skip);
    }

    if json {
        return print_json(&events);
    }
    if events.is_empty() {
        println!("No events.");
        return Ok(());
    }

    let rows = events
        .iter()
        .map(|e| {
            vec![
                e.at.format("%Y-%m-%d %H:%M:%S").to_string(),
                e.name.to_string(),
                e.root.to_string(),
                e.action.to_string(),
            ]
        })
        .collect();
    print_table(&["AT", "EVENT", "SERVICE", "ACTION"], rows);
    Ok(())
}
