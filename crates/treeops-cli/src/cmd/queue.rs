use crate::output::{or_dash, print_json, print_table};
use clap::Subcommand;
use std::path::Path;
use treeops_core::queue::{EntryStatus, QueueEntry};
use uuid::Uuid;

#[derive(Subcommand)]
pub enum QueueSubcommand {
    /// List queued stages, newest first
    List {
        /// Only show entries with this status (pending, running, completed, failed)
        #[arg(long)]
        status: Option<String>,
    },
    /// Show one entry with its stage outcome
    Show { id: Uuid },
    /// Put a failed entry back in the queue
    Retry { id: Uuid },
}

pub fn run(root: &Path, subcmd: QueueSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        QueueSubcommand::List { status } => list(root, status.as_deref(), json),
        QueueSubcommand::Show { id } => show(root, id, json),
        QueueSubcommand::Retry { id } => retry(root, id, json),
    }
}

fn list(root: &Path, status: Option<&str>, json: bool) -> anyhow::Result<()> {
    let queue = super::open_queue(root)?;
    let entries: Vec<QueueEntry> = queue
        .list_all()?
        .into_iter()
        .filter(|e| status.map_or(true, |s| e.status.as_str() == s))
        .collect();

    if json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    let rows = entries
        .iter()
        .map(|e| {
            let args = &e.request.args;
            vec![
                e.id.to_string(),
                e.status.as_str().to_string(),
                e.request.instance_id.to_string(),
                args.action.to_string(),
                args.group_index.to_string(),
                args.direction.to_string(),
                e.attempts.to_string(),
                e.due_at().format("%Y-%m-%d %H:%M:%S").to_string(),
            ]
        })
        .collect();
    print_table(
        &["ID", "STATUS", "ROOT", "ACTION", "GROUP", "DIR", "ATTEMPTS", "DUE"],
        rows,
    );
    Ok(())
}

fn show(root: &Path, id: Uuid, json: bool) -> anyhow::Result<()> {
    let queue = super::open_queue(root)?;
    let entry = queue.get(id)?;

    if json {
        return print_json(&entry);
    }

    let req = &entry.request;
    println!("Entry:     {}", entry.id);
    println!("Status:    {}", entry.status.as_str());
    println!("Task:      {}", req.task_id);
    println!("Call:      {}#{}({})", req.class_name, req.method_name, req.instance_id);
    println!(
        "Args:      {} group {} direction {}",
        req.args.action, req.args.group_index, req.args.direction
    );
    println!("Role:      {}", req.role);
    println!("Zone:      {}", or_dash(req.zone.as_deref()));
    println!("Due:       {}", entry.due_at().to_rfc3339());
    println!("Attempts:  {}", entry.attempts);
    match &entry.status {
        EntryStatus::Completed { result } => {
            println!("Result:    {}", serde_json::to_string_pretty(result)?);
        }
        EntryStatus::Failed { reason } => println!("Reason:    {reason}"),
        EntryStatus::Pending | EntryStatus::Running => {}
    }
    Ok(())
}

fn retry(root: &Path, id: Uuid, json: bool) -> anyhow::Result<()> {
    let queue = super::open_queue(root)?;
    let entry = queue.retry(id)?;

    if json {
        print_json(&entry)?;
    } else {
        println!("Entry {id} is pending again");
    }
    Ok(())
}
