pub mod config;
pub mod events;
pub mod init;
pub mod lifecycle;
pub mod queue;
pub mod service;
pub mod vm;
pub mod work;

use anyhow::Context;
use std::path::Path;
use std::time::{Duration, Instant};
use treeops_core::{paths, queue::StageQueue, TreeopsError};

/// How long a command waits for a running worker to release the queue.
const QUEUE_WAIT: Duration = Duration::from_secs(10);
const QUEUE_POLL: Duration = Duration::from_millis(50);

/// Open the stage queue of an initialized project.
///
/// The queue file is exclusively locked while open; a worker only holds it
/// for the length of one tick, so a busy queue is retried for a while.
pub(crate) fn open_queue(root: &Path) -> anyhow::Result<StageQueue> {
    if !paths::treeops_dir(root).is_dir() {
        return Err(TreeopsError::NotInitialized.into());
    }
    let path = paths::queue_path(root);
    let started = Instant::now();
    loop {
        match StageQueue::open(&path) {
            Err(TreeopsError::QueueBusy(_)) if started.elapsed() < QUEUE_WAIT => {
                std::thread::sleep(QUEUE_POLL);
            }
            result => {
                return result.with_context(|| format!("failed to open {}", path.display()))
            }
        }
    }
}
