//! Persistent stage queue using redb.
//!
//! # Table design
//!
//! A single `ENTRIES` table uses a 24-byte composite key:
//! ```text
//! [ due_at_ms: u64 big-endian (8 bytes) | uuid: 16 bytes ]
//! ```
//!
//! Because the timestamp occupies the high bytes in big-endian encoding,
//! byte ordering equals delivery ordering. A single range scan
//! `..=due_upper_bound(now)` returns every entry deliverable by `now`; only
//! status filtering happens in application code. The key never changes over
//! an entry's life, so status updates overwrite the value in place.

use std::{fmt::Display, path::Path, time::Duration};

use chrono::{DateTime, Utc};
use redb::{Database, DatabaseError, ReadableTable, TableDefinition};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, TreeopsError};

use super::entry::{EntryStatus, QueueEntry};
use super::{DurableQueue, PutOutcome, StageRequest};

// ---------------------------------------------------------------------------
// Table definition
// ---------------------------------------------------------------------------

/// Key: 24-byte composite (due_at_ms big-endian ++ uuid bytes)
/// Value: JSON-encoded QueueEntry
const ENTRIES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("stage_entries");

fn db_err(e: impl Display) -> TreeopsError {
    TreeopsError::Queue(e.to_string())
}

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn entry_key(ts: DateTime<Utc>, id: Uuid) -> [u8; 24] {
    let mut key = [0u8; 24];
    let ms = ts.timestamp_millis().max(0) as u64;
    key[..8].copy_from_slice(&ms.to_be_bytes());
    key[8..].copy_from_slice(id.as_bytes());
    key
}

/// Upper bound for a range scan returning all entries due by `now`.
///
/// The UUID suffix is `0xff` × 16, greater than any valid UUID, so every
/// entry with `due_at_ms <= now_ms` is included.
fn due_upper_bound(now: DateTime<Utc>) -> [u8; 24] {
    let mut key = [0u8; 24];
    let ms = now.timestamp_millis().max(0) as u64;
    key[..8].copy_from_slice(&ms.to_be_bytes());
    key[8..].fill(0xff);
    key
}

// ---------------------------------------------------------------------------
// StageQueue
// ---------------------------------------------------------------------------

pub struct StageQueue {
    db: Database,
}

impl StageQueue {
    /// Open or create the redb database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(|e| match e {
            DatabaseError::DatabaseAlreadyOpen => {
                TreeopsError::QueueBusy(path.display().to_string())
            }
            other => db_err(other),
        })?;
        // Ensure the table exists before any reads
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(ENTRIES).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    /// Insert without dedup.
    #[cfg(test)]
    fn insert(&self, entry: &QueueEntry) -> Result<()> {
        let key = entry_key(entry.due_at(), entry.id);
        let value = serde_json::to_vec(entry)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(ENTRIES).map_err(db_err)?;
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    /// Claim every `Pending` entry due by `now`: mark it `Running`, bump its
    /// attempt count and return it. Done in one write transaction, so two
    /// workers never claim the same entry.
    ///
    /// Results are in delivery order.
    pub fn claim_due(&self, now: DateTime<Utc>) -> Result<Vec<QueueEntry>> {
        let upper = due_upper_bound(now);
        let wt = self.db.begin_write().map_err(db_err)?;
        let mut claimed = Vec::new();
        {
            let mut table = wt.open_table(ENTRIES).map_err(db_err)?;
            for item in table.range(..=upper.as_slice()).map_err(db_err)? {
                let (_, v) = item.map_err(db_err)?;
                let entry: QueueEntry = serde_json::from_slice(v.value())?;
                if entry.is_pending() {
                    claimed.push(entry);
                }
            }
            let now = Utc::now();
            for entry in &mut claimed {
                entry.status = EntryStatus::Running;
                entry.attempts += 1;
                entry.updated_at = now;
                let key = entry_key(entry.due_at(), entry.id);
                let value = serde_json::to_vec(entry)?;
                table
                    .insert(key.as_slice(), value.as_slice())
                    .map_err(db_err)?;
            }
        }
        wt.commit().map_err(db_err)?;
        if !claimed.is_empty() {
            debug!(count = claimed.len(), "claimed due stages");
        }
        Ok(claimed)
    }

    /// Apply `f` to the entry identified by `id` and persist it.
    fn update<F>(&self, id: Uuid, f: F) -> Result<QueueEntry>
    where
        F: FnOnce(&mut QueueEntry) -> Result<()>,
    {
        let wt = self.db.begin_write().map_err(db_err)?;
        let updated = {
            let mut table = wt.open_table(ENTRIES).map_err(db_err)?;
            let mut found = None;
            for item in table.iter().map_err(db_err)? {
                let (_, v) = item.map_err(db_err)?;
                let entry: QueueEntry = serde_json::from_slice(v.value())?;
                if entry.id == id {
                    found = Some(entry);
                    break;
                }
            }
            let mut entry = found.ok_or_else(|| TreeopsError::EntryNotFound(id.to_string()))?;
            f(&mut entry)?;
            entry.updated_at = Utc::now();
            let key = entry_key(entry.due_at(), entry.id);
            let value = serde_json::to_vec(&entry)?;
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(db_err)?;
            entry
        };
        wt.commit().map_err(db_err)?;
        Ok(updated)
    }

    pub fn complete(&self, id: Uuid, result: serde_json::Value) -> Result<QueueEntry> {
        self.update(id, |e| {
            e.status = EntryStatus::Completed { result };
            Ok(())
        })
    }

    pub fn fail(&self, id: Uuid, reason: impl Into<String>) -> Result<QueueEntry> {
        let reason = reason.into();
        self.update(id, |e| {
            e.status = EntryStatus::Failed { reason };
            Ok(())
        })
    }

    /// Put a `Failed` entry back to `Pending`. Its key timestamp is in the
    /// past, so the next tick delivers it.
    pub fn retry(&self, id: Uuid) -> Result<QueueEntry> {
        self.update(id, |e| {
            if !matches!(e.status, EntryStatus::Failed { .. }) {
                return Err(TreeopsError::Queue(format!(
                    "entry {id} is {}; only failed entries can be retried",
                    e.status.as_str()
                )));
            }
            e.status = EntryStatus::Pending;
            Ok(())
        })
    }

    /// On worker startup, return any `Running` entry older than `max_age` to
    /// `Pending` so its stage is delivered again.
    ///
    /// Returns the number of entries recovered.
    pub fn recover_stale(&self, max_age: Duration) -> Result<u32> {
        let cutoff = Utc::now() - chrono::Duration::from_std(max_age).map_err(db_err)?;

        let mut count = 0u32;
        for entry in self.list_all()? {
            if matches!(entry.status, EntryStatus::Running) && entry.updated_at < cutoff {
                self.update(entry.id, |e| {
                    e.status = EntryStatus::Pending;
                    Ok(())
                })?;
                count += 1;
            }
        }
        if count > 0 {
            info!(count, "redelivering stages interrupted by a restart");
        }
        Ok(count)
    }

    pub fn get(&self, id: Uuid) -> Result<QueueEntry> {
        self.list_all()?
            .into_iter()
            .find(|e| e.id == id)
            .ok_or_else(|| TreeopsError::EntryNotFound(id.to_string()))
    }

    /// List all entries, sorted by `created_at` descending (newest first).
    pub fn list_all(&self) -> Result<Vec<QueueEntry>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(ENTRIES).map_err(db_err)?;

        let mut result = Vec::new();
        for item in table.iter().map_err(db_err)? {
            let (_, v) = item.map_err(db_err)?;
            let entry: QueueEntry = serde_json::from_slice(v.value())?;
            result.push(entry);
        }
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }
}

impl DurableQueue for StageQueue {
    /// Insert `request` unless an entry with the same task key is still
    /// `Pending`, in which case the submission collapses into that entry.
    fn put(&self, request: StageRequest) -> Result<PutOutcome> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let outcome = {
            let mut table = wt.open_table(ENTRIES).map_err(db_err)?;
            let mut existing = None;
            for item in table.iter().map_err(db_err)? {
                let (_, v) = item.map_err(db_err)?;
                let entry: QueueEntry = serde_json::from_slice(v.value())?;
                if entry.is_pending() && entry.request.task_id == request.task_id {
                    existing = Some(entry.id);
                    break;
                }
            }
            match existing {
                Some(id) => {
                    debug!(task_id = %request.task_id, entry = %id, "collapsed duplicate stage");
                    PutOutcome::Collapsed(id)
                }
                None => {
                    let entry = QueueEntry::new(request);
                    let key = entry_key(entry.due_at(), entry.id);
                    let value = serde_json::to_vec(&entry)?;
                    table
                        .insert(key.as_slice(), value.as_slice())
                        .map_err(db_err)?;
                    PutOutcome::Inserted(entry.id)
                }
            }
        };
        wt.commit().map_err(db_err)?;
        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::StageArgs;
    use crate::types::{Direction, LifecycleAction};
    use chrono::Duration as CDur;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, StageQueue) {
        let dir = TempDir::new().unwrap();
        let q = StageQueue::open(&dir.path().join("queue.db")).unwrap();
        (dir, q)
    }

    fn request(root: u64, at: Option<DateTime<Utc>>) -> StageRequest {
        let args = StageArgs {
            action: LifecycleAction::Start,
            group_index: 0,
            direction: Direction::Forward,
        };
        StageRequest::new(root, args, "ems_operations").deliver_on(at)
    }

    #[test]
    fn claim_due_returns_only_past_entries() {
        let (_dir, q) = open_tmp();
        let now = Utc::now();
        q.put(request(1, Some(now - CDur::milliseconds(100)))).unwrap();
        q.put(request(2, Some(now + CDur::seconds(60)))).unwrap();

        let due = q.claim_due(now).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].request.instance_id, 1);
        assert_eq!(due[0].status, EntryStatus::Running);
        assert_eq!(due[0].attempts, 1);
    }

    #[test]
    fn claimed_entries_are_not_claimed_twice() {
        let (_dir, q) = open_tmp();
        let now = Utc::now();
        q.put(request(1, Some(now - CDur::seconds(1)))).unwrap();
        assert_eq!(q.claim_due(now).unwrap().len(), 1);
        assert!(q.claim_due(now).unwrap().is_empty());
    }

    #[test]
    fn claim_order_is_by_delivery_time() {
        let (_dir, q) = open_tmp();
        let now = Utc::now();
        // Insert in reverse chronological order
        q.put(request(2, Some(now - CDur::milliseconds(50)))).unwrap();
        q.put(request(1, Some(now - CDur::milliseconds(200)))).unwrap();

        let due = q.claim_due(now).unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].request.instance_id, 1);
        assert_eq!(due[1].request.instance_id, 2);
    }

    #[test]
    fn pending_duplicate_collapses() {
        let (_dir, q) = open_tmp();
        let first = q.put(request(7, None)).unwrap();
        let second = q.put(request(7, None)).unwrap();
        assert!(matches!(first, PutOutcome::Inserted(_)));
        assert_eq!(second, PutOutcome::Collapsed(first.id()));
        assert_eq!(q.list_all().unwrap().len(), 1);

        // A different root is a different key.
        assert!(matches!(q.put(request(8, None)).unwrap(), PutOutcome::Inserted(_)));
    }

    #[test]
    fn running_entry_does_not_collapse_next_stage() {
        let (_dir, q) = open_tmp();
        q.put(request(7, None)).unwrap();
        let claimed = q.claim_due(Utc::now() + CDur::seconds(1)).unwrap();
        assert_eq!(claimed.len(), 1);

        // The stage handler submits the next group while its own entry runs.
        let next = q.put(request(7, Some(Utc::now() + CDur::seconds(120)))).unwrap();
        assert!(matches!(next, PutOutcome::Inserted(_)));
        assert_ne!(next.id(), claimed[0].id);
    }

    #[test]
    fn complete_and_fail_record_outcome() {
        let (_dir, q) = open_tmp();
        let a = q.put(request(1, None)).unwrap().id();
        let b = q.put(request(2, None)).unwrap().id();
        q.complete(a, serde_json::json!({"group_index": 0})).unwrap();
        q.fail(b, "boom").unwrap();

        match q.get(a).unwrap().status {
            EntryStatus::Completed { result } => assert_eq!(result["group_index"], 0),
            other => panic!("expected Completed, got {other:?}"),
        }
        match q.get(b).unwrap().status {
            EntryStatus::Failed { reason } => assert_eq!(reason, "boom"),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn retry_requires_failed_entry() {
        let (_dir, q) = open_tmp();
        let id = q.put(request(1, None)).unwrap().id();
        assert!(q.retry(id).is_err());

        q.fail(id, "queue unreachable").unwrap();
        let retried = q.retry(id).unwrap();
        assert!(retried.is_pending());
        assert_eq!(q.claim_due(Utc::now() + CDur::seconds(1)).unwrap().len(), 1);
    }

    #[test]
    fn second_open_reports_busy_until_first_is_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.db");
        let first = StageQueue::open(&path).unwrap();
        assert!(matches!(
            StageQueue::open(&path),
            Err(TreeopsError::QueueBusy(_))
        ));
        drop(first);
        assert!(StageQueue::open(&path).is_ok());
    }

    #[test]
    fn unknown_entry_is_reported() {
        let (_dir, q) = open_tmp();
        assert!(matches!(
            q.fail(Uuid::new_v4(), "x"),
            Err(TreeopsError::EntryNotFound(_))
        ));
    }

    #[test]
    fn recover_stale_redelivers_old_running_entries() {
        let (_dir, q) = open_tmp();
        let id = q.put(request(1, Some(Utc::now() - CDur::minutes(1)))).unwrap().id();
        q.claim_due(Utc::now()).unwrap();

        // Backdate the claim so it is older than max_age.
        let mut stale = q.get(id).unwrap();
        stale.updated_at = Utc::now() - CDur::minutes(30);
        q.insert(&stale).unwrap();

        let recovered = q.recover_stale(Duration::from_secs(600)).unwrap();
        assert_eq!(recovered, 1);
        assert!(q.get(id).unwrap().is_pending());

        let again = q.claim_due(Utc::now()).unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].attempts, 2);
    }

    #[test]
    fn recover_stale_leaves_recent_running_alone() {
        let (_dir, q) = open_tmp();
        let id = q.put(request(1, Some(Utc::now() - CDur::seconds(5)))).unwrap().id();
        q.claim_due(Utc::now()).unwrap();

        assert_eq!(q.recover_stale(Duration::from_secs(120)).unwrap(), 0);
        assert_eq!(q.get(id).unwrap().status, EntryStatus::Running);
    }

    #[test]
    fn empty_queue_has_nothing_due() {
        let (_dir, q) = open_tmp();
        assert!(q.claim_due(Utc::now()).unwrap().is_empty());
        assert_eq!(q.recover_stale(Duration::from_secs(60)).unwrap(), 0);
    }
}
