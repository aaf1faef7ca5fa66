//! The sole writer of a group's on-disk ledger (spec §4.1). One dedicated
//! write lock per group; readers use independent file handles and a
//! snapshot read that never observes a partial line.
//!
//! Grounded on the teacher's `scheduler/store.rs` (atomic JSON file
//! read/write) generalized from a single `jobs.json` snapshot to an
//! append-only `ledger.jsonl`, plus the teacher's `atomic_write` helper
//! for the rename-swap used by compaction rewrites.

use super::filter::{apply, ReadFilter, ReadResult};
use crate::contracts::event::validate_payload;
use crate::contracts::{Event, EventKind};
use crate::error::{CcccError, Result};
use crate::util::{atomic_write, IdAllocator};
use chrono::Utc;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

/// How often committed appends are fsync'd. Events carrying obligations
/// (`reply_required`, `priority: attention`) or lifecycle changes are
/// always fsync'd before the append returns, regardless of cadence
/// (spec §4.1).
#[derive(Debug, Clone, Copy)]
pub struct FsyncPolicy {
    pub every_n_appends: u32,
}

impl Default for FsyncPolicy {
    fn default() -> Self {
        Self { every_n_appends: 1 }
    }
}

struct WriterState {
    file: File,
    ids: IdAllocator,
    appends_since_fsync: u32,
}

struct GroupLedger {
    ledger_path: PathBuf,
    write_lock: Mutex<WriterState>,
    notify_tx: broadcast::Sender<Event>,
}

pub struct LedgerStore {
    groups_root: PathBuf,
    fsync_policy: FsyncPolicy,
    groups: parking_lot::RwLock<HashMap<String, Arc<GroupLedger>>>,
}

impl LedgerStore {
    pub fn new(groups_root: impl Into<PathBuf>) -> Self {
        Self {
            groups_root: groups_root.into(),
            fsync_policy: FsyncPolicy::default(),
            groups: parking_lot::RwLock::new(HashMap::new()),
        }
    }

    pub fn group_dir(&self, group_id: &str) -> PathBuf {
        self.groups_root.join(group_id)
    }

    fn ledger_path(&self, group_id: &str) -> PathBuf {
        self.group_dir(group_id).join("ledger.jsonl")
    }

    /// Opens (creating if absent) the group's ledger, recovering from a
    /// truncated tail line the way spec §4.1 and §8 scenario 6 require:
    /// truncate to the last well-formed record and append a
    /// `ledger.recovered` event.
    fn open_group(&self, group_id: &str) -> Result<Arc<GroupLedger>> {
        if let Some(existing) = self.groups.read().get(group_id) {
            return Ok(existing.clone());
        }

        let dir = self.group_dir(group_id);
        std::fs::create_dir_all(&dir)?;
        let path = self.ledger_path(group_id);

        let (last_id, recovered) = recover_tail(&path)?;

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let (notify_tx, _rx) = broadcast::channel(1024);

        let ledger = Arc::new(GroupLedger {
            ledger_path: path,
            write_lock: Mutex::new(WriterState {
                file,
                ids: IdAllocator::starting_after(last_id),
                appends_since_fsync: 0,
            }),
            notify_tx,
        });

        self.groups.write().insert(group_id.to_string(), ledger.clone());

        if let Some((truncated_bytes, last_good_line)) = recovered {
            tracing::warn!(%group_id, truncated_bytes, last_good_line, "recovered truncated ledger tail");
            self.append_recovery_event(&ledger, truncated_bytes, last_good_line)?;
        }

        Ok(ledger)
    }

    fn append_recovery_event(
        &self,
        ledger: &Arc<GroupLedger>,
        truncated_bytes: u64,
        last_good_line: u64,
    ) -> Result<()> {
        let data = serde_json::json!({
            "truncated_bytes": truncated_bytes,
            "last_good_line": last_good_line,
        });
        self.append_inner(ledger, "system", EventKind::LedgerRecovered, data, true)?;
        Ok(())
    }

    pub async fn append(
        &self,
        group_id: &str,
        kind: EventKind,
        by: &str,
        data: serde_json::Value,
    ) -> Result<Event> {
        validate_payload(kind, &data)?;
        let ledger = self.open_group(group_id)?;
        let carries_obligation = carries_obligation(kind, &data);
        let event = self.append_locked(group_id, &ledger, by, kind, data, carries_obligation).await?;
        let _ = ledger.notify_tx.send(event.clone());
        Ok(event)
    }

    async fn append_locked(
        &self,
        group_id: &str,
        ledger: &Arc<GroupLedger>,
        by: &str,
        kind: EventKind,
        data: serde_json::Value,
        force_fsync: bool,
    ) -> Result<Event> {
        let mut state = ledger.write_lock.lock().await;
        let id = state.ids.next_id();

        let event = Event {
            v: 1,
            id: id.to_string(),
            ts: Utc::now(),
            kind,
            group_id: group_id.to_string(),
            scope_key: None,
            by: by.to_string(),
            data,
        };

        let mut line = serde_json::to_string(&event)?;
        line.push('\n');
        state.file.write_all(line.as_bytes())?;

        state.appends_since_fsync += 1;
        if force_fsync || state.appends_since_fsync >= self.fsync_policy.every_n_appends {
            state.file.sync_all()?;
            state.appends_since_fsync = 0;
        }

        Ok(event)
    }

    /// Non-async variant used only for the synchronous recovery-event
    /// append at `open_group` time (no other task can be holding the
    /// group's lock yet, since `open_group` itself installs the ledger).
    fn append_inner(
        &self,
        ledger: &Arc<GroupLedger>,
        by: &str,
        kind: EventKind,
        data: serde_json::Value,
        force_fsync: bool,
    ) -> Result<Event> {
        let mut state = ledger.write_lock.try_lock().map_err(|_| {
            CcccError::internal("ledger write lock contended during group open")
        })?;
        let id = state.ids.next_id();
        let event = Event {
            v: 1,
            id: id.to_string(),
            ts: Utc::now(),
            kind,
            group_id: ledger
                .ledger_path
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string(),
            scope_key: None,
            by: by.to_string(),
            data,
        };
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');
        state.file.write_all(line.as_bytes())?;
        if force_fsync {
            state.file.sync_all()?;
            state.appends_since_fsync = 0;
        }
        Ok(event)
    }

    /// Subscribe to events committed from now on for this group.
    pub fn subscribe(&self, group_id: &str) -> Result<broadcast::Receiver<Event>> {
        let ledger = self.open_group(group_id)?;
        Ok(ledger.notify_tx.subscribe())
    }

    pub fn read(&self, group_id: &str, filter: &ReadFilter) -> Result<ReadResult> {
        let all = self.read_all(group_id)?;
        Ok(apply(&all, filter))
    }

    /// Reads every event from disk in ascending id order using an
    /// independent file handle, so concurrent readers never block or
    /// interfere with the single writer.
    pub fn read_all(&self, group_id: &str) -> Result<Vec<Event>> {
        let path = self.ledger_path(group_id);
        if !path.exists() {
            return Err(CcccError::no_such_group(group_id));
        }
        read_well_formed_lines(&path)
    }

    pub fn last_event_id(&self, group_id: &str) -> Result<u64> {
        Ok(self.read_all(group_id)?.last().map(|e| e.numeric_id()).unwrap_or(0))
    }

    /// Captures a serialized projection as a `snapshot` event without
    /// truncating history (spec §4.1 `snapshot`).
    pub async fn snapshot(&self, group_id: &str, projection: serde_json::Value) -> Result<Event> {
        self.append(group_id, EventKind::Snapshot, "system", serde_json::json!({ "projection": projection })).await
    }

    /// Truncates events strictly before `up_to_event` and replaces them
    /// with one synthetic `snapshot` event bearing the id immediately
    /// before the first retained event, preserving ordering (spec §4.1).
    pub async fn compact(&self, group_id: &str, up_to_event: u64, projection: serde_json::Value) -> Result<()> {
        let ledger = self.open_group(group_id)?;
        let mut state = ledger.write_lock.lock().await;

        let all = read_well_formed_lines(&ledger.ledger_path)?;
        let kept: Vec<Event> = all.into_iter().filter(|e| e.numeric_id() >= up_to_event).collect();

        let synthetic_id = up_to_event.saturating_sub(1);
        let synthetic = Event {
            v: 1,
            id: synthetic_id.to_string(),
            ts: Utc::now(),
            kind: EventKind::Snapshot,
            group_id: group_id.to_string(),
            scope_key: None,
            by: "system".to_string(),
            data: serde_json::json!({ "projection": projection, "compacted_up_to": up_to_event }),
        };

        let mut contents = String::new();
        contents.push_str(&serde_json::to_string(&synthetic)?);
        contents.push('\n');
        for event in &kept {
            contents.push_str(&serde_json::to_string(event)?);
            contents.push('\n');
        }

        atomic_write(&ledger.ledger_path, contents.as_bytes())?;

        // Re-open the file handle at the new end-of-file for subsequent appends.
        let file = OpenOptions::new().create(true).append(true).open(&ledger.ledger_path)?;
        state.file = file;
        state.ids = IdAllocator::starting_after(kept.last().map(|e| e.numeric_id()).unwrap_or(synthetic_id));

        Ok(())
    }
}

fn carries_obligation(kind: EventKind, data: &serde_json::Value) -> bool {
    match kind {
        EventKind::ChatMessage | EventKind::SystemNotify => {
            data.get("reply_required").and_then(|v| v.as_bool()).unwrap_or(false)
                || data.get("priority").and_then(|v| v.as_str()) == Some("attention")
        }
        EventKind::GroupSetState
        | EventKind::GroupStart
        | EventKind::GroupStop
        | EventKind::ActorStart
        | EventKind::ActorStop
        | EventKind::ActorRestart
        | EventKind::ActorRemove => true,
        _ => false,
    }
}

/// Reads every syntactically valid JSON line from `path`. Unlike
/// `recover_tail`, this does not mutate the file — it's the read path
/// used by `read_all`/`read` and tolerates a concurrently-appended
/// trailing partial line by simply not including it (a subsequent read
/// will see it once the writer completes the line).
fn read_well_formed_lines(path: &Path) -> Result<Vec<Event>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Event>(&line) {
            Ok(event) => events.push(event),
            Err(_) => break, // trailing partial line; stop here
        }
    }
    Ok(events)
}

/// On open, detect and truncate a corrupted tail line (spec §4.1, §8
/// scenario 6: daemon killed mid-append). Returns the last committed
/// numeric id and, if truncation happened, `(truncated_bytes, last_good_line)`.
fn recover_tail(path: &Path) -> Result<(u64, Option<(u64, u64)>)> {
    if !path.exists() {
        return Ok((0, None));
    }

    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let total_len = file.metadata()?.len();

    let reader = BufReader::new(&file);
    let mut good_end: u64 = 0;
    let mut last_id: u64 = 0;
    let mut line_no: u64 = 0;
    let mut offset: u64 = 0;

    for line in reader.lines() {
        let line = line?;
        let line_len = line.len() as u64 + 1; // account for the newline
        if line.trim().is_empty() {
            offset += line_len;
            continue;
        }
        match serde_json::from_str::<Event>(&line) {
            Ok(event) => {
                last_id = last_id.max(event.numeric_id());
                offset += line_len;
                good_end = offset;
                line_no += 1;
            }
            Err(_) => break,
        }
    }

    if good_end < total_len {
        let truncated_bytes = total_len - good_end;
        file.set_len(good_end)?;
        file.seek(SeekFrom::End(0))?;
        return Ok((last_id, Some((truncated_bytes, line_no))));
    }

    Ok((last_id, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::ChatMessage;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("cccc-test-ledger-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn append_assigns_strictly_increasing_ids() {
        let root = temp_root();
        let store = LedgerStore::new(root.clone());
        let data = serde_json::to_value(ChatMessage::broadcast("hi")).unwrap();
        let e1 = store.append("g1", EventKind::ChatMessage, "user", data.clone()).await.unwrap();
        let e2 = store.append("g1", EventKind::ChatMessage, "user", data).await.unwrap();
        assert!(e2.numeric_id() > e1.numeric_id());
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn read_all_returns_ascending_order() {
        let root = temp_root();
        let store = LedgerStore::new(root.clone());
        let data = serde_json::to_value(ChatMessage::broadcast("hi")).unwrap();
        for _ in 0..5 {
            store.append("g1", EventKind::ChatMessage, "user", data.clone()).await.unwrap();
        }
        let events = store.read_all("g1").unwrap();
        let ids: Vec<u64> = events.iter().map(|e| e.numeric_id()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn reopening_store_continues_id_sequence() {
        let root = temp_root();
        {
            let store = LedgerStore::new(root.clone());
            let data = serde_json::to_value(ChatMessage::broadcast("hi")).unwrap();
            store.append("g1", EventKind::ChatMessage, "user", data).await.unwrap();
        }
        let store2 = LedgerStore::new(root.clone());
        let data = serde_json::to_value(ChatMessage::broadcast("bye")).unwrap();
        let e2 = store2.append("g1", EventKind::ChatMessage, "user", data).await.unwrap();
        assert_eq!(e2.numeric_id(), 2);
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn truncated_tail_line_is_recovered_on_open() {
        let root = temp_root();
        let group_dir = root.join("g1");
        std::fs::create_dir_all(&group_dir).unwrap();
        let ledger_path = group_dir.join("ledger.jsonl");

        let good = Event {
            v: 1,
            id: "1".into(),
            ts: Utc::now(),
            kind: EventKind::ChatMessage,
            group_id: "g1".into(),
            scope_key: None,
            by: "user".into(),
            data: serde_json::to_value(ChatMessage::broadcast("ok")).unwrap(),
        };
        let mut contents = serde_json::to_string(&good).unwrap();
        contents.push('\n');
        contents.push_str("{\"v\":1,\"id\":\"2\",\"truncated"); // corrupted tail, no newline
        std::fs::write(&ledger_path, contents).unwrap();

        let store = LedgerStore::new(root.clone());
        let events = store.read_all("g1").unwrap();
        assert_eq!(events.len(), 1);

        // Triggers recovery via append (which opens the group).
        let data = serde_json::to_value(ChatMessage::broadcast("after recovery")).unwrap();
        store.append("g1", EventKind::ChatMessage, "user", data).await.unwrap();

        let events = store.read_all("g1").unwrap();
        assert!(events.iter().any(|e| e.kind == EventKind::LedgerRecovered));

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn compact_preserves_order_and_drops_old_events() {
        let root = temp_root();
        let store = LedgerStore::new(root.clone());
        let data = serde_json::to_value(ChatMessage::broadcast("hi")).unwrap();
        for _ in 0..5 {
            store.append("g1", EventKind::ChatMessage, "user", data.clone()).await.unwrap();
        }
        store.compact("g1", 4, serde_json::json!({ "groups": [] })).await.unwrap();
        let events = store.read_all("g1").unwrap();
        let ids: Vec<u64> = events.iter().map(|e| e.numeric_id()).collect();
        assert_eq!(ids, vec![3, 4, 5]);
        assert_eq!(events[0].kind, EventKind::Snapshot);
        let _ = std::fs::remove_dir_all(root);
    }
}
