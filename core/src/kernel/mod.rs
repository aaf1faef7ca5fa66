//! In-memory projection + permission enforcement over the ledger (spec §4.2).
//! Grounded on the teacher's `agent/permissions.rs` (explicit check
//! function) and `state/mod.rs` (a small owned registry rebuilt/persisted
//! around a backing store), generalized to a per-group projection rebuilt
//! from the ledger rather than a flat key-value file.

pub mod permissions;
pub mod projection;

pub use permissions::{check as check_permission, Action, Principal};
pub use projection::{GroupProjection, ObligationRecord};

use crate::contracts::Event;
use crate::error::{CcccError, OptionExt, Result};
use crate::ledger::LedgerStore;
use std::collections::HashMap;
use std::sync::Arc;

/// Owns every group's projection, kept current by feeding it each
/// committed event as it's appended. Rebuilding on cold start and feeding
/// incrementally on a warm daemon yield the same state (spec §8).
pub struct Kernel {
    ledger: Arc<LedgerStore>,
    projections: parking_lot::RwLock<HashMap<String, GroupProjection>>,
}

impl Kernel {
    pub fn new(ledger: Arc<LedgerStore>) -> Self {
        Self {
            ledger,
            projections: parking_lot::RwLock::new(HashMap::new()),
        }
    }

    /// Ensures a group's projection is loaded, rebuilding it from the
    /// ledger on first touch (spec §4.2 "On startup or group open, scan
    /// the ledger in order").
    pub fn ensure_loaded(&self, group_id: &str) -> Result<()> {
        if self.projections.read().contains_key(group_id) {
            return Ok(());
        }
        let events = self.ledger.read_all(group_id)?;
        let projection = GroupProjection::rebuild(group_id, &events);
        self.projections.write().insert(group_id.to_string(), projection);
        Ok(())
    }

    /// Feeds one newly-committed event into its group's projection. Must
    /// be called with events in commit order; out-of-order application
    /// would desync cursors and obligations from the ledger.
    pub fn apply_committed(&self, event: &Event) {
        let mut projections = self.projections.write();
        let projection = projections
            .entry(event.group_id.clone())
            .or_insert_with(|| GroupProjection::new(&event.group_id));
        projection.apply(event);
    }

    pub fn with_projection<T>(&self, group_id: &str, f: impl FnOnce(&GroupProjection) -> T) -> Result<T> {
        self.ensure_loaded(group_id)?;
        let projections = self.projections.read();
        let projection = projections.get(group_id).ok_or_no_group(group_id)?;
        Ok(f(projection))
    }

    /// Foreman-existence invariant check (spec §3): an enabled group with
    /// at least one actor must have exactly one foreman. Callers use this
    /// to assert the invariant after actor mutations in tests and debug
    /// snapshots; the projection itself maintains it incrementally.
    pub fn foreman_invariant_holds(&self, group_id: &str) -> Result<bool> {
        self.with_projection(group_id, |p| {
            if p.actors.is_empty() {
                true
            } else {
                p.actors.values().filter(|a| a.is_foreman()).count() == 1
            }
        })
    }

    /// State-gated operation check (spec §4.2): when the group is
    /// `stopped`, actor-lifecycle and settings mutations are rejected;
    /// reads, inbox ops, and `user` message sends remain allowed. `idle`
    /// is an unenforced hint; `paused` only affects delivery fan-out, not
    /// permission to act.
    pub fn check_state_gate(&self, group_id: &str, action: Action) -> Result<()> {
        let state = self.with_projection(group_id, |p| p.group.state)?;
        if state == crate::contracts::GroupState::Stopped {
            let gated = matches!(
                action,
                Action::ActorAdd
                    | Action::ActorStart
                    | Action::ActorStop
                    | Action::ActorRestart
                    | Action::ActorRemove
                    | Action::GroupSettingsUpdate
                    | Action::GroupAutomationUpdate
                    | Action::GroupImportBlueprint
                    | Action::ContextUpdate
            );
            if gated {
                return Err(CcccError::GroupStopped);
            }
        }
        Ok(())
    }

    /// Checks both the permission matrix and the state gate in one call,
    /// the order every mutating IPC handler follows (spec §2 control flow).
    pub fn authorize(&self, group_id: &str, principal: Principal, action: Action) -> Result<()> {
        check_permission(principal, action)?;
        self.check_state_gate(group_id, action)
    }

    /// Inbox: ordered suffix of chat events addressed to `principal` past
    /// their read cursor (spec §3 "Projections").
    pub fn inbox(&self, group_id: &str, principal: &str) -> Result<Vec<Event>> {
        let cursor = self.with_projection(group_id, |p| p.read_cursor(principal))?;
        let events = self.ledger.read_all(group_id)?;
        Ok(events
            .into_iter()
            .filter(|e| e.kind == crate::contracts::EventKind::ChatMessage && e.numeric_id() > cursor)
            .filter(|e| {
                e.as_chat_message()
                    .map(|msg| {
                        self.with_projection(group_id, |p| p.resolve_addressees(&msg.to))
                            .map(|addrs| addrs.iter().any(|a| a == principal))
                            .unwrap_or(false)
                    })
                    .unwrap_or(false)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{ChatMessage, EventKind};

    fn temp_store() -> (Arc<LedgerStore>, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("cccc-test-kernel-{}", uuid::Uuid::new_v4()));
        (Arc::new(LedgerStore::new(dir.clone())), dir)
    }

    #[tokio::test]
    async fn rebuild_after_cold_start_matches_warm_state() {
        let (ledger, dir) = temp_store();
        ledger
            .append("g1", EventKind::ActorAdd, "user", serde_json::json!({
                "actor_id": "a1", "runtime": "claude", "runner": "pty", "command": []
            }))
            .await
            .unwrap();

        let warm = Kernel::new(ledger.clone());
        warm.ensure_loaded("g1").unwrap();
        let warm_foreman = warm.with_projection("g1", |p| p.foreman_id().map(String::from)).unwrap();

        let cold = Kernel::new(ledger.clone());
        cold.ensure_loaded("g1").unwrap();
        let cold_foreman = cold.with_projection("g1", |p| p.foreman_id().map(String::from)).unwrap();

        assert_eq!(warm_foreman, cold_foreman);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn stopped_group_rejects_actor_lifecycle_but_allows_message_send() {
        let (ledger, dir) = temp_store();
        ledger
            .append("g1", EventKind::GroupSetState, "user", serde_json::json!({ "state": "stopped" }))
            .await
            .unwrap();

        let kernel = Kernel::new(ledger.clone());
        let err = kernel.check_state_gate("g1", Action::ActorStart).unwrap_err();
        assert_eq!(err.code(), "group_stopped");

        assert!(kernel.check_state_gate("g1", Action::MessageSend).is_ok());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn inbox_returns_only_unread_addressed_messages() {
        let (ledger, dir) = temp_store();
        ledger
            .append("g1", EventKind::ActorAdd, "user", serde_json::json!({
                "actor_id": "a1", "runtime": "claude", "runner": "pty", "command": []
            }))
            .await
            .unwrap();
        let mut msg = ChatMessage::broadcast("hi a1");
        msg.to = vec![crate::contracts::Recipient::Actor("a1".into())];
        ledger.append("g1", EventKind::ChatMessage, "user", serde_json::to_value(&msg).unwrap()).await.unwrap();

        let kernel = Kernel::new(ledger.clone());
        let inbox = kernel.inbox("g1", "a1").unwrap();
        assert_eq!(inbox.len(), 1);

        let _ = std::fs::remove_dir_all(dir);
    }
}
