//! In-memory projection over one group's ledger: actor registry, read
//! cursors, ack/obligation tables (spec §3 "Projections", §4.2 "Projection
//! build"). Deterministic and total over the closed `EventKind` set;
//! unknown kinds are skipped and logged, never fail the scan.

use crate::contracts::{Actor, ActorRole, Event, EventKind, Group, GroupState, Recipient};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Per-`event_id` record of who still owes a reply or an attention-ack.
#[derive(Debug, Clone, Default)]
pub struct ObligationRecord {
    pub reply_required: BTreeSet<String>,
    pub replied: BTreeSet<String>,
    pub attention_ack_required: BTreeSet<String>,
    pub acked: BTreeSet<String>,
}

impl ObligationRecord {
    pub fn reply_satisfied(&self, recipient: &str) -> bool {
        !self.reply_required.contains(recipient) || self.replied.contains(recipient)
    }

    pub fn ack_satisfied(&self, recipient: &str) -> bool {
        !self.attention_ack_required.contains(recipient) || self.acked.contains(recipient)
    }

    pub fn is_fully_satisfied(&self) -> bool {
        self.reply_required.iter().all(|r| self.replied.contains(r))
            && self.attention_ack_required.iter().all(|r| self.acked.contains(r))
    }
}

/// One group's rebuildable state. Owned by the kernel, fed one event at a
/// time by `apply`, never mutated any other way.
#[derive(Debug, Clone)]
pub struct GroupProjection {
    pub group: Group,
    /// Insertion order matters for foreman promotion ("oldest remaining actor").
    pub actor_order: Vec<String>,
    pub actors: HashMap<String, Actor>,
    /// Read cursor per principal ("user" or an `actor_id`): highest event id read.
    pub read_cursors: HashMap<String, u64>,
    pub obligations: BTreeMap<u64, ObligationRecord>,
    pub last_event_id: u64,
    pub unknown_kinds_skipped: u64,
}

impl GroupProjection {
    pub fn new(group_id: impl Into<String>) -> Self {
        let group_id = group_id.into();
        Self {
            group: Group::new(group_id, String::new()),
            actor_order: Vec::new(),
            actors: HashMap::new(),
            read_cursors: HashMap::new(),
            obligations: BTreeMap::new(),
            last_event_id: 0,
            unknown_kinds_skipped: 0,
        }
    }

    /// Rebuilds a projection from scratch by replaying the full event slice
    /// in ascending id order (spec §4.2 "scan the ledger in order").
    pub fn rebuild(group_id: &str, events: &[Event]) -> Self {
        let mut projection = Self::new(group_id);
        for event in events {
            projection.apply(event);
        }
        projection
    }

    pub fn foreman_id(&self) -> Option<&str> {
        self.actors
            .values()
            .find(|a| a.is_foreman())
            .map(|a| a.actor_id.as_str())
    }

    pub fn read_cursor(&self, principal: &str) -> u64 {
        self.read_cursors.get(principal).copied().unwrap_or(0)
    }

    /// Applies one event to the projection. Total and deterministic:
    /// unknown kinds are counted and logged, never rejected.
    pub fn apply(&mut self, event: &Event) {
        self.last_event_id = self.last_event_id.max(event.numeric_id());

        match event.kind {
            EventKind::GroupCreate => {
                if let Some(title) = event.field_str("title") {
                    self.group.title = title.to_string();
                }
            }
            EventKind::GroupUpdate => {
                if let Some(title) = event.field_str("title") {
                    self.group.title = title.to_string();
                }
                if let Some(topic) = event.field_str("topic") {
                    self.group.topic = Some(topic.to_string());
                }
                if event.data.get("clear_im_binding").and_then(|v| v.as_bool()).unwrap_or(false) {
                    self.group.im_binding = None;
                } else if let Some(im_binding) = event.field_str("im_binding") {
                    self.group.im_binding = Some(im_binding.to_string());
                }
            }
            EventKind::GroupSetState => {
                if let Some(state) = event.field_str("state") {
                    self.group.state = parse_state(state);
                }
            }
            EventKind::GroupStart => self.group.state = GroupState::Active,
            EventKind::GroupStop => self.group.state = GroupState::Stopped,
            EventKind::GroupAttach => {
                if let Some(scope_key) = event.field_str("scope_key") {
                    if !self.group.scopes.iter().any(|s| s.scope_key == scope_key) {
                        let path = event
                            .data
                            .get("path")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default();
                        self.group.scopes.push(crate::contracts::Scope {
                            scope_key: scope_key.to_string(),
                            path: path.into(),
                        });
                    }
                }
            }
            EventKind::GroupDetach => {
                if let Some(scope_key) = event.field_str("scope_key") {
                    self.group.scopes.retain(|s| s.scope_key != scope_key);
                }
            }
            EventKind::ActorAdd => self.apply_actor_add(event),
            EventKind::ActorUpdate => {
                if let Some(actor_id) = event.field_str("actor_id") {
                    if let Some(actor) = self.actors.get_mut(actor_id) {
                        if let Some(enabled) = event.data.get("enabled").and_then(|v| v.as_bool()) {
                            actor.enabled = enabled;
                        }
                        if let Some(profile) = event.field_str("profile") {
                            actor.profile = Some(profile.to_string());
                        }
                    }
                }
            }
            EventKind::ActorStart => self.set_running(event, true),
            EventKind::ActorStop => self.set_running(event, false),
            EventKind::ActorRestart => self.set_running(event, true),
            EventKind::ActorRemove => self.apply_actor_remove(event),
            EventKind::ChatMessage => self.apply_chat_message(event),
            EventKind::ChatRead => self.apply_chat_read(event),
            EventKind::ChatAck => self.apply_chat_ack(event),
            EventKind::SystemNotify | EventKind::SystemNotifyAck => {}
            EventKind::Snapshot | EventKind::LedgerRecovered => {}
            EventKind::Unknown => {
                self.unknown_kinds_skipped += 1;
                tracing::warn!(group_id = %event.group_id, event_id = %event.id, "skipped unknown event kind during projection");
            }
        }
    }

    fn apply_actor_add(&mut self, event: &Event) {
        let Some(actor_id) = event.field_str("actor_id") else { return };
        if self.actors.contains_key(actor_id) {
            return;
        }
        let runtime = event
            .field_str("runtime")
            .map(crate::contracts::RuntimeKind::parse)
            .unwrap_or(crate::contracts::RuntimeKind::Custom(String::new()));
        let runner = match event.field_str("runner") {
            Some("headless") => crate::contracts::RunnerKind::Headless,
            _ => crate::contracts::RunnerKind::Pty,
        };
        let command: Vec<String> = event
            .data
            .get("command")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();

        // First actor in a group is promoted to foreman (spec §3).
        let role = if self.actors.is_empty() {
            ActorRole::Foreman
        } else {
            ActorRole::Peer
        };

        let actor = Actor {
            group_id: event.group_id.clone(),
            actor_id: actor_id.to_string(),
            role,
            runtime,
            runner,
            command,
            enabled: true,
            running: false,
            profile: event.field_str("profile").map(String::from),
        };

        self.actor_order.push(actor_id.to_string());
        self.actors.insert(actor_id.to_string(), actor);
    }

    fn apply_actor_remove(&mut self, event: &Event) {
        let Some(actor_id) = event.field_str("actor_id") else { return };
        let was_foreman = self.actors.get(actor_id).map(|a| a.is_foreman()).unwrap_or(false);
        self.actors.remove(actor_id);
        self.actor_order.retain(|id| id != actor_id);

        // "on removal, promotion passes to the oldest remaining actor" (spec §3).
        if was_foreman {
            if let Some(next_id) = self.actor_order.first().cloned() {
                if let Some(next) = self.actors.get_mut(&next_id) {
                    next.role = ActorRole::Foreman;
                }
            }
        }
    }

    fn set_running(&mut self, event: &Event, running: bool) {
        if let Some(actor_id) = event.field_str("actor_id") {
            if let Some(actor) = self.actors.get_mut(actor_id) {
                actor.running = running;
            }
        }
    }

    fn apply_chat_message(&mut self, event: &Event) {
        let Ok(message) = event.as_chat_message() else { return };
        let recipients = self.resolve_addressees(&message.to);

        if message.reply_required {
            let record = self.obligations.entry(event.numeric_id()).or_default();
            for r in &recipients {
                record.reply_required.insert(r.clone());
            }
        }
        if message.priority == crate::contracts::Priority::Attention {
            let record = self.obligations.entry(event.numeric_id()).or_default();
            for r in &recipients {
                record.attention_ack_required.insert(r.clone());
            }
        }

        if let Some(reply_to) = message.reply_to.as_deref().and_then(|s| s.parse::<u64>().ok()) {
            if let Some(record) = self.obligations.get_mut(&reply_to) {
                if record.reply_required.contains(&event.by) {
                    record.replied.insert(event.by.clone());
                }
            }
        }
    }

    fn apply_chat_read(&mut self, event: &Event) {
        let principal = event.by.clone();
        if let Some(up_to) = event.field_str("up_to").and_then(|s| s.parse::<u64>().ok()) {
            // Monotone: an older id is a no-op (spec §8).
            let current = self.read_cursors.entry(principal).or_insert(0);
            if up_to > *current {
                *current = up_to;
            }
        }
    }

    fn apply_chat_ack(&mut self, event: &Event) {
        if let Some(event_id) = event.field_str("event_id").and_then(|s| s.parse::<u64>().ok()) {
            if let Some(record) = self.obligations.get_mut(&event_id) {
                record.acked.insert(event.by.clone());
            }
        }
    }

    /// Resolve a `to[]` list into concrete recipient identities (actor ids
    /// or `"user"`) per spec §4.4 step 1. Unknown explicit actor ids are
    /// silently dropped here; the delivery engine is responsible for
    /// emitting the `unknown_recipient` note without aborting the commit.
    pub fn resolve_addressees(&self, to: &[Recipient]) -> Vec<String> {
        if to.is_empty() {
            let mut all: Vec<String> = self.actors.values().filter(|a| a.enabled).map(|a| a.actor_id.clone()).collect();
            all.push("user".to_string());
            return all;
        }

        let mut out = Vec::new();
        for token in to {
            match token {
                Recipient::User => out.push("user".to_string()),
                Recipient::All => {
                    out.extend(self.actors.values().filter(|a| a.enabled).map(|a| a.actor_id.clone()))
                }
                Recipient::Peers => out.extend(
                    self.actors
                        .values()
                        .filter(|a| a.enabled && !a.is_foreman())
                        .map(|a| a.actor_id.clone()),
                ),
                Recipient::Foreman => {
                    if let Some(id) = self.foreman_id() {
                        out.push(id.to_string());
                    }
                }
                Recipient::Actor(id) => {
                    if self.actors.contains_key(id) {
                        out.push(id.clone());
                    }
                }
            }
        }
        out.sort();
        out.dedup();
        out
    }
}

fn parse_state(s: &str) -> GroupState {
    match s {
        "idle" => GroupState::Idle,
        "paused" => GroupState::Paused,
        "stopped" => GroupState::Stopped,
        _ => GroupState::Active,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{ChatMessage, Priority};
    use chrono::Utc;

    fn mk_event(id: u64, kind: EventKind, by: &str, data: serde_json::Value) -> Event {
        Event {
            v: 1,
            id: id.to_string(),
            ts: Utc::now(),
            kind,
            group_id: "g1".into(),
            scope_key: None,
            by: by.to_string(),
            data,
        }
    }

    #[test]
    fn first_actor_added_becomes_foreman() {
        let mut projection = GroupProjection::new("g1");
        projection.apply(&mk_event(1, EventKind::ActorAdd, "user", serde_json::json!({
            "actor_id": "a1", "runtime": "claude", "runner": "pty", "command": ["claude"]
        })));
        assert!(projection.actors["a1"].is_foreman());
    }

    #[test]
    fn foreman_promotion_passes_to_oldest_remaining_actor() {
        let mut projection = GroupProjection::new("g1");
        projection.apply(&mk_event(1, EventKind::ActorAdd, "user", serde_json::json!({
            "actor_id": "a1", "runtime": "claude", "runner": "pty", "command": []
        })));
        projection.apply(&mk_event(2, EventKind::ActorAdd, "user", serde_json::json!({
            "actor_id": "a2", "runtime": "codex", "runner": "pty", "command": []
        })));
        projection.apply(&mk_event(3, EventKind::ActorRemove, "user", serde_json::json!({ "actor_id": "a1" })));
        assert!(projection.actors["a2"].is_foreman());
    }

    #[test]
    fn reply_required_obligation_is_satisfied_by_matching_reply() {
        let mut projection = GroupProjection::new("g1");
        projection.apply(&mk_event(1, EventKind::ActorAdd, "user", serde_json::json!({
            "actor_id": "foreman", "runtime": "claude", "runner": "pty", "command": []
        })));

        let mut msg = ChatMessage::broadcast("ship it");
        msg.to = vec![Recipient::Foreman];
        msg.reply_required = true;
        projection.apply(&mk_event(2, EventKind::ChatMessage, "user", serde_json::to_value(&msg).unwrap()));

        assert!(!projection.obligations[&2].reply_satisfied("foreman"));

        let mut reply = ChatMessage::broadcast("done");
        reply.reply_to = Some("2".to_string());
        projection.apply(&mk_event(3, EventKind::ChatMessage, "foreman", serde_json::to_value(&reply).unwrap()));

        assert!(projection.obligations[&2].reply_satisfied("foreman"));
    }

    #[test]
    fn attention_ack_obligation_is_satisfied_by_chat_ack() {
        let mut projection = GroupProjection::new("g1");
        projection.apply(&mk_event(1, EventKind::ActorAdd, "user", serde_json::json!({
            "actor_id": "a1", "runtime": "claude", "runner": "pty", "command": []
        })));
        let mut msg = ChatMessage::broadcast("careful");
        msg.priority = Priority::Attention;
        msg.to = vec![Recipient::Actor("a1".into())];
        projection.apply(&mk_event(2, EventKind::ChatMessage, "user", serde_json::to_value(&msg).unwrap()));
        assert!(!projection.obligations[&2].ack_satisfied("a1"));

        projection.apply(&mk_event(3, EventKind::ChatAck, "a1", serde_json::json!({ "event_id": "2" })));
        assert!(projection.obligations[&2].ack_satisfied("a1"));
    }

    #[test]
    fn mark_read_is_monotone() {
        let mut projection = GroupProjection::new("g1");
        projection.apply(&mk_event(1, EventKind::ChatRead, "user", serde_json::json!({ "up_to": "5" })));
        projection.apply(&mk_event(2, EventKind::ChatRead, "user", serde_json::json!({ "up_to": "2" })));
        assert_eq!(projection.read_cursor("user"), 5);
    }

    #[test]
    fn unknown_kind_is_skipped_and_counted() {
        let mut projection = GroupProjection::new("g1");
        projection.apply(&mk_event(1, EventKind::Unknown, "user", serde_json::json!({})));
        assert_eq!(projection.unknown_kinds_skipped, 1);
        assert_eq!(projection.last_event_id, 1);
    }

    #[test]
    fn empty_to_resolves_to_all_actors_plus_user() {
        let mut projection = GroupProjection::new("g1");
        projection.apply(&mk_event(1, EventKind::ActorAdd, "user", serde_json::json!({
            "actor_id": "a1", "runtime": "claude", "runner": "pty", "command": []
        })));
        let addressees = projection.resolve_addressees(&[]);
        assert!(addressees.contains(&"a1".to_string()));
        assert!(addressees.contains(&"user".to_string()));
    }

    #[test]
    fn im_binding_can_be_set_then_cleared() {
        let mut projection = GroupProjection::new("g1");
        projection.apply(&mk_event(1, EventKind::GroupUpdate, "user", serde_json::json!({ "im_binding": "slack:C123" })));
        assert_eq!(projection.group.im_binding.as_deref(), Some("slack:C123"));

        projection.apply(&mk_event(2, EventKind::GroupUpdate, "user", serde_json::json!({ "clear_im_binding": true })));
        assert!(projection.group.im_binding.is_none());
    }
}
