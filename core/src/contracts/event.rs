//! The immutable ledger event envelope (spec §3, §6).

use super::message::ChatMessage;
use super::notify::SystemNotify;
use crate::error::{CcccError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of event kinds. Unknown values deserialize via `#[serde(other)]`
/// into `Unknown`, so the kernel can skip-and-log them for forward
/// compatibility (spec §4.2, §9) instead of failing to parse the ledger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    #[serde(rename = "group.create")]
    GroupCreate,
    #[serde(rename = "group.update")]
    GroupUpdate,
    #[serde(rename = "group.attach")]
    GroupAttach,
    #[serde(rename = "group.detach")]
    GroupDetach,
    #[serde(rename = "group.start")]
    GroupStart,
    #[serde(rename = "group.stop")]
    GroupStop,
    #[serde(rename = "group.set_state")]
    GroupSetState,
    #[serde(rename = "group.settings_update")]
    GroupSettingsUpdate,
    #[serde(rename = "group.automation_update")]
    GroupAutomationUpdate,
    #[serde(rename = "actor.add")]
    ActorAdd,
    #[serde(rename = "actor.update")]
    ActorUpdate,
    #[serde(rename = "actor.start")]
    ActorStart,
    #[serde(rename = "actor.stop")]
    ActorStop,
    #[serde(rename = "actor.restart")]
    ActorRestart,
    #[serde(rename = "actor.remove")]
    ActorRemove,
    #[serde(rename = "chat.message")]
    ChatMessage,
    #[serde(rename = "chat.read")]
    ChatRead,
    #[serde(rename = "chat.ack")]
    ChatAck,
    #[serde(rename = "system.notify")]
    SystemNotify,
    #[serde(rename = "system.notify_ack")]
    SystemNotifyAck,
    #[serde(rename = "snapshot")]
    Snapshot,
    #[serde(rename = "ledger.recovered")]
    LedgerRecovered,
    #[serde(other)]
    Unknown,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GroupCreate => "group.create",
            Self::GroupUpdate => "group.update",
            Self::GroupAttach => "group.attach",
            Self::GroupDetach => "group.detach",
            Self::GroupStart => "group.start",
            Self::GroupStop => "group.stop",
            Self::GroupSetState => "group.set_state",
            Self::GroupSettingsUpdate => "group.settings_update",
            Self::GroupAutomationUpdate => "group.automation_update",
            Self::ActorAdd => "actor.add",
            Self::ActorUpdate => "actor.update",
            Self::ActorStart => "actor.start",
            Self::ActorStop => "actor.stop",
            Self::ActorRestart => "actor.restart",
            Self::ActorRemove => "actor.remove",
            Self::ChatMessage => "chat.message",
            Self::ChatRead => "chat.read",
            Self::ChatAck => "chat.ack",
            Self::SystemNotify => "system.notify",
            Self::SystemNotifyAck => "system.notify_ack",
            Self::Snapshot => "snapshot",
            Self::LedgerRecovered => "ledger.recovered",
            Self::Unknown => "unknown",
        }
    }
}

/// The immutable envelope. `data` is kept as a raw JSON value rather than a
/// tagged enum: the ledger's job is to validate `data` against `kind`'s
/// contract at `append` time (spec §4.1) and store whatever shape that
/// contract describes, including shapes from a future binary version it
/// doesn't know about. Typed accessors below do the per-kind validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub v: u32,
    pub id: String,
    pub ts: DateTime<Utc>,
    pub kind: EventKind,
    pub group_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_key: Option<String>,
    pub by: String,
    pub data: serde_json::Value,
}

impl Event {
    /// Numeric id for ordering comparisons; ids are assigned as decimal
    /// strings by `IdAllocator` so this always parses.
    pub fn numeric_id(&self) -> u64 {
        self.id.parse().unwrap_or(0)
    }

    pub fn as_chat_message(&self) -> Result<ChatMessage> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| CcccError::invalid_payload(format!("chat.message data: {e}")))
    }

    pub fn as_system_notify(&self) -> Result<SystemNotify> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| CcccError::invalid_payload(format!("system.notify data: {e}")))
    }

    pub fn field_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(|v| v.as_str())
    }
}

/// Validates a candidate JSON payload against the shape `kind` requires,
/// returning the same value back (so callers can chain it straight into
/// `LedgerStore::append`). This is the single point spec §4.1's
/// `invalid_payload` error originates from.
pub fn validate_payload(kind: EventKind, data: &serde_json::Value) -> Result<()> {
    match kind {
        EventKind::ChatMessage => {
            serde_json::from_value::<ChatMessage>(data.clone())
                .map_err(|e| CcccError::invalid_payload(format!("chat.message: {e}")))?;
            Ok(())
        }
        EventKind::SystemNotify => {
            serde_json::from_value::<SystemNotify>(data.clone())
                .map_err(|e| CcccError::invalid_payload(format!("system.notify: {e}")))?;
            Ok(())
        }
        EventKind::ChatAck | EventKind::SystemNotifyAck => {
            require_str_field(data, "event_id")
        }
        EventKind::ActorStart
        | EventKind::ActorStop
        | EventKind::ActorRestart
        | EventKind::ActorRemove => require_str_field(data, "actor_id"),
        EventKind::GroupSetState => require_str_field(data, "state"),
        EventKind::GroupAttach => require_str_field(data, "scope_key"),
        EventKind::GroupDetach => require_str_field(data, "scope_key"),
        _ => Ok(()),
    }
}

fn require_str_field(data: &serde_json::Value, field: &str) -> Result<()> {
    match data.get(field).and_then(|v| v.as_str()) {
        Some(_) => Ok(()),
        None => Err(CcccError::invalid_payload(format!(
            "missing required field `{field}`"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_kind_round_trips_without_failing() {
        let json = serde_json::json!({
            "v": 1,
            "id": "7",
            "ts": "2026-01-01T00:00:00Z",
            "kind": "future.thing",
            "group_id": "g1",
            "by": "user",
            "data": { "anything": true }
        });
        let event: Event = serde_json::from_value(json).expect("unknown kind should parse");
        assert_eq!(event.kind, EventKind::Unknown);
    }

    #[test]
    fn known_kind_serializes_with_dotted_name() {
        let event = Event {
            v: 1,
            id: "1".into(),
            ts: Utc::now(),
            kind: EventKind::ChatMessage,
            group_id: "g1".into(),
            scope_key: None,
            by: "user".into(),
            data: serde_json::to_value(ChatMessage::broadcast("hi")).unwrap(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "chat.message");
    }

    #[test]
    fn validate_payload_rejects_malformed_chat_message() {
        let bad = serde_json::json!({ "not_text": true });
        assert!(validate_payload(EventKind::ChatMessage, &bad).is_err());
    }

    #[test]
    fn validate_payload_accepts_well_formed_chat_message() {
        let good = serde_json::to_value(ChatMessage::broadcast("hi")).unwrap();
        assert!(validate_payload(EventKind::ChatMessage, &good).is_ok());
    }

    #[test]
    fn validate_payload_requires_actor_id_on_lifecycle_ops() {
        let bad = serde_json::json!({});
        assert!(validate_payload(EventKind::ActorStop, &bad).is_err());
        let good = serde_json::json!({ "actor_id": "a1" });
        assert!(validate_payload(EventKind::ActorStop, &good).is_ok());
    }
}
