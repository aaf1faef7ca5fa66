//! Per-group settings: `groups/<group_id>/group.yaml` (spec §6
//! "Configuration (recognized options, per group)"). Actors are recorded
//! sans secrets — private env lives outside the ledger and outside this
//! file too, under the runtime home (spec §3).

use crate::contracts::{ActorRole, AutomationRuleset, GroupState, RunnerKind, RuntimeKind, Scope};
use crate::error::Result;
use crate::util::atomic_write;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DefaultSendTo {
    Foreman,
    Broadcast,
}

impl Default for DefaultSendTo {
    fn default() -> Self {
        Self::Foreman
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptVisibility {
    Off,
    Foreman,
    All,
}

impl Default for TranscriptVisibility {
    fn default() -> Self {
        Self::Foreman
    }
}

/// Delivery throttle/auto-mark knobs (spec §4.4 steps 3-4, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverySettings {
    #[serde(default = "default_min_interval_seconds")]
    pub min_interval_seconds: u64,
    #[serde(default)]
    pub auto_mark_on_delivery: bool,
    #[serde(default)]
    pub default_send_to: DefaultSendTo,
}

fn default_min_interval_seconds() -> u64 {
    5
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            min_interval_seconds: default_min_interval_seconds(),
            auto_mark_on_delivery: false,
            default_send_to: DefaultSendTo::default(),
        }
    }
}

/// Built-in nudge policy thresholds (spec §4.4 table + §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NudgeSettings {
    #[serde(default = "default_unread_nudge_after_seconds")]
    pub unread_nudge_after_seconds: u64,
    #[serde(default = "default_reply_required_nudge_after_seconds")]
    pub reply_required_nudge_after_seconds: u64,
    #[serde(default = "default_attention_ack_nudge_after_seconds")]
    pub attention_ack_nudge_after_seconds: u64,
    #[serde(default = "default_actor_idle_timeout_seconds")]
    pub actor_idle_timeout_seconds: u64,
    #[serde(default = "default_keepalive_delay_seconds")]
    pub keepalive_delay_seconds: u64,
    #[serde(default = "default_keepalive_max_per_actor")]
    pub keepalive_max_per_actor: u32,
    #[serde(default = "default_silence_timeout_seconds")]
    pub silence_timeout_seconds: u64,
    #[serde(default = "default_help_nudge_interval_seconds")]
    pub help_nudge_interval_seconds: u64,
    #[serde(default = "default_help_nudge_min_messages")]
    pub help_nudge_min_messages: u32,
    #[serde(default = "default_nudge_digest_min_interval_seconds")]
    pub nudge_digest_min_interval_seconds: u64,
    #[serde(default = "default_nudge_max_repeats_per_obligation")]
    pub nudge_max_repeats_per_obligation: u32,
    #[serde(default = "default_nudge_escalate_after_repeats")]
    pub nudge_escalate_after_repeats: u32,
}

fn default_unread_nudge_after_seconds() -> u64 {
    900
}
fn default_reply_required_nudge_after_seconds() -> u64 {
    300
}
fn default_attention_ack_nudge_after_seconds() -> u64 {
    600
}
fn default_actor_idle_timeout_seconds() -> u64 {
    600
}
fn default_keepalive_delay_seconds() -> u64 {
    120
}
fn default_keepalive_max_per_actor() -> u32 {
    3
}
fn default_silence_timeout_seconds() -> u64 {
    600
}
fn default_help_nudge_interval_seconds() -> u64 {
    600
}
fn default_help_nudge_min_messages() -> u32 {
    10
}
fn default_nudge_digest_min_interval_seconds() -> u64 {
    120
}
fn default_nudge_max_repeats_per_obligation() -> u32 {
    5
}
fn default_nudge_escalate_after_repeats() -> u32 {
    3
}

impl Default for NudgeSettings {
    fn default() -> Self {
        Self {
            unread_nudge_after_seconds: default_unread_nudge_after_seconds(),
            reply_required_nudge_after_seconds: default_reply_required_nudge_after_seconds(),
            attention_ack_nudge_after_seconds: default_attention_ack_nudge_after_seconds(),
            actor_idle_timeout_seconds: default_actor_idle_timeout_seconds(),
            keepalive_delay_seconds: default_keepalive_delay_seconds(),
            keepalive_max_per_actor: default_keepalive_max_per_actor(),
            silence_timeout_seconds: default_silence_timeout_seconds(),
            help_nudge_interval_seconds: default_help_nudge_interval_seconds(),
            help_nudge_min_messages: default_help_nudge_min_messages(),
            nudge_digest_min_interval_seconds: default_nudge_digest_min_interval_seconds(),
            nudge_max_repeats_per_obligation: default_nudge_max_repeats_per_obligation(),
            nudge_escalate_after_repeats: default_nudge_escalate_after_repeats(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptSettings {
    #[serde(default)]
    pub terminal_transcript_visibility: TranscriptVisibility,
    #[serde(default)]
    pub terminal_transcript_notify_tail: bool,
    #[serde(default = "default_notify_lines")]
    pub terminal_transcript_notify_lines: u32,
}

fn default_notify_lines() -> u32 {
    20
}

/// Actor record as persisted in `group.yaml`: no `env` field — secrets
/// and other private env live under the runtime home only (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorSettings {
    pub actor_id: String,
    pub role: ActorRole,
    pub runtime: RuntimeKind,
    pub runner: RunnerKind,
    pub command: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSettings {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default)]
    pub state: GroupState,
    #[serde(default)]
    pub scopes: Vec<Scope>,
    #[serde(default)]
    pub actors: Vec<ActorSettings>,
    #[serde(default)]
    pub automation: AutomationRuleset,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub im_binding: Option<String>,
    #[serde(default)]
    pub delivery: DeliverySettings,
    #[serde(default)]
    pub nudges: NudgeSettings,
    #[serde(default)]
    pub transcript: TranscriptSettings,
    /// Unknown keys round-trip unchanged (spec §9).
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl GroupSettings {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            topic: None,
            state: GroupState::Active,
            scopes: Vec::new(),
            actors: Vec::new(),
            automation: AutomationRuleset::default(),
            im_binding: None,
            delivery: DeliverySettings::default(),
            nudges: NudgeSettings::default(),
            transcript: TranscriptSettings::default(),
            extra: HashMap::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_yml::from_str(&content)?))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yml::to_string(self)?;
        atomic_write(path, content.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("cccc-test-groupcfg-{}.yaml", uuid::Uuid::new_v4()))
    }

    #[test]
    fn loading_missing_file_returns_none() {
        assert!(GroupSettings::load(&temp_path()).unwrap().is_none());
    }

    #[test]
    fn round_trips_through_yaml_preserving_unknown_keys() {
        let path = temp_path();
        let mut settings = GroupSettings::new("Sprint Room");
        settings.extra.insert("future_knob".to_string(), serde_json::json!("value"));
        settings.save(&path).unwrap();

        let loaded = GroupSettings::load(&path).unwrap().unwrap();
        assert_eq!(loaded.title, "Sprint Room");
        assert_eq!(loaded.extra["future_knob"], serde_json::json!("value"));

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn defaults_match_spec_thresholds() {
        let settings = GroupSettings::new("g");
        assert_eq!(settings.nudges.unread_nudge_after_seconds, 900);
        assert_eq!(settings.nudges.reply_required_nudge_after_seconds, 300);
        assert_eq!(settings.nudges.attention_ack_nudge_after_seconds, 600);
        assert_eq!(settings.nudges.help_nudge_interval_seconds, 600);
        assert_eq!(settings.nudges.help_nudge_min_messages, 10);
    }
}
