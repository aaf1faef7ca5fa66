//! Exportable group configuration (spec Glossary "Blueprint"): actor
//! roster, delivery/nudge/transcript knobs, and automation ruleset,
//! excluding ledger history and actor secrets — `ActorSettings` already
//! carries no `env` field, so nothing needs stripping there.
//!
//! `group.export_blueprint` produces one of these from the live
//! `GroupSettings`; `group.import_blueprint` applies one to a group,
//! adding any missing actors and overlaying settings/automation (spec §8
//! "`export_blueprint → import_blueprint` on a fresh group reproduces
//! identical actor/settings/automation configuration").

use super::group_settings::{ActorSettings, DeliverySettings, GroupSettings, NudgeSettings, TranscriptSettings};
use crate::contracts::AutomationRuleset;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blueprint {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default)]
    pub actors: Vec<ActorSettings>,
    #[serde(default)]
    pub automation: AutomationRuleset,
    #[serde(default)]
    pub delivery: DeliverySettings,
    #[serde(default)]
    pub nudges: NudgeSettings,
    #[serde(default)]
    pub transcript: TranscriptSettings,
}

impl Blueprint {
    pub fn from_settings(settings: &GroupSettings) -> Self {
        Self {
            title: settings.title.clone(),
            topic: settings.topic.clone(),
            actors: settings.actors.clone(),
            automation: settings.automation.clone(),
            delivery: settings.delivery.clone(),
            nudges: settings.nudges.clone(),
            transcript: settings.transcript.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{ActorRole, RunnerKind, RuntimeKind};

    #[test]
    fn round_trips_through_json_without_secrets() {
        let mut settings = GroupSettings::new("Sprint Room");
        settings.actors.push(ActorSettings {
            actor_id: "a1".into(),
            role: ActorRole::Foreman,
            runtime: RuntimeKind::Claude,
            runner: RunnerKind::Pty,
            command: vec!["claude".into()],
            enabled: true,
            profile: None,
        });

        let blueprint = Blueprint::from_settings(&settings);
        let json = serde_json::to_value(&blueprint).unwrap();
        assert!(json.get("env").is_none());
        assert!(json["actors"][0].get("env").is_none());

        let back: Blueprint = serde_json::from_value(json).unwrap();
        assert_eq!(back.title, "Sprint Room");
        assert_eq!(back.actors.len(), 1);
        assert_eq!(back.actors[0].actor_id, "a1");
    }
}
