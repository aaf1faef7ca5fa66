//! User-defined automation ruleset contract (spec §4.4 "User-defined
//! rules"). Data shape only; evaluation lives in `crate::delivery::automation`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    EverySeconds { seconds: u64 },
    Cron { expr: String },
    At { timestamp: chrono::DateTime<chrono::Utc> },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleAction {
    Notify { recipients: Vec<String>, text: String },
    GroupState { state: String },
    ActorControl { op: ActorControlOp, actor_ids: Vec<String> },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActorControlOp {
    Start,
    Stop,
    Restart,
}

impl RuleAction {
    /// `group_state` and `actor_control` are allowed only for `at`
    /// triggers (spec §4.4); `notify` is unrestricted.
    pub fn requires_at_trigger(&self) -> bool {
        !matches!(self, RuleAction::Notify { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutomationRule {
    pub id: String,
    pub trigger: Trigger,
    pub action: RuleAction,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

fn default_true() -> bool {
    true
}

/// The whole ruleset, versioned for optimistic-concurrency updates
/// (`automation_update` with `expected_version`, spec §4.4/§8).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AutomationRuleset {
    pub version: u64,
    pub rules: Vec<AutomationRule>,
}

impl AutomationRuleset {
    /// Validates the "at-trigger-only" restriction on `group_state`/
    /// `actor_control` actions before accepting a ruleset update.
    pub fn validate(&self) -> Result<(), String> {
        for rule in &self.rules {
            if rule.action.requires_at_trigger() && !matches!(rule.trigger, Trigger::At { .. }) {
                return Err(format!(
                    "rule `{}`: action requires an `at` trigger",
                    rule.id
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_state_action_requires_at_trigger() {
        let ruleset = AutomationRuleset {
            version: 1,
            rules: vec![AutomationRule {
                id: "r1".into(),
                trigger: Trigger::EverySeconds { seconds: 60 },
                action: RuleAction::GroupState { state: "paused".into() },
                enabled: true,
                metadata: serde_json::json!({}),
            }],
        };
        assert!(ruleset.validate().is_err());
    }

    #[test]
    fn notify_action_allows_any_trigger() {
        let ruleset = AutomationRuleset {
            version: 1,
            rules: vec![AutomationRule {
                id: "r1".into(),
                trigger: Trigger::Cron { expr: "0 9 * * *".into() },
                action: RuleAction::Notify { recipients: vec!["user".into()], text: "hi".into() },
                enabled: true,
                metadata: serde_json::json!({}),
            }],
        };
        assert!(ruleset.validate().is_ok());
    }
}
