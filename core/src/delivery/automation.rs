//! Automation rule engine: `every_seconds`/`cron`/`at` triggers → notify /
//! group_state / actor_control actions (spec §4.4 "User-defined rules").
//! Grounded on the teacher's `scheduler::daemon::SchedulerDaemon` tick
//! loop (`is_due`/`calculate_next_run` pattern), generalized from a
//! single interval-only job store to the three trigger kinds spec §4.4
//! requires plus optimistic-versioned updates.

use crate::contracts::{ActorControlOp, AutomationRule, AutomationRuleset, RuleAction, Trigger};
use crate::error::{CcccError, Result};
use chrono::{DateTime, Datelike, Timelike, Utc};
use std::collections::HashMap;

/// Per-rule scheduling state (`last_run_at` is enough to derive
/// `next_run_at` for `every_seconds`; `cron` is recomputed each tick;
/// `at` fires once and disables itself).
#[derive(Debug, Clone, Default)]
struct RuleRuntimeState {
    last_run_at: Option<DateTime<Utc>>,
}

pub struct AutomationEngine {
    ruleset: AutomationRuleset,
    state: HashMap<String, RuleRuntimeState>,
}

/// One fired rule's effect, for the delivery engine to translate into
/// ledger appends / supervisor calls.
#[derive(Debug, Clone)]
pub enum FiredEffect {
    Notify { recipients: Vec<String>, text: String },
    GroupState { state: String },
    ActorControl { op: ActorControlOp, actor_ids: Vec<String> },
}

impl AutomationEngine {
    pub fn new(ruleset: AutomationRuleset) -> Self {
        Self { ruleset, state: HashMap::new() }
    }

    pub fn version(&self) -> u64 {
        self.ruleset.version
    }

    pub fn ruleset(&self) -> &AutomationRuleset {
        &self.ruleset
    }

    /// Compare-and-set update (spec §4.4/§8): fails with `version_conflict`
    /// if `expected_version` doesn't match the current version.
    pub fn update(&mut self, new_ruleset: AutomationRuleset, expected_version: u64) -> Result<()> {
        if self.ruleset.version != expected_version {
            return Err(CcccError::VersionConflict { expected: expected_version, found: self.ruleset.version });
        }
        new_ruleset.validate().map_err(CcccError::invalid_payload)?;
        self.ruleset = new_ruleset;
        self.ruleset.version += 1;
        Ok(())
    }

    /// Evaluates every enabled rule against `now`, in rule-id order (spec
    /// §4.4 "Tie-breaks & ordering"), and returns the effects of every
    /// rule that fired this tick. `at` rules that fire are disabled in
    /// place; callers should persist the returned ruleset if it changed.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<FiredEffect> {
        let mut fired = Vec::new();
        let mut ids: Vec<String> = self.ruleset.rules.iter().map(|r| r.id.clone()).collect();
        ids.sort();

        for id in ids {
            let Some(rule) = self.ruleset.rules.iter().find(|r| r.id == id).cloned() else { continue };
            if !rule.enabled {
                continue;
            }
            let runtime = self.state.entry(rule.id.clone()).or_default();
            if !is_due(&rule.trigger, runtime.last_run_at, now) {
                continue;
            }

            runtime.last_run_at = Some(now);
            fired.push(effect_of(&rule.action));

            if matches!(rule.trigger, Trigger::At { .. }) {
                if let Some(r) = self.ruleset.rules.iter_mut().find(|r| r.id == rule.id) {
                    r.enabled = false;
                }
            }
        }

        fired
    }
}

fn effect_of(action: &RuleAction) -> FiredEffect {
    match action {
        RuleAction::Notify { recipients, text } => {
            FiredEffect::Notify { recipients: recipients.clone(), text: text.clone() }
        }
        RuleAction::GroupState { state } => FiredEffect::GroupState { state: state.clone() },
        RuleAction::ActorControl { op, actor_ids } => {
            FiredEffect::ActorControl { op: *op, actor_ids: actor_ids.clone() }
        }
    }
}

fn is_due(trigger: &Trigger, last_run_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match trigger {
        Trigger::EverySeconds { seconds } => match last_run_at {
            None => true,
            Some(last) => (now - last).num_seconds() >= *seconds as i64,
        },
        Trigger::At { timestamp } => last_run_at.is_none() && now >= *timestamp,
        Trigger::Cron { expr } => {
            if last_run_at.map(|last| same_minute(last, now)).unwrap_or(false) {
                return false;
            }
            matches_cron(expr, now)
        }
    }
}

fn same_minute(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.year() == b.year() && a.ordinal() == b.ordinal() && a.hour() == b.hour() && a.minute() == b.minute()
}

/// Minimal 5-field cron matcher (`minute hour day-of-month month
/// day-of-week`). Supports `*` and comma-separated exact values; no
/// step/range syntax. Sufficient for the fixed, low-cardinality schedules
/// automation rules realistically need; a full cron grammar is not worth
/// a new dependency for this subset.
fn matches_cron(expr: &str, now: DateTime<Utc>) -> bool {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        tracing::warn!(expr, "malformed cron expression, field count != 5");
        return false;
    }

    field_matches(fields[0], now.minute())
        && field_matches(fields[1], now.hour())
        && field_matches(fields[2], now.day())
        && field_matches(fields[3], now.month())
        && field_matches(fields[4], now.weekday().num_days_from_sunday())
}

fn field_matches(field: &str, value: u32) -> bool {
    if field == "*" {
        return true;
    }
    field.split(',').any(|token| token.parse::<u32>().map(|n| n == value).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn rule(id: &str, trigger: Trigger, action: RuleAction) -> AutomationRule {
        AutomationRule { id: id.into(), trigger, action, enabled: true, metadata: serde_json::json!({}) }
    }

    #[test]
    fn every_seconds_rule_fires_once_then_waits_for_interval() {
        let ruleset = AutomationRuleset {
            version: 1,
            rules: vec![rule(
                "r1",
                Trigger::EverySeconds { seconds: 60 },
                RuleAction::Notify { recipients: vec!["user".into()], text: "tick".into() },
            )],
        };
        let mut engine = AutomationEngine::new(ruleset);
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

        assert_eq!(engine.tick(t0).len(), 1);
        assert_eq!(engine.tick(t0 + chrono::Duration::seconds(30)).len(), 0);
        assert_eq!(engine.tick(t0 + chrono::Duration::seconds(61)).len(), 1);
    }

    #[test]
    fn at_rule_fires_once_and_disables_itself() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let ruleset = AutomationRuleset {
            version: 1,
            rules: vec![rule(
                "r1",
                Trigger::At { timestamp: t0 },
                RuleAction::GroupState { state: "paused".into() },
            )],
        };
        let mut engine = AutomationEngine::new(ruleset);
        assert_eq!(engine.tick(t0).len(), 1);
        assert_eq!(engine.tick(t0 + chrono::Duration::seconds(1)).len(), 0);
        assert!(!engine.ruleset().rules[0].enabled);
    }

    #[test]
    fn version_conflict_on_mismatched_expected_version() {
        let mut engine = AutomationEngine::new(AutomationRuleset::default());
        let err = engine.update(AutomationRuleset::default(), 5).unwrap_err();
        assert_eq!(err.code(), "version_conflict");
    }

    #[test]
    fn group_state_action_rejected_on_non_at_trigger() {
        let bad = AutomationRuleset {
            version: 0,
            rules: vec![rule(
                "r1",
                Trigger::EverySeconds { seconds: 10 },
                RuleAction::GroupState { state: "paused".into() },
            )],
        };
        let mut engine = AutomationEngine::new(AutomationRuleset::default());
        assert!(engine.update(bad, 0).is_err());
    }

    #[test]
    fn cron_field_matcher_supports_wildcards_and_lists() {
        assert!(field_matches("*", 5));
        assert!(field_matches("1,2,3", 2));
        assert!(!field_matches("1,2,3", 4));
    }
}
