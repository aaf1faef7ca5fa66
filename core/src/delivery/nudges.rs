//! Built-in nudge policies (spec §4.4 table): per-(event, recipient)
//! timers evaluated against the projection, producing digested
//! `system.notify` effects with escalation and repeat caps. Grounded on
//! the same `is_due`-against-`now` shape as `delivery::automation`
//! (itself from the teacher's `scheduler::daemon::SchedulerDaemon::tick`),
//! generalized from one trigger per job to several independent timers
//! that fold into one notification per recipient.

use crate::config::group_settings::NudgeSettings;
use crate::contracts::Priority;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// One built-in policy's trigger, kept as a stable reason code rather
/// than a string built ad hoc at each call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NudgeReason {
    Unread,
    ReplyRequired,
    AttentionAck,
    ActorIdle,
    Keepalive,
    Silence,
    Help,
}

impl NudgeReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unread => "unread",
            Self::ReplyRequired => "reply_required",
            Self::AttentionAck => "attention_ack",
            Self::ActorIdle => "actor_idle",
            Self::Keepalive => "keepalive",
            Self::Silence => "silence",
            Self::Help => "help",
        }
    }
}

/// Per-actor facts the evaluator needs; the caller (the delivery
/// pipeline) is responsible for deriving these from the kernel
/// projection, the ledger, and the runner supervisor, keeping this
/// module testable against plain data.
#[derive(Debug, Clone, Default)]
pub struct ActorNudgeInput {
    pub actor_id: String,
    pub is_foreman: bool,
    pub oldest_unread_at: Option<DateTime<Utc>>,
    /// `(event_id, event_ts)` of every reply-required obligation this
    /// actor still owes.
    pub unsatisfied_reply_obligations: Vec<(u64, DateTime<Utc>)>,
    /// `(event_id, event_ts)` of every attention message this actor has
    /// not yet acked.
    pub unacked_attention: Vec<(u64, DateTime<Utc>)>,
    pub last_output_at: Option<DateTime<Utc>>,
    pub messages_processed_without_help: u32,
    pub seconds_since_last_help_call: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct GroupNudgeInput {
    pub last_chat_at: Option<DateTime<Utc>>,
    pub actors: Vec<ActorNudgeInput>,
}

#[derive(Debug, Clone)]
pub struct PendingNudge {
    pub recipient: String,
    pub reasons: Vec<String>,
    pub priority: Priority,
}

#[derive(Debug, Clone, Default)]
struct RecipientNudgeState {
    last_digest_at: Option<DateTime<Utc>>,
    repeat_count: u32,
    keepalive_count: u32,
}

/// Per-group nudge timers. One instance lives for as long as the group's
/// projection is loaded; state resets (intentionally) if the daemon
/// restarts, since nudges are a liveness aid, not a ledger fact.
#[derive(Debug, Default)]
pub struct NudgeEngine {
    state: HashMap<String, RecipientNudgeState>,
}

impl NudgeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluates every built-in policy for one group at `now`. Returns at
    /// most one digested nudge per recipient, listing every reason that
    /// is currently due (spec §4.4 "nudges for the same recipient
    /// coalesce into one event whose payload lists all reasons").
    pub fn evaluate(&mut self, now: DateTime<Utc>, input: &GroupNudgeInput, settings: &NudgeSettings) -> Vec<PendingNudge> {
        let mut out = Vec::new();

        for actor in &input.actors {
            let mut reasons = Vec::new();

            if let Some(oldest) = actor.oldest_unread_at {
                if age_secs(now, oldest) >= settings.unread_nudge_after_seconds {
                    reasons.push(NudgeReason::Unread);
                }
            }
            if actor
                .unsatisfied_reply_obligations
                .iter()
                .any(|(_, ts)| age_secs(now, *ts) >= settings.reply_required_nudge_after_seconds)
            {
                reasons.push(NudgeReason::ReplyRequired);
            }
            if actor
                .unacked_attention
                .iter()
                .any(|(_, ts)| age_secs(now, *ts) >= settings.attention_ack_nudge_after_seconds)
            {
                reasons.push(NudgeReason::AttentionAck);
            }
            if let Some(last_output) = actor.last_output_at {
                if age_secs(now, last_output) >= settings.actor_idle_timeout_seconds {
                    reasons.push(NudgeReason::ActorIdle);
                }
            }
            let help_time_due = actor
                .seconds_since_last_help_call
                .map(|secs| secs >= settings.help_nudge_interval_seconds)
                .unwrap_or(true);
            if actor.messages_processed_without_help >= settings.help_nudge_min_messages && help_time_due {
                reasons.push(NudgeReason::Help);
            }

            if actor.is_foreman {
                if let Some(last_chat) = input.last_chat_at {
                    if age_secs(now, last_chat) >= settings.silence_timeout_seconds {
                        reasons.push(NudgeReason::Silence);
                    }
                }
            }

            let state = self.state.entry(actor.actor_id.clone()).or_default();

            // Keepalive only fires as a fallback when nothing else is due
            // for the foreman, so it never masks a real obligation nudge
            // behind its own, shorter interval.
            if actor.is_foreman && reasons.is_empty() && state.keepalive_count < settings.keepalive_max_per_actor {
                let due = state
                    .last_digest_at
                    .map(|last| age_secs(now, last) >= settings.keepalive_delay_seconds)
                    .unwrap_or(true);
                if due {
                    reasons.push(NudgeReason::Keepalive);
                }
            }

            if reasons.is_empty() {
                state.repeat_count = 0;
                continue;
            }

            let due = state
                .last_digest_at
                .map(|last| age_secs(now, last) >= settings.nudge_digest_min_interval_seconds)
                .unwrap_or(true);
            if !due {
                continue;
            }
            if state.repeat_count >= settings.nudge_max_repeats_per_obligation {
                continue;
            }

            state.last_digest_at = Some(now);
            state.repeat_count += 1;
            if reasons.contains(&NudgeReason::Keepalive) {
                state.keepalive_count += 1;
            }

            let priority = if state.repeat_count >= settings.nudge_escalate_after_repeats {
                Priority::Attention
            } else {
                Priority::Normal
            };

            out.push(PendingNudge {
                recipient: actor.actor_id.clone(),
                reasons: reasons.iter().map(|r| r.code().to_string()).collect(),
                priority,
            });
        }

        out
    }
}

fn age_secs(now: DateTime<Utc>, ts: DateTime<Utc>) -> u64 {
    (now - ts).num_seconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn actor(id: &str) -> ActorNudgeInput {
        ActorNudgeInput { actor_id: id.into(), ..Default::default() }
    }

    #[test]
    fn unread_nudge_fires_after_threshold() {
        let mut engine = NudgeEngine::new();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let settings = NudgeSettings::default();

        let mut a1 = actor("a1");
        a1.oldest_unread_at = Some(t0);
        let input = GroupNudgeInput { last_chat_at: Some(t0), actors: vec![a1] };

        let before = engine.evaluate(t0 + chrono::Duration::seconds(100), &input, &settings);
        assert!(before.is_empty());

        let after = engine.evaluate(t0 + chrono::Duration::seconds(901), &input, &settings);
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].reasons, vec!["unread".to_string()]);
    }

    #[test]
    fn multiple_reasons_digest_into_one_notification() {
        let mut engine = NudgeEngine::new();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let settings = NudgeSettings::default();

        let mut a1 = actor("a1");
        a1.oldest_unread_at = Some(t0);
        a1.unsatisfied_reply_obligations = vec![(1, t0)];
        let input = GroupNudgeInput { last_chat_at: Some(t0), actors: vec![a1] };

        let due = engine.evaluate(t0 + chrono::Duration::seconds(901), &input, &settings);
        assert_eq!(due.len(), 1);
        assert!(due[0].reasons.contains(&"unread".to_string()));
        assert!(due[0].reasons.contains(&"reply_required".to_string()));
    }

    #[test]
    fn digest_interval_suppresses_repeat_evaluation_within_window() {
        let mut engine = NudgeEngine::new();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let settings = NudgeSettings::default();

        let mut a1 = actor("a1");
        a1.oldest_unread_at = Some(t0);
        let input = GroupNudgeInput { last_chat_at: Some(t0), actors: vec![a1] };

        let first = engine.evaluate(t0 + chrono::Duration::seconds(901), &input, &settings);
        assert_eq!(first.len(), 1);
        let second = engine.evaluate(t0 + chrono::Duration::seconds(905), &input, &settings);
        assert!(second.is_empty());
    }

    #[test]
    fn escalates_priority_after_repeat_threshold() {
        let mut engine = NudgeEngine::new();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut settings = NudgeSettings::default();
        settings.nudge_digest_min_interval_seconds = 10;
        settings.nudge_escalate_after_repeats = 2;
        settings.unread_nudge_after_seconds = 0;

        let mut a1 = actor("a1");
        a1.oldest_unread_at = Some(t0);
        let input = GroupNudgeInput { last_chat_at: Some(t0), actors: vec![a1] };

        let first = engine.evaluate(t0, &input, &settings);
        assert_eq!(first[0].priority, Priority::Normal);
        let second = engine.evaluate(t0 + chrono::Duration::seconds(11), &input, &settings);
        assert_eq!(second[0].priority, Priority::Attention);
    }

    #[test]
    fn stops_firing_after_max_repeats() {
        let mut engine = NudgeEngine::new();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut settings = NudgeSettings::default();
        settings.nudge_digest_min_interval_seconds = 1;
        settings.nudge_max_repeats_per_obligation = 2;
        settings.unread_nudge_after_seconds = 0;

        let mut a1 = actor("a1");
        a1.oldest_unread_at = Some(t0);
        let input = GroupNudgeInput { last_chat_at: Some(t0), actors: vec![a1] };

        let mut fired = 0;
        for i in 0..5 {
            let tick = t0 + chrono::Duration::seconds(i * 2);
            if !engine.evaluate(tick, &input, &settings).is_empty() {
                fired += 1;
            }
        }
        assert_eq!(fired, 2);
    }

    #[test]
    fn keepalive_fires_only_when_nothing_else_is_due_and_is_capped() {
        let mut engine = NudgeEngine::new();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut settings = NudgeSettings::default();
        settings.keepalive_delay_seconds = 10;
        settings.keepalive_max_per_actor = 1;
        settings.nudge_digest_min_interval_seconds = 0;

        let mut foreman = actor("foreman");
        foreman.is_foreman = true;
        let input = GroupNudgeInput { last_chat_at: None, actors: vec![foreman] };

        let first = engine.evaluate(t0 + chrono::Duration::seconds(11), &input, &settings);
        assert_eq!(first[0].reasons, vec!["keepalive".to_string()]);

        let second = engine.evaluate(t0 + chrono::Duration::seconds(25), &input, &settings);
        assert!(second.is_empty());
    }
}
