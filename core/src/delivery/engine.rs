//! The delivery pipeline (spec §4.4 "Delivery pipeline"): fans committed
//! chat events out to their addressees, throttles/coalesces PTY
//! injection, auto-marks and auto-wakes, and drives the automation and
//! nudge engines off a 1 Hz heartbeat. Grounded on the teacher's
//! `scheduler::daemon::SchedulerDaemon` (a `JobStore` + tick loop owning
//! scheduling state) generalized from one job kind to the three
//! concerns (fan-out, user rules, nudges) spec §4.4 bundles together.

use super::automation::{AutomationEngine, FiredEffect};
use super::nudges::{ActorNudgeInput, GroupNudgeInput, NudgeEngine};
use crate::contracts::{Actor, ChatMessage, Event, EventKind, GroupState, Priority, Recipient, SystemNotify};
use crate::error::{CcccError, Result};
use crate::kernel::Kernel;
use crate::ledger::LedgerStore;
use crate::runner::{LifecycleState, Supervisor};
use crate::runtime_home::RuntimeHome;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One chat event queued for an actor whose throttle window hasn't
/// elapsed yet; several of these coalesce into one injection on release
/// (spec §4.4 step 3).
#[derive(Debug, Clone)]
struct QueuedDelivery {
    event_id: u64,
    by: String,
    text: String,
}

#[derive(Default)]
struct ActorDeliveryState {
    last_injected_at: Option<DateTime<Utc>>,
    queue: Vec<QueuedDelivery>,
    messages_since_help: u32,
    last_help_nudge_at: Option<DateTime<Utc>>,
}

struct GroupDeliveryState {
    automation: AutomationEngine,
    nudges: NudgeEngine,
    actors: HashMap<String, ActorDeliveryState>,
    last_chat_at: Option<DateTime<Utc>>,
}

impl GroupDeliveryState {
    fn new(automation: AutomationEngine) -> Self {
        Self { automation, nudges: NudgeEngine::new(), actors: HashMap::new(), last_chat_at: None }
    }

    fn actor_mut(&mut self, actor_id: &str) -> &mut ActorDeliveryState {
        self.actors.entry(actor_id.to_string()).or_default()
    }
}

pub struct DeliveryEngine {
    ledger: Arc<LedgerStore>,
    kernel: Arc<Kernel>,
    supervisor: Arc<Supervisor>,
    runtime_home: RuntimeHome,
    groups: Mutex<HashMap<String, GroupDeliveryState>>,
}

impl DeliveryEngine {
    pub fn new(
        ledger: Arc<LedgerStore>,
        kernel: Arc<Kernel>,
        supervisor: Arc<Supervisor>,
        runtime_home: RuntimeHome,
    ) -> Self {
        Self { ledger, kernel, supervisor, runtime_home, groups: Mutex::new(HashMap::new()) }
    }

    /// Lazily seeds a group's delivery/automation/nudge state without
    /// waiting for a `chat.message` commit to do it implicitly (spec §9
    /// "daemon restart... resumes ticking every loaded group"). Called by
    /// the daemon on startup and whenever a group is newly created, so
    /// `every_seconds`/`cron` rules fire even in a group nobody has
    /// messaged yet.
    pub async fn ensure_group(&self, group_id: &str) {
        let settings = self.load_settings(group_id);
        let mut groups = self.groups.lock().await;
        groups
            .entry(group_id.to_string())
            .or_insert_with(|| GroupDeliveryState::new(AutomationEngine::new(settings.automation)));
    }

    fn load_settings(&self, group_id: &str) -> crate::config::group_settings::GroupSettings {
        crate::config::group_settings::GroupSettings::load(&self.runtime_home.group_settings_path(group_id))
            .ok()
            .flatten()
            .unwrap_or_else(|| crate::config::group_settings::GroupSettings::new(group_id))
    }

    /// Appends to the ledger and immediately feeds the kernel projection,
    /// so anything this engine derives from `with_projection` right after
    /// a commit (e.g. the next tick's nudge input) sees it. Every
    /// ledger append this engine performs goes through here rather than
    /// `self.ledger.append` directly.
    async fn commit(&self, group_id: &str, kind: EventKind, by: &str, data: serde_json::Value) -> Result<Event> {
        let event = self.ledger.append(group_id, kind, by, data).await?;
        self.kernel.apply_committed(&event);
        Ok(event)
    }

    /// Handles one freshly committed event (spec §4.4 "Triggered by
    /// `chat.message` commits"). Non-chat events only update bookkeeping
    /// (e.g. a settings update invalidates nothing here since settings
    /// are reloaded from disk on every tick).
    pub async fn on_commit(&self, event: &Event) -> Result<()> {
        if event.kind != EventKind::ChatMessage {
            return Ok(());
        }
        let Ok(message) = event.as_chat_message() else { return Ok(()) };
        let settings = self.load_settings(&event.group_id);

        let mut groups = self.groups.lock().await;
        let state = groups
            .entry(event.group_id.clone())
            .or_insert_with(|| GroupDeliveryState::new(AutomationEngine::new(settings.automation.clone())));
        state.last_chat_at = Some(event.ts);
        drop(groups);

        let recipients = self
            .kernel
            .with_projection(&event.group_id, |p| p.resolve_addressees(&message.to))?;
        let group_state = self.kernel.with_projection(&event.group_id, |p| p.group.state)?;

        self.notify_unresolved_addressees(&event.group_id, &message.to, &recipients).await?;

        let rendered = render_injection(event, &message);

        for recipient in recipients {
            if recipient == "user" {
                continue;
            }
            self.deliver_to_actor(&event.group_id, &recipient, event.numeric_id(), &event.by, &rendered, &settings, group_state)
                .await?;
        }

        if settings.delivery.auto_mark_on_delivery {
            // Marking happens per-recipient inside `deliver_to_actor` once
            // injection actually occurs, not here: a queued (not yet
            // delivered) event must not be marked read early.
        }

        Ok(())
    }

    /// Diffs a `chat.message`'s raw `to[]` against what `resolve_addressees`
    /// actually resolved, surfacing every explicit actor id that doesn't
    /// exist and every `foreman` addressing with no foreman present as a
    /// `system.notify` to the user, without aborting the triggering commit
    /// (spec §7 `unknown_recipient`/`foreman_required`).
    async fn notify_unresolved_addressees(&self, group_id: &str, to: &[Recipient], resolved: &[String]) -> Result<()> {
        let mut reasons = Vec::new();
        let has_foreman = self.kernel.with_projection(group_id, |p| p.foreman_id().is_some())?;

        for token in to {
            match token {
                Recipient::Actor(id) if !resolved.contains(id) => {
                    let err = CcccError::UnknownRecipient { recipient: id.clone() };
                    tracing::warn!(group_id = %group_id, recipient = %id, "{}", err);
                    reasons.push(format!("{}:{}", err.code(), id));
                }
                Recipient::Foreman if !has_foreman => {
                    let err = CcccError::ForemanRequired { group_id: group_id.to_string() };
                    tracing::warn!(group_id = %group_id, "{}", err);
                    reasons.push(err.code().to_string());
                }
                _ => {}
            }
        }

        if reasons.is_empty() {
            return Ok(());
        }

        let notify = SystemNotify::new(vec![Recipient::User], reasons, Priority::Normal);
        self.commit(group_id, EventKind::SystemNotify, "system", serde_json::to_value(&notify)?).await?;
        Ok(())
    }

    async fn deliver_to_actor(
        &self,
        group_id: &str,
        actor_id: &str,
        event_id: u64,
        by: &str,
        rendered: &str,
        settings: &crate::config::group_settings::GroupSettings,
        group_state: GroupState,
    ) -> Result<()> {
        let Some(actor) = self.kernel.with_projection(group_id, |p| p.actors.get(actor_id).cloned())? else {
            return Ok(());
        };

        if actor.enabled && self.supervisor.lifecycle_of(group_id, actor_id).await != LifecycleState::Running {
            // Auto-wake (spec §4.4 step 6): start then inject once ready.
            if self.supervisor.start(&actor).await.is_err() {
                return Ok(());
            }
            self.commit(group_id, EventKind::ActorStart, "system", serde_json::json!({ "actor_id": actor_id }))
                .await?;
        }

        if group_state == GroupState::Paused {
            self.queue(group_id, actor_id, event_id, by, rendered).await;
            return Ok(());
        }

        if actor.runner != crate::contracts::RunnerKind::Pty {
            return Ok(());
        }

        let mut groups = self.groups.lock().await;
        let gstate = groups.entry(group_id.to_string()).or_insert_with(|| {
            GroupDeliveryState::new(AutomationEngine::new(settings.automation.clone()))
        });
        let astate = gstate.actor_mut(actor_id);
        let due = astate
            .last_injected_at
            .map(|last| (Utc::now() - last).num_seconds() as u64 >= settings.delivery.min_interval_seconds)
            .unwrap_or(true);

        if !due {
            astate.queue.push(QueuedDelivery { event_id, by: by.to_string(), text: rendered.to_string() });
            return Ok(());
        }

        astate.last_injected_at = Some(Utc::now());
        astate.messages_since_help += 1;
        drop(groups);

        self.inject_or_notify(group_id, actor_id, rendered).await?;

        if settings.delivery.auto_mark_on_delivery {
            self.commit(
                group_id,
                EventKind::ChatRead,
                actor_id,
                serde_json::json!({ "up_to": event_id.to_string() }),
            )
            .await?;
        }

        Ok(())
    }

    /// Injects into a running actor; a failed injection is logged and
    /// surfaced as a `system.notify` to the user rather than silently
    /// dropped, and never aborts the commit that triggered it (spec §7).
    async fn inject_or_notify(&self, group_id: &str, actor_id: &str, rendered: &str) -> Result<()> {
        if let Err(err) = self.supervisor.inject(group_id, actor_id, rendered).await {
            tracing::warn!(group_id = %group_id, actor_id = %actor_id, error = %err, "actor injection failed");
            let notify = SystemNotify::new(
                vec![Recipient::User],
                vec![format!("injection_failed:{actor_id}")],
                Priority::Normal,
            );
            self.commit(group_id, EventKind::SystemNotify, "system", serde_json::to_value(&notify)?).await?;
        }
        Ok(())
    }

    async fn queue(&self, group_id: &str, actor_id: &str, event_id: u64, by: &str, rendered: &str) {
        let mut groups = self.groups.lock().await;
        let gstate = groups.entry(group_id.to_string()).or_insert_with(|| GroupDeliveryState::new(AutomationEngine::new(Default::default())));
        gstate.actor_mut(actor_id).queue.push(QueuedDelivery {
            event_id,
            by: by.to_string(),
            text: rendered.to_string(),
        });
    }

    /// Resuming from `paused` drains each actor's backlog in commit order
    /// as one coalesced injection per actor (spec §8 scenario 3).
    pub async fn drain_paused_backlog(&self, group_id: &str) -> Result<()> {
        let queued: Vec<(String, Vec<QueuedDelivery>)> = {
            let mut groups = self.groups.lock().await;
            let Some(gstate) = groups.get_mut(group_id) else { return Ok(()) };
            gstate
                .actors
                .iter_mut()
                .filter(|(_, s)| !s.queue.is_empty())
                .map(|(actor_id, s)| (actor_id.clone(), std::mem::take(&mut s.queue)))
                .collect()
        };

        for (actor_id, mut items) in queued {
            items.sort_by_key(|q| q.event_id);
            let digest = coalesce(&items);
            self.inject_or_notify(group_id, &actor_id, &digest).await?;
            let mut groups = self.groups.lock().await;
            if let Some(gstate) = groups.get_mut(group_id) {
                gstate.actor_mut(&actor_id).last_injected_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    /// 1 Hz heartbeat (spec §4.4): releases any per-actor digests whose
    /// throttle window has elapsed, evaluates built-in nudges, then runs
    /// user-defined automation rules, in that order (spec §4.4
    /// "Tie-breaks & ordering: built-in policies evaluate before user
    /// rules").
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<()> {
        let group_ids: Vec<String> = self.groups.lock().await.keys().cloned().collect();

        for group_id in group_ids {
            let settings = self.load_settings(&group_id);
            self.release_due_digests(&group_id, now, &settings).await?;
            self.evaluate_nudges(&group_id, now, &settings).await?;
            self.run_automation(&group_id, now).await?;
        }
        Ok(())
    }

    async fn release_due_digests(&self, group_id: &str, now: DateTime<Utc>, settings: &crate::config::group_settings::GroupSettings) -> Result<()> {
        let group_state = self.kernel.with_projection(group_id, |p| p.group.state).unwrap_or(GroupState::Active);
        if group_state == GroupState::Paused {
            return Ok(());
        }

        let ready: Vec<(String, Vec<QueuedDelivery>)> = {
            let mut groups = self.groups.lock().await;
            let Some(gstate) = groups.get_mut(group_id) else { return Ok(()) };
            gstate
                .actors
                .iter_mut()
                .filter_map(|(actor_id, s)| {
                    if s.queue.is_empty() {
                        return None;
                    }
                    let due = s
                        .last_injected_at
                        .map(|last| (now - last).num_seconds() as u64 >= settings.delivery.min_interval_seconds)
                        .unwrap_or(true);
                    if due {
                        Some((actor_id.clone(), std::mem::take(&mut s.queue)))
                    } else {
                        None
                    }
                })
                .collect()
        };

        for (actor_id, items) in ready {
            let digest = coalesce(&items);
            self.inject_or_notify(group_id, &actor_id, &digest).await?;
            let last_id = items.iter().map(|i| i.event_id).max().unwrap_or(0);
            let mut groups = self.groups.lock().await;
            if let Some(gstate) = groups.get_mut(group_id) {
                gstate.actor_mut(&actor_id).last_injected_at = Some(now);
            }
            drop(groups);
            if settings.delivery.auto_mark_on_delivery && last_id > 0 {
                self.commit(group_id, EventKind::ChatRead, &actor_id, serde_json::json!({ "up_to": last_id.to_string() }))
                    .await?;
            }
        }
        Ok(())
    }

    async fn evaluate_nudges(&self, group_id: &str, now: DateTime<Utc>, settings: &crate::config::group_settings::GroupSettings) -> Result<()> {
        let input = self.build_nudge_input(group_id, now).await?;

        let pending = {
            let mut groups = self.groups.lock().await;
            let Some(gstate) = groups.get_mut(group_id) else { return Ok(()) };
            gstate.nudges.evaluate(now, &input, &settings.nudges)
        };

        for nudge in pending {
            if nudge.reasons.iter().any(|r| r == "help") {
                let mut groups = self.groups.lock().await;
                if let Some(gstate) = groups.get_mut(group_id) {
                    gstate.actor_mut(&nudge.recipient).last_help_nudge_at = Some(now);
                }
            }
            let notify = SystemNotify::new(vec![Recipient::Actor(nudge.recipient.clone())], nudge.reasons, nudge.priority);
            self.commit(group_id, EventKind::SystemNotify, "system", serde_json::to_value(&notify)?)
                .await?;
        }
        Ok(())
    }

    /// Cross-references the kernel's obligation table (keyed by the event
    /// id that raised the obligation) against the ledger's own timestamps
    /// to get the `(event_id, ts)` pairs `NudgeEngine` needs per actor.
    /// The obligation table itself carries no timestamps; it only tracks
    /// which recipients still owe a reply or ack (kernel::projection).
    async fn build_nudge_input(&self, group_id: &str, now: DateTime<Utc>) -> Result<GroupNudgeInput> {
        let actors: Vec<Actor> = self.kernel.with_projection(group_id, |p| p.actors.values().cloned().collect())?;
        let obligations = self.kernel.with_projection(group_id, |p| p.obligations.clone())?;

        let event_ts: HashMap<u64, DateTime<Utc>> = if obligations.is_empty() {
            HashMap::new()
        } else {
            self.ledger
                .read_all(group_id)?
                .into_iter()
                .map(|e| (e.numeric_id(), e.ts))
                .collect()
        };

        let last_chat_at = {
            let groups = self.groups.lock().await;
            groups.get(group_id).and_then(|g| g.last_chat_at)
        };

        let mut inputs = Vec::with_capacity(actors.len());
        for actor in &actors {
            let cursor = self.kernel.with_projection(group_id, |p| p.read_cursor(&actor.actor_id)).unwrap_or(0);
            let last_event_id = self.kernel.with_projection(group_id, |p| p.last_event_id).unwrap_or(0);
            let oldest_unread_at = if last_event_id > cursor { Some(now) } else { None };

            let unsatisfied_reply_obligations: Vec<(u64, DateTime<Utc>)> = obligations
                .iter()
                .filter(|(_, record)| !record.reply_satisfied(&actor.actor_id) && record.reply_required.contains(&actor.actor_id))
                .filter_map(|(id, _)| event_ts.get(id).map(|ts| (*id, *ts)))
                .collect();
            let unacked_attention: Vec<(u64, DateTime<Utc>)> = obligations
                .iter()
                .filter(|(_, record)| !record.ack_satisfied(&actor.actor_id) && record.attention_ack_required.contains(&actor.actor_id))
                .filter_map(|(id, _)| event_ts.get(id).map(|ts| (*id, *ts)))
                .collect();

            let last_output_at = self.supervisor.last_activity(group_id, &actor.actor_id).await;
            let (messages_since_help, seconds_since_last_help_call) = {
                let groups = self.groups.lock().await;
                let state = groups.get(group_id).and_then(|g| g.actors.get(&actor.actor_id));
                let messages_since_help = state.map(|s| s.messages_since_help).unwrap_or(0);
                let seconds_since_last_help_call =
                    state.and_then(|s| s.last_help_nudge_at).map(|last| (now - last).num_seconds().max(0) as u64);
                (messages_since_help, seconds_since_last_help_call)
            };

            inputs.push(ActorNudgeInput {
                actor_id: actor.actor_id.clone(),
                is_foreman: actor.is_foreman(),
                oldest_unread_at,
                unsatisfied_reply_obligations,
                unacked_attention,
                last_output_at,
                messages_processed_without_help: messages_since_help,
                seconds_since_last_help_call,
            });
        }

        Ok(GroupNudgeInput { last_chat_at, actors: inputs })
    }

    /// Applies an optimistic-concurrency automation ruleset update against
    /// the live engine (so the next tick sees it immediately) and persists
    /// the result into `group.yaml` so it survives a daemon restart. Used
    /// by both the `automation.update` and `automation.reset` IPC ops —
    /// reset is just an update to an empty ruleset.
    pub async fn update_automation(
        &self,
        group_id: &str,
        new_ruleset: crate::contracts::AutomationRuleset,
        expected_version: u64,
    ) -> Result<crate::contracts::AutomationRuleset> {
        let settings = self.load_settings(group_id);
        let updated = {
            let mut groups = self.groups.lock().await;
            let gstate = groups
                .entry(group_id.to_string())
                .or_insert_with(|| GroupDeliveryState::new(AutomationEngine::new(settings.automation.clone())));
            gstate.automation.update(new_ruleset, expected_version)?;
            gstate.automation.ruleset().clone()
        };

        let mut settings = self.load_settings(group_id);
        settings.automation = updated.clone();
        settings.save(&self.runtime_home.group_settings_path(group_id))?;
        Ok(updated)
    }

    async fn run_automation(&self, group_id: &str, now: DateTime<Utc>) -> Result<()> {
        let fired = {
            let mut groups = self.groups.lock().await;
            let Some(gstate) = groups.get_mut(group_id) else { return Ok(()) };
            gstate.automation.tick(now)
        };

        for effect in fired {
            match effect {
                FiredEffect::Notify { recipients, text } => {
                    let mut msg = ChatMessage::broadcast(text);
                    msg.to = recipients.iter().map(|r| Recipient::parse(r)).collect();
                    let event = self
                        .commit(group_id, EventKind::ChatMessage, "automation", serde_json::to_value(&msg)?)
                        .await?;
                    self.on_commit(&event).await?;
                }
                FiredEffect::GroupState { state } => {
                    self.commit(group_id, EventKind::GroupSetState, "automation", serde_json::json!({ "state": state }))
                        .await?;
                }
                FiredEffect::ActorControl { op, actor_ids } => {
                    for actor_id in actor_ids {
                        let kind = match op {
                            crate::contracts::ActorControlOp::Start => EventKind::ActorStart,
                            crate::contracts::ActorControlOp::Stop => EventKind::ActorStop,
                            crate::contracts::ActorControlOp::Restart => EventKind::ActorRestart,
                        };
                        self.commit(group_id, kind, "automation", serde_json::json!({ "actor_id": actor_id }))
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Coalesces several queued events addressed to the same actor into one
/// injection body (spec §4.4 step 3 "multiple queued events... coalesce
/// into a digest on release").
fn coalesce(items: &[QueuedDelivery]) -> String {
    if items.len() == 1 {
        return render_text(items[0].event_id, &items[0].by, &items[0].text, None);
    }
    let mut out = format!("[{} messages]\n", items.len());
    for item in items {
        out.push_str(&render_text(item.event_id, &item.by, &item.text, None));
        out.push('\n');
    }
    out
}

/// Stable structured header identifying sender and reply context (spec
/// §4.3 "Injection protocol"), so agents can parse who sent what.
fn render_injection(event: &Event, message: &ChatMessage) -> String {
    render_text(event.numeric_id(), &event.by, &message.text, message.reply_to.as_deref())
}

fn render_text(event_id: u64, by: &str, text: &str, reply_to: Option<&str>) -> String {
    match reply_to {
        Some(reply_to) => format!("[#{event_id} from {by}, re #{reply_to}]\n{text}"),
        None => format!("[#{event_id} from {by}]\n{text}"),
    }
}
