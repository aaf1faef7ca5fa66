//! The closed operation set (spec §4.5 "Operations (closed set)"). Every
//! op is namespaced (`group.create`, `message.send`, ...); `dispatch`
//! resolves the acting principal, checks `Kernel::authorize` where the
//! operation mutates state, then either commits through
//! `Daemon::commit` or answers a pure read from the ledger/projection.
//!
//! Grounded on the teacher's `server::handle_client_message` (a `match`
//! over a tagged message enum calling into `AppState`), generalized from
//! a small fixed enum of client messages to a flat `op` string so the
//! namespace can grow without the transport layer changing shape.

use crate::config::group_settings::GroupSettings;
use crate::config::Blueprint;
use crate::contracts::{Actor, AutomationRuleset, ChatMessage, EventKind, MessageFormat, Priority, Recipient, RunnerKind, RuntimeKind};
use crate::daemon::Daemon;
use crate::error::{CcccError, Result};
use crate::kernel::{Action, Principal};
use crate::ledger::ReadFilter;
use crate::runner::{HeadlessStatus, LifecycleState};
use serde::Deserialize;

/// Resolves the acting `Principal` from the optional `as_actor` field on
/// a request (spec §4.2 principal kinds). `target_actor_id`, when given,
/// is the actor the operation would mutate — only actor-lifecycle ops
/// need it to distinguish `peer (self)` from `peer (other)`.
fn resolve_principal(daemon: &Daemon, group_id: &str, as_actor: Option<&str>, target_actor_id: Option<&str>) -> Result<Principal> {
    let Some(actor_id) = as_actor else { return Ok(Principal::User) };
    let foreman_id = daemon.kernel.with_projection(group_id, |p| p.foreman_id().map(String::from))?;
    if foreman_id.as_deref() == Some(actor_id) {
        Ok(Principal::Foreman)
    } else if target_actor_id == Some(actor_id) {
        Ok(Principal::PeerSelf)
    } else {
        Ok(Principal::PeerOther)
    }
}

fn authorize(daemon: &Daemon, group_id: &str, as_actor: Option<&str>, target_actor_id: Option<&str>, action: Action) -> Result<()> {
    let principal = resolve_principal(daemon, group_id, as_actor, target_actor_id)?;
    daemon.kernel.authorize(group_id, principal, action)
}

fn args_of<T: for<'de> Deserialize<'de>>(args: serde_json::Value) -> Result<T> {
    serde_json::from_value(args).map_err(|e| CcccError::invalid_payload(e.to_string()))
}

fn require_str(value: &serde_json::Value, field: &str) -> Result<String> {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| CcccError::invalid_payload(format!("missing required field `{field}`")))
}

/// Dispatches one `request{op, args}` to its handler. Returns the raw
/// `result` payload for a `response` frame; the caller wraps errors into
/// `response{ok:false, error}`.
pub async fn dispatch(daemon: &Daemon, op: &str, args: serde_json::Value, as_actor: Option<&str>) -> Result<serde_json::Value> {
    match op {
        "group.create" => group_create(daemon, args).await,
        "group.update" => group_update(daemon, args, as_actor).await,
        "group.delete" => group_delete(daemon, args, as_actor).await,
        "group.start" => group_start(daemon, args, as_actor).await,
        "group.stop" => group_stop(daemon, args, as_actor).await,
        "group.set_state" => group_set_state(daemon, args, as_actor).await,
        "group.attach" => group_attach(daemon, args, as_actor).await,
        "group.detach" => group_detach(daemon, args, as_actor).await,

        "actor.add" => actor_add(daemon, args, as_actor).await,
        "actor.update" => actor_update(daemon, args, as_actor).await,
        "actor.start" => actor_start(daemon, args, as_actor).await,
        "actor.stop" => actor_stop(daemon, args, as_actor).await,
        "actor.restart" => actor_restart(daemon, args, as_actor).await,
        "actor.remove" => actor_remove(daemon, args, as_actor).await,
        "actor.poll" => actor_poll(daemon, args, as_actor).await,

        "ledger.search" => ledger_search(daemon, args).await,
        "ledger.compact" => ledger_compact(daemon, args, as_actor).await,

        "group.export_blueprint" => group_export_blueprint(daemon, args).await,
        "group.import_blueprint" => group_import_blueprint(daemon, args, as_actor).await,

        "inbox.list" => inbox_list(daemon, args).await,
        "inbox.mark_read" => inbox_mark_read(daemon, args, as_actor).await,

        "message.send" | "message.relay" => message_send(daemon, args, as_actor).await,
        "message.reply" => message_reply(daemon, args, as_actor).await,
        "message.ack" => message_ack(daemon, args, as_actor).await,

        "context.batch_update" => context_batch_update(daemon, args, as_actor).await,

        "settings.read" => settings_read(daemon, args).await,
        "settings.update" => settings_update(daemon, args, as_actor).await,

        "automation.read" => automation_read(daemon, args).await,
        "automation.update" => automation_update(daemon, args, as_actor).await,
        "automation.reset" => automation_reset(daemon, args, as_actor).await,

        "im.config_get" => im_config_get(daemon, args).await,
        "im.config_set" => im_config_set(daemon, args, as_actor).await,
        "im.config_unset" => im_config_unset(daemon, args, as_actor).await,

        "runtime.list" => runtime_list(),
        "terminal.tail" => terminal_tail(daemon, args).await,
        "debug.snapshot" => debug_snapshot(daemon, args).await,

        other => Err(CcccError::UnknownOp { op: other.to_string() }),
    }
}

// ---- Group CRUD & lifecycle ------------------------------------------

#[derive(Deserialize)]
struct GroupCreateArgs {
    group_id: String,
    title: String,
    #[serde(default)]
    topic: Option<String>,
}

async fn group_create(daemon: &Daemon, args: serde_json::Value) -> Result<serde_json::Value> {
    let args: GroupCreateArgs = args_of(args)?;
    daemon.runtime_home.ensure_group_layout(&args.group_id)?;

    let mut registry = daemon.runtime_home.load_registry()?;
    if registry.groups.contains_key(&args.group_id) {
        return Err(CcccError::invalid_payload(format!("group `{}` already exists", args.group_id)));
    }
    registry.groups.insert(
        args.group_id.clone(),
        crate::runtime_home::RegistryEntry { group_id: args.group_id.clone(), title: args.title.clone(), extra: Default::default() },
    );
    daemon.runtime_home.save_registry(&registry)?;

    let mut settings = GroupSettings::new(&args.title);
    settings.topic = args.topic.clone();
    settings.save(&daemon.runtime_home.group_settings_path(&args.group_id))?;

    let mut data = serde_json::json!({ "title": args.title });
    if let Some(topic) = &args.topic {
        data["topic"] = serde_json::json!(topic);
    }
    let event = daemon.commit(&args.group_id, EventKind::GroupCreate, "user", data).await?;
    daemon.delivery.ensure_group(&args.group_id).await;

    Ok(serde_json::json!({ "event": event }))
}

#[derive(Deserialize)]
struct GroupUpdateArgs {
    group_id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    topic: Option<String>,
}

async fn group_update(daemon: &Daemon, args: serde_json::Value, as_actor: Option<&str>) -> Result<serde_json::Value> {
    let args: GroupUpdateArgs = args_of(args)?;
    authorize(daemon, &args.group_id, as_actor, None, Action::GroupSettingsUpdate)?;

    let mut data = serde_json::json!({});
    if let Some(title) = &args.title {
        data["title"] = serde_json::json!(title);
    }
    if let Some(topic) = &args.topic {
        data["topic"] = serde_json::json!(topic);
    }
    let event = daemon.commit(&args.group_id, EventKind::GroupUpdate, by_of(as_actor), data).await?;
    Ok(serde_json::json!({ "event": event }))
}

#[derive(Deserialize)]
struct GroupDeleteArgs {
    group_id: String,
    /// "destroyed only by explicit delete confirmed by id" (spec §3):
    /// the caller must echo the group id back to confirm intent.
    confirm_group_id: String,
}

async fn group_delete(daemon: &Daemon, args: serde_json::Value, as_actor: Option<&str>) -> Result<serde_json::Value> {
    let args: GroupDeleteArgs = args_of(args)?;
    authorize(daemon, &args.group_id, as_actor, None, Action::GroupDelete)?;
    if args.confirm_group_id != args.group_id {
        return Err(CcccError::invalid_payload("confirm_group_id does not match group_id"));
    }

    let mut registry = daemon.runtime_home.load_registry()?;
    registry.groups.remove(&args.group_id);
    daemon.runtime_home.save_registry(&registry)?;
    std::fs::remove_dir_all(daemon.runtime_home.group_dir(&args.group_id))?;

    Ok(serde_json::json!({ "group_id": args.group_id }))
}

#[derive(Deserialize)]
struct GroupIdArgs {
    group_id: String,
}

async fn group_start(daemon: &Daemon, args: serde_json::Value, as_actor: Option<&str>) -> Result<serde_json::Value> {
    let args: GroupIdArgs = args_of(args)?;
    authorize(daemon, &args.group_id, as_actor, None, Action::GroupStart)?;
    let event = daemon.commit(&args.group_id, EventKind::GroupStart, by_of(as_actor), serde_json::json!({})).await?;
    Ok(serde_json::json!({ "event": event }))
}

async fn group_stop(daemon: &Daemon, args: serde_json::Value, as_actor: Option<&str>) -> Result<serde_json::Value> {
    let args: GroupIdArgs = args_of(args)?;
    authorize(daemon, &args.group_id, as_actor, None, Action::GroupStop)?;
    let event = daemon.commit(&args.group_id, EventKind::GroupStop, by_of(as_actor), serde_json::json!({})).await?;
    Ok(serde_json::json!({ "event": event }))
}

#[derive(Deserialize)]
struct GroupSetStateArgs {
    group_id: String,
    state: String,
}

async fn group_set_state(daemon: &Daemon, args: serde_json::Value, as_actor: Option<&str>) -> Result<serde_json::Value> {
    let args: GroupSetStateArgs = args_of(args)?;
    authorize(daemon, &args.group_id, as_actor, None, Action::GroupSetState)?;

    let was_paused = daemon.kernel.with_projection(&args.group_id, |p| p.group.state)? == crate::contracts::GroupState::Paused;
    let event = daemon
        .commit(&args.group_id, EventKind::GroupSetState, by_of(as_actor), serde_json::json!({ "state": args.state }))
        .await?;

    if was_paused && args.state != "paused" {
        daemon.delivery.drain_paused_backlog(&args.group_id).await?;
    }
    Ok(serde_json::json!({ "event": event }))
}

#[derive(Deserialize)]
struct ScopeAttachArgs {
    group_id: String,
    scope_key: String,
    path: String,
}

async fn group_attach(daemon: &Daemon, args: serde_json::Value, as_actor: Option<&str>) -> Result<serde_json::Value> {
    let args: ScopeAttachArgs = args_of(args)?;
    authorize(daemon, &args.group_id, as_actor, None, Action::ContextUpdate)?;

    let already = daemon.kernel.with_projection(&args.group_id, |p| p.group.scopes.iter().any(|s| s.scope_key == args.scope_key))?;
    if already {
        return Err(CcccError::ScopeAlreadyAttached { scope_key: args.scope_key });
    }

    let event = daemon
        .commit(
            &args.group_id,
            EventKind::GroupAttach,
            by_of(as_actor),
            serde_json::json!({ "scope_key": args.scope_key, "path": args.path }),
        )
        .await?;
    Ok(serde_json::json!({ "event": event }))
}

#[derive(Deserialize)]
struct ScopeDetachArgs {
    group_id: String,
    scope_key: String,
}

async fn group_detach(daemon: &Daemon, args: serde_json::Value, as_actor: Option<&str>) -> Result<serde_json::Value> {
    let args: ScopeDetachArgs = args_of(args)?;
    authorize(daemon, &args.group_id, as_actor, None, Action::ContextUpdate)?;
    let event = daemon
        .commit(&args.group_id, EventKind::GroupDetach, by_of(as_actor), serde_json::json!({ "scope_key": args.scope_key }))
        .await?;
    Ok(serde_json::json!({ "event": event }))
}

// ---- Actor CRUD & lifecycle -------------------------------------------

#[derive(Deserialize)]
struct ActorAddArgs {
    group_id: String,
    actor_id: String,
    runtime: String,
    #[serde(default = "default_runner")]
    runner: String,
    #[serde(default)]
    command: Vec<String>,
    #[serde(default)]
    profile: Option<String>,
}

fn default_runner() -> String {
    "pty".to_string()
}

async fn actor_add(daemon: &Daemon, args: serde_json::Value, as_actor: Option<&str>) -> Result<serde_json::Value> {
    let args: ActorAddArgs = args_of(args)?;
    authorize(daemon, &args.group_id, as_actor, None, Action::ActorAdd)?;

    let mut data = serde_json::json!({
        "actor_id": args.actor_id,
        "runtime": args.runtime,
        "runner": args.runner,
        "command": args.command,
    });
    if let Some(profile) = &args.profile {
        data["profile"] = serde_json::json!(profile);
    }
    let event = daemon.commit(&args.group_id, EventKind::ActorAdd, by_of(as_actor), data).await?;
    Ok(serde_json::json!({ "event": event }))
}

#[derive(Deserialize)]
struct ActorUpdateArgs {
    group_id: String,
    actor_id: String,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    profile: Option<String>,
}

/// `actor.update` has no dedicated action in the permission matrix (spec
/// §4.2 only lists `actor_add|start|stop|restart|remove`); treated as
/// `actor_add`-gated since it's the same "who may shape this actor"
/// concern, and the closed permission set isn't meant to grow per field.
async fn actor_update(daemon: &Daemon, args: serde_json::Value, as_actor: Option<&str>) -> Result<serde_json::Value> {
    let args: ActorUpdateArgs = args_of(args)?;
    authorize(daemon, &args.group_id, as_actor, None, Action::ActorAdd)?;

    let mut data = serde_json::json!({ "actor_id": args.actor_id });
    if let Some(enabled) = args.enabled {
        data["enabled"] = serde_json::json!(enabled);
    }
    if let Some(profile) = &args.profile {
        data["profile"] = serde_json::json!(profile);
    }
    let event = daemon.commit(&args.group_id, EventKind::ActorUpdate, by_of(as_actor), data).await?;
    Ok(serde_json::json!({ "event": event }))
}

#[derive(Deserialize)]
struct ActorIdArgs {
    group_id: String,
    actor_id: String,
}

async fn fetch_actor(daemon: &Daemon, group_id: &str, actor_id: &str) -> Result<Actor> {
    daemon
        .kernel
        .with_projection(group_id, |p| p.actors.get(actor_id).cloned())?
        .ok_or_else(|| CcccError::no_such_actor(group_id, actor_id))
}

async fn actor_start(daemon: &Daemon, args: serde_json::Value, as_actor: Option<&str>) -> Result<serde_json::Value> {
    let args: ActorIdArgs = args_of(args)?;
    authorize(daemon, &args.group_id, as_actor, Some(&args.actor_id), Action::ActorStart)?;

    let actor = fetch_actor(daemon, &args.group_id, &args.actor_id).await?;
    if daemon.supervisor.lifecycle_of(&args.group_id, &args.actor_id).await == LifecycleState::Running {
        return Err(CcccError::ActorAlreadyRunning { actor_id: args.actor_id });
    }
    daemon.supervisor.start(&actor).await?;
    let event = daemon
        .commit(&args.group_id, EventKind::ActorStart, by_of(as_actor), serde_json::json!({ "actor_id": args.actor_id }))
        .await?;
    Ok(serde_json::json!({ "event": event }))
}

async fn actor_stop(daemon: &Daemon, args: serde_json::Value, as_actor: Option<&str>) -> Result<serde_json::Value> {
    let args: ActorIdArgs = args_of(args)?;
    authorize(daemon, &args.group_id, as_actor, Some(&args.actor_id), Action::ActorStop)?;

    daemon.supervisor.stop(&args.group_id, &args.actor_id).await?;
    let event = daemon
        .commit(&args.group_id, EventKind::ActorStop, by_of(as_actor), serde_json::json!({ "actor_id": args.actor_id }))
        .await?;
    Ok(serde_json::json!({ "event": event }))
}

async fn actor_restart(daemon: &Daemon, args: serde_json::Value, as_actor: Option<&str>) -> Result<serde_json::Value> {
    let args: ActorIdArgs = args_of(args)?;
    authorize(daemon, &args.group_id, as_actor, Some(&args.actor_id), Action::ActorRestart)?;

    let actor = fetch_actor(daemon, &args.group_id, &args.actor_id).await?;
    daemon.supervisor.restart(&actor).await?;
    let event = daemon
        .commit(&args.group_id, EventKind::ActorRestart, by_of(as_actor), serde_json::json!({ "actor_id": args.actor_id }))
        .await?;
    Ok(serde_json::json!({ "event": event }))
}

async fn actor_remove(daemon: &Daemon, args: serde_json::Value, as_actor: Option<&str>) -> Result<serde_json::Value> {
    let args: ActorIdArgs = args_of(args)?;
    authorize(daemon, &args.group_id, as_actor, Some(&args.actor_id), Action::ActorRemove)?;

    if daemon.supervisor.lifecycle_of(&args.group_id, &args.actor_id).await == LifecycleState::Running {
        daemon.supervisor.stop(&args.group_id, &args.actor_id).await?;
    }
    let event = daemon
        .commit(&args.group_id, EventKind::ActorRemove, by_of(as_actor), serde_json::json!({ "actor_id": args.actor_id }))
        .await?;
    Ok(serde_json::json!({ "event": event }))
}

#[derive(Deserialize)]
struct ActorPollArgs {
    group_id: String,
    actor_id: String,
    #[serde(default)]
    status: Option<String>,
}

fn parse_headless_status(raw: &str) -> Result<HeadlessStatus> {
    match raw {
        "online" => Ok(HeadlessStatus::Online),
        "busy" => Ok(HeadlessStatus::Busy),
        "offline" => Ok(HeadlessStatus::Offline),
        other => Err(CcccError::invalid_payload(format!("unknown poll status `{other}`"))),
    }
}

/// A headless actor's heartbeat (spec §4.3 liveness tracking). Gated as
/// `actor_poll`, a self-lifecycle action, so a peer can only report its
/// own liveness, not another actor's.
async fn actor_poll(daemon: &Daemon, args: serde_json::Value, as_actor: Option<&str>) -> Result<serde_json::Value> {
    let args: ActorPollArgs = args_of(args)?;
    authorize(daemon, &args.group_id, as_actor, Some(&args.actor_id), Action::ActorPoll)?;

    let status = match &args.status {
        Some(raw) => parse_headless_status(raw)?,
        None => HeadlessStatus::Online,
    };
    daemon.supervisor.record_headless_poll(&args.group_id, &args.actor_id, status).await?;
    Ok(serde_json::json!({ "actor_id": args.actor_id, "status": args.status.unwrap_or_else(|| "online".to_string()) }))
}

// ---- Ledger search/window ---------------------------------------------

#[derive(Deserialize, Default)]
struct LedgerSearchArgs {
    group_id: String,
    #[serde(default)]
    kinds: Option<Vec<String>>,
    #[serde(default)]
    since_id: Option<u64>,
    #[serde(default)]
    until_id: Option<u64>,
    #[serde(default)]
    center_event_id: Option<u64>,
    #[serde(default)]
    before: Option<usize>,
    #[serde(default)]
    after: Option<usize>,
    #[serde(default)]
    contains: Option<String>,
}

async fn ledger_search(daemon: &Daemon, args: serde_json::Value) -> Result<serde_json::Value> {
    let args: LedgerSearchArgs = args_of(args)?;

    let mut filter = ReadFilter::default();
    if let Some(kinds) = args.kinds {
        filter.kinds = Some(kinds.iter().map(|k| parse_event_kind(k)).collect());
    }
    filter.since_id = args.since_id;
    filter.until_id = args.until_id;
    filter.contains = args.contains;
    if let Some(event_id) = args.center_event_id {
        filter.center = Some(crate::ledger::filter::CenterWindow {
            event_id,
            before: args.before.unwrap_or(20),
            after: args.after.unwrap_or(20),
        });
    }

    let result = daemon.ledger.read(&args.group_id, &filter)?;
    Ok(serde_json::json!({
        "events": result.events,
        "more_before": result.more_before,
        "more_after": result.more_after,
    }))
}

fn parse_event_kind(raw: &str) -> EventKind {
    serde_json::from_value(serde_json::json!(raw)).unwrap_or(EventKind::Unknown)
}

#[derive(Deserialize)]
struct LedgerCompactArgs {
    group_id: String,
    up_to_event: u64,
}

/// Truncates ledger history before `up_to_event` into one synthetic
/// `snapshot` event (spec §4.1). The in-memory projection already holds
/// the full history incrementally and needs no rebuild: compaction only
/// rewrites the on-disk file, not projection semantics.
async fn ledger_compact(daemon: &Daemon, args: serde_json::Value, as_actor: Option<&str>) -> Result<serde_json::Value> {
    let args: LedgerCompactArgs = args_of(args)?;
    authorize(daemon, &args.group_id, as_actor, None, Action::LedgerCompact)?;

    daemon.kernel.ensure_loaded(&args.group_id)?;
    let projection = daemon.kernel.with_projection(&args.group_id, |p| {
        serde_json::json!({
            "group": p.group,
            "actors": p.actors,
            "last_event_id": p.last_event_id,
            "unknown_kinds_skipped": p.unknown_kinds_skipped,
        })
    })?;
    daemon.ledger.compact(&args.group_id, args.up_to_event, projection).await?;
    Ok(serde_json::json!({ "group_id": args.group_id, "compacted_up_to": args.up_to_event }))
}

// ---- Inbox -------------------------------------------------------------

#[derive(Deserialize)]
struct InboxListArgs {
    group_id: String,
    principal: String,
}

async fn inbox_list(daemon: &Daemon, args: serde_json::Value) -> Result<serde_json::Value> {
    let args: InboxListArgs = args_of(args)?;
    let events = daemon.kernel.inbox(&args.group_id, &args.principal)?;
    Ok(serde_json::json!({ "events": events }))
}

#[derive(Deserialize)]
struct InboxMarkReadArgs {
    group_id: String,
    principal: String,
    up_to_id: String,
}

async fn inbox_mark_read(daemon: &Daemon, args: serde_json::Value, as_actor: Option<&str>) -> Result<serde_json::Value> {
    let args: InboxMarkReadArgs = args_of(args)?;
    authorize(daemon, &args.group_id, as_actor, Some(&args.principal), Action::InboxMarkRead)?;
    let event = daemon
        .commit(&args.group_id, EventKind::ChatRead, &args.principal, serde_json::json!({ "up_to": args.up_to_id }))
        .await?;
    Ok(serde_json::json!({ "event": event }))
}

// ---- Messages -----------------------------------------------------------

#[derive(Deserialize)]
struct SendMessageArgs {
    group_id: String,
    text: String,
    #[serde(default)]
    format: MessageFormat,
    #[serde(default)]
    to: Vec<String>,
    #[serde(default)]
    reply_to: Option<String>,
    #[serde(default)]
    quote_text: Option<String>,
    #[serde(default)]
    attachments: Vec<crate::contracts::BlobRef>,
    #[serde(default)]
    priority: Priority,
    #[serde(default)]
    reply_required: bool,
}

fn by_of(as_actor: Option<&str>) -> &str {
    as_actor.unwrap_or("user")
}

async fn message_send(daemon: &Daemon, args: serde_json::Value, as_actor: Option<&str>) -> Result<serde_json::Value> {
    let args: SendMessageArgs = args_of(args)?;
    authorize(daemon, &args.group_id, as_actor, None, Action::MessageSend)?;

    let message = ChatMessage {
        text: args.text,
        format: args.format,
        to: args.to.iter().map(|t| Recipient::parse(t)).collect(),
        reply_to: args.reply_to,
        quote_text: args.quote_text,
        attachments: args.attachments,
        priority: args.priority,
        reply_required: args.reply_required,
    };

    // `Daemon::commit` already runs the event through `delivery.on_commit`;
    // calling it again here would double-fan-out this message.
    let event = daemon
        .commit(&args.group_id, EventKind::ChatMessage, by_of(as_actor), serde_json::to_value(&message)?)
        .await?;
    Ok(serde_json::json!({ "event": event }))
}

async fn message_reply(daemon: &Daemon, mut args: serde_json::Value, as_actor: Option<&str>) -> Result<serde_json::Value> {
    let reply_to = require_str(&args, "reply_to")?;
    if let Some(obj) = args.as_object_mut() {
        obj.insert("reply_to".to_string(), serde_json::json!(reply_to));
    }
    message_send(daemon, args, as_actor).await
}

#[derive(Deserialize)]
struct MessageAckArgs {
    group_id: String,
    event_id: String,
}

async fn message_ack(daemon: &Daemon, args: serde_json::Value, as_actor: Option<&str>) -> Result<serde_json::Value> {
    let args: MessageAckArgs = args_of(args)?;
    authorize(daemon, &args.group_id, as_actor, None, Action::MessageAck)?;
    let event = daemon
        .commit(&args.group_id, EventKind::ChatAck, by_of(as_actor), serde_json::json!({ "event_id": args.event_id }))
        .await?;
    Ok(serde_json::json!({ "event": event }))
}

// ---- Context batch ops --------------------------------------------------

#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ContextOp {
    Attach { scope_key: String, path: String },
    Detach { scope_key: String },
    SetTopic { topic: String },
}

#[derive(Deserialize)]
struct ContextBatchArgs {
    group_id: String,
    ops: Vec<ContextOp>,
}

/// Applies each sub-op as its own ledger commit under one permission
/// check (spec §4.2 `context_update`). The ledger has no multi-event
/// transaction primitive (spec §2: "appends one or more events"), so a
/// failure partway leaves earlier sub-ops committed; the response lists
/// every event actually appended so the caller can see how far it got.
async fn context_batch_update(daemon: &Daemon, args: serde_json::Value, as_actor: Option<&str>) -> Result<serde_json::Value> {
    let args: ContextBatchArgs = args_of(args)?;
    authorize(daemon, &args.group_id, as_actor, None, Action::ContextUpdate)?;

    let mut events = Vec::with_capacity(args.ops.len());
    for op in args.ops {
        let event = match op {
            ContextOp::Attach { scope_key, path } => {
                let already = daemon.kernel.with_projection(&args.group_id, |p| p.group.scopes.iter().any(|s| s.scope_key == scope_key))?;
                if already {
                    return Err(CcccError::ScopeAlreadyAttached { scope_key });
                }
                daemon
                    .commit(&args.group_id, EventKind::GroupAttach, by_of(as_actor), serde_json::json!({ "scope_key": scope_key, "path": path }))
                    .await?
            }
            ContextOp::Detach { scope_key } => {
                daemon
                    .commit(&args.group_id, EventKind::GroupDetach, by_of(as_actor), serde_json::json!({ "scope_key": scope_key }))
                    .await?
            }
            ContextOp::SetTopic { topic } => {
                daemon.commit(&args.group_id, EventKind::GroupUpdate, by_of(as_actor), serde_json::json!({ "topic": topic })).await?
            }
        };
        events.push(event);
    }
    Ok(serde_json::json!({ "events": events }))
}

// ---- Settings -----------------------------------------------------------

fn load_settings(daemon: &Daemon, group_id: &str) -> GroupSettings {
    GroupSettings::load(&daemon.runtime_home.group_settings_path(group_id)).ok().flatten().unwrap_or_else(|| GroupSettings::new(group_id))
}

async fn settings_read(daemon: &Daemon, args: serde_json::Value) -> Result<serde_json::Value> {
    let args: GroupIdArgs = args_of(args)?;
    let settings = load_settings(daemon, &args.group_id);
    Ok(serde_json::to_value(&settings)?)
}

async fn settings_update(daemon: &Daemon, args: serde_json::Value, as_actor: Option<&str>) -> Result<serde_json::Value> {
    let group_id = require_str(&args, "group_id")?;
    authorize(daemon, &group_id, as_actor, None, Action::GroupSettingsUpdate)?;

    let mut settings = load_settings(daemon, &group_id);
    let patch = args.get("settings").cloned().unwrap_or(serde_json::json!({}));
    merge_settings_patch(&mut settings, &patch)?;
    settings.save(&daemon.runtime_home.group_settings_path(&group_id))?;

    let event = daemon.commit(&group_id, EventKind::GroupSettingsUpdate, by_of(as_actor), patch).await?;
    Ok(serde_json::json!({ "event": event, "settings": settings }))
}

/// Applies a partial `GroupSettings` patch by re-serializing the current
/// settings to a JSON object, overlaying the patch's top-level keys, and
/// deserializing back — the same shape-preserving merge the teacher's
/// config layer uses for `extra` round-tripping, generalized to whole
/// top-level fields rather than just unknown ones.
fn merge_settings_patch(settings: &mut GroupSettings, patch: &serde_json::Value) -> Result<()> {
    let mut current = serde_json::to_value(&*settings)?;
    if let (Some(current_obj), Some(patch_obj)) = (current.as_object_mut(), patch.as_object()) {
        for (key, value) in patch_obj {
            current_obj.insert(key.clone(), value.clone());
        }
    }
    *settings = serde_json::from_value(current)?;
    Ok(())
}

#[derive(Deserialize)]
struct GroupImportBlueprintArgs {
    group_id: String,
    blueprint: Blueprint,
}

/// Produces a `Blueprint` (spec Glossary) from the group's live settings
/// for `group.import_blueprint` to reapply elsewhere, excluding ledger
/// history and actor secrets.
async fn group_export_blueprint(daemon: &Daemon, args: serde_json::Value) -> Result<serde_json::Value> {
    let args: GroupIdArgs = args_of(args)?;
    let settings = load_settings(daemon, &args.group_id);
    Ok(serde_json::to_value(Blueprint::from_settings(&settings))?)
}

/// Applies an exported blueprint's actor roster, delivery/nudge/transcript
/// settings, and automation ruleset to a group, adding only the actors
/// not already present (spec §8: `export_blueprint → import_blueprint`
/// on a fresh group reproduces the original configuration).
async fn group_import_blueprint(daemon: &Daemon, args: serde_json::Value, as_actor: Option<&str>) -> Result<serde_json::Value> {
    let args: GroupImportBlueprintArgs = args_of(args)?;
    authorize(daemon, &args.group_id, as_actor, None, Action::GroupImportBlueprint)?;

    let existing_ids = daemon.kernel.with_projection(&args.group_id, |p| p.actor_order.clone())?;
    let mut actors_added = Vec::new();
    for actor in &args.blueprint.actors {
        if existing_ids.contains(&actor.actor_id) {
            continue;
        }
        let runner = match actor.runner {
            RunnerKind::Pty => "pty",
            RunnerKind::Headless => "headless",
        };
        let mut data = serde_json::json!({
            "actor_id": actor.actor_id,
            "runtime": actor.runtime.as_str(),
            "runner": runner,
            "command": actor.command,
        });
        if let Some(profile) = &actor.profile {
            data["profile"] = serde_json::json!(profile);
        }
        actors_added.push(daemon.commit(&args.group_id, EventKind::ActorAdd, by_of(as_actor), data).await?);
    }

    let mut settings = load_settings(daemon, &args.group_id);
    settings.title = args.blueprint.title.clone();
    settings.topic = args.blueprint.topic.clone();
    settings.delivery = args.blueprint.delivery.clone();
    settings.nudges = args.blueprint.nudges.clone();
    settings.transcript = args.blueprint.transcript.clone();
    settings.save(&daemon.runtime_home.group_settings_path(&args.group_id))?;
    let settings_event = daemon
        .commit(
            &args.group_id,
            EventKind::GroupSettingsUpdate,
            by_of(as_actor),
            serde_json::json!({
                "title": args.blueprint.title,
                "topic": args.blueprint.topic,
                "delivery": args.blueprint.delivery,
                "nudges": args.blueprint.nudges,
                "transcript": args.blueprint.transcript,
            }),
        )
        .await?;

    let current_version = load_settings(daemon, &args.group_id).automation.version;
    let updated_automation =
        daemon.delivery.update_automation(&args.group_id, args.blueprint.automation.clone(), current_version).await?;
    let automation_event = daemon
        .commit(
            &args.group_id,
            EventKind::GroupAutomationUpdate,
            by_of(as_actor),
            serde_json::json!({ "version": updated_automation.version }),
        )
        .await?;

    Ok(serde_json::json!({
        "actors_added": actors_added,
        "settings_event": settings_event,
        "automation_event": automation_event,
    }))
}

// ---- Automation ----------------------------------------------------------

async fn automation_read(daemon: &Daemon, args: serde_json::Value) -> Result<serde_json::Value> {
    let args: GroupIdArgs = args_of(args)?;
    let settings = load_settings(daemon, &args.group_id);
    Ok(serde_json::to_value(&settings.automation)?)
}

#[derive(Deserialize)]
struct AutomationUpdateArgs {
    group_id: String,
    ruleset: AutomationRuleset,
    expected_version: u64,
}

async fn automation_update(daemon: &Daemon, args: serde_json::Value, as_actor: Option<&str>) -> Result<serde_json::Value> {
    let args: AutomationUpdateArgs = args_of(args)?;
    authorize(daemon, &args.group_id, as_actor, None, Action::GroupAutomationUpdate)?;

    let updated = daemon.delivery.update_automation(&args.group_id, args.ruleset, args.expected_version).await?;
    daemon
        .commit(
            &args.group_id,
            EventKind::GroupAutomationUpdate,
            by_of(as_actor),
            serde_json::json!({ "version": updated.version }),
        )
        .await?;
    Ok(serde_json::to_value(&updated)?)
}

async fn automation_reset(daemon: &Daemon, args: serde_json::Value, as_actor: Option<&str>) -> Result<serde_json::Value> {
    let args: GroupIdArgs = args_of(args)?;
    authorize(daemon, &args.group_id, as_actor, None, Action::GroupAutomationUpdate)?;

    let current_version = load_settings(daemon, &args.group_id).automation.version;
    let empty = AutomationRuleset { version: current_version, rules: Vec::new() };
    let updated = daemon.delivery.update_automation(&args.group_id, empty, current_version).await?;
    daemon
        .commit(&args.group_id, EventKind::GroupAutomationUpdate, by_of(as_actor), serde_json::json!({ "version": updated.version, "reset": true }))
        .await?;
    Ok(serde_json::to_value(&updated)?)
}

// ---- IM config ------------------------------------------------------------

async fn im_config_get(daemon: &Daemon, args: serde_json::Value) -> Result<serde_json::Value> {
    let args: GroupIdArgs = args_of(args)?;
    let im_binding = daemon.kernel.with_projection(&args.group_id, |p| p.group.im_binding.clone())?;
    Ok(serde_json::json!({ "im_binding": im_binding }))
}

#[derive(Deserialize)]
struct ImConfigSetArgs {
    group_id: String,
    im_binding: String,
}

async fn im_config_set(daemon: &Daemon, args: serde_json::Value, as_actor: Option<&str>) -> Result<serde_json::Value> {
    let args: ImConfigSetArgs = args_of(args)?;
    authorize(daemon, &args.group_id, as_actor, None, Action::GroupSettingsUpdate)?;
    let event = daemon
        .commit(&args.group_id, EventKind::GroupUpdate, by_of(as_actor), serde_json::json!({ "im_binding": args.im_binding }))
        .await?;
    Ok(serde_json::json!({ "event": event }))
}

async fn im_config_unset(daemon: &Daemon, args: serde_json::Value, as_actor: Option<&str>) -> Result<serde_json::Value> {
    let args: GroupIdArgs = args_of(args)?;
    authorize(daemon, &args.group_id, as_actor, None, Action::GroupSettingsUpdate)?;
    let event = daemon
        .commit(&args.group_id, EventKind::GroupUpdate, by_of(as_actor), serde_json::json!({ "clear_im_binding": true }))
        .await?;
    Ok(serde_json::json!({ "event": event }))
}

// ---- Runtime / terminal / debug --------------------------------------------

fn runtime_list() -> Result<serde_json::Value> {
    let runtimes = [RuntimeKind::Claude, RuntimeKind::Codex];
    let entries: Vec<serde_json::Value> = runtimes
        .iter()
        .map(|r| {
            let descriptor = crate::runner::descriptor_for(r);
            serde_json::json!({
                "runtime": r.as_str(),
                "default_command": descriptor.default_command,
            })
        })
        .collect();
    Ok(serde_json::json!({ "runtimes": entries, "custom_supported": true }))
}

#[derive(Deserialize)]
struct TerminalTailArgs {
    group_id: String,
    actor_id: String,
    #[serde(default = "default_tail_lines")]
    lines: usize,
}

fn default_tail_lines() -> usize {
    48
}

async fn terminal_tail(daemon: &Daemon, args: serde_json::Value) -> Result<serde_json::Value> {
    let args: TerminalTailArgs = args_of(args)?;
    let tail = daemon.supervisor.transcript_tail(&args.group_id, &args.actor_id, args.lines).await?;
    Ok(serde_json::json!({ "tail": tail }))
}

async fn debug_snapshot(daemon: &Daemon, args: serde_json::Value) -> Result<serde_json::Value> {
    let args: GroupIdArgs = args_of(args)?;
    daemon.kernel.ensure_loaded(&args.group_id)?;
    let foreman_ok = daemon.kernel.foreman_invariant_holds(&args.group_id)?;
    let snapshot = daemon.kernel.with_projection(&args.group_id, |p| {
        serde_json::json!({
            "group": p.group,
            "actors": p.actors,
            "last_event_id": p.last_event_id,
            "unknown_kinds_skipped": p.unknown_kinds_skipped,
            "obligations_outstanding": p.obligations.iter().filter(|(_, o)| !o.is_fully_satisfied()).count(),
        })
    })?;
    Ok(serde_json::json!({ "foreman_invariant_holds": foreman_ok, "projection": snapshot }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::global::GlobalConfig;
    use crate::runtime_home::RuntimeHome;

    fn temp_daemon() -> Daemon {
        let home = RuntimeHome::at(std::env::temp_dir().join(format!("cccc-test-ops-{}", uuid::Uuid::new_v4())));
        Daemon::new(home, GlobalConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn group_create_then_actor_add_promotes_foreman() {
        let daemon = temp_daemon();
        dispatch(&daemon, "group.create", serde_json::json!({ "group_id": "g1", "title": "Room" }), None).await.unwrap();
        dispatch(
            &daemon,
            "actor.add",
            serde_json::json!({ "group_id": "g1", "actor_id": "a1", "runtime": "claude", "runner": "headless", "command": [] }),
            None,
        )
        .await
        .unwrap();

        let foreman = daemon.kernel.with_projection("g1", |p| p.foreman_id().map(String::from)).unwrap();
        assert_eq!(foreman.as_deref(), Some("a1"));

        let _ = std::fs::remove_dir_all(daemon.runtime_home.root());
    }

    #[tokio::test]
    async fn peer_acting_on_another_actor_is_denied() {
        let daemon = temp_daemon();
        dispatch(&daemon, "group.create", serde_json::json!({ "group_id": "g1", "title": "Room" }), None).await.unwrap();
        dispatch(
            &daemon,
            "actor.add",
            serde_json::json!({ "group_id": "g1", "actor_id": "a1", "runtime": "claude", "runner": "headless", "command": [] }),
            None,
        )
        .await
        .unwrap();
        dispatch(
            &daemon,
            "actor.add",
            serde_json::json!({ "group_id": "g1", "actor_id": "a2", "runtime": "claude", "runner": "headless", "command": [] }),
            None,
        )
        .await
        .unwrap();

        let err = dispatch(&daemon, "actor.stop", serde_json::json!({ "group_id": "g1", "actor_id": "a1" }), Some("a2"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "permission_denied");

        let _ = std::fs::remove_dir_all(daemon.runtime_home.root());
    }

    #[tokio::test]
    async fn message_send_then_inbox_list_returns_it() {
        let daemon = temp_daemon();
        dispatch(&daemon, "group.create", serde_json::json!({ "group_id": "g1", "title": "Room" }), None).await.unwrap();
        dispatch(
            &daemon,
            "actor.add",
            serde_json::json!({ "group_id": "g1", "actor_id": "a1", "runtime": "claude", "runner": "headless", "command": [] }),
            None,
        )
        .await
        .unwrap();
        dispatch(
            &daemon,
            "message.send",
            serde_json::json!({ "group_id": "g1", "text": "hi a1", "to": ["a1"] }),
            None,
        )
        .await
        .unwrap();

        let inbox = dispatch(&daemon, "inbox.list", serde_json::json!({ "group_id": "g1", "principal": "a1" }), None).await.unwrap();
        assert_eq!(inbox["events"].as_array().unwrap().len(), 1);

        let _ = std::fs::remove_dir_all(daemon.runtime_home.root());
    }

    #[tokio::test]
    async fn unknown_op_is_rejected() {
        let daemon = temp_daemon();
        let err = dispatch(&daemon, "group.frobnicate", serde_json::json!({}), None).await.unwrap_err();
        assert_eq!(err.code(), "unknown_op");
        let _ = std::fs::remove_dir_all(daemon.runtime_home.root());
    }

    #[tokio::test]
    async fn exported_blueprint_reproduces_actors_and_settings_on_import() {
        let source = temp_daemon();
        dispatch(&source, "group.create", serde_json::json!({ "group_id": "g1", "title": "Sprint Room" }), None).await.unwrap();
        dispatch(
            &source,
            "actor.add",
            serde_json::json!({ "group_id": "g1", "actor_id": "a1", "runtime": "claude", "runner": "headless", "command": [] }),
            None,
        )
        .await
        .unwrap();
        dispatch(
            &source,
            "settings.update",
            serde_json::json!({ "group_id": "g1", "settings": { "topic": "ship it" } }),
            None,
        )
        .await
        .unwrap();

        let exported = dispatch(&source, "group.export_blueprint", serde_json::json!({ "group_id": "g1" }), None).await.unwrap();
        assert!(exported.get("env").is_none());

        let target = temp_daemon();
        dispatch(&target, "group.create", serde_json::json!({ "group_id": "g2", "title": "Empty Room" }), None).await.unwrap();
        dispatch(&target, "group.import_blueprint", serde_json::json!({ "group_id": "g2", "blueprint": exported }), None)
            .await
            .unwrap();

        let settings = dispatch(&target, "settings.read", serde_json::json!({ "group_id": "g2" }), None).await.unwrap();
        assert_eq!(settings["title"], "Sprint Room");
        assert_eq!(settings["topic"], "ship it");
        let foreman = target.kernel.with_projection("g2", |p| p.foreman_id().map(String::from)).unwrap();
        assert_eq!(foreman.as_deref(), Some("a1"));

        let _ = std::fs::remove_dir_all(source.runtime_home.root());
        let _ = std::fs::remove_dir_all(target.runtime_home.root());
    }

    #[tokio::test]
    async fn unknown_recipient_surfaces_a_system_notify_without_failing_the_send() {
        let daemon = temp_daemon();
        dispatch(&daemon, "group.create", serde_json::json!({ "group_id": "g1", "title": "Room" }), None).await.unwrap();
        dispatch(
            &daemon,
            "actor.add",
            serde_json::json!({ "group_id": "g1", "actor_id": "a1", "runtime": "claude", "runner": "headless", "command": [] }),
            None,
        )
        .await
        .unwrap();

        dispatch(&daemon, "message.send", serde_json::json!({ "group_id": "g1", "text": "hi", "to": ["ghost"] }), None)
            .await
            .unwrap();

        let events = dispatch(&daemon, "ledger.search", serde_json::json!({ "group_id": "g1" }), None).await.unwrap();
        let has_notify = events["events"]
            .as_array()
            .unwrap()
            .iter()
            .any(|e| e["kind"] == "system.notify" && e["data"]["reasons"][0].as_str().unwrap_or("").starts_with("unknown_recipient"));
        assert!(has_notify);

        let _ = std::fs::remove_dir_all(daemon.runtime_home.root());
    }

    #[tokio::test]
    async fn actor_poll_is_observable_via_terminal_actors_and_rejects_wrong_principal() {
        let daemon = temp_daemon();
        dispatch(&daemon, "group.create", serde_json::json!({ "group_id": "g1", "title": "Room" }), None).await.unwrap();
        dispatch(
            &daemon,
            "actor.add",
            serde_json::json!({ "group_id": "g1", "actor_id": "a1", "runtime": "claude", "runner": "headless", "command": [] }),
            None,
        )
        .await
        .unwrap();
        dispatch(&daemon, "actor.start", serde_json::json!({ "group_id": "g1", "actor_id": "a1" }), None).await.unwrap();

        dispatch(&daemon, "actor.poll", serde_json::json!({ "group_id": "g1", "actor_id": "a1", "status": "online" }), Some("a1"))
            .await
            .unwrap();
        assert_eq!(daemon.supervisor.headless_status("g1", "a1").await, Some(HeadlessStatus::Online));

        let err = dispatch(&daemon, "actor.poll", serde_json::json!({ "group_id": "g1", "actor_id": "a1" }), Some("other"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "permission_denied");

        let _ = std::fs::remove_dir_all(daemon.runtime_home.root());
    }

    #[tokio::test]
    async fn ledger_compact_collapses_history_into_one_snapshot() {
        let daemon = temp_daemon();
        dispatch(&daemon, "group.create", serde_json::json!({ "group_id": "g1", "title": "Room" }), None).await.unwrap();
        dispatch(
            &daemon,
            "actor.add",
            serde_json::json!({ "group_id": "g1", "actor_id": "a1", "runtime": "claude", "runner": "headless", "command": [] }),
            None,
        )
        .await
        .unwrap();
        let before = daemon.ledger.read_all("g1").unwrap();
        let up_to = before.last().unwrap().numeric_id();

        dispatch(&daemon, "ledger.compact", serde_json::json!({ "group_id": "g1", "up_to_event": up_to }), None).await.unwrap();

        let after = daemon.ledger.read_all("g1").unwrap();
        assert!(after.len() < before.len());
        assert_eq!(after[0].kind, EventKind::Snapshot);

        let _ = std::fs::remove_dir_all(daemon.runtime_home.root());
    }

    #[tokio::test]
    async fn automation_update_rejects_stale_version() {
        let daemon = temp_daemon();
        dispatch(&daemon, "group.create", serde_json::json!({ "group_id": "g1", "title": "Room" }), None).await.unwrap();
        daemon.delivery.ensure_group("g1").await;

        let err = dispatch(
            &daemon,
            "automation.update",
            serde_json::json!({ "group_id": "g1", "expected_version": 5, "ruleset": { "version": 5, "rules": [] } }),
            None,
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "version_conflict");

        let _ = std::fs::remove_dir_all(daemon.runtime_home.root());
    }
}
