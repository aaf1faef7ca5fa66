//! Translates the ergonomic subcommands (`group`, `actor`, `message`,
//! `inbox`, `ledger`, `call`) into one IPC `request` each and prints the
//! JSON result. Every subcommand here is a fixed, known shape over the
//! same `IpcClient::request` the raw `call` passthrough exposes.

use super::{
    ActorAction, Commands, GroupAction, InboxAction, LedgerAction, MessageAction,
};
use crate::ipc_client::IpcClient;
use anyhow::Result;

pub async fn dispatch(command: Commands) -> Result<()> {
    let (op, args, as_actor) = match command {
        Commands::Daemon { .. } => unreachable!("daemon commands are handled in main before reaching the client"),

        Commands::Group { action } => match action {
            GroupAction::Create(a) => (
                "group.create",
                serde_json::json!({ "group_id": a.group_id, "title": a.title, "topic": a.topic }),
                None,
            ),
            GroupAction::Update(a) => (
                "group.update",
                serde_json::json!({ "group_id": a.group_id, "title": a.title, "topic": a.topic }),
                None,
            ),
            GroupAction::Delete(a) => (
                "group.delete",
                serde_json::json!({ "group_id": a.group_id, "confirm_group_id": a.confirm }),
                None,
            ),
            GroupAction::Start(a) => ("group.start", serde_json::json!({ "group_id": a.group_id }), None),
            GroupAction::Stop(a) => ("group.stop", serde_json::json!({ "group_id": a.group_id }), None),
            GroupAction::SetState(a) => (
                "group.set_state",
                serde_json::json!({ "group_id": a.group_id, "state": a.state }),
                None,
            ),
            GroupAction::Attach(a) => (
                "group.attach",
                serde_json::json!({ "group_id": a.group_id, "scope_key": a.scope_key, "path": a.path }),
                None,
            ),
            GroupAction::Detach(a) => (
                "group.detach",
                serde_json::json!({ "group_id": a.group_id, "scope_key": a.scope_key }),
                None,
            ),
        },

        Commands::Actor { action } => match action {
            ActorAction::Add(a) => (
                "actor.add",
                serde_json::json!({
                    "group_id": a.group_id, "actor_id": a.actor_id, "runtime": a.runtime,
                    "runner": a.runner, "command": a.command, "profile": a.profile,
                }),
                None,
            ),
            ActorAction::Start(a) => ("actor.start", serde_json::json!({ "group_id": a.group_id, "actor_id": a.actor_id }), None),
            ActorAction::Stop(a) => ("actor.stop", serde_json::json!({ "group_id": a.group_id, "actor_id": a.actor_id }), None),
            ActorAction::Restart(a) => ("actor.restart", serde_json::json!({ "group_id": a.group_id, "actor_id": a.actor_id }), None),
            ActorAction::Remove(a) => ("actor.remove", serde_json::json!({ "group_id": a.group_id, "actor_id": a.actor_id }), None),
        },

        Commands::Message { action } => match action {
            MessageAction::Send(a) => {
                let priority = if a.attention { "attention" } else { "normal" };
                let as_actor = a.as_actor.clone();
                (
                    "message.send",
                    serde_json::json!({
                        "group_id": a.group_id, "text": a.text, "to": a.to, "reply_to": a.reply_to,
                        "reply_required": a.reply_required, "priority": priority,
                    }),
                    as_actor,
                )
            }
            MessageAction::Ack(a) => {
                let as_actor = a.as_actor.clone();
                ("message.ack", serde_json::json!({ "group_id": a.group_id, "event_id": a.event_id }), as_actor)
            }
        },

        Commands::Inbox { action } => match action {
            InboxAction::List(a) => ("inbox.list", serde_json::json!({ "group_id": a.group_id, "principal": a.principal }), None),
            InboxAction::MarkRead(a) => (
                "inbox.mark_read",
                serde_json::json!({ "group_id": a.group_id, "principal": a.principal, "up_to_id": a.up_to_id }),
                None,
            ),
        },

        Commands::Ledger { action } => match action {
            LedgerAction::Search(a) => (
                "ledger.search",
                serde_json::json!({
                    "group_id": a.group_id, "since_id": a.since_id, "until_id": a.until_id, "contains": a.contains,
                }),
                None,
            ),
        },

        Commands::Call { op, args, as_actor } => {
            let parsed: serde_json::Value = serde_json::from_str(&args)?;
            return run(&op, parsed, as_actor).await;
        }
    };

    run(op, args, as_actor).await
}

async fn run(op: &str, args: serde_json::Value, as_actor: Option<String>) -> Result<()> {
    let mut client = IpcClient::connect().await?;
    let result = client.request(op, args, as_actor.as_deref()).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
