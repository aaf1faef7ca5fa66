//! CLI surface for `cccc`. Grounded on the teacher's `cli::Cli`/`Commands`
//! (a `clap::Parser` root struct plus a `Subcommand` enum, dispatched in
//! `main` by matching on `cli.command`), generalized from a single flat
//! command list to namespaced subcommands mirroring the IPC operation
//! set (spec §4.5) — `daemon` drives the process directly; everything
//! else is a thin client over the IPC socket.

use clap::{Args, Parser, Subcommand};

pub mod client;
pub mod daemon;

#[derive(Parser)]
#[command(name = "cccc")]
#[command(about = "Local-first collaboration daemon for autonomous coding agents")]
#[command(version)]
pub struct Cli {
    /// Lower the default log filter to debug for both `cccc` and `cccc_core`.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run, start (detached), or stop the daemon process.
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
    /// Group lifecycle and settings.
    Group {
        #[command(subcommand)]
        action: GroupAction,
    },
    /// Actor CRUD and lifecycle within a group.
    Actor {
        #[command(subcommand)]
        action: ActorAction,
    },
    /// Send, reply to, or acknowledge chat messages.
    Message {
        #[command(subcommand)]
        action: MessageAction,
    },
    /// Per-principal inbox.
    Inbox {
        #[command(subcommand)]
        action: InboxAction,
    },
    /// Ledger search/window queries.
    Ledger {
        #[command(subcommand)]
        action: LedgerAction,
    },
    /// Raw passthrough: send `{op, args}` to the daemon and print the result.
    /// Covers settings/automation/im/runtime/terminal/debug ops that don't
    /// have a dedicated ergonomic subcommand.
    Call {
        /// Dotted operation name, e.g. `settings.update`.
        op: String,
        /// JSON-encoded args object.
        #[arg(default_value = "{}")]
        args: String,
        /// Act as this actor rather than the `user` principal.
        #[arg(long)]
        as_actor: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum DaemonAction {
    /// Run the daemon in the foreground (blocks until ctrl-c).
    Run,
    /// Spawn the daemon detached and return immediately.
    Start,
    /// Signal a running daemon to stop via its pid file.
    Stop,
}

#[derive(Subcommand)]
pub enum GroupAction {
    Create(GroupCreateArgs),
    Update(GroupUpdateArgs),
    Delete(GroupDeleteArgs),
    Start(GroupIdArgs),
    Stop(GroupIdArgs),
    SetState(GroupSetStateArgs),
    Attach(GroupAttachArgs),
    Detach(GroupDetachArgs),
}

#[derive(Args)]
pub struct GroupCreateArgs {
    pub group_id: String,
    pub title: String,
    #[arg(long)]
    pub topic: Option<String>,
}

#[derive(Args)]
pub struct GroupUpdateArgs {
    pub group_id: String,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub topic: Option<String>,
}

#[derive(Args)]
pub struct GroupDeleteArgs {
    pub group_id: String,
    /// Must equal `group_id` — delete is confirmed-by-id, not by flag.
    #[arg(long)]
    pub confirm: String,
}

#[derive(Args)]
pub struct GroupIdArgs {
    pub group_id: String,
}

#[derive(Args)]
pub struct GroupSetStateArgs {
    pub group_id: String,
    /// One of `active`, `idle`, `paused`, `stopped`.
    pub state: String,
}

#[derive(Args)]
pub struct GroupAttachArgs {
    pub group_id: String,
    pub scope_key: String,
    pub path: String,
}

#[derive(Args)]
pub struct GroupDetachArgs {
    pub group_id: String,
    pub scope_key: String,
}

#[derive(Subcommand)]
pub enum ActorAction {
    Add(ActorAddArgs),
    Start(ActorIdArgs),
    Stop(ActorIdArgs),
    Restart(ActorIdArgs),
    Remove(ActorIdArgs),
}

#[derive(Args)]
pub struct ActorAddArgs {
    pub group_id: String,
    pub actor_id: String,
    /// `claude`, `codex`, or a custom runtime name.
    pub runtime: String,
    #[arg(long, default_value = "pty")]
    pub runner: String,
    #[arg(long, num_args = 0..)]
    pub command: Vec<String>,
    #[arg(long)]
    pub profile: Option<String>,
}

#[derive(Args)]
pub struct ActorIdArgs {
    pub group_id: String,
    pub actor_id: String,
}

#[derive(Subcommand)]
pub enum MessageAction {
    Send(MessageSendArgs),
    Ack(MessageAckArgs),
}

#[derive(Args)]
pub struct MessageSendArgs {
    pub group_id: String,
    pub text: String,
    /// Recipient tokens: `user`, `@all`, `@peers`, `@foreman`, or an actor id.
    #[arg(long, num_args = 0..)]
    pub to: Vec<String>,
    #[arg(long)]
    pub reply_to: Option<String>,
    #[arg(long)]
    pub reply_required: bool,
    #[arg(long)]
    pub attention: bool,
    #[arg(long)]
    pub as_actor: Option<String>,
}

#[derive(Args)]
pub struct MessageAckArgs {
    pub group_id: String,
    pub event_id: String,
    #[arg(long)]
    pub as_actor: Option<String>,
}

#[derive(Subcommand)]
pub enum InboxAction {
    List(InboxListArgs),
    MarkRead(InboxMarkReadArgs),
}

#[derive(Args)]
pub struct InboxListArgs {
    pub group_id: String,
    pub principal: String,
}

#[derive(Args)]
pub struct InboxMarkReadArgs {
    pub group_id: String,
    pub principal: String,
    pub up_to_id: String,
}

#[derive(Subcommand)]
pub enum LedgerAction {
    Search(LedgerSearchArgs),
}

#[derive(Args)]
pub struct LedgerSearchArgs {
    pub group_id: String,
    #[arg(long)]
    pub since_id: Option<u64>,
    #[arg(long)]
    pub until_id: Option<u64>,
    #[arg(long)]
    pub contains: Option<String>,
}
