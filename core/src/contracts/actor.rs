//! Actor contract (spec §3, §4.3, §9 "closed tagged variant plus descriptor table").

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Foreman,
    Peer,
}

/// Symbolic runtime identity. `Custom` carries whatever string the operator
/// configured; known runtimes get their own descriptor table entry (see
/// `crate::runner::descriptor`) instead of dispatching through general
/// polymorphism (spec §9).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    Claude,
    Codex,
    Custom(String),
}

impl RuntimeKind {
    pub fn parse(name: &str) -> Self {
        match name {
            "claude" => Self::Claude,
            "codex" => Self::Codex,
            other => Self::Custom(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Custom(s) => s.as_str(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunnerKind {
    Pty,
    Headless,
}

/// Template of runtime + command + env an actor may link to, so adding a
/// new configuration is a table entry rather than bespoke code per actor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActorProfile {
    pub name: String,
    pub runtime: RuntimeKind,
    pub command: Vec<String>,
    #[serde(default)]
    pub env: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub group_id: String,
    pub actor_id: String,
    pub role: ActorRole,
    pub runtime: RuntimeKind,
    pub runner: RunnerKind,
    pub command: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub running: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Actor {
    pub fn is_foreman(&self) -> bool {
        matches!(self.role, ActorRole::Foreman)
    }
}
