//! Group and Scope contracts (spec §3).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GroupState {
    Active,
    Idle,
    Paused,
    Stopped,
}

impl Default for GroupState {
    fn default() -> Self {
        Self::Active
    }
}

impl std::fmt::Display for GroupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scope {
    pub scope_key: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    pub group_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default)]
    pub state: GroupState,
    #[serde(default)]
    pub scopes: Vec<Scope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub im_binding: Option<String>,
}

impl Group {
    pub fn new(group_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            title: title.into(),
            topic: None,
            state: GroupState::Active,
            scopes: Vec::new(),
            im_binding: None,
        }
    }
}
