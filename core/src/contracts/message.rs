//! `ChatMessage` event data (spec §3).

use super::blob::BlobRef;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageFormat {
    #[default]
    Plain,
    Markdown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Normal,
    Attention,
}

/// One `to[]` token. Empty `to[]` on the message means broadcast; that's
/// represented by an empty `Vec<Recipient>`, not a variant here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Recipient {
    User,
    All,
    Peers,
    Foreman,
    Actor(String),
}

impl Recipient {
    /// Parse a raw `to[]` string token, e.g. `"user"`, `"@all"`, `"@peers"`,
    /// `"@foreman"`, or a bare `actor_id`.
    pub fn parse(token: &str) -> Self {
        match token {
            "user" => Recipient::User,
            "@all" => Recipient::All,
            "@peers" => Recipient::Peers,
            "@foreman" => Recipient::Foreman,
            other => Recipient::Actor(other.to_string()),
        }
    }
}

impl std::fmt::Display for Recipient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Recipient::User => write!(f, "user"),
            Recipient::All => write!(f, "@all"),
            Recipient::Peers => write!(f, "@peers"),
            Recipient::Foreman => write!(f, "@foreman"),
            Recipient::Actor(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub text: String,
    #[serde(default)]
    pub format: MessageFormat,
    #[serde(default)]
    pub to: Vec<Recipient>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_text: Option<String>,
    #[serde(default)]
    pub attachments: Vec<BlobRef>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub reply_required: bool,
}

impl ChatMessage {
    pub fn broadcast(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: MessageFormat::Plain,
            to: Vec::new(),
            reply_to: None,
            quote_text: None,
            attachments: Vec::new(),
            priority: Priority::Normal,
            reply_required: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipient_parses_known_tokens() {
        assert_eq!(Recipient::parse("user"), Recipient::User);
        assert_eq!(Recipient::parse("@all"), Recipient::All);
        assert_eq!(Recipient::parse("@peers"), Recipient::Peers);
        assert_eq!(Recipient::parse("@foreman"), Recipient::Foreman);
        assert_eq!(
            Recipient::parse("reviewer"),
            Recipient::Actor("reviewer".to_string())
        );
    }
}
