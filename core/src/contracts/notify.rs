//! `system.notify`/`system.notify_ack` event data (spec §4.4 "Built-in
//! nudge policies", §6). Shaped like `ChatMessage`'s addressing so the
//! delivery engine can inject a nudge through the same path as a chat
//! message, without the reply/attachment fields a nudge never needs.

use super::message::{Priority, Recipient};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SystemNotify {
    pub to: Vec<Recipient>,
    /// Stable reason codes, e.g. `unread`, `reply_required`, `keepalive`.
    /// More than one when nudges for the same recipient digest together
    /// (spec §4.4 "Tie-breaks & ordering").
    pub reasons: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
}

impl SystemNotify {
    pub fn new(to: Vec<Recipient>, reasons: Vec<String>, priority: Priority) -> Self {
        Self { to, reasons, priority }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let notify = SystemNotify::new(vec![Recipient::Actor("a1".into())], vec!["unread".into()], Priority::Normal);
        let value = serde_json::to_value(&notify).unwrap();
        let back: SystemNotify = serde_json::from_value(value).unwrap();
        assert_eq!(back, notify);
    }
}
