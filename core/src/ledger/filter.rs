//! `LedgerStore::read` query shape (spec §4.1): filter by kind set, by
//! time/id range, by centering around an event with `before`/`after`
//! counts, or by a free-text substring.

use crate::contracts::{Event, EventKind};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct ReadFilter {
    pub kinds: Option<HashSet<EventKind>>,
    pub since_id: Option<u64>,
    pub until_id: Option<u64>,
    pub since_ts: Option<DateTime<Utc>>,
    pub until_ts: Option<DateTime<Utc>>,
    pub center: Option<CenterWindow>,
    pub contains: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CenterWindow {
    pub event_id: u64,
    pub before: usize,
    pub after: usize,
}

impl ReadFilter {
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if let Some(since_id) = self.since_id {
            if event.numeric_id() < since_id {
                return false;
            }
        }
        if let Some(until_id) = self.until_id {
            if event.numeric_id() > until_id {
                return false;
            }
        }
        if let Some(since_ts) = self.since_ts {
            if event.ts < since_ts {
                return false;
            }
        }
        if let Some(until_ts) = self.until_ts {
            if event.ts > until_ts {
                return false;
            }
        }
        if let Some(needle) = &self.contains {
            let haystack = event.data.to_string();
            if !haystack.to_lowercase().contains(&needle.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct ReadResult {
    pub events: Vec<Event>,
    pub more_before: bool,
    pub more_after: bool,
}

/// Applies `ReadFilter` to a full, ascending-by-id event slice (already
/// read from disk). Centering takes priority over `since_id`/`until_id`
/// because the two modes express mutually exclusive query intents.
pub fn apply(all: &[Event], filter: &ReadFilter) -> ReadResult {
    if let Some(window) = &filter.center {
        return apply_center(all, filter, window);
    }

    let matched: Vec<Event> = all.iter().filter(|e| filter.matches(e)).cloned().collect();
    ReadResult {
        events: matched,
        more_before: false,
        more_after: false,
    }
}

fn apply_center(all: &[Event], filter: &ReadFilter, window: &CenterWindow) -> ReadResult {
    let pos = all.iter().position(|e| e.numeric_id() == window.event_id);
    let Some(pos) = pos else {
        return ReadResult { events: Vec::new(), more_before: false, more_after: false };
    };

    let start = pos.saturating_sub(window.before);
    let end = (pos + window.after + 1).min(all.len());

    let events: Vec<Event> = all[start..end]
        .iter()
        .filter(|e| filter.matches(e))
        .cloned()
        .collect();

    ReadResult {
        events,
        more_before: start > 0,
        more_after: end < all.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::ChatMessage;
    use chrono::Utc;

    fn mk(id: u64, kind: EventKind, text: &str) -> Event {
        Event {
            v: 1,
            id: id.to_string(),
            ts: Utc::now(),
            kind,
            group_id: "g1".into(),
            scope_key: None,
            by: "user".into(),
            data: serde_json::to_value(ChatMessage::broadcast(text)).unwrap(),
        }
    }

    #[test]
    fn center_window_returns_before_and_after_counts() {
        let events: Vec<Event> = (1..=10)
            .map(|i| mk(i, EventKind::ChatMessage, &format!("msg{i}")))
            .collect();
        let filter = ReadFilter {
            center: Some(CenterWindow { event_id: 5, before: 2, after: 2 }),
            ..Default::default()
        };
        let result = apply(&events, &filter);
        assert_eq!(result.events.len(), 5);
        assert_eq!(result.events.first().unwrap().numeric_id(), 3);
        assert_eq!(result.events.last().unwrap().numeric_id(), 7);
        assert!(result.more_before);
        assert!(result.more_after);
    }

    #[test]
    fn contains_filter_is_case_insensitive() {
        let events = vec![mk(1, EventKind::ChatMessage, "Ship IT now")];
        let filter = ReadFilter { contains: Some("ship it".into()), ..Default::default() };
        let result = apply(&events, &filter);
        assert_eq!(result.events.len(), 1);
    }
}
