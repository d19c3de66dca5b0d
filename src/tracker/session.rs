use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::tracker::event::{normalize_name, normalize_properties, Event, RawEvent};

/// Identity and ordering state of one browsing session.
///
/// Only the tracker service stamps events, so the counter is never shared.
#[derive(Debug)]
pub struct Session {
    id: String,
    next_sequence: u64,
    last_timestamp: Option<DateTime<Utc>>,
}

impl Default for Session {
    fn default() -> Self {
        Session::with_id(Uuid::new_v4().to_string())
    }
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Session::default()
    }

    #[must_use]
    pub fn with_id(id: impl Into<String>) -> Self {
        Session {
            id: id.into(),
            next_sequence: 1,
            last_timestamp: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Sequence the next stamped event will carry.
    #[must_use]
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Turns a raw event into a session event: normalizes it, assigns the next
    /// sequence number, and clamps the timestamp so it never goes backwards.
    pub fn stamp(&mut self, raw: RawEvent, globals: &BTreeMap<String, String>) -> Event {
        let timestamp = match self.last_timestamp {
            Some(last) if raw.captured_at < last => last,
            _ => raw.captured_at,
        };
        self.last_timestamp = Some(timestamp);

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        Event {
            name: normalize_name(&raw.name),
            properties: normalize_properties(raw.properties, globals),
            timestamp,
            session_id: self.id.clone(),
            sequence,
        }
    }
}
