use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::tracker::constants::UNNAMED_EVENT;

/// Free-form, caller supplied event properties.
pub type Properties = Map<String, Value>;

/// One recorded occurrence, as delivered to the collector.
///
/// Events are stamped once by the session and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub name: String,
    pub properties: Properties,
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub sequence: u64,
}

/// An event as handed over by a producer, before session metadata is known.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub name: String,
    pub properties: Value,
    pub captured_at: DateTime<Utc>,
}

impl RawEvent {
    /// Captures `name` and `properties` at the current time.
    #[must_use]
    pub fn new(name: impl Into<String>, properties: Value) -> Self {
        RawEvent {
            name: name.into(),
            properties,
            captured_at: Utc::now(),
        }
    }
}

fn serialize_timestamp<S>(timestamp: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&timestamp.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Trims the name; blank names are replaced with a placeholder.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    let name = name.trim();
    if name.is_empty() {
        UNNAMED_EVENT.to_string()
    } else {
        name.to_string()
    }
}

/// Turns whatever the caller passed into a property map and merges the
/// global properties underneath it. Caller keys win over global ones.
#[must_use]
pub fn normalize_properties(value: Value, globals: &BTreeMap<String, String>) -> Properties {
    let mut properties = match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    };
    for (key, value) in globals {
        properties
            .entry(key.clone())
            .or_insert_with(|| Value::String(value.clone()));
    }
    properties
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    #[test]
    fn blank_name_gets_placeholder() {
        assert_eq!(normalize_name("  "), UNNAMED_EVENT);
        assert_eq!(normalize_name(" page_view "), "page_view");
    }

    #[test]
    fn scalar_properties_are_wrapped() {
        let properties = normalize_properties(json!(42), &BTreeMap::new());
        assert_eq!(Value::Object(properties), json!({"value": 42}));
        let properties = normalize_properties(Value::Null, &BTreeMap::new());
        assert!(properties.is_empty());
    }

    #[test]
    fn caller_properties_win_over_globals() {
        let globals = BTreeMap::from([
            ("app".to_string(), "memorial".to_string()),
            ("path".to_string(), "/global".to_string()),
        ]);
        let properties = normalize_properties(json!({"path": "/case/1"}), &globals);
        assert_eq!(
            Value::Object(properties),
            json!({"path": "/case/1", "app": "memorial"})
        );
    }

    #[test]
    fn serializes_collector_shape() {
        let event = Event {
            name: "page_view".to_string(),
            properties: normalize_properties(json!({"path": "/"}), &BTreeMap::new()),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
            session_id: "session".to_string(),
            sequence: 7,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "name": "page_view",
                "properties": {"path": "/"},
                "timestamp": "2024-05-01T12:30:00.000Z",
                "sessionId": "session",
                "sequence": 7
            })
        );
    }
}
