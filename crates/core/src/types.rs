use crate::error::{RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The four analytics call types every destination understands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Identify,
    Track,
    Page,
    Group,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Identify => "identify",
            EventType::Track => "track",
            EventType::Page => "page",
            EventType::Group => "group",
        }
    }

    /// Name used to look up rules when the event carries no explicit name.
    pub fn default_name(self) -> &'static str {
        match self {
            EventType::Identify => "identify",
            EventType::Track => "track",
            EventType::Page => "page_view",
            EventType::Group => "group",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "identify" => Some(EventType::Identify),
            "track" => Some(EventType::Track),
            "page" => Some(EventType::Page),
            "group" => Some(EventType::Group),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One captured business event.
///
/// `record` is the full semi-structured tree (properties, traits, context,
/// identifiers). `id`, `event_type` and `name` are parsed out of it once and
/// kept in sync with the tree by the constructors.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: String,
    pub event_type: EventType,
    pub name: Option<String>,
    pub record: serde_json::Value,
}

impl Event {
    pub fn new(id: impl Into<String>, event_type: EventType, name: Option<String>) -> Self {
        let id = id.into();
        let mut record = serde_json::json!({
            "id": id,
            "type": event_type.as_str(),
        });
        if let Some(ref name) = name {
            record["name"] = serde_json::json!(name);
        }
        Self {
            id,
            event_type,
            name,
            record,
        }
    }

    pub fn track(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, EventType::Track, Some(name.into()))
    }

    pub fn page(id: impl Into<String>) -> Self {
        Self::new(id, EventType::Page, None)
    }

    /// Attach a top-level section of the record (e.g. `properties`, `traits`,
    /// `context`). The reserved keys `id`, `type` and `name` are ignored.
    pub fn with_section(mut self, key: &str, value: serde_json::Value) -> Self {
        if matches!(key, "id" | "type" | "name") {
            return self;
        }
        if let Some(obj) = self.record.as_object_mut() {
            obj.insert(key.to_string(), value);
        }
        self
    }

    pub fn with_properties(self, properties: serde_json::Value) -> Self {
        self.with_section("properties", properties)
    }

    /// Parse an event from its raw record. `id` and `type` are required;
    /// `name` is optional and `event` is accepted as an alias for it.
    pub fn from_record(record: serde_json::Value) -> RelayResult<Self> {
        let obj = record
            .as_object()
            .ok_or_else(|| RelayError::InvalidEvent("event record must be an object".into()))?;

        let id = match obj.get("id") {
            Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => return Err(RelayError::InvalidEvent("missing event id".into())),
        };

        let raw_type = obj
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RelayError::InvalidEvent(format!("event '{}' has no type", id)))?;
        let event_type = EventType::parse(raw_type).ok_or_else(|| {
            RelayError::InvalidEvent(format!("event '{}' has unknown type '{}'", id, raw_type))
        })?;

        let name = obj
            .get("name")
            .or_else(|| obj.get("event"))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Ok(Self {
            id,
            event_type,
            name,
            record,
        })
    }

    /// Parse one JSON-encoded event record.
    pub fn from_json(raw: &str) -> RelayResult<Self> {
        Self::from_record(serde_json::from_str(raw)?)
    }

    /// The name rules are looked up under.
    pub fn lookup_name(&self) -> &str {
        self.name
            .as_deref()
            .unwrap_or_else(|| self.event_type.default_name())
    }

    pub fn properties(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        self.record.get("properties").and_then(|p| p.as_object())
    }
}

impl TryFrom<serde_json::Value> for Event {
    type Error = RelayError;

    fn try_from(record: serde_json::Value) -> RelayResult<Self> {
        Self::from_record(record)
    }
}

impl Serialize for Event {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.record.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let record = serde_json::Value::deserialize(deserializer)?;
        Event::from_record(record).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_record() {
        let event = Event::from_record(json!({
            "id": "e1",
            "type": "track",
            "name": "add_to_cart",
            "properties": {"price": 10}
        }))
        .unwrap();

        assert_eq!(event.id, "e1");
        assert_eq!(event.event_type, EventType::Track);
        assert_eq!(event.lookup_name(), "add_to_cart");
        assert_eq!(event.properties().unwrap()["price"], 10);
    }

    #[test]
    fn test_default_lookup_name() {
        let event = Event::page("p1");
        assert_eq!(event.lookup_name(), "page_view");
        assert_eq!(event.record["type"], "page");
    }

    #[test]
    fn test_rejects_bad_records() {
        assert!(Event::from_record(json!([1, 2])).is_err());
        assert!(Event::from_record(json!({"type": "track"})).is_err());
        assert!(Event::from_record(json!({"id": "x", "type": "alias"})).is_err());
        assert!(matches!(
            Event::from_json("{not json"),
            Err(RelayError::Serialization(_))
        ));
    }

    #[test]
    fn test_with_section_keeps_reserved_keys() {
        let event = Event::track("e2", "purchase")
            .with_section("name", json!("overwritten"))
            .with_properties(json!({"value": 3}));
        assert_eq!(event.record["name"], "purchase");
        assert_eq!(event.record["properties"]["value"], 3);
    }

    #[test]
    fn test_deserialize_event() {
        let event: Event =
            serde_json::from_str(r#"{"id":"g1","type":"group","traits":{"plan":"pro"}}"#).unwrap();
        assert_eq!(event.event_type, EventType::Group);
        assert_eq!(event.lookup_name(), "group");
    }
}
