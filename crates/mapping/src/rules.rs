//! Source event → destination event resolution.
//!
//! Rules sharing a `(type, name)` pair are kept in configured order and the
//! first one whose filters match wins, so one source event can map to
//! different destination events depending on its contents.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use tagrelay_core::types::{Event, EventType};

use crate::filter::{self, Filter};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRule {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub event_type: EventType,
    /// Source event name; when unset the type's default name is used.
    #[serde(default)]
    pub source_event_name: Option<String>,
    pub destination_event_key: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
}

fn default_enabled() -> bool {
    true
}

impl EventRule {
    pub fn new(
        event_type: EventType,
        source_event_name: Option<&str>,
        destination_event_key: impl Into<String>,
    ) -> Self {
        Self {
            enabled: true,
            event_type,
            source_event_name: source_event_name.map(str::to_string),
            destination_event_key: destination_event_key.into(),
            filters: Vec::new(),
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn lookup_name(&self) -> &str {
        self.source_event_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.event_type.default_name())
    }
}

/// Index of enabled rules grouped by `(event type, lookup name)`.
#[derive(Debug, Clone, Default)]
pub struct EventRuleResolver {
    groups: HashMap<(EventType, String), Vec<EventRule>>,
}

impl EventRuleResolver {
    pub fn new(rules: impl IntoIterator<Item = EventRule>) -> Self {
        let mut groups: HashMap<(EventType, String), Vec<EventRule>> = HashMap::new();
        for rule in rules.into_iter().filter(|r| r.enabled) {
            let key = (rule.event_type, rule.lookup_name().to_string());
            groups.entry(key).or_default().push(rule);
        }
        Self { groups }
    }

    /// First rule for the event's `(type, name)` whose filters match the
    /// whole record. `None` means the destination skips this event.
    pub fn resolve(&self, event: &Event) -> Option<&EventRule> {
        let key = (event.event_type, event.lookup_name().to_string());
        let Some(group) = self.groups.get(&key) else {
            debug!(
                event_id = %event.id,
                event_type = %event.event_type,
                name = event.lookup_name(),
                "no event rules for event"
            );
            return None;
        };

        group
            .iter()
            .find(|rule| filter::matches(&event.record, &rule.filters))
    }

    pub fn rule_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
