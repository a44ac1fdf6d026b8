//! Per-destination mapping configuration and its compiled form.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use tagrelay_core::types::Event;

use crate::error::{MappingError, MappingResult};
use crate::mapper::{FieldMapper, MapOptions, MappingRule, SourceKind, VariableSource};
use crate::path::PathSpec;
use crate::rules::{EventRule, EventRuleResolver};
use crate::transform::Transformations;

/// Mapping configuration for one destination, as loaded from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationMapping {
    pub name: String,
    #[serde(default)]
    pub mapping_rules: Vec<MappingRule>,
    #[serde(default)]
    pub event_rules: Vec<EventRule>,
    #[serde(default)]
    pub ignore_unmapped_properties: bool,
    /// Built-in transformation names per mapping-rule target path.
    #[serde(default)]
    pub transforms: BTreeMap<String, Vec<String>>,
}

impl DestinationMapping {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mapping_rules: Vec::new(),
            event_rules: Vec::new(),
            ignore_unmapped_properties: false,
            transforms: BTreeMap::new(),
        }
    }

    pub fn with_mapping_rule(mut self, rule: MappingRule) -> Self {
        self.mapping_rules.push(rule);
        self
    }

    pub fn with_event_rule(mut self, rule: EventRule) -> Self {
        self.event_rules.push(rule);
        self
    }

    pub fn validate(&self) -> MappingResult<()> {
        if self.name.trim().is_empty() {
            return Err(MappingError::InvalidConfig(
                "destination name must not be empty".into(),
            ));
        }
        if let Some(rule) = self
            .event_rules
            .iter()
            .find(|r| r.destination_event_key.trim().is_empty())
        {
            return Err(MappingError::InvalidConfig(format!(
                "{}: event rule for {} '{}' has an empty destination event key",
                self.name,
                rule.event_type,
                rule.lookup_name()
            )));
        }
        if let Some(rule) = self
            .mapping_rules
            .iter()
            .find(|r| r.target_path.trim().is_empty())
        {
            return Err(MappingError::InvalidConfig(format!(
                "{}: mapping rule from '{}' has an empty target path",
                self.name, rule.source_value
            )));
        }
        for rule in &self.mapping_rules {
            PathSpec::parse(&rule.target_path)?;
            if rule.source_kind == SourceKind::Field {
                PathSpec::parse(&rule.source_value)?;
            }
        }
        for filter in self.event_rules.iter().flat_map(|r| &r.filters) {
            PathSpec::parse(&filter.field)?;
        }
        Ok(())
    }

    pub fn compile(&self) -> MappingResult<CompiledMapping> {
        self.validate()?;
        Ok(CompiledMapping {
            name: self.name.clone(),
            resolver: EventRuleResolver::new(self.event_rules.iter().cloned()),
            mapper: FieldMapper::new(self.mapping_rules.iter().cloned()),
            transformations: Transformations::from_names(&self.transforms)?,
            ignore_unmapped_properties: self.ignore_unmapped_properties,
        })
    }
}

/// A validated mapping with its rule index and field mapper prebuilt.
pub struct CompiledMapping {
    name: String,
    resolver: EventRuleResolver,
    mapper: FieldMapper,
    transformations: Transformations,
    ignore_unmapped_properties: bool,
}

impl CompiledMapping {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_variables(mut self, variables: Arc<dyn VariableSource>) -> Self {
        self.mapper = self.mapper.with_variables(variables);
        self
    }

    /// Append caller-supplied chains after the configured ones.
    pub fn with_transformations(mut self, extra: &Transformations) -> Self {
        self.transformations.extend(extra);
        self
    }

    /// Resolve the destination event key and build its payload. `None` when
    /// no rule accepts the event.
    pub fn build_call(&self, event: &Event) -> Option<(String, Value)> {
        let Some(rule) = self.resolver.resolve(event) else {
            debug!(
                destination = %self.name,
                event_id = %event.id,
                "event not mapped for destination"
            );
            return None;
        };
        let payload = self.mapper.map_with(
            &event.record,
            &MapOptions {
                transformations: Some(&self.transformations),
                ignore_unmapped_properties: self.ignore_unmapped_properties,
            },
        );
        Some((rule.destination_event_key.clone(), payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Filter, FilterOperator};
    use serde_json::json;
    use tagrelay_core::types::EventType;

    fn pixel_config() -> Value {
        json!({
            "name": "pixel",
            "ignore_unmapped_properties": true,
            "mapping_rules": [
                {"source_kind": "field", "source_value": "properties.items.$.id", "target_path": "contents.$.content_id"},
                {"source_kind": "field", "source_value": "properties.currency", "target_path": "currency"},
                {"source_kind": "constant", "source_value": "product", "target_path": "content_type"}
            ],
            "event_rules": [
                {
                    "event_type": "track",
                    "source_event_name": "add_to_cart",
                    "destination_event_key": "AddToCart",
                    "filters": [{"field": "properties.value", "operator": ">", "value": 0}]
                },
                {"event_type": "page", "destination_event_key": "PageView"}
            ],
            "transforms": {"currency": ["lowercase"]}
        })
    }

    #[test]
    fn test_build_call_from_json_config() {
        let mapping: DestinationMapping = serde_json::from_value(pixel_config()).unwrap();
        let compiled = mapping.compile().unwrap();

        let event = Event::track("e1", "add_to_cart").with_properties(json!({
            "items": [{"id": "sku-1"}, {"id": "sku-2"}],
            "currency": "USD",
            "value": 20
        }));
        let (key, payload) = compiled.build_call(&event).unwrap();

        assert_eq!(key, "AddToCart");
        assert_eq!(
            payload,
            json!({
                "contents": [{"content_id": "sku-1"}, {"content_id": "sku-2"}],
                "currency": "usd",
                "content_type": "product"
            })
        );
    }

    #[test]
    fn test_unmatched_event_builds_no_call() {
        let rule = EventRule::new(EventType::Track, Some("purchase"), "Purchase").with_filter(
            Filter::new("properties.value", FilterOperator::GreaterThan, json!(0)),
        );
        let compiled = DestinationMapping::new("pixel")
            .with_event_rule(rule)
            .compile()
            .unwrap();

        let free = Event::track("e2", "purchase").with_properties(json!({"value": 0}));
        assert!(compiled.build_call(&free).is_none());
        assert!(compiled.build_call(&Event::page("e3")).is_none());
    }

    #[test]
    fn test_validation_errors() {
        assert!(matches!(
            DestinationMapping::new(" ").compile(),
            Err(MappingError::InvalidConfig(_))
        ));
        assert!(DestinationMapping::new("pixel")
            .with_event_rule(EventRule::new(EventType::Group, None, ""))
            .validate()
            .is_err());

        let oversized = DestinationMapping::new("pixel").with_mapping_rule(MappingRule::new(
            SourceKind::Constant,
            "web",
            "list.18446744073709551615",
        ));
        assert!(matches!(
            oversized.validate(),
            Err(MappingError::InvalidPath { .. })
        ));
        assert!(DestinationMapping::new("pixel")
            .with_mapping_rule(MappingRule::field("properties.$.$", "out"))
            .compile()
            .is_err());

        let mut unknown = DestinationMapping::new("pixel");
        unknown
            .transforms
            .insert("email".into(), vec!["sha256".into()]);
        assert!(matches!(
            unknown.compile(),
            Err(MappingError::UnknownTransform(name)) if name == "sha256"
        ));
    }

    #[test]
    fn test_extra_transformations_run_after_configured_ones() {
        let mapping: DestinationMapping = serde_json::from_value(pixel_config()).unwrap();
        let extra = Transformations::new().register("currency", |v| match v {
            Value::String(s) => Value::String(format!("{}!", s)),
            other => other,
        });
        let compiled = mapping.compile().unwrap().with_transformations(&extra);

        let event = Event::track("e4", "add_to_cart")
            .with_properties(json!({"currency": "EUR", "value": 1}));
        let (_, payload) = compiled.build_call(&event).unwrap();
        assert_eq!(payload["currency"], "eur!");
    }
}
