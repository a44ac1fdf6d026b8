//! Rule-driven projection of an event record into a destination payload.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::path::PathSpec;
use crate::template;
use crate::transform::Transformations;

/// Where a mapping rule takes its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Path into the source record (broadcast paths allowed).
    Field,
    /// `{{path}}` template rendered against the whole record.
    Template,
    /// Literal string.
    Constant,
    /// Named runtime value, see [`VariableSource`].
    Variable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingRule {
    pub source_kind: SourceKind,
    pub source_value: String,
    pub target_path: String,
}

impl MappingRule {
    pub fn field(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(SourceKind::Field, source, target)
    }

    pub fn new(kind: SourceKind, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source_kind: kind,
            source_value: source.into(),
            target_path: target.into(),
        }
    }
}

/// Runtime values for `variable` rules. Injected so tests can pin the clock
/// and the id generator.
pub trait VariableSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn unique_id(&self) -> String;
}

/// Wall clock and random UUIDs.
pub struct SystemVariables;

impl VariableSource for SystemVariables {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn unique_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Per-call mapping options.
#[derive(Debug, Clone, Copy, Default)]
pub struct MapOptions<'a> {
    pub transformations: Option<&'a Transformations>,
    pub ignore_unmapped_properties: bool,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: MappingRule,
    source: Option<PathSpec>,
    target: Option<PathSpec>,
}

/// Mapper built once per destination and reused for every event.
pub struct FieldMapper {
    rules: Vec<CompiledRule>,
    consumed_properties: HashSet<String>,
    consumes_all_properties: bool,
    variables: Arc<dyn VariableSource>,
}

impl FieldMapper {
    pub fn new(rules: impl IntoIterator<Item = MappingRule>) -> Self {
        let mut compiled = Vec::new();
        let mut consumed_properties = HashSet::new();
        let mut consumes_all_properties = false;

        for rule in rules {
            let target = match PathSpec::parse(&rule.target_path) {
                Ok(spec) => Some(spec),
                Err(e) => {
                    warn!(error = %e, "mapping rule target is invalid, rule will never write");
                    None
                }
            };

            let source = match rule.source_kind {
                SourceKind::Field => match PathSpec::parse(&rule.source_value) {
                    Ok(spec) => {
                        if spec.prefix().first().map(String::as_str) == Some("properties") {
                            match spec.prefix().get(1) {
                                Some(key) => {
                                    consumed_properties.insert(key.clone());
                                }
                                None if !spec.is_broadcast() => consumes_all_properties = true,
                                None => {}
                            }
                        }
                        Some(spec)
                    }
                    Err(e) => {
                        warn!(error = %e, "mapping rule source is invalid, rule will never read");
                        None
                    }
                },
                _ => None,
            };

            compiled.push(CompiledRule {
                rule,
                source,
                target,
            });
        }

        Self {
            rules: compiled,
            consumed_properties,
            consumes_all_properties,
            variables: Arc::new(SystemVariables),
        }
    }

    pub fn with_variables(mut self, variables: Arc<dyn VariableSource>) -> Self {
        self.variables = variables;
        self
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Map with default options (no transformations, unmapped properties
    /// copied through).
    pub fn map(&self, record: &Value) -> Value {
        self.map_with(record, &MapOptions::default())
    }

    pub fn map_with(&self, record: &Value, options: &MapOptions<'_>) -> Value {
        let mut payload = Value::Object(Map::new());
        let is_empty = record.as_object().map_or(true, |obj| obj.is_empty());
        if is_empty {
            return payload;
        }

        for compiled in &self.rules {
            let Some(target) = &compiled.target else {
                continue;
            };
            let Some(value) = self.resolve(compiled, record) else {
                continue;
            };
            let value = match options.transformations {
                Some(t) => t.apply(&compiled.rule.target_path, value),
                None => value,
            };
            if is_blank(&value) {
                continue;
            }
            target.set(&mut payload, value);
        }

        if !options.ignore_unmapped_properties && !self.consumes_all_properties {
            self.copy_unmapped_properties(record, &mut payload);
        }

        payload
    }

    fn resolve(&self, compiled: &CompiledRule, record: &Value) -> Option<Value> {
        let rule = &compiled.rule;
        match rule.source_kind {
            SourceKind::Field => compiled.source.as_ref()?.get(record),
            SourceKind::Template => match template::render(&rule.source_value, record) {
                Ok(rendered) => Some(Value::String(rendered)),
                Err(e) => {
                    debug!(error = %e, target = %rule.target_path, "template skipped");
                    None
                }
            },
            SourceKind::Constant => Some(Value::String(rule.source_value.clone())),
            SourceKind::Variable => self.variable(&rule.source_value),
        }
    }

    fn variable(&self, name: &str) -> Option<Value> {
        let value = match name {
            "current_date" => self.variables.now().format("%Y-%m-%d").to_string(),
            "current_time" => self.variables.now().format("%H:%M:%S").to_string(),
            "current_timestamp" => self
                .variables
                .now()
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            "unique_id" => self.variables.unique_id(),
            other => {
                debug!(variable = other, "unknown mapping variable");
                return None;
            }
        };
        Some(Value::String(value))
    }

    fn copy_unmapped_properties(&self, record: &Value, payload: &mut Value) {
        let Some(properties) = record.get("properties").and_then(|p| p.as_object()) else {
            return;
        };
        let Some(out) = payload.as_object_mut() else {
            return;
        };
        for (key, value) in properties {
            if self.consumed_properties.contains(key) || out.contains_key(key) {
                continue;
            }
            out.insert(key.clone(), value.clone());
        }
    }
}

/// Mapping rules never emit nulls or empty strings/arrays.
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
