//! Per-target transformation chains applied by the field mapper.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{MappingError, MappingResult};

pub type Transform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Registry of transformation chains keyed by mapping-rule target path.
#[derive(Clone, Default)]
pub struct Transformations {
    chains: HashMap<String, Vec<Transform>>,
}

impl Transformations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `transform` to the chain for `target_path`.
    pub fn register<F>(mut self, target_path: impl Into<String>, transform: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.push(target_path, Arc::new(transform));
        self
    }

    pub fn push(&mut self, target_path: impl Into<String>, transform: Transform) {
        self.chains
            .entry(target_path.into())
            .or_default()
            .push(transform);
    }

    /// Build chains from built-in transformation names.
    pub fn from_names<'a, I>(chains: I) -> MappingResult<Self>
    where
        I: IntoIterator<Item = (&'a String, &'a Vec<String>)>,
    {
        let mut result = Self::new();
        for (target, names) in chains {
            for name in names {
                let transform = builtin::by_name(name)
                    .ok_or_else(|| MappingError::UnknownTransform(name.clone()))?;
                result.push(target.clone(), transform);
            }
        }
        Ok(result)
    }

    /// Append every chain of `other` after the chains already registered.
    pub fn extend(&mut self, other: &Transformations) {
        for (target, chain) in &other.chains {
            self.chains
                .entry(target.clone())
                .or_default()
                .extend(chain.iter().cloned());
        }
    }

    /// Run the chain for `target_path` left to right. Targets without a
    /// chain pass the value through.
    pub fn apply(&self, target_path: &str, value: Value) -> Value {
        match self.chains.get(target_path) {
            Some(chain) => chain.iter().fold(value, |acc, f| f(acc)),
            None => value,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

impl fmt::Debug for Transformations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut targets: Vec<(&String, usize)> =
            self.chains.iter().map(|(k, v)| (k, v.len())).collect();
        targets.sort();
        f.debug_struct("Transformations")
            .field("chains", &targets)
            .finish()
    }
}

/// Built-in transformations. String transforms map over arrays element by
/// element so they compose with broadcast paths.
pub mod builtin {
    use super::Transform;
    use serde_json::Value;
    use std::sync::Arc;

    pub fn by_name(name: &str) -> Option<Transform> {
        let f: Transform = match name {
            "lowercase" => Arc::new(lowercase),
            "uppercase" => Arc::new(uppercase),
            "trim" => Arc::new(trim),
            "to_number" => Arc::new(to_number),
            "to_string" => Arc::new(to_string),
            _ => return None,
        };
        Some(f)
    }

    fn map_strings(value: Value, f: &dyn Fn(&str) -> String) -> Value {
        match value {
            Value::String(s) => Value::String(f(&s)),
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|v| map_strings(v, f)).collect())
            }
            other => other,
        }
    }

    pub fn lowercase(value: Value) -> Value {
        map_strings(value, &|s: &str| s.to_lowercase())
    }

    pub fn uppercase(value: Value) -> Value {
        map_strings(value, &|s: &str| s.to_uppercase())
    }

    pub fn trim(value: Value) -> Value {
        map_strings(value, &|s: &str| s.trim().to_string())
    }

    /// Numeric strings become numbers; unparseable strings become `null`.
    pub fn to_number(value: Value) -> Value {
        match value {
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(|n| match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                        Value::from(f as i64)
                    }
                    _ => Value::Number(n),
                })
                .unwrap_or(Value::Null),
            Value::Array(items) => Value::Array(items.into_iter().map(to_number).collect()),
            other => other,
        }
    }

    pub fn to_string(value: Value) -> Value {
        match value {
            Value::Null => Value::Null,
            Value::String(s) => Value::String(s),
            Value::Array(items) => Value::Array(items.into_iter().map(to_string).collect()),
            other => Value::String(other.to_string()),
        }
    }
}
