//! Get/set over nested JSON records.
//!
//! Paths are dot-separated. Numeric segments index arrays. A `$` segment
//! broadcasts the rest of the path over every element of the array found at
//! that point: `properties.items.$.id` reads the `id` of every item, and
//! writing to `contents.$.content_id` fans a value (or an array of values)
//! out over the `contents` elements.

use serde_json::{Map, Value};

use crate::error::{MappingError, MappingResult};

/// Segment marking "every element of the array here".
pub const BROADCAST: &str = "$";

/// Largest array index a path may name. Writes pad arrays up to the index,
/// so the bound also caps the allocation a single mapping rule can cause.
pub const MAX_INDEX: usize = 9_999;

/// A parsed path: the segments leading to the target, plus the sub-path to
/// apply per element when the path broadcasts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSpec {
    prefix: Vec<String>,
    sub: Option<Vec<String>>,
}

impl PathSpec {
    pub fn parse(path: &str) -> MappingResult<Self> {
        let invalid = |reason: &str| MappingError::InvalidPath {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        if path.is_empty() {
            return Err(invalid("empty path"));
        }
        let segments: Vec<&str> = path.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(invalid("empty segment"));
        }
        let out_of_range = |s: &&str| {
            s.bytes().all(|b| b.is_ascii_digit())
                && s.parse::<usize>().map_or(true, |i| i > MAX_INDEX)
        };
        if segments.iter().any(out_of_range) {
            return Err(invalid("array index out of range"));
        }

        let markers: Vec<usize> = segments
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == BROADCAST)
            .map(|(i, _)| i)
            .collect();

        match markers.as_slice() {
            [] => Ok(Self {
                prefix: segments.iter().map(|s| s.to_string()).collect(),
                sub: None,
            }),
            [0] => Err(invalid("broadcast marker must follow a segment")),
            [at] => Ok(Self {
                prefix: segments[..*at].iter().map(|s| s.to_string()).collect(),
                sub: Some(segments[at + 1..].iter().map(|s| s.to_string()).collect()),
            }),
            _ => Err(invalid("more than one broadcast marker")),
        }
    }

    /// Segments up to (not including) the broadcast marker. Never empty.
    pub fn prefix(&self) -> &[String] {
        &self.prefix
    }

    /// Per-element sub-path, present only for broadcast paths.
    pub fn sub(&self) -> Option<&[String]> {
        self.sub.as_deref()
    }

    pub fn is_broadcast(&self) -> bool {
        self.sub.is_some()
    }

    /// Resolve the path. `None` means the value (or the broadcast array
    /// itself) is absent.
    pub fn get(&self, record: &Value) -> Option<Value> {
        let target = lookup(record, &self.prefix)?;
        match &self.sub {
            None => Some(target.clone()),
            Some(sub) => match target {
                Value::Array(items) => Some(Value::Array(
                    items
                        .iter()
                        .map(|item| lookup(item, sub).cloned().unwrap_or(Value::Null))
                        .collect(),
                )),
                _ => Some(Value::Null),
            },
        }
    }

    /// Write `value` at this path, creating containers along the way.
    pub fn set(&self, record: &mut Value, value: Value) {
        let target = slot(record, &self.prefix);
        let Some(sub) = &self.sub else {
            *target = value;
            return;
        };

        if !target.is_array() {
            *target = Value::Array(Vec::new());
        }
        let Value::Array(items) = target else {
            return;
        };

        match value {
            Value::Array(values) => {
                for (i, v) in values.into_iter().enumerate() {
                    if i >= items.len() {
                        items.push(Value::Object(Map::new()));
                    }
                    write_element(&mut items[i], sub, v);
                }
            }
            scalar => {
                if items.is_empty() {
                    items.push(Value::Object(Map::new()));
                }
                for item in items.iter_mut() {
                    write_element(item, sub, scalar.clone());
                }
            }
        }
    }
}

/// Read `path` from `record`. Invalid paths read as absent.
pub fn get(record: &Value, path: &str) -> Option<Value> {
    PathSpec::parse(path).ok()?.get(record)
}

/// Write `value` at `path` in `record`. Returns `false` and leaves the record
/// untouched when the path is invalid.
pub fn set(record: &mut Value, path: &str, value: Value) -> bool {
    match PathSpec::parse(path) {
        Ok(spec) => {
            spec.set(record, value);
            true
        }
        Err(_) => false,
    }
}

fn lookup<'a>(mut node: &'a Value, segments: &[String]) -> Option<&'a Value> {
    for seg in segments {
        node = match node {
            Value::Object(map) => map.get(seg)?,
            Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(node)
}

fn slot<'a>(mut node: &'a mut Value, segments: &[String]) -> &'a mut Value {
    for seg in segments {
        node = child_mut(node, seg);
    }
    node
}

fn child_mut<'a>(node: &'a mut Value, seg: &str) -> &'a mut Value {
    let index = seg.parse::<usize>().ok().filter(|i| *i <= MAX_INDEX);
    let reshaped = match (&*node, index) {
        (Value::Object(_), _) | (Value::Array(_), Some(_)) => None,
        (_, Some(_)) => Some(Value::Array(Vec::new())),
        (_, None) => Some(Value::Object(Map::new())),
    };
    if let Some(fresh) = reshaped {
        *node = fresh;
    }

    match (node, index) {
        (Value::Array(items), Some(idx)) => {
            if items.len() <= idx {
                items.resize(idx + 1, Value::Null);
            }
            &mut items[idx]
        }
        (Value::Object(map), _) => map.entry(seg.to_string()).or_insert(Value::Null),
        (other, _) => other,
    }
}

// Only plain objects receive broadcast writes; an empty sub-path replaces
// the element itself.
fn write_element(item: &mut Value, sub: &[String], value: Value) {
    if sub.is_empty() {
        *item = value;
    } else if item.is_object() {
        *slot(item, sub) = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_plain_paths() {
        let record = json!({"properties": {"price": 9.5, "tags": ["a", "b"]}});
        assert_eq!(get(&record, "properties.price"), Some(json!(9.5)));
        assert_eq!(get(&record, "properties.tags.1"), Some(json!("b")));
        assert_eq!(get(&record, "properties.missing"), None);
        assert_eq!(get(&record, "properties.price.deeper"), None);
    }

    #[test]
    fn test_get_broadcast_preserves_length() {
        let record = json!({"items": [{"id": "a"}, {"sku": "x"}, {"id": "c"}]});
        assert_eq!(get(&record, "items.$.id"), Some(json!(["a", null, "c"])));
    }

    #[test]
    fn test_get_broadcast_on_non_array_and_missing() {
        let record = json!({"items": {"id": "a"}, "empty": null});
        assert_eq!(get(&record, "items.$.id"), Some(Value::Null));
        assert_eq!(get(&record, "empty.$.id"), Some(Value::Null));
        assert_eq!(get(&record, "absent.$.id"), None);
    }

    #[test]
    fn test_get_trailing_broadcast_copies_elements() {
        let record = json!({"tags": ["a", "b"]});
        assert_eq!(get(&record, "tags.$"), Some(json!(["a", "b"])));
    }

    #[test]
    fn test_invalid_paths_are_noops() {
        let record = json!({"a": [{"b": [{"c": 1}]}]});
        assert_eq!(get(&record, "$"), None);
        assert_eq!(get(&record, "a.$.b.$.c"), None);
        assert_eq!(get(&record, "a..b"), None);

        let mut target = json!({"keep": true});
        assert!(!set(&mut target, "$", json!(1)));
        assert!(!set(&mut target, "x.$.y.$.z", json!(1)));
        assert!(!set(&mut target, "", json!(1)));
        assert_eq!(target, json!({"keep": true}));
    }

    #[test]
    fn test_set_creates_intermediate_containers() {
        let mut record = json!({});
        assert!(set(&mut record, "user.address.city", json!("Oslo")));
        assert!(set(&mut record, "list.1.name", json!("second")));
        assert_eq!(
            record,
            json!({
                "user": {"address": {"city": "Oslo"}},
                "list": [null, {"name": "second"}]
            })
        );
    }

    #[test]
    fn test_set_replaces_scalars_in_the_way() {
        let mut record = json!({"user": "anonymous"});
        set(&mut record, "user.id", json!(7));
        assert_eq!(record, json!({"user": {"id": 7}}));
    }

    #[test]
    fn test_set_broadcast_array_value_expands_target() {
        let mut record = json!({"contents": [{"quantity": 1}]});
        set(&mut record, "contents.$.content_id", json!(["a", "b"]));
        assert_eq!(
            record,
            json!({"contents": [{"quantity": 1, "content_id": "a"}, {"content_id": "b"}]})
        );
    }

    #[test]
    fn test_set_broadcast_scalar_value() {
        let mut record = json!({"contents": [{"id": 1}, {"id": 2}]});
        set(&mut record, "contents.$.currency", json!("EUR"));
        assert_eq!(
            record,
            json!({"contents": [{"id": 1, "currency": "EUR"}, {"id": 2, "currency": "EUR"}]})
        );

        let mut empty = json!({});
        set(&mut empty, "contents.$.currency", json!("EUR"));
        assert_eq!(empty, json!({"contents": [{"currency": "EUR"}]}));
    }

    #[test]
    fn test_set_broadcast_skips_non_object_elements() {
        let mut record = json!({"contents": [{"id": 1}, "raw", [1]]});
        set(&mut record, "contents.$.flag", json!(true));
        assert_eq!(
            record,
            json!({"contents": [{"id": 1, "flag": true}, "raw", [1]]})
        );
    }

    #[test]
    fn test_oversized_indices_are_invalid() {
        assert!(matches!(
            PathSpec::parse("list.18446744073709551615"),
            Err(MappingError::InvalidPath { .. })
        ));
        assert!(PathSpec::parse("list.4000000000.name").is_err());
        assert!(PathSpec::parse("list.99999999999999999999999").is_err());
        assert!(PathSpec::parse("items.$.10000").is_err());
        assert!(PathSpec::parse(&format!("list.{}", MAX_INDEX)).is_ok());

        let mut record = json!({"id": "e1"});
        assert!(!set(&mut record, "list.18446744073709551615", json!("web")));
        assert_eq!(record, json!({"id": "e1"}));
        assert_eq!(get(&json!({"list": [1]}), "list.4000000000"), None);
    }

    #[test]
    fn test_path_spec_parts() {
        let spec = PathSpec::parse("properties.items.$.id").unwrap();
        assert_eq!(spec.prefix(), ["properties", "items"]);
        assert_eq!(spec.sub().unwrap(), ["id"]);
        assert!(spec.is_broadcast());
        assert!(!PathSpec::parse("properties.price").unwrap().is_broadcast());
    }
}
