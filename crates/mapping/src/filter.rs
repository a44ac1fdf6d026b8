//! Field-level predicates evaluated as a conjunction against an event record.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    #[serde(rename = "=")]
    Equals,
    #[serde(rename = "!=")]
    NotEquals,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "not-contains")]
    NotContains,
    #[serde(rename = "starts-with")]
    StartsWith,
    #[serde(rename = "ends-with")]
    EndsWith,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessThanOrEqual,
}

/// One predicate: `field` is a path into the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Value,
}

impl Filter {
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    pub fn matches(&self, record: &Value) -> bool {
        let actual = path::get(record, &self.field);
        compare(actual.as_ref(), self.operator, &self.value)
    }
}

/// True when every filter matches. An empty list always matches.
pub fn matches(record: &Value, filters: &[Filter]) -> bool {
    filters.iter().all(|f| f.matches(record))
}

#[allow(clippy::unnecessary_map_or)]
fn compare(actual: Option<&Value>, operator: FilterOperator, expected: &Value) -> bool {
    match operator {
        // An equals against a list also accepts membership in that list.
        FilterOperator::Equals => actual.map_or(false, |a| {
            same_value(a, expected)
                || expected
                    .as_array()
                    .map_or(false, |list| list.iter().any(|e| same_value(a, e)))
        }),
        FilterOperator::NotEquals => actual.map_or(true, |a| !same_value(a, expected)),
        FilterOperator::Contains => actual.map_or(false, |a| contains(a, expected)),
        FilterOperator::NotContains => actual.map_or(true, |a| !contains(a, expected)),
        FilterOperator::StartsWith => {
            str_pair(actual, expected).map_or(false, |(a, e)| a.starts_with(e))
        }
        FilterOperator::EndsWith => {
            str_pair(actual, expected).map_or(false, |(a, e)| a.ends_with(e))
        }
        FilterOperator::GreaterThan => numeric_cmp(actual, expected).map_or(false, |o| o.is_gt()),
        FilterOperator::GreaterThanOrEqual => {
            numeric_cmp(actual, expected).map_or(false, |o| o.is_ge())
        }
        FilterOperator::LessThan => numeric_cmp(actual, expected).map_or(false, |o| o.is_lt()),
        FilterOperator::LessThanOrEqual => {
            numeric_cmp(actual, expected).map_or(false, |o| o.is_le())
        }
    }
}

/// Strict equality, except that integer and float encodings of the same
/// number are equal (`10` and `10.0`).
fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::String(s) => expected.as_str().map_or(false, |e| s.contains(e)),
        Value::Array(items) => items.iter().any(|item| same_value(item, expected)),
        _ => false,
    }
}

fn str_pair<'a>(actual: Option<&'a Value>, expected: &'a Value) -> Option<(&'a str, &'a str)> {
    actual.and_then(|a| a.as_str()).zip(expected.as_str())
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn numeric_cmp(actual: Option<&Value>, expected: &Value) -> Option<std::cmp::Ordering> {
    let a = as_number(actual?)?;
    let b = as_number(expected)?;
    a.partial_cmp(&b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> Value {
        json!({
            "name": "add_to_cart",
            "properties": {
                "price": 25,
                "quantity": "3",
                "category": "shoes",
                "tags": ["sale", "new"],
                "sizes": [40, 41.5]
            },
            "context": {"page": {"url": "https://shop.example.com/checkout/step-1"}}
        })
    }

    fn check(field: &str, operator: FilterOperator, value: Value) -> bool {
        Filter::new(field, operator, value).matches(&record())
    }

    #[test]
    fn test_empty_filters_match() {
        assert!(matches(&record(), &[]));
        assert!(matches(&Value::Null, &[]));
    }

    #[test]
    fn test_equals_and_membership() {
        assert!(check("properties.category", FilterOperator::Equals, json!("shoes")));
        assert!(check(
            "properties.category",
            FilterOperator::Equals,
            json!(["hats", "shoes"])
        ));
        assert!(!check("properties.category", FilterOperator::Equals, json!("hats")));
        assert!(!check("properties.missing", FilterOperator::Equals, json!(null)));
    }

    #[test]
    fn test_integer_and_float_encodings_are_equal() {
        assert!(check("properties.price", FilterOperator::Equals, json!(25.0)));
        assert!(!check("properties.price", FilterOperator::NotEquals, json!(25.0)));
        assert!(check("properties.price", FilterOperator::Equals, json!([10.0, 25.0])));
        assert!(check("properties.sizes", FilterOperator::Contains, json!(40.0)));
        assert!(!check("properties.sizes", FilterOperator::NotContains, json!(40.0)));
        assert!(!check("properties.price", FilterOperator::Equals, json!("25")));
        assert!(!check("properties.price", FilterOperator::Equals, json!(25.5)));
    }

    #[test]
    fn test_not_equals_on_missing_field() {
        assert!(check("properties.missing", FilterOperator::NotEquals, json!("x")));
        assert!(!check("properties.price", FilterOperator::NotEquals, json!(25)));
    }

    #[test]
    fn test_contains_strings_and_arrays() {
        assert!(check("context.page.url", FilterOperator::Contains, json!("/checkout")));
        assert!(check("properties.tags", FilterOperator::Contains, json!("sale")));
        assert!(!check("properties.missing", FilterOperator::Contains, json!("a")));
        assert!(check("properties.missing", FilterOperator::NotContains, json!("a")));
        assert!(!check("properties.tags", FilterOperator::NotContains, json!("new")));
    }

    #[test]
    fn test_prefix_and_suffix() {
        assert!(check(
            "context.page.url",
            FilterOperator::StartsWith,
            json!("https://shop")
        ));
        assert!(check("context.page.url", FilterOperator::EndsWith, json!("step-1")));
        assert!(!check("properties.price", FilterOperator::StartsWith, json!("2")));
    }

    #[test]
    fn test_numeric_comparisons() {
        assert!(check("properties.price", FilterOperator::GreaterThan, json!(20)));
        assert!(check("properties.price", FilterOperator::LessThanOrEqual, json!(25)));
        assert!(check(
            "properties.quantity",
            FilterOperator::GreaterThanOrEqual,
            json!(3)
        ));
        assert!(!check("properties.category", FilterOperator::LessThan, json!(10)));
        assert!(!check("properties.missing", FilterOperator::GreaterThan, json!(0)));
    }

    #[test]
    fn test_conjunction_fails_on_any_filter() {
        let r = record();
        let passing = Filter::new("properties.price", FilterOperator::GreaterThan, json!(10));
        let failing = Filter::new("properties.category", FilterOperator::Equals, json!("hats"));
        assert!(matches(&r, &[passing.clone()]));
        assert!(!matches(&r, &[passing.clone(), failing.clone()]));
        assert!(!matches(&r, &[failing, passing]));
    }

    #[test]
    fn test_operator_serde_spelling() {
        let filter: Filter = serde_json::from_value(json!({
            "field": "properties.category",
            "operator": "not-contains",
            "value": "hat"
        }))
        .unwrap();
        assert_eq!(filter.operator, FilterOperator::NotContains);
        assert_eq!(
            serde_json::to_value(FilterOperator::GreaterThanOrEqual).unwrap(),
            json!(">=")
        );
    }
}
