//! String templates rendered against an event record using `{{path}}`
//! placeholders.

use serde_json::Value;

use crate::error::{MappingError, MappingResult};
use crate::path;

/// Render `template`, replacing every `{{ path }}` with the value found at
/// that path in `record`. Absent and `null` values render as an empty
/// string; strings render unquoted; anything else renders as JSON.
pub fn render(template: &str, record: &Value) -> MappingResult<String> {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        result.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let end = after_open.find("}}").ok_or_else(|| MappingError::Template {
            template: template.to_string(),
            reason: "unclosed placeholder".into(),
        })?;

        let key = after_open[..end].trim();
        let spec = path::PathSpec::parse(key).map_err(|e| MappingError::Template {
            template: template.to_string(),
            reason: e.to_string(),
        })?;
        match spec.get(record) {
            None | Some(Value::Null) => {}
            Some(Value::String(s)) => result.push_str(&s),
            Some(Value::Number(n)) => result.push_str(&render_number(&n)),
            Some(other) => result.push_str(&other.to_string()),
        }

        rest = &after_open[end + 2..];
    }

    result.push_str(rest);
    Ok(result)
}

/// Whole-valued floats render without a fraction (`42.0` as `42`).
fn render_number(n: &serde_json::Number) -> String {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 => {
            format!("{}", f as i64)
        }
        _ => n.to_string(),
    }
}
