//! Structural merge of `data` artifacts.
//!
//! Pure functions over [`serde_json::Value`]. YAML documents are read into
//! the same value type, so JSON and YAML artifacts merge alike.

use serde_json::{Map, Value};

use crate::errors::MergeError;

/// Merge `secondary` into `primary`; `primary` is the higher-priority side.
///
/// Objects merge key by key, recursively. Arrays concatenate, `primary`
/// items first, without deduplication. Any other collision keeps `primary`.
pub fn deep_merge(primary: &Value, secondary: &Value) -> Value {
    match (primary, secondary) {
        (Value::Object(p), Value::Object(s)) => {
            let mut merged = p.clone();
            for (key, s_value) in s {
                let value = match p.get(key) {
                    Some(p_value) => deep_merge(p_value, s_value),
                    None => s_value.clone(),
                };
                merged.insert(key.clone(), value);
            }
            Value::Object(merged)
        }
        (Value::Array(p), Value::Array(s)) => {
            Value::Array(p.iter().chain(s.iter()).cloned().collect())
        }
        _ => primary.clone(),
    }
}

/// Parse artifact text as a structured map. JSON first, then YAML.
pub fn parse_map(content: &str) -> Option<Map<String, Value>> {
    let value = serde_json::from_str::<Value>(content)
        .ok()
        .or_else(|| serde_yaml::from_str::<Value>(content).ok())?;
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Render a merged value in the format the key's extension implies.
pub fn render(key: &str, value: &Value) -> Result<String, MergeError> {
    let rendered = if key.ends_with(".json") {
        serde_json::to_string_pretty(value).map(|mut s| {
            s.push('\n');
            s
        })
        .map_err(|e| e.to_string())
    } else {
        serde_yaml::to_string(value).map_err(|e| e.to_string())
    };
    rendered.map_err(|detail| MergeError::SerializeFailed {
        key: key.to_string(),
        detail,
    })
}

/// Deep-merge two artifact texts when both are structured maps.
///
/// Returns `None` when either side is not a map, so the caller falls back to
/// its conflict strategy.
pub fn merge_documents(key: &str, primary: &str, secondary: &str) -> Option<Result<String, MergeError>> {
    let p = parse_map(primary)?;
    let s = parse_map(secondary)?;
    let merged = deep_merge(&Value::Object(p), &Value::Object(s));
    Some(render(key, &merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_disjoint_objects_union() {
        let merged = deep_merge(&json!({"a": 1}), &json!({"b": 2}));
        assert_eq!(merged, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_nested_objects_recurse() {
        let merged = deep_merge(
            &json!({"team": {"lead": "ana", "tags": ["x"]}}),
            &json!({"team": {"size": 4, "tags": ["y", "x"]}}),
        );
        assert_eq!(
            merged,
            json!({"team": {"lead": "ana", "size": 4, "tags": ["x", "y", "x"]}})
        );
    }

    #[test]
    fn test_scalar_collision_keeps_primary() {
        assert_eq!(deep_merge(&json!({"v": 1}), &json!({"v": 2})), json!({"v": 1}));
        assert_eq!(deep_merge(&json!({"v": [1]}), &json!({"v": "s"})), json!({"v": [1]}));
    }

    #[test]
    fn test_parse_map() {
        assert!(parse_map("{\"a\": 1}").is_some());
        assert!(parse_map("a: 1\nb:\n  c: [1, 2]\n").is_some());
        assert!(parse_map("just a sentence").is_none());
        assert!(parse_map("- 1\n- 2\n").is_none());
    }

    #[test]
    fn test_merge_documents_across_formats() {
        let out = merge_documents("data/team.json", "{\"a\": 1}", "b: 2\n")
            .unwrap()
            .unwrap();
        let value: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value, json!({"a": 1, "b": 2}));

        let out = merge_documents("data/team.yaml", "a: 1\n", "b: 2\n")
            .unwrap()
            .unwrap();
        let value: Value = serde_yaml::from_str(&out).unwrap();
        assert_eq!(value, json!({"a": 1, "b": 2}));

        assert!(merge_documents("data/x.yaml", "a: 1\n", "plain text").is_none());
    }
}
