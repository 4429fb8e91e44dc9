//! Nested parameter maps used for code and discovery parameters

use serde_json::{Map, Value};

/// Arbitrarily nested parameters, keyed by string
pub type NestedParameterMap = Map<String, Value>;

/// Flattens a nested map into dotted keys, e.g. `{"a": {"b": 1}}` becomes `{"a.b": "1"}`
pub fn flatten(params: &NestedParameterMap) -> std::collections::BTreeMap<String, String> {
    let mut result = std::collections::BTreeMap::new();
    flatten_into(params, "", &mut result);
    result
}

fn flatten_into(
    params: &NestedParameterMap,
    prefix: &str,
    out: &mut std::collections::BTreeMap<String, String>,
) {
    for (k, v) in params {
        let key = if prefix.is_empty() {
            k.clone()
        } else {
            format!("{}.{}", prefix, k)
        };
        match v {
            Value::Object(inner) => flatten_into(inner, &key, out),
            Value::String(s) => {
                out.insert(key, s.clone());
            }
            Value::Null => {
                out.insert(key, String::new());
            }
            other => {
                out.insert(key, other.to_string());
            }
        }
    }
}

/// Looks up a dotted path inside a JSON value
pub fn lookup<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = root;
    for segment in path {
        current = current.as_object()?.get(*segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten() {
        let params = json!({"image": "nginx", "resources": {"cpu": 2, "tier": "gold"}});
        let flat = flatten(params.as_object().unwrap());
        assert_eq!(flat.get("image").map(String::as_str), Some("nginx"));
        assert_eq!(flat.get("resources.cpu").map(String::as_str), Some("2"));
        assert_eq!(flat.get("resources.tier").map(String::as_str), Some("gold"));
    }

    #[test]
    fn test_lookup() {
        let root = json!({"User": {"Name": "alice"}});
        assert_eq!(lookup(&root, &["User", "Name"]), Some(&json!("alice")));
        assert!(lookup(&root, &["User", "Missing"]).is_none());
    }
}
