//! Cascade merge over configuration documents
//!
//! Later layers win. Mappings merge key by key, everything else
//! (lists included) is replaced wholesale.

use serde_json::{Map, Value};

/// Merge `overlay` on top of `base`, returning a fresh value.
///
/// Neither input is touched and the result shares no structure with them.
///
/// - Object + object: recurse per key
/// - Anything else: `overlay` replaces `base` (this includes `null` and lists)
pub fn deep_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut merged: Map<String, Value> = base_map.clone();
            for (key, incoming) in overlay_map {
                let value = match base_map.get(key) {
                    Some(existing) => deep_merge(existing, incoming),
                    None => incoming.clone(),
                };
                merged.insert(key.clone(), value);
            }
            Value::Object(merged)
        }
        (_, incoming) => incoming.clone(),
    }
}

/// Fold layers in precedence order (first is lowest).
pub fn merge_layers<'a, I>(layers: I) -> Value
where
    I: IntoIterator<Item = &'a Value>,
{
    layers
        .into_iter()
        .fold(Value::Object(Map::new()), |acc, layer| deep_merge(&acc, layer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_override() {
        let base = json!({"version": "1.0.0"});
        let overlay = json!({"version": "1.0.1"});
        assert_eq!(deep_merge(&base, &overlay)["version"], "1.0.1");
    }

    #[test]
    fn test_list_replaced_not_concatenated() {
        let base = json!({"include_dirs": ["src", "assets", "templates"]});
        let overlay = json!({"include_dirs": ["src"]});
        let merged = deep_merge(&base, &overlay);

        assert_eq!(merged["include_dirs"], json!(["src"]));
    }

    #[test]
    fn test_nested_mapping_merges() {
        let base = json!({"release": {"repository": "a", "notes": true}});
        let overlay = json!({"release": {"repository": "b"}});
        let merged = deep_merge(&base, &overlay);

        assert_eq!(merged["release"]["repository"], "b");
        assert_eq!(merged["release"]["notes"], true);
    }

    #[test]
    fn test_mapping_replaced_by_scalar() {
        let base = json!({"release": {"repository": "a"}});
        let overlay = json!({"release": false});
        assert_eq!(deep_merge(&base, &overlay)["release"], false);
    }

    #[test]
    fn test_null_overrides() {
        let base = json!({"output_dir": "dist"});
        let overlay = json!({"output_dir": null});
        assert!(deep_merge(&base, &overlay)["output_dir"].is_null());
    }

    #[test]
    fn test_inputs_untouched() {
        let base = json!({"a": {"b": 1}, "keep": true});
        let overlay = json!({"a": {"c": 2}});
        let base_before = base.clone();
        let overlay_before = overlay.clone();

        let first = deep_merge(&base, &overlay);
        let second = deep_merge(&base, &overlay);

        assert_eq!(base, base_before);
        assert_eq!(overlay, overlay_before);
        assert_eq!(first, second);
    }

    #[test]
    fn test_merge_layers_precedence() {
        let default = json!({"version": "1.0.0", "environment": "production", "fail_on_missing": true});
        let env = json!({"environment": "development"});
        let local = json!({"fail_on_missing": false});
        let cli = json!({"version": "2.0.0"});

        let merged = merge_layers([&default, &env, &local, &cli]);

        assert_eq!(merged["version"], "2.0.0");
        assert_eq!(merged["environment"], "development");
        assert_eq!(merged["fail_on_missing"], false);
    }

    #[test]
    fn test_merge_no_layers_is_empty_object() {
        let merged = merge_layers(std::iter::empty::<&Value>());
        assert_eq!(merged, json!({}));
    }
}
