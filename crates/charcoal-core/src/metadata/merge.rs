//! Recursive merge of metadata layers.
//!
//! Objects merge key-wise, arrays are replaced index-wise, and any other
//! value from the overriding layer replaces the base value.

use serde_json::Value;

/// Merge `overlay` into `base` in place.
pub fn merge_into(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge_into(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (Value::Array(base_items), Value::Array(overlay_items)) => {
            for (i, value) in overlay_items.iter().enumerate() {
                match base_items.get_mut(i) {
                    Some(existing) => merge_into(existing, value),
                    None => base_items.push(value.clone()),
                }
            }
        }
        (slot, value) => *slot = value.clone(),
    }
}

/// Merge two layers into a new value; `b` overrides `a`.
#[must_use]
pub fn merge_recursive(a: &Value, b: &Value) -> Value {
    let mut merged = a.clone();
    merge_into(&mut merged, b);
    merged
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_are_overridden() {
        let merged = merge_recursive(&json!({"a": 1, "b": 2}), &json!({"b": 3}));
        assert_eq!(merged, json!({"a": 1, "b": 3}));
    }

    #[test]
    fn nested_objects_merge_key_wise() {
        let a = json!({"properties": {"id": {"type": "id"}, "title": {"type": "string"}}});
        let b = json!({"properties": {"title": {"l10n": true}, "body": {"type": "text"}}});
        let merged = merge_recursive(&a, &b);

        assert_eq!(merged["properties"]["id"]["type"], "id");
        assert_eq!(merged["properties"]["title"]["type"], "string");
        assert_eq!(merged["properties"]["title"]["l10n"], true);
        assert_eq!(merged["properties"]["body"]["type"], "text");
    }

    #[test]
    fn arrays_replace_by_index() {
        let merged = merge_recursive(&json!({"l": [1, 2, 3]}), &json!({"l": [9]}));
        assert_eq!(merged, json!({"l": [9, 2, 3]}));
    }

    #[test]
    fn type_change_replaces_value() {
        let merged = merge_recursive(&json!({"a": {"x": 1}}), &json!({"a": "flat"}));
        assert_eq!(merged, json!({"a": "flat"}));
    }
}
