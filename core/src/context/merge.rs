//! Deterministic merge rule for context inheritance.
//!
//! Applied root-to-leaf while resolving and again when a delegation payload
//! lands on its target: dictionaries deep-merge with child keys overriding,
//! lists concatenate parent-first without deduplication, scalars are
//! child-wins, and an explicit `null` in the child never unsets the parent
//! value.

use serde_json::{Map, Value};

/// Merge `child` into `base` in place, following the context merge rule.
pub fn merge_into(base: &mut Value, child: &Value) {
    match (base, child) {
        (Value::Object(base_map), Value::Object(child_map)) => {
            merge_objects(base_map, child_map);
        }
        (base_slot, child_value) => {
            if !child_value.is_null() {
                *base_slot = child_value.clone();
            }
        }
    }
}

fn merge_objects(base: &mut Map<String, Value>, child: &Map<String, Value>) {
    for (key, child_value) in child {
        match base.get_mut(key) {
            Some(base_value) => match (base_value, child_value) {
                (Value::Object(base_map), Value::Object(child_map)) => {
                    merge_objects(base_map, child_map);
                }
                (Value::Array(base_items), Value::Array(child_items)) => {
                    base_items.extend(child_items.iter().cloned());
                }
                (base_slot, child_value) => {
                    // null means unset: the parent value stays
                    if !child_value.is_null() {
                        *base_slot = child_value.clone();
                    }
                }
            },
            None => {
                if !child_value.is_null() {
                    base.insert(key.clone(), child_value.clone());
                }
            }
        }
    }
}

/// Merge an ordered sequence of layers, root first, into one object.
pub fn merge_layers<'a>(layers: impl IntoIterator<Item = &'a Value>) -> Value {
    let mut merged = Value::Object(Map::new());
    for layer in layers {
        merge_into(&mut merged, layer);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_child_scalar_overrides_parent() {
        let mut base = json!({"style": "black", "depth": 1});
        merge_into(&mut base, &json!({"style": "isort"}));
        assert_eq!(base, json!({"style": "isort", "depth": 1}));
    }

    #[test]
    fn test_null_does_not_unset() {
        let mut base = json!({"style": "black"});
        merge_into(&mut base, &json!({"style": null, "extra": null}));
        assert_eq!(base, json!({"style": "black"}));
    }

    #[test]
    fn test_nested_objects_deep_merge() {
        let mut base = json!({"rules": {"style": "black", "linter": "ruff"}});
        merge_into(&mut base, &json!({"rules": {"style": "isort"}}));
        assert_eq!(
            base,
            json!({"rules": {"style": "isort", "linter": "ruff"}})
        );
    }

    #[test]
    fn test_lists_concatenate_without_dedup() {
        let mut base = json!({"lists": ["g", "p"]});
        merge_into(&mut base, &json!({"lists": ["p", "t"]}));
        assert_eq!(base, json!({"lists": ["g", "p", "p", "t"]}));
    }

    #[test]
    fn test_type_mismatch_child_wins() {
        let mut base = json!({"value": {"nested": true}});
        merge_into(&mut base, &json!({"value": "flat"}));
        assert_eq!(base, json!({"value": "flat"}));
    }

    #[test]
    fn test_merge_layers_four_tiers() {
        // The four-tier merge from the inheritance scenario
        let global = json!({"rules": {"style": "black"}, "lists": ["g"]});
        let project = json!({"rules": {"linter": "ruff"}, "lists": ["p"]});
        let branch = json!({"lists": ["b"]});
        let task = json!({"rules": {"style": "isort"}, "lists": ["t"]});

        let merged = merge_layers([&global, &project, &branch, &task]);
        assert_eq!(
            merged,
            json!({
                "rules": {"style": "isort", "linter": "ruff"},
                "lists": ["g", "p", "b", "t"],
            })
        );
    }

    #[test]
    fn test_merge_is_deterministic() {
        let layers = [
            json!({"a": {"b": [1, 2], "c": 1}}),
            json!({"a": {"b": [3], "d": null}}),
        ];
        let first = merge_layers(layers.iter());
        let second = merge_layers(layers.iter());
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }
}
