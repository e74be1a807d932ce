//! Deep merge of configuration mappings.
//!
//! | base \ overlay | mapping            | list / scalar / null |
//! |----------------|--------------------|----------------------|
//! | mapping        | merge key by key   | overlay replaces     |
//! | list / scalar  | overlay replaces   | overlay replaces     |
//!
//! Lists are never concatenated. Keys only present in `base` are kept.

use serde_json::{Map, Value};

/// Merge `overlay` on top of `base`, returning a new value.
pub fn deep_merge(base: &Value, overlay: &Value) -> Value {
  match (base, overlay) {
    (Value::Object(base_map), Value::Object(overlay_map)) => Value::Object(merge_maps(base_map, overlay_map)),
    (_, overlay) => overlay.clone(),
  }
}

fn merge_maps(base: &Map<String, Value>, overlay: &Map<String, Value>) -> Map<String, Value> {
  let mut merged = base.clone();
  for (key, value) in overlay {
    let next = match merged.get(key) {
      Some(existing) => deep_merge(existing, value),
      None => value.clone(),
    };
    merged.insert(key.clone(), next);
  }
  merged
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn mappings_merge_recursively() {
    let a = json!({"defaults": {"env": {"A": "1", "B": "1"}}});
    let b = json!({"defaults": {"env": {"B": "2", "C": "2"}}});
    assert_eq!(
      deep_merge(&a, &b),
      json!({"defaults": {"env": {"A": "1", "B": "2", "C": "2"}}})
    );
  }

  #[test]
  fn lists_are_replaced_not_concatenated() {
    let a = json!({"plugins": ["a", "b"]});
    let b = json!({"plugins": ["c"]});
    assert_eq!(deep_merge(&a, &b), json!({"plugins": ["c"]}));
  }

  #[test]
  fn scalar_replaces_mapping_and_back() {
    let a = json!({"world": {"host": "/srv/world"}});
    let b = json!({"world": "none"});
    assert_eq!(deep_merge(&a, &b), json!({"world": "none"}));
    assert_eq!(deep_merge(&b, &a), a);
  }

  #[test]
  fn null_overlay_replaces() {
    let a = json!({"branch": "main"});
    let b = json!({"branch": null});
    assert_eq!(deep_merge(&a, &b), json!({"branch": null}));
  }

  #[test]
  fn inputs_are_not_mutated() {
    let a = json!({"x": {"y": 1}});
    let b = json!({"x": {"z": 2}});
    let _ = deep_merge(&a, &b);
    assert_eq!(a, json!({"x": {"y": 1}}));
    assert_eq!(b, json!({"x": {"z": 2}}));
  }

  #[test]
  fn merging_same_overlay_twice_is_idempotent() {
    let a = json!({"servers": {"lobby": {"env": {"A": "1"}, "mods": {"modrinth": ["x"]}}}, "version": "0.1"});
    let b = json!({"servers": {"lobby": {"env": {"B": "2"}, "mods": {"modrinth": ["y"]}}}, "layers": {"l": {"url": "u"}}});
    let once = deep_merge(&a, &b);
    let twice = deep_merge(&once, &b);
    assert_eq!(once, twice);
  }

  #[test]
  fn empty_overlay_is_identity() {
    let a = json!({"version": "0.1", "servers": {}});
    assert_eq!(deep_merge(&a, &json!({})), a);
  }
}
