//! Structural comparison of a desired object against an existing one
//!
//! Objects are walked key by key. Under `musthave` the desired keys must be
//! present with the desired values and anything else may exist; under
//! `mustonlyhave` keys the desired object does not mention are removed too,
//! but only inside the top-level sections the desired object specifies.
//! Arrays are compared as whole values in both modes.

use serde_json::{Map, Value};

use oppolicy_common::crd::ComplianceType;

/// Result of merging a desired object into an existing one
#[derive(Clone, Debug, PartialEq)]
pub struct MergeResult {
    /// The existing object with the desired values applied
    pub merged: Value,
    /// Whether the existing object differed from what is required
    pub mismatch: bool,
}

/// Top-level keys that identify an object rather than describe it
const IDENTITY_KEYS: &[&str] = &["apiVersion", "kind", "status"];

/// Metadata sections the controller manages; everything else is server-owned
const MANAGED_METADATA_KEYS: &[&str] = &["labels", "annotations"];

/// Merge a desired resource into an existing one.
///
/// `metadata` is always merged additively so server-populated metadata is
/// never removed; `apiVersion`, `kind` and `status` are ignored.
pub fn merge_resource(desired: &Value, existing: &Value, mode: ComplianceType) -> MergeResult {
    let mut merged = existing.clone();
    let mut mismatch = false;

    let (Some(desired_map), Some(merged_map)) = (desired.as_object(), merged.as_object_mut())
    else {
        return MergeResult {
            merged: desired.clone(),
            mismatch: !values_equal(desired, existing),
        };
    };

    for (key, desired_value) in desired_map {
        if IDENTITY_KEYS.contains(&key.as_str()) {
            continue;
        }

        if key == "metadata" {
            let meta = merged_map
                .entry(key.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            mismatch |= merge_metadata(desired_value, meta);
            continue;
        }

        match merged_map.get_mut(key) {
            Some(existing_value) => {
                mismatch |= merge_value(desired_value, existing_value, mode);
            }
            None => {
                merged_map.insert(key.clone(), desired_value.clone());
                mismatch = true;
            }
        }
    }

    MergeResult { merged, mismatch }
}

fn merge_metadata(desired: &Value, existing: &mut Value) -> bool {
    let (Some(desired), Some(existing)) = (desired.as_object(), existing.as_object_mut()) else {
        return false;
    };

    let mut mismatch = false;
    for key in MANAGED_METADATA_KEYS {
        let Some(desired_value) = desired.get(*key) else {
            continue;
        };
        match existing.get_mut(*key) {
            Some(existing_value) => {
                mismatch |= merge_value(desired_value, existing_value, ComplianceType::MustHave);
            }
            None => {
                existing.insert((*key).to_string(), desired_value.clone());
                mismatch = true;
            }
        }
    }
    mismatch
}

/// Merge `desired` into `existing` in place; returns whether anything changed
pub fn merge_value(desired: &Value, existing: &mut Value, mode: ComplianceType) -> bool {
    match (desired, existing) {
        (Value::Object(desired_map), Value::Object(existing_map)) => {
            let mut mismatch = false;

            for (key, desired_value) in desired_map {
                match existing_map.get_mut(key) {
                    Some(existing_value) => {
                        mismatch |= merge_value(desired_value, existing_value, mode);
                    }
                    None => {
                        existing_map.insert(key.clone(), desired_value.clone());
                        mismatch = true;
                    }
                }
            }

            if mode == ComplianceType::MustOnlyHave {
                let before = existing_map.len();
                existing_map.retain(|key, _| desired_map.contains_key(key));
                mismatch |= existing_map.len() != before;
            }

            mismatch
        }
        (desired, existing) => {
            if values_equal(desired, existing) {
                false
            } else {
                *existing = desired.clone();
                true
            }
        }
    }
}

/// Deep equality where numbers compare by value, so `1` equals `1.0`
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                return x == y;
            }
            if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                return x == y;
            }
            match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(key, value)| y.get(key).is_some_and(|other| values_equal(value, other)))
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wrap(spec: Value) -> Value {
        json!({
            "apiVersion": "operators.coreos.com/v1",
            "kind": "OperatorGroup",
            "metadata": {"name": "og", "namespace": "ops"},
            "spec": spec
        })
    }

    /// Story: musthave tolerates extra keys, mustonlyhave removes them
    #[test]
    fn story_compliance_types_differ_on_extra_keys() {
        let desired = wrap(json!({"a": 1}));
        let existing = wrap(json!({"a": 2, "b": 3}));

        let must_have = merge_resource(&desired, &existing, ComplianceType::MustHave);
        assert!(must_have.mismatch);
        assert_eq!(must_have.merged["spec"], json!({"a": 1, "b": 3}));

        let must_only_have = merge_resource(&desired, &existing, ComplianceType::MustOnlyHave);
        assert!(must_only_have.mismatch);
        assert_eq!(must_only_have.merged["spec"], json!({"a": 1}));
    }

    /// Story: merging the merged result again is a no-op
    #[test]
    fn story_merge_is_idempotent() {
        let desired = wrap(json!({"targetNamespaces": ["ops"], "upgradeStrategy": {"name": "Default"}}));
        let existing = wrap(json!({"targetNamespaces": ["other"], "selector": {}}));

        for mode in [ComplianceType::MustHave, ComplianceType::MustOnlyHave] {
            let first = merge_resource(&desired, &existing, mode);
            assert!(first.mismatch);
            let second = merge_resource(&desired, &first.merged, mode);
            assert!(!second.mismatch, "{mode}");
            assert_eq!(second.merged, first.merged);
        }
    }

    #[test]
    fn extra_keys_match_under_musthave() {
        let desired = wrap(json!({"a": 1}));
        let existing = wrap(json!({"a": 1, "b": 3}));
        assert!(!merge_resource(&desired, &existing, ComplianceType::MustHave).mismatch);
        assert!(merge_resource(&desired, &existing, ComplianceType::MustOnlyHave).mismatch);
    }

    #[test]
    fn arrays_compare_as_whole_values() {
        let desired = wrap(json!({"targetNamespaces": ["a"]}));
        let existing = wrap(json!({"targetNamespaces": ["a", "b"]}));

        let result = merge_resource(&desired, &existing, ComplianceType::MustHave);
        assert!(result.mismatch);
        assert_eq!(result.merged["spec"]["targetNamespaces"], json!(["a"]));
    }

    #[test]
    fn numbers_compare_by_value() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(values_equal(&json!({"n": [2]}), &json!({"n": [2.0]})));
        assert!(!values_equal(&json!(1), &json!(2)));
        assert!(!values_equal(&json!(1), &json!("1")));
    }

    /// Story: server metadata survives mustonlyhave
    #[test]
    fn story_metadata_is_never_pruned() {
        let desired = json!({
            "metadata": {"name": "og", "namespace": "ops", "labels": {"team": "a"}},
            "spec": {}
        });
        let existing = json!({
            "metadata": {
                "name": "og",
                "namespace": "ops",
                "uid": "123",
                "labels": {"team": "a", "olm.managed": "true"},
                "annotations": {"olm.providedAPIs": "x"}
            },
            "spec": {},
            "status": {"lastUpdated": "now"}
        });

        let result = merge_resource(&desired, &existing, ComplianceType::MustOnlyHave);
        assert!(!result.mismatch);
        assert_eq!(result.merged, existing);
    }

    #[test]
    fn missing_labels_are_added() {
        let desired = json!({"metadata": {"labels": {"team": "a"}}});
        let existing = json!({"metadata": {"name": "og"}});

        let result = merge_resource(&desired, &existing, ComplianceType::MustHave);
        assert!(result.mismatch);
        assert_eq!(result.merged["metadata"]["labels"], json!({"team": "a"}));
    }

    #[test]
    fn missing_sections_are_added() {
        let desired = wrap(json!({"channel": "stable"}));
        let existing = json!({"metadata": {"name": "og"}});

        let result = merge_resource(&desired, &existing, ComplianceType::MustHave);
        assert!(result.mismatch);
        assert_eq!(result.merged["spec"], json!({"channel": "stable"}));
    }

    #[test]
    fn status_is_ignored() {
        let desired = json!({"spec": {"a": 1}, "status": {"phase": "x"}});
        let existing = json!({"spec": {"a": 1}, "status": {"phase": "y"}});
        assert!(!merge_resource(&desired, &existing, ComplianceType::MustOnlyHave).mismatch);
    }
}
