//! Shared Kubernetes utilities using kube-rs
//!
//! Helpers for addressing the OLM and core kinds the controller reads
//! through `DynamicObject`, plus small predicates over loosely typed objects.

use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use serde_json::Value;

// =============================================================================
// HasApiResource Trait
// =============================================================================

/// Trait for types that have a known API group, version, and kind.
///
/// Implement this for the object views so that the `ApiResource` used for
/// API calls always agrees with the apiVersion written into related objects.
///
/// # Example
/// ```ignore
/// impl HasApiResource for InstallPlan {
///     const API_VERSION: &'static str = "operators.coreos.com/v1alpha1";
///     const KIND: &'static str = "InstallPlan";
/// }
///
/// let ar = InstallPlan::api_resource();
/// ```
pub trait HasApiResource {
    /// Full API version (e.g., "operators.coreos.com/v1alpha1", "v1")
    const API_VERSION: &'static str;
    /// Resource kind (e.g., "Subscription")
    const KIND: &'static str;

    /// Build an ApiResource from the type's constants.
    fn api_resource() -> ApiResource {
        build_api_resource(Self::API_VERSION, Self::KIND)
    }
}

/// Build an ApiResource from a known apiVersion and kind.
///
/// The version you provide is used exactly.
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Split an apiVersion into (group, version); the core group is empty.
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

const KIND_PLURALS: &[(&str, &str)] = &[
    ("operatorgroup", "operatorgroups"),
    ("subscription", "subscriptions"),
    ("installplan", "installplans"),
    ("clusterserviceversion", "clusterserviceversions"),
    ("catalogsource", "catalogsources"),
    ("deployment", "deployments"),
    ("namespace", "namespaces"),
    ("operatorpolicy", "operatorpolicies"),
];

/// Convert a kind to its lowercase plural resource name
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    for (singular, plural) in KIND_PLURALS {
        if *singular == lower {
            return (*plural).to_string();
        }
    }

    // Fallback: simple pluralization
    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Whether a kube error rejects a write as forbidden or as an immutable-field change
pub fn is_forbidden_write(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(ae) => {
            ae.code == 403
                || ae.reason == "Forbidden"
                || (ae.code == 422 && ae.message.contains("immutable"))
        }
        _ => false,
    }
}

/// Remove server-managed fields from an object before comparing it.
///
/// Strips:
/// - metadata.resourceVersion, metadata.managedFields, metadata.generation
/// - metadata.creationTimestamp
/// - the whole status subtree
pub fn strip_volatile_fields(object: &mut Value) {
    let Some(map) = object.as_object_mut() else {
        return;
    };
    map.remove("status");
    if let Some(meta) = map.get_mut("metadata").and_then(Value::as_object_mut) {
        for key in [
            "resourceVersion",
            "managedFields",
            "generation",
            "creationTimestamp",
        ] {
            meta.remove(key);
        }
    }
}

/// Whether an object carries an owner reference matching (apiVersion, kind, name)
pub fn is_owned_by(obj: &DynamicObject, api_version: &str, kind: &str, name: &str) -> bool {
    obj.metadata
        .owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|owner| owner.api_version == api_version && owner.kind == kind && owner.name == name)
}
