//! Related-object entries written alongside conditions

use k8s_openapi::api::apps::v1::Deployment;
use kube::api::DynamicObject;
use kube::ResourceExt;

use oppolicy_common::crd::olm::{
    CatalogSource, ClusterServiceVersion, InstallPlan, InstallPlanPhase, OperatorGroup,
};
use oppolicy_common::crd::{ComplianceState, RelatedObject};
use oppolicy_common::kube_utils::HasApiResource;

use super::conditions::csv_reason;

/// Name used when an entry stands in for "nothing found"
pub const PLACEHOLDER_NAME: &str = "-";

const REASON_MISSING: &str = "Resource not found but should exist";
const REASON_CREATED: &str = "Resource was created";
const REASON_FOUND: &str = "Resource found as expected";
const REASON_MISMATCH: &str = "Resource found but does not match";
const REASON_UPDATED: &str = "Resource was updated";

fn entry<K: HasApiResource>(
    namespace: &str,
    name: &str,
    compliant: Option<ComplianceState>,
    reason: impl Into<String>,
) -> RelatedObject {
    RelatedObject::new(K::API_VERSION, K::KIND, namespace, name, compliant, reason)
}

fn for_object<K: HasApiResource>(
    obj: &DynamicObject,
    compliant: Option<ComplianceState>,
    reason: impl Into<String>,
) -> RelatedObject {
    entry::<K>(
        &obj.namespace().unwrap_or_default(),
        &obj.name_any(),
        compliant,
        reason,
    )
}

/// A required object that does not exist
pub fn missing_wanted<K: HasApiResource>(namespace: &str, name: &str) -> RelatedObject {
    entry::<K>(namespace, name, Some(ComplianceState::NonCompliant), REASON_MISSING)
}

/// An object the controller just created
pub fn created<K: HasApiResource>(obj: &DynamicObject) -> RelatedObject {
    for_object::<K>(obj, Some(ComplianceState::Compliant), REASON_CREATED)
}

/// An existing object that matches
pub fn matched<K: HasApiResource>(obj: &DynamicObject) -> RelatedObject {
    for_object::<K>(obj, Some(ComplianceState::Compliant), REASON_FOUND)
}

/// An existing object that does not match
pub fn mismatched<K: HasApiResource>(obj: &DynamicObject) -> RelatedObject {
    for_object::<K>(obj, Some(ComplianceState::NonCompliant), REASON_MISMATCH)
}

/// An object the controller just updated
pub fn updated<K: HasApiResource>(obj: &DynamicObject) -> RelatedObject {
    for_object::<K>(obj, Some(ComplianceState::Compliant), REASON_UPDATED)
}

/// A NonCompliant object with a specific reason
pub fn non_compliant<K: HasApiResource>(obj: &DynamicObject, reason: &str) -> RelatedObject {
    for_object::<K>(obj, Some(ComplianceState::NonCompliant), reason)
}

/// One of several OperatorGroups in a namespace
pub fn extra_operator_group(obj: &DynamicObject) -> RelatedObject {
    for_object::<OperatorGroup>(
        obj,
        Some(ComplianceState::NonCompliant),
        "There is more than one OperatorGroup in this namespace",
    )
}

/// Placeholder for a namespace without relevant InstallPlans
pub fn no_install_plans(namespace: &str) -> RelatedObject {
    entry::<InstallPlan>(
        namespace,
        PLACEHOLDER_NAME,
        Some(ComplianceState::Compliant),
        "There are no relevant InstallPlans in this namespace",
    )
}

/// An InstallPlan owned by the subscription, annotated with its phase
pub fn install_plan(plan: &InstallPlan) -> RelatedObject {
    let compliant = match plan.phase {
        InstallPlanPhase::Complete => Some(ComplianceState::Compliant),
        _ => None,
    };
    entry::<InstallPlan>(
        &plan.namespace,
        &plan.name,
        compliant,
        format!("The InstallPlan is {}", plan.phase),
    )
}

/// Placeholder when no installed CSV is known
pub fn no_csv(namespace: &str) -> RelatedObject {
    entry::<ClusterServiceVersion>(
        namespace,
        PLACEHOLDER_NAME,
        Some(ComplianceState::NonCompliant),
        "No relevant ClusterServiceVersion found",
    )
}

/// The installed CSV and its state
pub fn existing_csv(csv: &ClusterServiceVersion) -> RelatedObject {
    let compliant = if csv.succeeded() {
        ComplianceState::Compliant
    } else {
        ComplianceState::NonCompliant
    };
    entry::<ClusterServiceVersion>(
        csv.metadata.namespace.as_deref().unwrap_or_default(),
        csv.metadata.name.as_deref().unwrap_or_default(),
        Some(compliant),
        csv_reason(csv),
    )
}

/// Placeholder when there are no deployments to check
pub fn no_deployments(namespace: &str) -> RelatedObject {
    entry::<Deployment>(namespace, PLACEHOLDER_NAME, None, "No relevant Deployments found")
}

/// An operator deployment and whether it is available
pub fn deployment(namespace: &str, name: &str, available: bool) -> RelatedObject {
    if available {
        entry::<Deployment>(namespace, name, Some(ComplianceState::Compliant), "Deployment Available")
    } else {
        entry::<Deployment>(namespace, name, Some(ComplianceState::NonCompliant), "Deployment Unavailable")
    }
}

/// A deployment whose state could not be read
pub fn undecodable_deployment(namespace: &str, name: &str) -> RelatedObject {
    entry::<Deployment>(namespace, name, None, "Deployment status could not be read")
}

/// The catalog source and its health
pub fn catalog_source(namespace: &str, name: &str, missing: bool, unhealthy: bool) -> RelatedObject {
    if missing {
        entry::<CatalogSource>(namespace, name, Some(ComplianceState::NonCompliant), REASON_MISSING)
    } else if unhealthy {
        entry::<CatalogSource>(
            namespace,
            name,
            Some(ComplianceState::NonCompliant),
            "Resource found as expected but is unhealthy",
        )
    } else {
        entry::<CatalogSource>(namespace, name, Some(ComplianceState::Compliant), REASON_FOUND)
    }
}

/// The catalog source exists but its state is unknown
pub fn catalog_source_unknown(namespace: &str, name: &str) -> RelatedObject {
    entry::<CatalogSource>(
        namespace,
        name,
        None,
        "Resource found but current state is unknown",
    )
}
