//! OperatorPolicy CRD
//!
//! An OperatorPolicy declares which OLM package should be subscribed to, the
//! OperatorGroup topology it needs, which installed versions are acceptable,
//! and whether violations are only reported or actively fixed.

use std::collections::BTreeSet;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ComplianceState, Condition, RelatedObject};

/// OperatorPolicy declares the desired installation of an OLM-managed operator.
///
/// Example:
/// ```yaml
/// apiVersion: policy.open-cluster-management.io/v1beta1
/// kind: OperatorPolicy
/// metadata:
///   name: install-quay
///   namespace: managed
/// spec:
///   remediationAction: enforce
///   complianceType: musthave
///   subscription:
///     namespace: quay-ns
///     channel: stable-3.8
///     name: project-quay
///     source: operatorhubio-catalog
///     sourceNamespace: olm
///     installPlanApproval: Automatic
///   versions:
///     - quay-operator.v3.8.1
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "policy.open-cluster-management.io",
    version = "v1beta1",
    kind = "OperatorPolicy",
    namespaced,
    status = "OperatorPolicyStatus",
    printcolumn = r#"{"name":"Remediation","type":"string","jsonPath":".spec.remediationAction"}"#,
    printcolumn = r#"{"name":"Compliance","type":"string","jsonPath":".status.complianceState"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OperatorPolicySpec {
    /// Whether violations are only reported (inform) or also fixed (enforce)
    pub remediation_action: RemediationAction,

    /// How existing objects are compared against the desired ones
    #[serde(default)]
    pub compliance_type: ComplianceType,

    /// Subscription fragment: a SubscriptionSpec plus an optional `namespace`
    pub subscription: serde_json::Value,

    /// OperatorGroup fragment: `name`, optional `namespace`, and OperatorGroupSpec fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_group: Option<serde_json::Value>,

    /// ClusterServiceVersion names that may be approved for installation.
    /// Empty means any version is acceptable.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<String>,
}

/// Remediation mode
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RemediationAction {
    /// Report violations only
    #[serde(alias = "Inform")]
    Inform,
    /// Report violations and mutate the cluster to fix them
    #[serde(alias = "Enforce")]
    Enforce,
}

impl RemediationAction {
    /// True when only reporting
    pub fn is_inform(self) -> bool {
        self == Self::Inform
    }

    /// True when allowed to mutate the cluster
    pub fn is_enforce(self) -> bool {
        self == Self::Enforce
    }
}

/// Comparison mode between a desired partial object and the live object
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComplianceType {
    /// Desired fields must be present; extra fields are tolerated
    #[default]
    #[serde(alias = "MustHave")]
    MustHave,
    /// Desired fields must match exactly, with no extra fields inside them
    #[serde(alias = "MustOnlyHave")]
    MustOnlyHave,
}

impl std::fmt::Display for ComplianceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MustHave => write!(f, "musthave"),
            Self::MustOnlyHave => write!(f, "mustonlyhave"),
        }
    }
}

/// OperatorPolicy status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperatorPolicyStatus {
    /// Overall verdict
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance_state: Option<ComplianceState>,

    /// One condition per dependency dimension
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Objects examined by the policy, grouped by kind
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_objects: Vec<RelatedObject>,
}

impl OperatorPolicyStatus {
    /// Look up a condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Set a condition, returning whether anything visible changed.
    ///
    /// The transition time is kept when (status, reason) is unchanged, so a
    /// message-only update changes the status but is not a transition.
    pub fn set_condition(&mut self, mut cond: Condition) -> bool {
        match self.conditions.iter_mut().find(|c| c.type_ == cond.type_) {
            Some(existing) => {
                if existing.same_state(&cond) {
                    if existing.message == cond.message {
                        return false;
                    }
                    cond.last_transition_time = existing.last_transition_time;
                }
                *existing = cond;
                true
            }
            None => {
                self.conditions.push(cond);
                true
            }
        }
    }

    /// Replace every related object of each kind present in `objects`.
    ///
    /// Kinds not present in `objects` are left untouched.
    pub fn replace_related_objects(&mut self, objects: Vec<RelatedObject>) -> bool {
        let kinds: BTreeSet<String> = objects.iter().map(|o| o.kind.clone()).collect();
        if kinds.is_empty() {
            return false;
        }

        let (old, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.related_objects)
            .into_iter()
            .partition(|o| kinds.contains(&o.kind));

        let changed = old != objects;
        self.related_objects = kept;
        self.related_objects.extend(objects);
        changed
    }

    /// Related objects of one kind
    pub fn related_of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a RelatedObject> {
        self.related_objects.iter().filter(move |o| o.kind == kind)
    }
}
