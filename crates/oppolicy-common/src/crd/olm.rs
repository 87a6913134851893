//! Views of the OLM objects the controller supervises
//!
//! OLM owns these types; the controller only reads them (and builds desired
//! Subscriptions and OperatorGroups). Desired specs decode strictly so that
//! typos in a policy are reported. Observed views decode leniently and only
//! carry the fields the reconcilers look at.

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::api::DynamicObject;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::kube_utils::HasApiResource;
use crate::{Error, Result};

/// `installPlanApproval` value for automatic upgrades
pub const APPROVAL_AUTOMATIC: &str = "Automatic";
/// `installPlanApproval` value for gated upgrades
pub const APPROVAL_MANUAL: &str = "Manual";
/// Subscription condition OLM sets when dependency resolution fails
pub const SUBSCRIPTION_RESOLUTION_FAILED: &str = "ResolutionFailed";
/// CatalogSource gRPC connection state meaning healthy
pub const CATALOG_SOURCE_READY: &str = "READY";

// =============================================================================
// Desired specs (strict)
// =============================================================================

/// SubscriptionSpec as accepted from a policy. Unknown fields are rejected.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SubscriptionSpec {
    /// Catalog source name
    pub source: String,
    /// Namespace of the catalog source
    pub source_namespace: String,
    /// Package name
    pub name: String,
    /// Channel to follow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// CSV to start from
    #[serde(
        default,
        rename = "startingCSV",
        skip_serializing_if = "Option::is_none"
    )]
    pub starting_csv: Option<String>,
    /// "Automatic" or "Manual"
    #[serde(default)]
    pub install_plan_approval: String,
    /// Operator deployment overrides, passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

/// OperatorGroupSpec as accepted from a policy. Unknown fields are rejected.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OperatorGroupSpec {
    /// Selects target namespaces by label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
    /// Explicit target namespaces; empty means all namespaces
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_namespaces: Vec<String>,
    /// Service account used to install operators in the group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    /// Whether provided APIs are managed statically
    #[serde(
        default,
        rename = "staticProvidedAPIs",
        skip_serializing_if = "Option::is_none"
    )]
    pub static_provided_apis: Option<bool>,
    /// Upgrade strategy, passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_strategy: Option<serde_json::Value>,
}

// =============================================================================
// Observed views (lenient)
// =============================================================================

/// A Subscription as observed on the cluster
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Subscription {
    /// Object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Spec fields the controller needs downstream
    #[serde(default)]
    pub spec: ObservedSubscriptionSpec,
    /// Status maintained by OLM
    #[serde(default)]
    pub status: SubscriptionStatus,
}

/// The parts of a live SubscriptionSpec used after reconciliation
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedSubscriptionSpec {
    /// Package name
    #[serde(default)]
    pub name: String,
    /// Catalog source name
    #[serde(default)]
    pub source: String,
    /// Namespace of the catalog source
    #[serde(default)]
    pub source_namespace: String,
}

/// Subscription status maintained by OLM
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    /// Name of the CSV currently installed
    #[serde(default, rename = "installedCSV")]
    pub installed_csv: Option<String>,
    /// Reference to the InstallPlan OLM is currently working on
    #[serde(default)]
    pub install_plan_ref: Option<NamedReference>,
    /// Conditions reported by OLM
    #[serde(default)]
    pub conditions: Vec<SubscriptionCondition>,
}

/// A reference carrying at least a name
#[derive(Clone, Debug, Default, Deserialize)]
pub struct NamedReference {
    /// Referenced object name
    #[serde(default)]
    pub name: String,
}

/// One condition in a Subscription status
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionCondition {
    /// Condition type
    #[serde(rename = "type")]
    pub type_: String,
    /// "True", "False" or "Unknown"
    #[serde(default)]
    pub status: String,
    /// Machine-readable reason
    #[serde(default)]
    pub reason: String,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
    /// When the condition last changed
    #[serde(default)]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Subscription {
    /// The subscription's name
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// The subscription's namespace
    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    /// The ResolutionFailed condition, if OLM currently reports it as True
    pub fn resolution_failure(&self) -> Option<&SubscriptionCondition> {
        self.status
            .conditions
            .iter()
            .find(|c| c.type_ == SUBSCRIPTION_RESOLUTION_FAILED && c.status == "True")
    }

    /// Name of the installed CSV, if OLM has recorded one
    pub fn installed_csv(&self) -> Option<&str> {
        self.status
            .installed_csv
            .as_deref()
            .filter(|name| !name.is_empty())
    }

    /// Name of the InstallPlan OLM is currently working on
    pub fn current_install_plan(&self) -> Option<&str> {
        self.status
            .install_plan_ref
            .as_ref()
            .map(|r| r.name.as_str())
            .filter(|name| !name.is_empty())
    }
}

/// Lifecycle phase of an InstallPlan
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstallPlanPhase {
    /// OLM is computing the plan
    Planning,
    /// Waiting for `spec.approved`
    RequiresApproval,
    /// Being applied
    Installing,
    /// Applied successfully
    Complete,
    /// Failed to apply
    Failed,
    /// A phase this controller does not interpret
    Other(String),
    /// No phase reported
    Unknown,
}

impl InstallPlanPhase {
    /// Parse the phase string reported in status
    pub fn parse(phase: &str) -> Self {
        match phase {
            "" => Self::Unknown,
            "Planning" => Self::Planning,
            "RequiresApproval" => Self::RequiresApproval,
            "Installing" => Self::Installing,
            "Complete" => Self::Complete,
            "Failed" => Self::Failed,
            other => Self::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for InstallPlanPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Planning => write!(f, "Planning"),
            Self::RequiresApproval => write!(f, "RequiresApproval"),
            Self::Installing => write!(f, "Installing"),
            Self::Complete => write!(f, "Complete"),
            Self::Failed => write!(f, "Failed"),
            Self::Other(phase) => write!(f, "{phase}"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// An InstallPlan as observed on the cluster
#[derive(Clone, Debug)]
pub struct InstallPlan {
    /// Plan name
    pub name: String,
    /// Plan namespace
    pub namespace: String,
    /// Observed phase
    pub phase: InstallPlanPhase,
    /// CSVs the plan would install; `None` when the field is missing or malformed
    pub csv_names: Option<Vec<String>>,
    /// Current value of `spec.approved`
    pub approved: bool,
}

impl InstallPlan {
    /// Read an InstallPlan out of a dynamic object without failing on odd shapes
    pub fn from_dynamic(obj: &DynamicObject) -> Self {
        let phase = obj
            .data
            .pointer("/status/phase")
            .and_then(serde_json::Value::as_str)
            .map(InstallPlanPhase::parse)
            .unwrap_or(InstallPlanPhase::Unknown);

        let csv_names = obj
            .data
            .pointer("/spec/clusterServiceVersionNames")
            .and_then(|v| serde_json::from_value::<Vec<String>>(v.clone()).ok());

        let approved = obj
            .data
            .pointer("/spec/approved")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);

        Self {
            name: obj.metadata.name.clone().unwrap_or_default(),
            namespace: obj.metadata.namespace.clone().unwrap_or_default(),
            phase,
            csv_names,
            approved,
        }
    }
}

/// A ClusterServiceVersion as observed on the cluster
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ClusterServiceVersion {
    /// Object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Spec fields used to find operator deployments
    #[serde(default)]
    pub spec: CsvSpec,
    /// Install status
    #[serde(default)]
    pub status: CsvStatus,
}

/// ClusterServiceVersion spec subset
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CsvSpec {
    /// Install strategy
    #[serde(default)]
    pub install: InstallStrategy,
}

/// ClusterServiceVersion install strategy
#[derive(Clone, Debug, Default, Deserialize)]
pub struct InstallStrategy {
    /// Strategy details
    #[serde(default)]
    pub spec: InstallStrategySpec,
}

/// Deployments the install strategy creates
#[derive(Clone, Debug, Default, Deserialize)]
pub struct InstallStrategySpec {
    /// Named deployment specs
    #[serde(default)]
    pub deployments: Vec<NamedReference>,
}

/// ClusterServiceVersion status subset
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CsvStatus {
    /// Install phase (e.g., Succeeded, Failed)
    #[serde(default)]
    pub phase: String,
    /// Machine-readable reason for the phase
    #[serde(default)]
    pub reason: String,
    /// Human-readable message for the phase
    #[serde(default)]
    pub message: String,
}

impl ClusterServiceVersion {
    /// Whether the install strategy completed
    pub fn succeeded(&self) -> bool {
        self.status.phase == "Succeeded"
    }

    /// Names of the deployments the install strategy manages
    pub fn deployment_names(&self) -> impl Iterator<Item = &str> {
        self.spec
            .install
            .spec
            .deployments
            .iter()
            .map(|d| d.name.as_str())
    }
}

/// A CatalogSource as observed on the cluster
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CatalogSource {
    /// Object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Health status
    #[serde(default)]
    pub status: CatalogSourceStatus,
}

/// CatalogSource status subset
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSourceStatus {
    /// gRPC connection state, absent until OLM has connected once
    #[serde(default)]
    pub connection_state: Option<GrpcConnectionState>,
}

/// CatalogSource gRPC connection state
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrpcConnectionState {
    /// Last observed state, e.g. READY or TRANSIENT_FAILURE
    #[serde(default)]
    pub last_observed_state: String,
}

// =============================================================================
// API resources
// =============================================================================

/// Marker for the OperatorGroup kind
pub struct OperatorGroup;

impl HasApiResource for OperatorGroup {
    const API_VERSION: &'static str = "operators.coreos.com/v1";
    const KIND: &'static str = "OperatorGroup";
}

impl HasApiResource for Subscription {
    const API_VERSION: &'static str = "operators.coreos.com/v1alpha1";
    const KIND: &'static str = "Subscription";
}

impl HasApiResource for InstallPlan {
    const API_VERSION: &'static str = "operators.coreos.com/v1alpha1";
    const KIND: &'static str = "InstallPlan";
}

impl HasApiResource for ClusterServiceVersion {
    const API_VERSION: &'static str = "operators.coreos.com/v1alpha1";
    const KIND: &'static str = "ClusterServiceVersion";
}

impl HasApiResource for CatalogSource {
    const API_VERSION: &'static str = "operators.coreos.com/v1alpha1";
    const KIND: &'static str = "CatalogSource";
}

impl HasApiResource for Deployment {
    const API_VERSION: &'static str = "apps/v1";
    const KIND: &'static str = "Deployment";
}

impl HasApiResource for Namespace {
    const API_VERSION: &'static str = "v1";
    const KIND: &'static str = "Namespace";
}

/// Decode a dynamic object into a typed view
pub fn from_dynamic<T>(obj: &DynamicObject) -> Result<T>
where
    T: DeserializeOwned + HasApiResource,
{
    let value = serde_json::to_value(obj)
        .map_err(|e| Error::serialization_for_kind(T::KIND, e.to_string()))?;
    serde_json::from_value(value).map_err(|e| Error::serialization_for_kind(T::KIND, e.to_string()))
}
