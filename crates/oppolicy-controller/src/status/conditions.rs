//! Condition vocabulary
//!
//! Each dependency dimension owns one condition type. Reasons and messages
//! here are user-visible and stable.

use oppolicy_common::crd::olm::{ClusterServiceVersion, SubscriptionCondition, SUBSCRIPTION_RESOLUTION_FAILED};
use oppolicy_common::crd::{Condition, ConditionStatus};

/// Type of the overall summary condition
pub const COMPLIANT_CONDITION_TYPE: &str = "Compliant";

/// One dimension of the policy's status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionKind {
    /// Whether the policy spec itself is valid
    Valid,
    /// The OperatorGroup in the operator namespace
    OperatorGroup,
    /// The Subscription
    Subscription,
    /// InstallPlans owned by the Subscription
    InstallPlan,
    /// The installed ClusterServiceVersion
    ClusterServiceVersion,
    /// Deployments from the CSV install strategy
    Deployment,
    /// The CatalogSource the Subscription reads from
    CatalogSource,
}

impl ConditionKind {
    /// Dimensions in pipeline order, which is also summary order
    pub const ALL: [ConditionKind; 7] = [
        ConditionKind::Valid,
        ConditionKind::OperatorGroup,
        ConditionKind::Subscription,
        ConditionKind::InstallPlan,
        ConditionKind::ClusterServiceVersion,
        ConditionKind::Deployment,
        ConditionKind::CatalogSource,
    ];

    /// Condition type written to status
    pub fn condition_type(self) -> &'static str {
        match self {
            ConditionKind::Valid => "ValidPolicySpec",
            ConditionKind::OperatorGroup => "OperatorGroupCompliant",
            ConditionKind::Subscription => "SubscriptionCompliant",
            ConditionKind::InstallPlan => "InstallPlanCompliant",
            ConditionKind::ClusterServiceVersion => "ClusterServiceVersionCompliant",
            ConditionKind::Deployment => "DeploymentCompliant",
            ConditionKind::CatalogSource => "CatalogSourcesUnhealthy",
        }
    }

    /// Object kind the dimension is about
    pub fn object_kind(self) -> &'static str {
        match self {
            ConditionKind::Valid => "OperatorPolicy",
            ConditionKind::OperatorGroup => "OperatorGroup",
            ConditionKind::Subscription => "Subscription",
            ConditionKind::InstallPlan => "InstallPlan",
            ConditionKind::ClusterServiceVersion => "ClusterServiceVersion",
            ConditionKind::Deployment => "Deployment",
            ConditionKind::CatalogSource => "CatalogSource",
        }
    }

    /// Condition status that counts as compliant.
    ///
    /// `CatalogSourcesUnhealthy` is phrased negatively, so it is compliant when False.
    pub fn compliant_status(self) -> ConditionStatus {
        match self {
            ConditionKind::CatalogSource => ConditionStatus::False,
            _ => ConditionStatus::True,
        }
    }

    /// Summary text used when the dimension has no condition yet
    pub fn unknown_message(self) -> String {
        match self {
            ConditionKind::Valid => "the validity of the policy is unknown".to_string(),
            kind => format!("the status of the {} is unknown", kind.object_kind()),
        }
    }

    fn condition(self, status: ConditionStatus, reason: impl Into<String>, message: impl Into<String>) -> Condition {
        Condition::new(self.condition_type(), status, reason, message)
    }
}

// =============================================================================
// Validity
// =============================================================================

/// Summarize validation problems found while building desired objects
pub fn validation(errors: &[String]) -> Condition {
    if errors.is_empty() {
        ConditionKind::Valid.condition(ConditionStatus::True, "PolicyValidated", "the policy spec is valid")
    } else {
        ConditionKind::Valid.condition(ConditionStatus::False, "InvalidPolicySpec", errors.join(", "))
    }
}

/// The dimension cannot be evaluated because the policy is invalid
pub fn invalid_causing_unknown(kind: ConditionKind) -> Condition {
    kind.condition(
        ConditionStatus::Unknown,
        "InvalidPolicySpec",
        format!(
            "the {} could not be determined because the policy is invalid",
            kind.object_kind()
        ),
    )
}

// =============================================================================
// Generic object lifecycle
// =============================================================================

/// A required object does not exist
pub fn missing(kind: ConditionKind) -> Condition {
    let k = kind.object_kind();
    kind.condition(
        ConditionStatus::False,
        format!("{k}Missing"),
        format!("the {k} required by the policy was not found"),
    )
}

/// A required object was created
pub fn created(kind: ConditionKind) -> Condition {
    let k = kind.object_kind();
    kind.condition(
        ConditionStatus::True,
        format!("{k}Created"),
        format!("the {k} required by the policy was created"),
    )
}

/// An existing object matches the policy
pub fn matches(kind: ConditionKind) -> Condition {
    let k = kind.object_kind();
    kind.condition(
        ConditionStatus::True,
        format!("{k}Matches"),
        format!("the {k} matches what is required by the policy"),
    )
}

/// An existing object differs from the policy
pub fn mismatch(kind: ConditionKind) -> Condition {
    let k = kind.object_kind();
    kind.condition(
        ConditionStatus::False,
        format!("{k}Mismatch"),
        format!("the {k} found on the cluster does not match the policy"),
    )
}

/// An existing object differs and the API server refuses the fix
pub fn mismatch_unfixable(kind: ConditionKind) -> Condition {
    let k = kind.object_kind();
    kind.condition(
        ConditionStatus::False,
        format!("{k}MismatchUnfixable"),
        format!("the {k} found on the cluster does not match the policy and can't be enforced"),
    )
}

/// An existing object was updated to match
pub fn updated(kind: ConditionKind) -> Condition {
    let k = kind.object_kind();
    kind.condition(
        ConditionStatus::True,
        format!("{k}Updated"),
        format!("the {k} was updated to match the policy"),
    )
}

// =============================================================================
// OperatorGroup
// =============================================================================

/// The policy does not specify a group and one already exists
pub fn operator_group_preexisting() -> Condition {
    ConditionKind::OperatorGroup.condition(
        ConditionStatus::True,
        "PreexistingOperatorGroupFound",
        "the policy does not specify an OperatorGroup but one already exists in the namespace - assuming that OperatorGroup is correct",
    )
}

/// More than one group exists in the namespace
pub fn operator_group_too_many() -> Condition {
    ConditionKind::OperatorGroup.condition(
        ConditionStatus::False,
        "TooManyOperatorGroups",
        "there is more than one OperatorGroup in the namespace",
    )
}

// =============================================================================
// Subscription
// =============================================================================

/// OLM failed to resolve the subscription's dependencies
pub fn subscription_resolution_failed(failure: &SubscriptionCondition) -> Condition {
    let reason = if failure.reason.is_empty() {
        SUBSCRIPTION_RESOLUTION_FAILED
    } else {
        failure.reason.as_str()
    };
    let cond = ConditionKind::Subscription.condition(ConditionStatus::False, reason, failure.message.clone());
    match failure.last_transition_time {
        Some(time) => cond.at(time),
        None => cond,
    }
}

// =============================================================================
// InstallPlan
// =============================================================================

/// The subscription owns no InstallPlans
pub fn no_install_plans() -> Condition {
    ConditionKind::InstallPlan.condition(
        ConditionStatus::True,
        "NoInstallPlansFound",
        "there are no relevant InstallPlans in the namespace",
    )
}

/// The plan OLM is currently working on failed
pub fn install_plan_failed() -> Condition {
    ConditionKind::InstallPlan.condition(
        ConditionStatus::False,
        "InstallPlanFailed",
        "the current InstallPlan has failed",
    )
}

/// A plan is being applied
pub fn install_plans_installing() -> Condition {
    ConditionKind::InstallPlan.condition(
        ConditionStatus::False,
        "InstallPlansInstalling",
        "a relevant InstallPlan is actively installing",
    )
}

/// No plan is waiting for approval
pub fn no_install_plans_requiring_approval() -> Condition {
    ConditionKind::InstallPlan.condition(
        ConditionStatus::True,
        "NoInstallPlansRequiringApproval",
        "no InstallPlans requiring approval were found",
    )
}

/// Plans are waiting for approval.
///
/// `upgrades` lists the CSV set of each waiting plan. `approvable` is `None`
/// when approval was not attempted, otherwise the CSV sets the policy allows.
pub fn install_plan_upgrade(upgrades: &[String], approvable: Option<&[String]>) -> Condition {
    let mut message = match upgrades {
        [single] => format!("an InstallPlan to update to {single} is available for approval"),
        many => format!(
            "there are multiple InstallPlans available for approval ({})",
            many.join(", or ")
        ),
    };

    match approvable {
        Some([]) => message.push_str(" but not allowed by the specified versions in the policy"),
        Some(allowed) if allowed.len() > 1 => message.push_str(&format!(
            " but multiple of those match the versions specified in the policy ({}) so none were approved",
            allowed.join(", ")
        )),
        _ => {}
    }

    ConditionKind::InstallPlan.condition(ConditionStatus::False, "InstallPlanRequiresApproval", message)
}

/// A plan was approved by the controller
pub fn install_plan_approved(version: &str) -> Condition {
    ConditionKind::InstallPlan.condition(
        ConditionStatus::True,
        "InstallPlanApproved",
        format!("the InstallPlan for {version} was approved"),
    )
}

// =============================================================================
// ClusterServiceVersion
// =============================================================================

/// No installed CSV is known yet
pub fn no_csv() -> Condition {
    ConditionKind::ClusterServiceVersion.condition(
        ConditionStatus::False,
        "RelevantCSVNotFound",
        "A relevant installed ClusterServiceVersion could not be found",
    )
}

/// Reason to report for a CSV: its status reason, falling back to the phase
pub fn csv_reason(csv: &ClusterServiceVersion) -> &str {
    [csv.status.reason.as_str(), csv.status.phase.as_str()]
        .into_iter()
        .find(|r| !r.is_empty())
        .unwrap_or("Unknown")
}

/// State of the installed CSV
pub fn csv_found(csv: &ClusterServiceVersion) -> Condition {
    let status = if csv.succeeded() {
        ConditionStatus::True
    } else {
        ConditionStatus::False
    };
    ConditionKind::ClusterServiceVersion.condition(
        status,
        csv_reason(csv),
        format!("ClusterServiceVersion - {}", csv.status.message),
    )
}

// =============================================================================
// Deployments
// =============================================================================

/// There are no operator deployments to check
pub fn no_deployments() -> Condition {
    ConditionKind::Deployment.condition(
        ConditionStatus::True,
        "NoExistingDeployments",
        "No existing operator Deployments",
    )
}

/// Availability of the operator deployments; `unavailable` names those below minimum
pub fn deployments(unavailable: &[String]) -> Condition {
    if unavailable.is_empty() {
        ConditionKind::Deployment.condition(
            ConditionStatus::True,
            "DeploymentsAvailable",
            "All operator Deployments have their minimum availability",
        )
    } else {
        ConditionKind::Deployment.condition(
            ConditionStatus::False,
            "DeploymentsUnavailable",
            format!(
                "Deployments {} do not have their minimum availability",
                unavailable.join(", ")
            ),
        )
    }
}

// =============================================================================
// CatalogSource
// =============================================================================

/// The catalog source exists but has not reported a connection state
pub fn catalog_source_unknown() -> Condition {
    ConditionKind::CatalogSource.condition(
        ConditionStatus::False,
        "CatalogSourcesUnknownState",
        "Could not determine last observed state of CatalogSource",
    )
}

/// Health of the catalog source
pub fn catalog_source(name: &str, missing: bool, unhealthy: bool) -> Condition {
    if missing {
        ConditionKind::CatalogSource.condition(
            ConditionStatus::True,
            "CatalogSourcesNotFound",
            format!("CatalogSource '{name}' was not found"),
        )
    } else if unhealthy {
        ConditionKind::CatalogSource.condition(
            ConditionStatus::True,
            "CatalogSourcesFoundUnhealthy",
            "CatalogSource was found but is unhealthy",
        )
    } else {
        ConditionKind::CatalogSource.condition(
            ConditionStatus::False,
            "CatalogSourcesFound",
            "CatalogSource was found",
        )
    }
}
