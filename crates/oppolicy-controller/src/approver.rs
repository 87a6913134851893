//! Install-plan approval decisions
//!
//! Given the InstallPlans a subscription owns, decides what the InstallPlan
//! dimension reports and whether one plan should be approved. Checks apply
//! in priority order: a failed current plan, then an installing plan, then
//! plans waiting for approval.

use oppolicy_common::crd::olm::{InstallPlan, InstallPlanPhase};
use oppolicy_common::crd::RemediationAction;

/// Outcome of evaluating the owned plans
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// The subscription owns no plans
    NoPlans,
    /// The plan OLM is currently working on failed
    CurrentPlanFailed,
    /// A plan is being applied
    Installing,
    /// Nothing is waiting for approval
    NothingToApprove,
    /// Plans are waiting and none will be approved this run
    AwaitingApproval {
        /// CSV set of each waiting plan, e.g. `[quay.v3.8.2]`
        upgrades: Vec<String>,
        /// CSV sets the policy allows; `None` when approval is not attempted
        approvable: Option<Vec<String>>,
    },
    /// Exactly one waiting plan is allowed; approve it
    Approve {
        /// Name of the plan to approve
        plan: String,
        /// The CSV it installs
        version: String,
        /// CSV set of every waiting plan, the approved one included
        upgrades: Vec<String>,
    },
}

/// CSV set of a plan as shown to users
fn display_targets(plan: &InstallPlan) -> String {
    match &plan.csv_names {
        Some(names) => format!("[{}]", names.join(" ")),
        None => "[unknown]".to_string(),
    }
}

/// The single CSV a plan installs, if it installs exactly one allowed version
fn approvable_version<'a>(plan: &'a InstallPlan, allowed: &[String]) -> Option<&'a str> {
    match plan.csv_names.as_deref() {
        Some([only]) if allowed.is_empty() || allowed.iter().any(|v| v == only) => Some(only),
        _ => None,
    }
}

/// Decide what to report and approve for the owned plans.
///
/// `current` names the plan the subscription currently points at; `allowed`
/// is the policy's version allow-list, empty meaning any version.
pub fn decide(
    plans: &[InstallPlan],
    current: Option<&str>,
    remediation: RemediationAction,
    allowed: &[String],
) -> Decision {
    if plans.is_empty() {
        return Decision::NoPlans;
    }

    // An old failed plan is history; only the current one matters
    let current_failed = plans
        .iter()
        .any(|p| p.phase == InstallPlanPhase::Failed && Some(p.name.as_str()) == current);
    if current_failed {
        return Decision::CurrentPlanFailed;
    }

    if plans.iter().any(|p| p.phase == InstallPlanPhase::Installing) {
        return Decision::Installing;
    }

    let waiting: Vec<&InstallPlan> = plans
        .iter()
        .filter(|p| p.phase == InstallPlanPhase::RequiresApproval)
        .collect();
    if waiting.is_empty() {
        return Decision::NothingToApprove;
    }

    let upgrades: Vec<String> = waiting.iter().map(|p| display_targets(p)).collect();

    if remediation.is_inform() {
        return Decision::AwaitingApproval {
            upgrades,
            approvable: None,
        };
    }

    let approvable: Vec<(&InstallPlan, &str)> = waiting
        .iter()
        .filter_map(|p| approvable_version(p, allowed).map(|v| (*p, v)))
        .collect();

    match approvable.as_slice() {
        [(plan, version)] => Decision::Approve {
            plan: plan.name.clone(),
            version: (*version).to_string(),
            upgrades,
        },
        _ => Decision::AwaitingApproval {
            upgrades,
            approvable: Some(approvable.iter().map(|(p, _)| display_targets(p)).collect()),
        },
    }
}
