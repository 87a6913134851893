//! Compliance aggregation
//!
//! A [`StatusTracker`] holds the working copy of a policy's status for one
//! reconciliation run. Stages report a condition plus related objects; the
//! tracker keeps `complianceState` in step, remembers whether anything
//! visible changed, and collects the compliance events to emit.

pub mod conditions;
pub mod related;

use oppolicy_common::crd::{ComplianceState, Condition, ConditionStatus, OperatorPolicyStatus, RelatedObject};

pub use conditions::{ConditionKind, COMPLIANT_CONDITION_TYPE};

/// Overall verdict and its explanation
#[derive(Clone, Debug, PartialEq)]
pub struct ComplianceSummary {
    /// The verdict
    pub state: ComplianceState,
    /// `"<verdict>; <dimension message>, ..."`
    pub message: String,
}

impl ComplianceSummary {
    /// The summary as a status condition
    pub fn condition(&self) -> Condition {
        let status = match self.state {
            ComplianceState::Compliant => ConditionStatus::True,
            _ => ConditionStatus::False,
        };
        Condition::new(COMPLIANT_CONDITION_TYPE, status, self.state.to_string(), self.message.clone())
    }
}

/// Compute the verdict from the dimension conditions present in `status`.
///
/// Any dimension without a condition, or whose condition is not in its
/// compliant status (including Unknown), makes the policy NonCompliant.
pub fn summarize(status: &OperatorPolicyStatus) -> ComplianceSummary {
    let mut compliant = true;
    let mut messages = Vec::with_capacity(ConditionKind::ALL.len());

    for kind in ConditionKind::ALL {
        match status.condition(kind.condition_type()) {
            Some(cond) => {
                if cond.status != kind.compliant_status() {
                    compliant = false;
                }
                messages.push(cond.message.clone());
            }
            None => {
                compliant = false;
                messages.push(kind.unknown_message());
            }
        }
    }

    let state = if compliant {
        ComplianceState::Compliant
    } else {
        ComplianceState::NonCompliant
    };

    ComplianceSummary {
        state,
        message: format!("{state}; {}", messages.join(", ")),
    }
}

/// Everything a run decided about the policy's status
#[derive(Debug)]
pub struct StatusOutcome {
    /// The new status
    pub status: OperatorPolicyStatus,
    /// Whether the status differs from the one the run started with
    pub changed: bool,
    /// Compliance events to emit, oldest first
    pub events: Vec<ComplianceSummary>,
}

/// Working copy of a policy's status during one run
#[derive(Debug)]
pub struct StatusTracker {
    status: OperatorPolicyStatus,
    changed: bool,
    early_events: Vec<ComplianceSummary>,
}

impl StatusTracker {
    /// Start from the status the policy currently has
    pub fn new(status: OperatorPolicyStatus) -> Self {
        Self {
            status,
            changed: false,
            early_events: Vec::new(),
        }
    }

    /// Record a dimension condition and the related objects behind it.
    ///
    /// Related objects replace existing entries of the same kinds; an empty
    /// list leaves related objects untouched. Returns whether anything changed.
    pub fn update(&mut self, condition: Condition, related: Vec<RelatedObject>) -> bool {
        let cond_changed = self.status.set_condition(condition);
        let related_changed = self.status.replace_related_objects(related);
        let changed = cond_changed || related_changed;

        if changed {
            self.status.compliance_state = Some(summarize(&self.status).state);
            self.changed = true;
        }
        changed
    }

    /// Remember the current verdict so the violation about to be fixed shows in history
    pub fn record_early_event(&mut self) {
        self.early_events.push(summarize(&self.status));
    }

    /// Finish the run: add the summary condition when the status changed
    pub fn finish(mut self) -> StatusOutcome {
        if !self.changed {
            return StatusOutcome {
                status: self.status,
                changed: false,
                events: Vec::new(),
            };
        }

        let summary = summarize(&self.status);
        self.status.compliance_state = Some(summary.state);
        self.status.set_condition(summary.condition());

        let mut events = self.early_events;
        events.push(summary);

        StatusOutcome {
            status: self.status,
            changed: true,
            events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oppolicy_common::crd::olm::Subscription;
    use oppolicy_common::kube_utils::HasApiResource;

    fn all_compliant() -> OperatorPolicyStatus {
        let mut tracker = StatusTracker::new(OperatorPolicyStatus::default());
        tracker.update(conditions::validation(&[]), vec![]);
        tracker.update(conditions::matches(ConditionKind::OperatorGroup), vec![]);
        tracker.update(conditions::matches(ConditionKind::Subscription), vec![]);
        tracker.update(conditions::no_install_plans_requiring_approval(), vec![]);
        tracker.update(
            Condition::new(
                ConditionKind::ClusterServiceVersion.condition_type(),
                ConditionStatus::True,
                "InstallSucceeded",
                "ClusterServiceVersion - install strategy completed with no errors",
            ),
            vec![],
        );
        tracker.update(conditions::deployments(&[]), vec![]);
        tracker.update(conditions::catalog_source("c", false, false), vec![]);
        tracker.finish().status
    }

    #[test]
    fn every_dimension_compliant_is_compliant() {
        let summary = summarize(&all_compliant());
        assert_eq!(summary.state, ComplianceState::Compliant);
        assert!(summary.message.starts_with("Compliant; the policy spec is valid, "));
        assert!(summary.message.ends_with("CatalogSource was found"));
    }

    /// Story: one failing dimension makes the policy NonCompliant
    #[test]
    fn story_one_noncompliant_dimension_decides() {
        let mut status = all_compliant();
        status.set_condition(conditions::catalog_source("c", true, true));

        let summary = summarize(&status);
        assert_eq!(summary.state, ComplianceState::NonCompliant);
        assert!(summary.message.starts_with("NonCompliant; "));
        assert!(summary.message.contains("CatalogSource 'c' was not found"));
    }

    #[test]
    fn unknown_dimensions_are_noncompliant() {
        let mut status = all_compliant();
        status.set_condition(conditions::invalid_causing_unknown(ConditionKind::InstallPlan));
        assert_eq!(summarize(&status).state, ComplianceState::NonCompliant);

        let summary = summarize(&OperatorPolicyStatus::default());
        assert_eq!(summary.state, ComplianceState::NonCompliant);
        assert!(summary.message.contains("the validity of the policy is unknown"));
        assert!(summary.message.contains("the status of the Subscription is unknown"));
    }

    /// Story: a run that changes nothing writes nothing and emits nothing
    #[test]
    fn story_unchanged_run_is_silent() {
        let status = all_compliant();
        let mut tracker = StatusTracker::new(status.clone());
        assert!(!tracker.update(conditions::matches(ConditionKind::Subscription), vec![]));

        let outcome = tracker.finish();
        assert!(!outcome.changed);
        assert!(outcome.events.is_empty());
        assert_eq!(outcome.status, status);
    }

    /// Story: the violation observed before a fix is emitted before the fix
    #[test]
    fn story_early_events_precede_the_final_summary() {
        let mut tracker = StatusTracker::new(all_compliant());
        let mut sub = kube::api::DynamicObject::new("quay", &Subscription::api_resource());
        sub.metadata.namespace = Some("ops".to_string());

        assert!(tracker.update(
            conditions::mismatch(ConditionKind::Subscription),
            vec![related::mismatched::<Subscription>(&sub)],
        ));
        tracker.record_early_event();
        tracker.update(
            conditions::updated(ConditionKind::Subscription),
            vec![related::updated::<Subscription>(&sub)],
        );

        let outcome = tracker.finish();
        assert!(outcome.changed);
        assert_eq!(outcome.status.compliance_state, Some(ComplianceState::Compliant));
        assert_eq!(outcome.events.len(), 2);
        assert_eq!(outcome.events[0].state, ComplianceState::NonCompliant);
        assert_eq!(outcome.events[1].state, ComplianceState::Compliant);

        let summary = outcome.status.condition(COMPLIANT_CONDITION_TYPE).unwrap();
        assert_eq!(summary.status, ConditionStatus::True);
        assert_eq!(summary.reason, "Compliant");
        assert_eq!(outcome.status.related_of_kind("Subscription").count(), 1);
    }
}
