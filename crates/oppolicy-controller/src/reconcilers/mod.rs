//! Per-kind reconcilers
//!
//! Each stage inspects one dimension, reports it through the
//! [`StatusTracker`](crate::status::StatusTracker), and in enforce mode
//! mutates the cluster. Stages run in a fixed order and hand their result
//! downstream as an [`Upstream`] so that one stage failing does not stop the
//! stages after it.

pub mod catalog_source;
pub mod cluster_service_version;
pub mod deployment;
pub mod install_plan;
pub mod operator_group;
pub mod subscription;

use oppolicy_common::crd::{ComplianceType, OperatorPolicy, RemediationAction};
use oppolicy_common::Error;

use crate::store::ClusterStore;
use crate::watcher::{DependencyWatcher, PolicyId};

/// What a stage hands to the stages that depend on it
#[derive(Clone, Debug)]
pub enum Upstream<T> {
    /// The upstream object was determined
    Ready(T),
    /// The policy is invalid, so the upstream object cannot be determined
    Invalid,
    /// The upstream stage failed; dependents leave their status untouched
    Failed,
}

impl<T> Upstream<T> {
    /// Turn a stage result into downstream input, collecting the error
    pub fn collect(result: Result<Upstream<T>, Error>, errors: &mut Vec<Error>) -> Self {
        match result {
            Ok(upstream) => upstream,
            Err(e) => {
                errors.push(e);
                Upstream::Failed
            }
        }
    }

    /// Borrow the ready value
    pub fn as_ref(&self) -> Upstream<&T> {
        match self {
            Upstream::Ready(value) => Upstream::Ready(value),
            Upstream::Invalid => Upstream::Invalid,
            Upstream::Failed => Upstream::Failed,
        }
    }
}

/// What every stage needs to look at and change the cluster for one policy
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    /// Identity used for watched reads
    pub id: &'a PolicyId,
    /// The policy being reconciled
    pub policy: &'a OperatorPolicy,
    /// Watched reads
    pub watcher: &'a dyn DependencyWatcher,
    /// Writes
    pub store: &'a dyn ClusterStore,
}

impl StageContext<'_> {
    /// Remediation mode of the policy
    pub fn remediation(&self) -> RemediationAction {
        self.policy.spec.remediation_action
    }

    /// Comparison mode of the policy
    pub fn compliance_type(&self) -> ComplianceType {
        self.policy.spec.compliance_type
    }

    /// Whether the policy specifies an OperatorGroup itself
    pub fn operator_group_specified(&self) -> bool {
        self.policy.spec.operator_group.is_some()
    }
}
