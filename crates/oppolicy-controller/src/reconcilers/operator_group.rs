//! OperatorGroup stage
//!
//! A namespace may hold at most one OperatorGroup. When the policy does not
//! specify a group, any single group already present is accepted.

use tracing::{debug, info};

use oppolicy_common::crd::olm::OperatorGroup;
use oppolicy_common::kube_utils::HasApiResource;
use oppolicy_common::Error;

use super::StageContext;
use crate::desired::DesiredOperatorGroup;
use crate::merge::merge_objects;
use crate::status::conditions::{self, ConditionKind};
use crate::status::{related, StatusTracker};

const KIND: ConditionKind = ConditionKind::OperatorGroup;

/// Reconcile the OperatorGroup in the operator namespace
pub async fn reconcile(
    ctx: &StageContext<'_>,
    desired: Option<&DesiredOperatorGroup>,
    tracker: &mut StatusTracker,
) -> Result<(), Error> {
    let Some(desired) = desired else {
        tracker.update(conditions::invalid_causing_unknown(KIND), vec![]);
        return Ok(());
    };

    let found = ctx
        .watcher
        .list(ctx.id, &OperatorGroup::api_resource(), &desired.namespace, "")
        .await?;

    match found.as_slice() {
        [] => {
            let changed = tracker.update(
                conditions::missing(KIND),
                vec![related::missing_wanted::<OperatorGroup>(
                    &desired.namespace,
                    desired.display_name(),
                )],
            );
            if ctx.remediation().is_inform() {
                return Ok(());
            }
            if changed {
                tracker.record_early_event();
            }

            let created = ctx.store.create(&desired.to_dynamic()?).await?;
            info!(
                policy = %ctx.id,
                namespace = %desired.namespace,
                "created OperatorGroup"
            );
            tracker.update(
                conditions::created(KIND),
                vec![related::created::<OperatorGroup>(&created)],
            );
            Ok(())
        }
        [existing] => {
            if !desired.identifies(existing) {
                if !ctx.operator_group_specified() {
                    tracker.update(
                        conditions::operator_group_preexisting(),
                        vec![related::matched::<OperatorGroup>(existing)],
                    );
                    return Ok(());
                }

                // Creating the named group would leave two groups in the namespace
                tracker.update(
                    conditions::mismatch(KIND),
                    vec![
                        related::missing_wanted::<OperatorGroup>(
                            &desired.namespace,
                            desired.display_name(),
                        ),
                        related::mismatched::<OperatorGroup>(existing),
                    ],
                );
                return Ok(());
            }

            let outcome = merge_objects(
                ctx.store,
                &desired.to_value()?,
                existing,
                ctx.compliance_type(),
            )
            .await?;

            if !outcome.update_needed {
                tracker.update(
                    conditions::matches(KIND),
                    vec![related::matched::<OperatorGroup>(existing)],
                );
                return Ok(());
            }

            if !ctx.operator_group_specified() {
                tracker.update(
                    conditions::operator_group_preexisting(),
                    vec![related::matched::<OperatorGroup>(existing)],
                );
                return Ok(());
            }

            if ctx.remediation().is_enforce() && outcome.update_forbidden {
                tracker.update(
                    conditions::mismatch_unfixable(KIND),
                    vec![related::mismatched::<OperatorGroup>(existing)],
                );
                return Ok(());
            }

            let changed = tracker.update(
                conditions::mismatch(KIND),
                vec![related::mismatched::<OperatorGroup>(existing)],
            );
            if ctx.remediation().is_inform() {
                return Ok(());
            }
            if changed {
                tracker.record_early_event();
            }

            let updated = ctx.store.update(&outcome.merged).await?;
            info!(policy = %ctx.id, namespace = %desired.namespace, "updated OperatorGroup");
            tracker.update(
                conditions::updated(KIND),
                vec![related::updated::<OperatorGroup>(&updated)],
            );
            Ok(())
        }
        many => {
            debug!(policy = %ctx.id, count = many.len(), "too many OperatorGroups");
            tracker.update(
                conditions::operator_group_too_many(),
                many.iter().map(related::extra_operator_group).collect(),
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desired::build_operator_group;
    use crate::fake::{FakeCluster, Write};
    use crate::reconcilers::testing::quay_policy;
    use crate::watcher::PolicyId;
    use oppolicy_common::crd::{ComplianceState, ConditionStatus, OperatorPolicy, OperatorPolicyStatus, RemediationAction};
    use serde_json::json;

    fn group(name: &str, generate_name: Option<&str>, spec: serde_json::Value) -> serde_json::Value {
        let mut metadata = json!({"name": name, "namespace": "quay-ns"});
        if let Some(prefix) = generate_name {
            metadata["generateName"] = json!(prefix);
        }
        json!({
            "apiVersion": "operators.coreos.com/v1",
            "kind": "OperatorGroup",
            "metadata": metadata,
            "spec": spec
        })
    }

    async fn run(cluster: &FakeCluster, policy: &OperatorPolicy) -> OperatorPolicyStatus {
        let id = PolicyId::new("managed", "install-quay");
        let ctx = StageContext {
            id: &id,
            policy,
            watcher: cluster,
            store: cluster,
        };
        let desired = build_operator_group(policy, "quay-ns").unwrap();
        let mut tracker = StatusTracker::new(policy.status.clone().unwrap_or_default());
        reconcile(&ctx, Some(&desired), &mut tracker).await.unwrap();
        tracker.finish().status
    }

    fn og_condition(status: &OperatorPolicyStatus) -> (ConditionStatus, String) {
        let cond = status.condition(KIND.condition_type()).unwrap();
        (cond.status, cond.reason.clone())
    }

    /// Story: enforce creates the default group once, then reports it as matching
    #[tokio::test]
    async fn story_default_group_is_created_once() {
        let cluster = FakeCluster::new();
        let mut policy = quay_policy(RemediationAction::Enforce);

        let status = run(&cluster, &policy).await;
        assert_eq!(og_condition(&status), (ConditionStatus::True, "OperatorGroupCreated".to_string()));
        assert_eq!(cluster.objects_of_kind("OperatorGroup").len(), 1);
        assert!(matches!(&cluster.writes()[..], [Write::Create { kind, .. }] if kind == "OperatorGroup"));

        cluster.clear_writes();
        policy.status = Some(status);
        let status = run(&cluster, &policy).await;
        assert_eq!(og_condition(&status), (ConditionStatus::True, "OperatorGroupMatches".to_string()));
        assert!(cluster.writes().is_empty());
    }

    #[tokio::test]
    async fn inform_reports_missing_without_creating() {
        let cluster = FakeCluster::new();
        let status = run(&cluster, &quay_policy(RemediationAction::Inform)).await;

        assert_eq!(og_condition(&status), (ConditionStatus::False, "OperatorGroupMissing".to_string()));
        assert!(cluster.writes().is_empty());
        let rel: Vec<_> = status.related_of_kind("OperatorGroup").collect();
        assert_eq!(rel[0].name, "quay-ns-");
        assert_eq!(rel[0].compliant, Some(ComplianceState::NonCompliant));
    }

    /// Story: two groups in the namespace is NonCompliant and nothing is written
    #[tokio::test]
    async fn story_too_many_groups() {
        let cluster = FakeCluster::new();
        cluster.insert(group("og-a", None, json!({})));
        cluster.insert(group("og-b", None, json!({})));

        let status = run(&cluster, &quay_policy(RemediationAction::Enforce)).await;
        assert_eq!(og_condition(&status), (ConditionStatus::False, "TooManyOperatorGroups".to_string()));
        assert_eq!(status.related_of_kind("OperatorGroup").count(), 2);
        assert!(cluster.writes().is_empty());
    }

    #[tokio::test]
    async fn unspecified_policy_accepts_a_preexisting_group() {
        let cluster = FakeCluster::new();
        cluster.insert(group("someone-elses", None, json!({"targetNamespaces": ["quay-ns"]})));

        let status = run(&cluster, &quay_policy(RemediationAction::Enforce)).await;
        assert_eq!(
            og_condition(&status),
            (ConditionStatus::True, "PreexistingOperatorGroupFound".to_string())
        );
        assert!(cluster.writes().is_empty());
    }

    /// Story: a differently named group blocks the one the policy names
    #[tokio::test]
    async fn story_named_group_conflicts_with_existing() {
        let cluster = FakeCluster::new();
        cluster.insert(group("other", None, json!({})));
        let mut policy = quay_policy(RemediationAction::Enforce);
        policy.spec.operator_group = Some(json!({"name": "og"}));

        let status = run(&cluster, &policy).await;
        assert_eq!(og_condition(&status), (ConditionStatus::False, "OperatorGroupMismatch".to_string()));
        let names: Vec<_> = status.related_of_kind("OperatorGroup").map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["og", "other"]);
        assert!(cluster.writes().is_empty());
    }

    #[tokio::test]
    async fn enforce_updates_a_mismatched_named_group() {
        let cluster = FakeCluster::new();
        cluster.insert(group("og", None, json!({"targetNamespaces": ["other"]})));
        let mut policy = quay_policy(RemediationAction::Enforce);
        policy.spec.operator_group = Some(json!({"name": "og", "targetNamespaces": ["quay-ns"]}));

        let status = run(&cluster, &policy).await;
        assert_eq!(og_condition(&status), (ConditionStatus::True, "OperatorGroupUpdated".to_string()));
        let stored = cluster.object("OperatorGroup", "quay-ns", "og").unwrap();
        assert_eq!(stored.data["spec"]["targetNamespaces"], json!(["quay-ns"]));
    }

    /// Story: an update the server refuses is reported as unfixable
    #[tokio::test]
    async fn story_forbidden_update_is_unfixable() {
        let cluster = FakeCluster::new();
        cluster.insert(group("og", None, json!({"targetNamespaces": ["other"]})));
        cluster.forbid_updates("OperatorGroup");
        let mut policy = quay_policy(RemediationAction::Enforce);
        policy.spec.operator_group = Some(json!({"name": "og", "targetNamespaces": ["quay-ns"]}));

        let status = run(&cluster, &policy).await;
        assert_eq!(
            og_condition(&status),
            (ConditionStatus::False, "OperatorGroupMismatchUnfixable".to_string())
        );
        assert!(cluster.writes().is_empty());

        policy.spec.remediation_action = RemediationAction::Inform;
        policy.status = None;
        let status = run(&cluster, &policy).await;
        assert_eq!(og_condition(&status), (ConditionStatus::False, "OperatorGroupMismatch".to_string()));
    }

    #[tokio::test]
    async fn invalid_policy_leaves_related_objects() {
        let cluster = FakeCluster::new();
        let policy = quay_policy(RemediationAction::Inform);
        let id = PolicyId::new("managed", "install-quay");
        let ctx = StageContext {
            id: &id,
            policy: &policy,
            watcher: &cluster,
            store: &cluster,
        };

        let mut tracker = StatusTracker::new(OperatorPolicyStatus::default());
        reconcile(&ctx, None, &mut tracker).await.unwrap();
        let status = tracker.finish().status;
        assert_eq!(og_condition(&status), (ConditionStatus::Unknown, "InvalidPolicySpec".to_string()));
        assert_eq!(status.related_of_kind("OperatorGroup").count(), 0);
    }
}
