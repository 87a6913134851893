//! Subscription stage

use tracing::{debug, info};

use oppolicy_common::crd::olm::{from_dynamic, Subscription};
use oppolicy_common::kube_utils::HasApiResource;
use oppolicy_common::Error;

use super::{StageContext, Upstream};
use crate::correlation::message_includes_subscription;
use crate::desired::DesiredSubscription;
use crate::merge::merge_objects;
use crate::status::conditions::{self, ConditionKind};
use crate::status::{related, StatusTracker};

const KIND: ConditionKind = ConditionKind::Subscription;

/// Reconcile the Subscription, handing its best-known state downstream
pub async fn reconcile(
    ctx: &StageContext<'_>,
    desired: Option<&DesiredSubscription>,
    tracker: &mut StatusTracker,
) -> Result<Upstream<Subscription>, Error> {
    let Some(desired) = desired else {
        tracker.update(conditions::invalid_causing_unknown(KIND), vec![]);
        return Ok(Upstream::Invalid);
    };

    let found = ctx
        .watcher
        .get(
            ctx.id,
            &Subscription::api_resource(),
            &desired.namespace,
            &desired.name,
        )
        .await?;

    let Some(found) = found else {
        let changed = tracker.update(
            conditions::missing(KIND),
            vec![related::missing_wanted::<Subscription>(
                &desired.namespace,
                &desired.name,
            )],
        );
        if ctx.remediation().is_inform() {
            return Ok(Upstream::Ready(desired.as_observed()));
        }
        if changed {
            tracker.record_early_event();
        }

        let created = ctx.store.create(&desired.to_dynamic()?).await?;
        info!(
            policy = %ctx.id,
            subscription = %desired.name,
            namespace = %desired.namespace,
            "created Subscription"
        );
        tracker.update(
            conditions::created(KIND),
            vec![related::created::<Subscription>(&created)],
        );
        return Ok(Upstream::Ready(from_dynamic(&created)?));
    };

    let outcome = merge_objects(
        ctx.store,
        &desired.to_value()?,
        &found,
        ctx.compliance_type(),
    )
    .await?;
    let merged: Subscription = from_dynamic(&outcome.merged)?;

    if !outcome.update_needed {
        if let Some(failure) = merged.resolution_failure() {
            // OLM reports resolution failures on every subscription in the namespace
            if message_includes_subscription(&merged, &failure.message) {
                debug!(
                    policy = %ctx.id,
                    reason = %failure.reason,
                    "subscription resolution failed"
                );
                let cond = conditions::subscription_resolution_failed(failure);
                let rel = related::non_compliant::<Subscription>(&found, &cond.reason);
                tracker.update(cond, vec![rel]);
                return Ok(Upstream::Ready(merged));
            }
        }

        tracker.update(
            conditions::matches(KIND),
            vec![related::matched::<Subscription>(&found)],
        );
        return Ok(Upstream::Ready(merged));
    }

    if ctx.remediation().is_enforce() && outcome.update_forbidden {
        tracker.update(
            conditions::mismatch_unfixable(KIND),
            vec![related::mismatched::<Subscription>(&found)],
        );
        return Ok(Upstream::Ready(merged));
    }

    let changed = tracker.update(
        conditions::mismatch(KIND),
        vec![related::mismatched::<Subscription>(&found)],
    );
    if ctx.remediation().is_inform() {
        return Ok(Upstream::Ready(merged));
    }
    if changed {
        tracker.record_early_event();
    }

    let updated = ctx.store.update(&outcome.merged).await?;
    info!(
        policy = %ctx.id,
        subscription = %desired.name,
        namespace = %desired.namespace,
        "updated Subscription"
    );
    tracker.update(
        conditions::updated(KIND),
        vec![related::updated::<Subscription>(&updated)],
    );
    Ok(Upstream::Ready(from_dynamic(&updated)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desired::build_subscription;
    use crate::fake::{FakeCluster, Write};
    use crate::reconcilers::testing::quay_policy;
    use crate::watcher::PolicyId;
    use oppolicy_common::crd::{ConditionStatus, OperatorPolicy, OperatorPolicyStatus, RemediationAction};
    use serde_json::{json, Value};

    fn subscription(spec: Value, status: Value) -> Value {
        json!({
            "apiVersion": "operators.coreos.com/v1alpha1",
            "kind": "Subscription",
            "metadata": {"name": "project-quay", "namespace": "quay-ns"},
            "spec": spec,
            "status": status
        })
    }

    fn quay_spec() -> Value {
        json!({
            "channel": "stable-3.8",
            "name": "project-quay",
            "source": "operatorhubio-catalog",
            "sourceNamespace": "olm",
            "installPlanApproval": "Automatic"
        })
    }

    async fn run(
        cluster: &FakeCluster,
        policy: &OperatorPolicy,
    ) -> (Upstream<Subscription>, OperatorPolicyStatus) {
        let id = PolicyId::new("managed", "install-quay");
        let ctx = StageContext {
            id: &id,
            policy,
            watcher: cluster,
            store: cluster,
        };
        let desired = build_subscription(policy, "").unwrap();
        let mut tracker = StatusTracker::new(policy.status.clone().unwrap_or_default());
        let upstream = reconcile(&ctx, Some(&desired), &mut tracker).await.unwrap();
        (upstream, tracker.finish().status)
    }

    fn sub_condition(status: &OperatorPolicyStatus) -> (ConditionStatus, String) {
        let cond = status.condition(KIND.condition_type()).unwrap();
        (cond.status, cond.reason.clone())
    }

    /// Story: enforce creates the subscription once; the next run only reads
    #[tokio::test]
    async fn story_create_is_idempotent() {
        let cluster = FakeCluster::new();
        let mut policy = quay_policy(RemediationAction::Enforce);

        let (upstream, status) = run(&cluster, &policy).await;
        assert_eq!(sub_condition(&status), (ConditionStatus::True, "SubscriptionCreated".to_string()));
        assert!(matches!(upstream, Upstream::Ready(ref s) if s.name() == "project-quay"));
        assert_eq!(
            cluster.writes(),
            vec![Write::Create {
                kind: "Subscription".to_string(),
                name: "project-quay".to_string()
            }]
        );

        cluster.clear_writes();
        policy.status = Some(status);
        let (_, status) = run(&cluster, &policy).await;
        assert_eq!(sub_condition(&status), (ConditionStatus::True, "SubscriptionMatches".to_string()));
        assert!(cluster.writes().is_empty());
    }

    #[tokio::test]
    async fn inform_hands_the_desired_subscription_downstream() {
        let cluster = FakeCluster::new();
        let (upstream, status) = run(&cluster, &quay_policy(RemediationAction::Inform)).await;

        assert_eq!(sub_condition(&status), (ConditionStatus::False, "SubscriptionMissing".to_string()));
        match upstream {
            Upstream::Ready(sub) => {
                assert_eq!(sub.namespace(), "quay-ns");
                assert_eq!(sub.spec.source, "operatorhubio-catalog");
                assert!(sub.installed_csv().is_none());
            }
            other => panic!("expected a subscription, got {other:?}"),
        }
        assert!(cluster.writes().is_empty());
    }

    #[tokio::test]
    async fn mismatch_is_reported_in_inform_and_fixed_in_enforce() {
        let cluster = FakeCluster::new();
        let mut spec = quay_spec();
        spec["channel"] = json!("stable-3.7");
        cluster.insert(subscription(spec, json!({})));

        let (_, status) = run(&cluster, &quay_policy(RemediationAction::Inform)).await;
        assert_eq!(sub_condition(&status), (ConditionStatus::False, "SubscriptionMismatch".to_string()));
        assert!(cluster.writes().is_empty());

        let (_, status) = run(&cluster, &quay_policy(RemediationAction::Enforce)).await;
        assert_eq!(sub_condition(&status), (ConditionStatus::True, "SubscriptionUpdated".to_string()));
        let stored = cluster.object("Subscription", "quay-ns", "project-quay").unwrap();
        assert_eq!(stored.data["spec"]["channel"], "stable-3.8");
    }

    /// Story: a resolution failure naming this subscription is surfaced verbatim
    #[tokio::test]
    async fn story_resolution_failure_is_surfaced() {
        let cluster = FakeCluster::new();
        cluster.insert(subscription(
            quay_spec(),
            json!({"conditions": [{
                "type": "ResolutionFailed",
                "status": "True",
                "reason": "ConstraintsNotSatisfiable",
                "message": "no operators found in package project-quay in the catalog referenced by subscription project-quay",
                "lastTransitionTime": "2024-05-01T10:00:00Z"
            }]}),
        ));

        let (_, status) = run(&cluster, &quay_policy(RemediationAction::Inform)).await;
        let cond = status.condition(KIND.condition_type()).unwrap();
        assert_eq!(cond.status, ConditionStatus::False);
        assert_eq!(cond.reason, "ConstraintsNotSatisfiable");
        assert!(cond.message.starts_with("no operators found in package project-quay"));
        assert_eq!(cond.last_transition_time.to_rfc3339(), "2024-05-01T10:00:00+00:00");

        let rel: Vec<_> = status.related_of_kind("Subscription").collect();
        assert_eq!(rel[0].reason, "ConstraintsNotSatisfiable");
    }

    #[tokio::test]
    async fn resolution_failure_about_another_subscription_is_ignored() {
        let cluster = FakeCluster::new();
        cluster.insert(subscription(
            quay_spec(),
            json!({"conditions": [{
                "type": "ResolutionFailed",
                "status": "True",
                "reason": "ConstraintsNotSatisfiable",
                "message": "no operators found in package project-quay-product"
            }]}),
        ));

        let (_, status) = run(&cluster, &quay_policy(RemediationAction::Inform)).await;
        assert_eq!(sub_condition(&status), (ConditionStatus::True, "SubscriptionMatches".to_string()));
    }

    #[tokio::test]
    async fn forbidden_update_is_unfixable_in_enforce() {
        let cluster = FakeCluster::new();
        let mut spec = quay_spec();
        spec["source"] = json!("other-catalog");
        cluster.insert(subscription(spec, json!({})));
        cluster.forbid_updates("Subscription");

        let (upstream, status) = run(&cluster, &quay_policy(RemediationAction::Enforce)).await;
        assert_eq!(
            sub_condition(&status),
            (ConditionStatus::False, "SubscriptionMismatchUnfixable".to_string())
        );
        assert!(matches!(upstream, Upstream::Ready(_)));
        assert!(cluster.writes().is_empty());
    }
}
