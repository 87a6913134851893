//! CatalogSource stage

use tracing::debug;

use oppolicy_common::crd::olm::{from_dynamic, CatalogSource, Subscription, CATALOG_SOURCE_READY};
use oppolicy_common::kube_utils::HasApiResource;
use oppolicy_common::Error;

use super::{StageContext, Upstream};
use crate::status::conditions::{self, ConditionKind};
use crate::status::{related, StatusTracker};

const KIND: ConditionKind = ConditionKind::CatalogSource;

/// Report the health of the catalog source the subscription installs from
pub async fn reconcile(
    ctx: &StageContext<'_>,
    sub: &Upstream<Subscription>,
    tracker: &mut StatusTracker,
) -> Result<(), Error> {
    let sub = match sub {
        Upstream::Ready(sub) => sub,
        Upstream::Invalid => {
            tracker.update(conditions::invalid_causing_unknown(KIND), vec![]);
            return Ok(());
        }
        Upstream::Failed => return Ok(()),
    };

    let name = sub.spec.source.as_str();
    let namespace = sub.spec.source_namespace.as_str();

    let found = ctx
        .watcher
        .get(ctx.id, &CatalogSource::api_resource(), namespace, name)
        .await?;

    let Some(found) = found else {
        tracker.update(
            conditions::catalog_source(name, true, false),
            vec![related::catalog_source(namespace, name, true, false)],
        );
        return Ok(());
    };

    let catalog: CatalogSource = from_dynamic(&found)?;
    let Some(state) = catalog.status.connection_state else {
        tracker.update(
            conditions::catalog_source_unknown(),
            vec![related::catalog_source_unknown(namespace, name)],
        );
        return Ok(());
    };

    let unhealthy = state.last_observed_state != CATALOG_SOURCE_READY;
    if unhealthy {
        debug!(
            policy = %ctx.id,
            catalog = %name,
            state = %state.last_observed_state,
            "catalog source unhealthy"
        );
    }
    tracker.update(
        conditions::catalog_source(name, false, unhealthy),
        vec![related::catalog_source(namespace, name, false, unhealthy)],
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeCluster;
    use crate::reconcilers::testing::quay_policy;
    use crate::watcher::PolicyId;
    use kube::api::DynamicObject;
    use oppolicy_common::crd::{ComplianceState, ConditionStatus, OperatorPolicyStatus, RemediationAction};
    use serde_json::{json, Value};

    fn subscription() -> Subscription {
        let obj: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "operators.coreos.com/v1alpha1",
            "kind": "Subscription",
            "metadata": {"name": "project-quay", "namespace": "quay-ns"},
            "spec": {"name": "project-quay", "source": "operatorhubio-catalog", "sourceNamespace": "olm"}
        }))
        .unwrap();
        from_dynamic(&obj).unwrap()
    }

    fn catalog(status: Value) -> Value {
        json!({
            "apiVersion": "operators.coreos.com/v1alpha1",
            "kind": "CatalogSource",
            "metadata": {"name": "operatorhubio-catalog", "namespace": "olm"},
            "spec": {"sourceType": "grpc"},
            "status": status
        })
    }

    async fn run(cluster: &FakeCluster) -> OperatorPolicyStatus {
        let id = PolicyId::new("managed", "install-quay");
        let policy = quay_policy(RemediationAction::Inform);
        let ctx = StageContext {
            id: &id,
            policy: &policy,
            watcher: cluster,
            store: cluster,
        };
        let mut tracker = StatusTracker::new(OperatorPolicyStatus::default());
        reconcile(&ctx, &Upstream::Ready(subscription()), &mut tracker)
            .await
            .unwrap();
        tracker.finish().status
    }

    fn cs_condition(status: &OperatorPolicyStatus) -> (ConditionStatus, String) {
        let cond = status.condition(KIND.condition_type()).unwrap();
        (cond.status, cond.reason.clone())
    }

    #[tokio::test]
    async fn healthy_catalog_is_compliant() {
        let cluster = FakeCluster::new();
        cluster.insert(catalog(json!({"connectionState": {"lastObservedState": "READY"}})));

        let status = run(&cluster).await;
        assert_eq!(cs_condition(&status), (ConditionStatus::False, "CatalogSourcesFound".to_string()));
        let rel: Vec<_> = status.related_of_kind("CatalogSource").collect();
        assert_eq!(rel[0].namespace, "olm");
        assert_eq!(rel[0].compliant, Some(ComplianceState::Compliant));
    }

    /// Story: the CatalogSource condition is True when something is wrong
    #[tokio::test]
    async fn story_missing_or_unhealthy_catalog_is_noncompliant() {
        let cluster = FakeCluster::new();
        let status = run(&cluster).await;
        let cond = status.condition(KIND.condition_type()).unwrap();
        assert_eq!(cond.reason, "CatalogSourcesNotFound");
        assert_eq!(cond.message, "CatalogSource 'operatorhubio-catalog' was not found");

        cluster.insert(catalog(json!({"connectionState": {"lastObservedState": "TRANSIENT_FAILURE"}})));
        let status = run(&cluster).await;
        assert_eq!(
            cs_condition(&status),
            (ConditionStatus::True, "CatalogSourcesFoundUnhealthy".to_string())
        );
    }

    #[tokio::test]
    async fn catalog_without_connection_state_is_unknown_but_compliant() {
        let cluster = FakeCluster::new();
        cluster.insert(catalog(json!({})));

        let status = run(&cluster).await;
        assert_eq!(
            cs_condition(&status),
            (ConditionStatus::False, "CatalogSourcesUnknownState".to_string())
        );
        let rel: Vec<_> = status.related_of_kind("CatalogSource").collect();
        assert_eq!(rel[0].compliant, None);
    }
}
