//! Deployment stage
//!
//! Checks the availability of the deployments the installed CSV manages.

use k8s_openapi::api::apps::v1::Deployment;
use tracing::warn;

use oppolicy_common::crd::olm::{from_dynamic, ClusterServiceVersion};
use oppolicy_common::kube_utils::HasApiResource;
use oppolicy_common::Error;

use super::{StageContext, Upstream};
use crate::status::conditions::{self, ConditionKind};
use crate::status::{related, StatusTracker};

const KIND: ConditionKind = ConditionKind::Deployment;

/// Report availability of the operator deployments
pub async fn reconcile(
    ctx: &StageContext<'_>,
    csv: &Upstream<Option<ClusterServiceVersion>>,
    operator_namespace: &str,
    tracker: &mut StatusTracker,
) -> Result<(), Error> {
    let csv = match csv {
        Upstream::Ready(Some(csv)) => csv,
        Upstream::Ready(None) => {
            tracker.update(
                conditions::no_deployments(),
                vec![related::no_deployments(operator_namespace)],
            );
            return Ok(());
        }
        Upstream::Invalid => {
            tracker.update(conditions::invalid_causing_unknown(KIND), vec![]);
            return Ok(());
        }
        Upstream::Failed => return Ok(()),
    };

    let namespace = csv.metadata.namespace.as_deref().unwrap_or(operator_namespace);
    let names: Vec<&str> = csv.deployment_names().collect();
    if names.is_empty() {
        tracker.update(
            conditions::no_deployments(),
            vec![related::no_deployments(namespace)],
        );
        return Ok(());
    }

    let mut found_count = 0;
    let mut unavailable = Vec::new();
    let mut related_objects = Vec::with_capacity(names.len());

    for name in names {
        let found = ctx
            .watcher
            .get(ctx.id, &Deployment::api_resource(), namespace, name)
            .await?;

        let Some(found) = found else {
            related_objects.push(related::missing_wanted::<Deployment>(namespace, name));
            continue;
        };

        let deployment: Deployment = match from_dynamic(&found) {
            Ok(d) => d,
            Err(e) => {
                warn!(policy = %ctx.id, deployment = %name, error = %e, "undecodable Deployment");
                related_objects.push(related::undecodable_deployment(namespace, name));
                continue;
            }
        };
        found_count += 1;

        let available = deployment
            .status
            .as_ref()
            .and_then(|s| s.unavailable_replicas)
            .unwrap_or(0)
            == 0;
        if !available {
            unavailable.push(name.to_string());
        }
        related_objects.push(related::deployment(namespace, name, available));
    }

    // Deployments named by the CSV but not created yet are still installing
    let condition = if found_count == 0 {
        conditions::no_deployments()
    } else {
        conditions::deployments(&unavailable)
    };
    tracker.update(condition, related_objects);
    Ok(())
}
