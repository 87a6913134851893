//! Controller wiring
//!
//! Watches OperatorPolicies plus every kind a policy reads. A change to a
//! dependency requeues the policies whose last run read that object.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, ResourceExt};
use tracing::{debug, info};

use oppolicy_common::crd::olm::{
    CatalogSource, ClusterServiceVersion, InstallPlan, OperatorGroup, Subscription,
};
use oppolicy_common::crd::OperatorPolicy;
use oppolicy_common::events::KubeEventPublisher;
use oppolicy_common::kube_utils::HasApiResource;

use crate::config::ControllerConfig;
use crate::controller::{error_policy, reconcile, Context};
use crate::store::KubeClusterStore;
use crate::watcher::{KubeDependencyWatcher, PolicyId};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Kinds a policy run may read
pub fn dependency_resources() -> Vec<ApiResource> {
    vec![
        OperatorGroup::api_resource(),
        Subscription::api_resource(),
        InstallPlan::api_resource(),
        ClusterServiceVersion::api_resource(),
        CatalogSource::api_resource(),
        Deployment::api_resource(),
        Namespace::api_resource(),
    ]
}

/// References to the policies to requeue
pub fn policy_refs(ids: Vec<PolicyId>) -> Vec<ObjectRef<OperatorPolicy>> {
    ids.into_iter()
        .map(|id| ObjectRef::new(&id.name).within(&id.namespace))
        .collect()
}

/// Run the OperatorPolicy controller until a shutdown signal
pub async fn run(client: Client, config: ControllerConfig) {
    let watcher = Arc::new(KubeDependencyWatcher::new(client.clone()));
    let store = Arc::new(KubeClusterStore::new(
        client.clone(),
        config.controller_name.clone(),
    ));
    let events = Arc::new(KubeEventPublisher::new(
        client.clone(),
        &config.controller_name,
    ));
    let ctx = Arc::new(Context::new(watcher.clone(), store, events, config));

    let policies: Api<OperatorPolicy> = Api::all(client.clone());
    let mut controller = Controller::new(
        policies,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    );

    for ar in dependency_resources() {
        info!(kind = %ar.kind, "- watching dependency");
        let api: Api<DynamicObject> = Api::all_with(client.clone(), &ar);
        let watcher = watcher.clone();
        let watched = ar.clone();
        controller = controller.watches_with(
            api,
            ar,
            WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
            move |obj: DynamicObject| {
                let namespace = obj.namespace().unwrap_or_default();
                let name = obj.name_any();
                let affected = watcher.dependents_of(&watched, &namespace, &name);
                if !affected.is_empty() {
                    debug!(
                        kind = %watched.kind,
                        %namespace,
                        %name,
                        affected_count = affected.len(),
                        "dependency changed, requeueing policies"
                    );
                }
                policy_refs(affected)
            },
        );
    }

    info!("- OperatorPolicy controller");

    controller
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(log_reconcile_result("OperatorPolicy"))
        .await;
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
