//! OperatorPolicy reconciliation entry point
//!
//! A run re-reads the policy, builds the desired state, then walks the
//! stages in dependency order: OperatorGroup, Subscription, InstallPlan,
//! ClusterServiceVersion, Deployment, CatalogSource. A stage error is
//! collected and the remaining stages still run; all errors are returned
//! together once the status has been written.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use oppolicy_common::crd::OperatorPolicy;
use oppolicy_common::events::EventPublisher;
use oppolicy_common::Error;

use crate::config::ControllerConfig;
use crate::desired::build_desired_state;
use crate::reconcilers::{
    catalog_source, cluster_service_version, deployment, install_plan, operator_group,
    subscription, StageContext, Upstream,
};
use crate::status::{conditions, ComplianceSummary, StatusTracker};
use crate::store::ClusterStore;
use crate::watcher::{DependencyWatcher, PolicyId};

/// Shared context for the OperatorPolicy controller
pub struct Context {
    /// Watched reads of dependency objects
    pub watcher: Arc<dyn DependencyWatcher>,
    /// Writes and authoritative reads
    pub store: Arc<dyn ClusterStore>,
    /// Compliance events
    pub events: Arc<dyn EventPublisher>,
    /// Process configuration
    pub config: ControllerConfig,
}

impl Context {
    /// Create a context from its collaborators
    pub fn new(
        watcher: Arc<dyn DependencyWatcher>,
        store: Arc<dyn ClusterStore>,
        events: Arc<dyn EventPublisher>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            watcher,
            store,
            events,
            config,
        }
    }

    /// Create a context for testing with default configuration and no events
    #[cfg(test)]
    pub fn for_testing(watcher: Arc<dyn DependencyWatcher>, store: Arc<dyn ClusterStore>) -> Self {
        Self {
            watcher,
            store,
            events: Arc::new(oppolicy_common::events::NoopEventPublisher),
            config: ControllerConfig::default(),
        }
    }
}

/// Reconcile an OperatorPolicy
#[instrument(skip(policy, ctx), fields(policy = %policy.name_any()))]
pub async fn reconcile(policy: Arc<OperatorPolicy>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = policy.name_any();
    let namespace = policy
        .namespace()
        .ok_or_else(|| Error::validation_for(name.as_str(), "OperatorPolicy has no namespace"))?;

    reconcile_policy(&ctx, &namespace, &name).await?;
    Ok(Action::requeue(ctx.config.requeue()))
}

/// Error policy for OperatorPolicy reconciliation
pub fn error_policy(policy: Arc<OperatorPolicy>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        policy = %policy.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(ctx.config.error_requeue())
    } else {
        // Needs a spec change
        Action::await_change()
    }
}

/// Ends a policy's query batch when dropped, so a cancelled run cannot
/// leave the batch open
struct BatchGuard<'a> {
    watcher: &'a dyn DependencyWatcher,
    id: &'a PolicyId,
}

impl<'a> BatchGuard<'a> {
    fn start(watcher: &'a dyn DependencyWatcher, id: &'a PolicyId) -> Result<Self, Error> {
        watcher.start_query_batch(id)?;
        Ok(Self { watcher, id })
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.watcher.end_query_batch(self.id) {
            error!(policy = %self.id, error = %e, "failed to end query batch");
        }
    }
}

/// Run one reconciliation of the named policy.
///
/// Reads made during the run are bracketed by a query batch; the batch is
/// ended even when the run fails or is cancelled, and a failure to end it
/// is only logged.
pub async fn reconcile_policy(ctx: &Context, namespace: &str, name: &str) -> Result<(), Error> {
    let id = PolicyId::new(namespace, name);

    let Some(policy) = ctx.store.get_policy(namespace, name).await? else {
        debug!(policy = %id, "policy no longer exists");
        if let Err(e) = ctx.watcher.remove_watcher(&id) {
            warn!(policy = %id, error = %e, "failed to remove watches of deleted policy");
        }
        return Ok(());
    };

    let _batch = BatchGuard::start(ctx.watcher.as_ref(), &id)?;
    let result = run_pipeline(ctx, &id, policy).await;
    result
}

async fn run_pipeline(ctx: &Context, id: &PolicyId, mut policy: OperatorPolicy) -> Result<(), Error> {
    let desired = build_desired_state(
        &policy,
        id,
        &ctx.config.default_namespace,
        ctx.watcher.as_ref(),
    )
    .await?;

    let mut tracker = StatusTracker::new(policy.status.clone().unwrap_or_default());
    let mut errors = Vec::new();

    tracker.update(conditions::validation(&desired.validation_errors), vec![]);

    let operator_namespace = desired
        .subscription
        .as_ref()
        .map(|sub| sub.namespace.as_str())
        .unwrap_or(&ctx.config.default_namespace);

    {
        let stage = StageContext {
            id,
            policy: &policy,
            watcher: ctx.watcher.as_ref(),
            store: ctx.store.as_ref(),
        };

        if let Err(e) =
            operator_group::reconcile(&stage, desired.operator_group.as_ref(), &mut tracker).await
        {
            errors.push(e);
        }

        let sub = Upstream::collect(
            subscription::reconcile(&stage, desired.subscription.as_ref(), &mut tracker).await,
            &mut errors,
        );

        if let Err(e) = install_plan::reconcile(&stage, &sub, &mut tracker).await {
            errors.push(e);
        }

        let csv = Upstream::collect(
            cluster_service_version::reconcile(&stage, &sub, &mut tracker).await,
            &mut errors,
        );

        if let Err(e) =
            deployment::reconcile(&stage, &csv, operator_namespace, &mut tracker).await
        {
            errors.push(e);
        }

        if let Err(e) = catalog_source::reconcile(&stage, &sub, &mut tracker).await {
            errors.push(e);
        }
    }

    let outcome = tracker.finish();
    if outcome.changed {
        let previous = policy.status.as_ref().and_then(|s| s.compliance_state);
        let current = outcome.status.compliance_state;
        policy.status = Some(outcome.status);

        match ctx.store.update_policy_status(&policy).await {
            Ok(()) => {
                if previous != current {
                    info!(policy = %id, compliance = ?current, "compliance state changed");
                }
                publish_events(ctx, &policy, &outcome.events).await;
            }
            Err(e) => errors.push(e),
        }
    }

    match Error::aggregate(errors) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

async fn publish_events(ctx: &Context, policy: &OperatorPolicy, events: &[ComplianceSummary]) {
    let reference = policy.object_ref(&());
    for summary in events {
        ctx.events
            .publish_compliance(&reference, summary.state, &summary.message)
            .await;
    }
}
