//! InstallPlan stage

use kube::api::DynamicObject;
use tracing::{debug, info};

use oppolicy_common::crd::olm::{InstallPlan, Subscription};
use oppolicy_common::crd::RelatedObject;
use oppolicy_common::kube_utils::{is_owned_by, HasApiResource};
use oppolicy_common::Error;

use super::{StageContext, Upstream};
use crate::approver::{decide, Decision};
use crate::status::conditions::{self, ConditionKind};
use crate::status::{related, StatusTracker};

const KIND: ConditionKind = ConditionKind::InstallPlan;

/// Report the InstallPlans the subscription owns and approve one when allowed
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

    let owned: Vec<DynamicObject> = ctx
        .watcher
        .list(ctx.id, &InstallPlan::api_resource(), sub.namespace(), "")
        .await?
        .into_iter()
        .filter(|obj| {
            is_owned_by(
                obj,
                Subscription::API_VERSION,
                Subscription::KIND,
                sub.name(),
            )
        })
        .collect();
    let plans: Vec<InstallPlan> = owned.iter().map(InstallPlan::from_dynamic).collect();

    let related_objects = if plans.is_empty() {
        vec![related::no_install_plans(sub.namespace())]
    } else {
        plans.iter().map(related::install_plan).collect()
    };

    let decision = decide(
        &plans,
        sub.current_install_plan(),
        ctx.remediation(),
        &ctx.policy.spec.versions,
    );
    debug!(policy = %ctx.id, plans = plans.len(), ?decision, "evaluated InstallPlans");

    let condition = match decision {
        Decision::NoPlans => conditions::no_install_plans(),
        Decision::CurrentPlanFailed => conditions::install_plan_failed(),
        Decision::Installing => conditions::install_plans_installing(),
        Decision::NothingToApprove => conditions::no_install_plans_requiring_approval(),
        Decision::AwaitingApproval { upgrades, approvable } => {
            conditions::install_plan_upgrade(&upgrades, approvable.as_deref())
        }
        Decision::Approve {
            plan,
            version,
            upgrades,
        } => {
            let approval = Approval {
                plan: &plan,
                version: &version,
                upgrades: &upgrades,
            };
            return approve(ctx, &owned, approval, related_objects, tracker).await;
        }
    };

    tracker.update(condition, related_objects);
    Ok(())
}

struct Approval<'a> {
    plan: &'a str,
    version: &'a str,
    upgrades: &'a [String],
}

async fn approve(
    ctx: &StageContext<'_>,
    owned: &[DynamicObject],
    approval: Approval<'_>,
    related_objects: Vec<RelatedObject>,
    tracker: &mut StatusTracker,
) -> Result<(), Error> {
    let Approval {
        plan,
        version,
        upgrades,
    } = approval;
    let Some(obj) = owned
        .iter()
        .find(|obj| obj.metadata.name.as_deref() == Some(plan))
    else {
        return Err(Error::internal_with_context(
            "InstallPlan",
            format!("plan {plan} vanished before approval"),
        ));
    };

    // The pending set before approval, as reported by the early event
    let target = format!("[{version}]");
    let changed = tracker.update(
        conditions::install_plan_upgrade(upgrades, Some(std::slice::from_ref(&target))),
        related_objects.clone(),
    );
    if changed {
        tracker.record_early_event();
    }

    let mut approved = obj.clone();
    approved.data["spec"]["approved"] = serde_json::Value::Bool(true);
    ctx.store.update(&approved).await?;
    info!(policy = %ctx.id, install_plan = %plan, %version, "approved InstallPlan");

    tracker.update(conditions::install_plan_approved(version), related_objects);
    Ok(())
}
