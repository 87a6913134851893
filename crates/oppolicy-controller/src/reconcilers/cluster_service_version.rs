//! ClusterServiceVersion stage

use tracing::debug;

use oppolicy_common::crd::olm::{from_dynamic, ClusterServiceVersion, Subscription};
use oppolicy_common::kube_utils::HasApiResource;
use oppolicy_common::Error;

use super::{StageContext, Upstream};
use crate::status::conditions::{self, ConditionKind};
use crate::status::{related, StatusTracker};

const KIND: ConditionKind = ConditionKind::ClusterServiceVersion;

/// Report the CSV the subscription installed and hand it to the deployment stage
pub async fn reconcile(
    ctx: &StageContext<'_>,
    sub: &Upstream<Subscription>,
    tracker: &mut StatusTracker,
) -> Result<Upstream<Option<ClusterServiceVersion>>, Error> {
    let sub = match sub {
        Upstream::Ready(sub) => sub,
        Upstream::Invalid => {
            tracker.update(conditions::invalid_causing_unknown(KIND), vec![]);
            return Ok(Upstream::Invalid);
        }
        Upstream::Failed => return Ok(Upstream::Failed),
    };

    let Some(csv_name) = sub.installed_csv() else {
        tracker.update(conditions::no_csv(), vec![related::no_csv(sub.namespace())]);
        return Ok(Upstream::Ready(None));
    };

    let found = ctx
        .watcher
        .get(
            ctx.id,
            &ClusterServiceVersion::api_resource(),
            sub.namespace(),
            csv_name,
        )
        .await?;

    let Some(found) = found else {
        debug!(policy = %ctx.id, csv = %csv_name, "installed CSV not found");
        tracker.update(
            conditions::missing(KIND),
            vec![related::missing_wanted::<ClusterServiceVersion>(
                sub.namespace(),
                csv_name,
            )],
        );
        return Ok(Upstream::Ready(None));
    };

    let csv: ClusterServiceVersion = from_dynamic(&found)?;
    tracker.update(conditions::csv_found(&csv), vec![related::existing_csv(&csv)]);
    Ok(Upstream::Ready(Some(csv)))
}
