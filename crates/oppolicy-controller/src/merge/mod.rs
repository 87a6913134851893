//! Merge engine: decides whether an existing object needs an update
//!
//! A structural merge finds candidate differences. Because the API server
//! defaults fields the policy never mentions, a candidate difference is
//! confirmed with a server-side dry-run update and only counts when the
//! dry-run result differs from what is stored.

mod strategy;

pub use strategy::{merge_resource, merge_value, values_equal, MergeResult};

use kube::api::DynamicObject;
use kube::ResourceExt;
use serde_json::Value;
use tracing::debug;

use oppolicy_common::crd::ComplianceType;
use oppolicy_common::kube_utils::strip_volatile_fields;
use oppolicy_common::Error;

use crate::store::ClusterStore;

/// Outcome of comparing a desired object with the one on the cluster
#[derive(Clone, Debug)]
pub struct MergeOutcome {
    /// The existing object with the desired values applied
    pub merged: DynamicObject,
    /// Whether writing `merged` would change the stored object
    pub update_needed: bool,
    /// Whether the API server refused the dry-run update
    pub update_forbidden: bool,
}

/// Compare `desired` with `existing`, confirming differences with a dry-run update
pub async fn merge_objects(
    store: &dyn ClusterStore,
    desired: &Value,
    existing: &DynamicObject,
    mode: ComplianceType,
) -> Result<MergeOutcome, Error> {
    let existing_value = serde_json::to_value(existing)
        .map_err(|e| Error::serialization(format!("encoding {}: {e}", existing.name_any())))?;

    let MergeResult { merged, mismatch } = merge_resource(desired, &existing_value, mode);
    let merged: DynamicObject = serde_json::from_value(merged)
        .map_err(|e| Error::serialization(format!("decoding merged {}: {e}", existing.name_any())))?;

    if !mismatch {
        return Ok(MergeOutcome {
            merged,
            update_needed: false,
            update_forbidden: false,
        });
    }

    match store.update_dry_run(&merged).await {
        Ok(dry_run) => {
            let mut after = serde_json::to_value(&dry_run)
                .map_err(|e| Error::serialization(format!("encoding dry-run result: {e}")))?;
            let mut before = existing_value;
            strip_volatile_fields(&mut after);
            strip_volatile_fields(&mut before);

            let update_needed = !values_equal(&after, &before);
            debug!(
                name = %existing.name_any(),
                update_needed,
                "dry-run update compared with stored object"
            );
            Ok(MergeOutcome {
                merged,
                update_needed,
                update_forbidden: false,
            })
        }
        Err(e) if e.is_forbidden() => {
            debug!(name = %existing.name_any(), error = %e, "dry-run update forbidden");
            Ok(MergeOutcome {
                merged,
                update_needed: true,
                update_forbidden: true,
            })
        }
        Err(e) => Err(e),
    }
}
