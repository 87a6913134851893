//! Cluster writes and authoritative reads
//!
//! [`ClusterStore`] covers everything the controller does to the cluster
//! besides watched reads: fetching the policy itself, creating and updating
//! OLM objects, server-side dry-run updates, and writing policy status.

use async_trait::async_trait;
use kube::api::{Api, DynamicObject, Patch, PatchParams, PostParams};
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use oppolicy_common::crd::OperatorPolicy;
use oppolicy_common::kube_utils::{build_api_resource, is_forbidden_write};
use oppolicy_common::Error;

/// Cluster operations used by reconciliation
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Read the policy directly from the API server; `Ok(None)` if it is gone
    async fn get_policy(&self, namespace: &str, name: &str)
        -> Result<Option<OperatorPolicy>, Error>;

    /// Create an object, returning it as stored (with any generated name)
    async fn create(&self, object: &DynamicObject) -> Result<DynamicObject, Error>;

    /// Replace an object
    async fn update(&self, object: &DynamicObject) -> Result<DynamicObject, Error>;

    /// Replace an object with server-side dry-run, returning what would be stored.
    ///
    /// A rejection because the write is forbidden (e.g. an immutable field)
    /// is reported as [`Error::Forbidden`].
    async fn update_dry_run(&self, object: &DynamicObject) -> Result<DynamicObject, Error>;

    /// Write the policy status, conditional on the policy's resourceVersion
    async fn update_policy_status(&self, policy: &OperatorPolicy) -> Result<(), Error>;
}

/// [`ClusterStore`] backed by the Kubernetes API
pub struct KubeClusterStore {
    client: Client,
    field_manager: String,
}

impl KubeClusterStore {
    /// Create a store writing as the given field manager
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn api_for(&self, object: &DynamicObject) -> Result<(Api<DynamicObject>, ApiResource), Error> {
        let types = object.types.as_ref().ok_or_else(|| {
            Error::serialization(format!(
                "object {} has no apiVersion/kind",
                object.name_any()
            ))
        })?;
        let ar = build_api_resource(&types.api_version, &types.kind);
        let api = match object.namespace() {
            Some(ns) if !ns.is_empty() => Api::namespaced_with(self.client.clone(), &ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        };
        Ok((api, ar))
    }

    fn post_params(&self, dry_run: bool) -> PostParams {
        PostParams {
            dry_run,
            field_manager: Some(self.field_manager.clone()),
        }
    }
}

#[async_trait]
impl ClusterStore for KubeClusterStore {
    async fn get_policy(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<OperatorPolicy>, Error> {
        let api: Api<OperatorPolicy> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create(&self, object: &DynamicObject) -> Result<DynamicObject, Error> {
        let (api, ar) = self.api_for(object)?;
        let created = api.create(&self.post_params(false), object).await?;
        info!(
            kind = %ar.kind,
            name = %created.name_any(),
            namespace = ?created.namespace(),
            "created object"
        );
        Ok(created)
    }

    async fn update(&self, object: &DynamicObject) -> Result<DynamicObject, Error> {
        let (api, ar) = self.api_for(object)?;
        let name = object.name_any();
        let updated = api.replace(&name, &self.post_params(false), object).await?;
        info!(kind = %ar.kind, name = %name, "updated object");
        Ok(updated)
    }

    async fn update_dry_run(&self, object: &DynamicObject) -> Result<DynamicObject, Error> {
        let (api, ar) = self.api_for(object)?;
        let name = object.name_any();
        match api.replace(&name, &self.post_params(true), object).await {
            Ok(result) => Ok(result),
            Err(e) if is_forbidden_write(&e) => {
                debug!(kind = %ar.kind, name = %name, error = %e, "dry-run update rejected");
                Err(Error::forbidden(&ar.kind, name, e.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_policy_status(&self, policy: &OperatorPolicy) -> Result<(), Error> {
        let namespace = policy.namespace().unwrap_or_default();
        let name = policy.name_any();
        let api: Api<OperatorPolicy> = Api::namespaced(self.client.clone(), &namespace);

        // Carrying resourceVersion makes the patch fail with a conflict if
        // the policy changed since it was read
        let patch = json!({
            "metadata": { "resourceVersion": policy.resource_version() },
            "status": policy.status,
        });

        api.patch_status(
            &name,
            &PatchParams {
                field_manager: Some(self.field_manager.clone()),
                ..Default::default()
            },
            &Patch::Merge(&patch),
        )
        .await?;

        debug!(policy = %name, namespace = %namespace, "updated policy status");
        Ok(())
    }
}
