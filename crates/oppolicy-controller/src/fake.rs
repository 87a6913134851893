//! In-memory cluster for multi-stage tests
//!
//! Implements both collaborator traits over a map of objects so tests can
//! run whole reconciliations repeatedly and count the writes they make.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use kube::ResourceExt;
use serde_json::Value;

use oppolicy_common::crd::OperatorPolicy;
use oppolicy_common::Error;

use crate::store::ClusterStore;
use crate::watcher::{DependencyWatcher, PolicyId, WatchRegistry, WatchedQuery};

type ObjectKey = (String, String, String);

/// A write the fake observed
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Write {
    /// An object was created
    Create { kind: String, name: String },
    /// An object was replaced
    Update { kind: String, name: String },
    /// Policy status was written
    PolicyStatus { name: String },
}

/// In-memory [`DependencyWatcher`] and [`ClusterStore`]
#[derive(Default)]
pub struct FakeCluster {
    objects: Mutex<BTreeMap<ObjectKey, DynamicObject>>,
    policies: Mutex<BTreeMap<(String, String), OperatorPolicy>>,
    writes: Mutex<Vec<Write>>,
    forbidden_kinds: Mutex<HashSet<String>>,
    failing_kinds: Mutex<HashSet<String>>,
    stalled_kinds: Mutex<HashSet<String>>,
    generated: AtomicUsize,
    versions: AtomicUsize,
    registry: WatchRegistry,
}

fn key_of(obj: &DynamicObject) -> ObjectKey {
    let kind = obj.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default();
    (kind, obj.namespace().unwrap_or_default(), obj.name_any())
}

fn kind_of(obj: &DynamicObject) -> String {
    obj.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default()
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object from its JSON form
    pub fn insert(&self, value: Value) {
        let obj: DynamicObject = serde_json::from_value(value).unwrap();
        self.objects.lock().unwrap().insert(key_of(&obj), obj);
    }

    pub fn insert_policy(&self, policy: OperatorPolicy) {
        let key = (policy.namespace().unwrap_or_default(), policy.name_any());
        self.policies.lock().unwrap().insert(key, policy);
    }

    pub fn policy(&self, namespace: &str, name: &str) -> Option<OperatorPolicy> {
        self.policies
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn object(&self, kind: &str, namespace: &str, name: &str) -> Option<DynamicObject> {
        self.objects
            .lock()
            .unwrap()
            .get(&(kind.to_string(), namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn objects_of_kind(&self, kind: &str) -> Vec<DynamicObject> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((k, _, _), _)| k == kind)
            .map(|(_, obj)| obj.clone())
            .collect()
    }

    /// Make every update (and dry-run update) of the kind forbidden
    pub fn forbid_updates(&self, kind: &str) {
        self.forbidden_kinds.lock().unwrap().insert(kind.to_string());
    }

    /// Make every read of the kind fail
    pub fn fail_reads(&self, kind: &str) {
        self.failing_kinds.lock().unwrap().insert(kind.to_string());
    }

    /// Make every read of the kind hang until the caller gives up
    pub fn stall_reads(&self, kind: &str) {
        self.stalled_kinds.lock().unwrap().insert(kind.to_string());
    }

    /// Let reads of the kind complete again
    pub fn resume_reads(&self, kind: &str) {
        self.stalled_kinds.lock().unwrap().remove(kind);
    }

    pub fn writes(&self) -> Vec<Write> {
        self.writes.lock().unwrap().clone()
    }

    /// Writes other than policy status updates
    pub fn object_writes(&self) -> Vec<Write> {
        self.writes()
            .into_iter()
            .filter(|w| !matches!(w, Write::PolicyStatus { .. }))
            .collect()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().unwrap().clear();
    }

    pub fn registry(&self) -> &WatchRegistry {
        &self.registry
    }

    fn next_version(&self) -> String {
        (self.versions.fetch_add(1, Ordering::SeqCst) + 2).to_string()
    }

    async fn check_reads(&self, policy: &PolicyId, kind: &str) -> Result<(), Error> {
        let stalled = self.stalled_kinds.lock().unwrap().contains(kind);
        if stalled {
            std::future::pending::<()>().await;
        }
        if self.failing_kinds.lock().unwrap().contains(kind) {
            return Err(Error::internal_with_context(
                kind.to_string(),
                format!("read of {kind} failed for {policy}"),
            ));
        }
        Ok(())
    }

    fn check_writable(&self, obj: &DynamicObject) -> Result<(), Error> {
        let kind = kind_of(obj);
        if self.forbidden_kinds.lock().unwrap().contains(&kind) {
            return Err(Error::forbidden(kind, obj.name_any(), "field is immutable"));
        }
        if !self.objects.lock().unwrap().contains_key(&key_of(obj)) {
            return Err(Error::internal(format!("{} not found", obj.name_any())));
        }
        Ok(())
    }
}

#[async_trait]
impl DependencyWatcher for FakeCluster {
    async fn get(
        &self,
        policy: &PolicyId,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        self.check_reads(policy, &resource.kind).await?;
        let _ = self.registry.record(
            policy,
            WatchedQuery {
                api_version: resource.api_version.clone(),
                kind: resource.kind.clone(),
                namespace: namespace.to_string(),
                name: Some(name.to_string()),
                selector: String::new(),
            },
        );
        Ok(self.object(&resource.kind, namespace, name))
    }

    async fn list(
        &self,
        policy: &PolicyId,
        resource: &ApiResource,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<DynamicObject>, Error> {
        self.check_reads(policy, &resource.kind).await?;
        let _ = self.registry.record(
            policy,
            WatchedQuery {
                api_version: resource.api_version.clone(),
                kind: resource.kind.clone(),
                namespace: namespace.to_string(),
                name: None,
                selector: selector.to_string(),
            },
        );
        Ok(self
            .objects_of_kind(&resource.kind)
            .into_iter()
            .filter(|obj| namespace.is_empty() || obj.namespace().as_deref() == Some(namespace))
            .collect())
    }

    fn start_query_batch(&self, policy: &PolicyId) -> Result<(), Error> {
        self.registry.start_batch(policy)
    }

    fn end_query_batch(&self, policy: &PolicyId) -> Result<(), Error> {
        self.registry.end_batch(policy)
    }

    fn remove_watcher(&self, policy: &PolicyId) -> Result<(), Error> {
        self.registry.remove(policy);
        Ok(())
    }
}

#[async_trait]
impl ClusterStore for FakeCluster {
    async fn get_policy(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<OperatorPolicy>, Error> {
        Ok(self.policy(namespace, name))
    }

    async fn create(&self, object: &DynamicObject) -> Result<DynamicObject, Error> {
        let mut created = object.clone();
        if created.metadata.name.is_none() {
            let prefix = created.metadata.generate_name.clone().unwrap_or_default();
            let n = self.generated.fetch_add(1, Ordering::SeqCst);
            created.metadata.name = Some(format!("{prefix}{n:05}"));
        }
        created.metadata.resource_version = Some(self.next_version());

        let key = key_of(&created);
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&key) {
            return Err(Error::internal(format!("{} already exists", created.name_any())));
        }
        objects.insert(key, created.clone());

        self.writes.lock().unwrap().push(Write::Create {
            kind: kind_of(&created),
            name: created.name_any(),
        });
        Ok(created)
    }

    async fn update(&self, object: &DynamicObject) -> Result<DynamicObject, Error> {
        self.check_writable(object)?;
        let mut updated = object.clone();
        updated.metadata.resource_version = Some(self.next_version());
        self.objects
            .lock()
            .unwrap()
            .insert(key_of(&updated), updated.clone());

        self.writes.lock().unwrap().push(Write::Update {
            kind: kind_of(&updated),
            name: updated.name_any(),
        });
        Ok(updated)
    }

    async fn update_dry_run(&self, object: &DynamicObject) -> Result<DynamicObject, Error> {
        self.check_writable(object)?;
        let mut result = object.clone();
        result.metadata.resource_version = Some(self.next_version());
        Ok(result)
    }

    async fn update_policy_status(&self, policy: &OperatorPolicy) -> Result<(), Error> {
        self.writes.lock().unwrap().push(Write::PolicyStatus {
            name: policy.name_any(),
        });
        self.insert_policy(policy.clone());
        Ok(())
    }
}
