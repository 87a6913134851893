//! Dependency watcher
//!
//! Every read a reconciliation performs goes through a [`DependencyWatcher`]
//! so the controller knows which cluster objects each policy depends on.
//! Reads are bracketed by a query batch: objects read during the batch
//! replace the policy's previous watch set when the batch ends. The
//! controller maps change notifications on watched objects back to the
//! owning policies through [`KubeDependencyWatcher::dependents_of`].

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use dashmap::DashMap;
use kube::api::{Api, DynamicObject, ListParams};
use kube::discovery::ApiResource;
use kube::Client;
use tracing::{debug, trace};

#[cfg(test)]
use mockall::automock;

use oppolicy_common::Error;

/// Identity of a policy owning a set of watches
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolicyId {
    /// Policy namespace
    pub namespace: String,
    /// Policy name
    pub name: String,
}

impl PolicyId {
    /// Create a policy identity
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// One watched query: a single named object, or a list within a namespace
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WatchedQuery {
    /// apiVersion of the watched kind
    pub api_version: String,
    /// Watched kind
    pub kind: String,
    /// Namespace, empty for cluster-scoped kinds
    pub namespace: String,
    /// Object name; `None` for list queries
    pub name: Option<String>,
    /// Label selector of a list query
    pub selector: String,
}

impl WatchedQuery {
    fn get(ar: &ApiResource, namespace: &str, name: &str) -> Self {
        Self {
            api_version: ar.api_version.clone(),
            kind: ar.kind.clone(),
            namespace: namespace.to_string(),
            name: Some(name.to_string()),
            selector: String::new(),
        }
    }

    fn list(ar: &ApiResource, namespace: &str, selector: &str) -> Self {
        Self {
            api_version: ar.api_version.clone(),
            kind: ar.kind.clone(),
            namespace: namespace.to_string(),
            name: None,
            selector: selector.to_string(),
        }
    }

    /// Whether a change to (kind, namespace, name) could affect this query's result.
    ///
    /// List queries match every object of the kind in the namespace; label
    /// selectors are not evaluated, so a selector only narrows results.
    pub fn covers(&self, ar: &ApiResource, namespace: &str, name: &str) -> bool {
        if self.api_version != ar.api_version || self.kind != ar.kind {
            return false;
        }
        if self.namespace != namespace {
            return false;
        }
        match &self.name {
            Some(watched) => watched == name,
            None => true,
        }
    }
}

/// Reads cluster objects on behalf of a policy and records them as watched
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DependencyWatcher: Send + Sync {
    /// Get one object; `Ok(None)` when it does not exist.
    /// An empty namespace addresses a cluster-scoped object.
    async fn get(
        &self,
        policy: &PolicyId,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error>;

    /// List objects of a kind in a namespace, optionally filtered by a label selector
    async fn list(
        &self,
        policy: &PolicyId,
        resource: &ApiResource,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<DynamicObject>, Error>;

    /// Begin recording the queries of one reconciliation run
    fn start_query_batch(&self, policy: &PolicyId) -> Result<(), Error>;

    /// Finish a run, replacing the policy's watches with the queries it made
    fn end_query_batch(&self, policy: &PolicyId) -> Result<(), Error>;

    /// Drop every watch the policy holds
    fn remove_watcher(&self, policy: &PolicyId) -> Result<(), Error>;
}

#[derive(Default)]
struct WatchSet {
    /// Queries recorded by the batch in progress
    pending: Option<HashSet<WatchedQuery>>,
    /// Queries recorded by the last completed batch
    active: HashSet<WatchedQuery>,
}

/// Watch bookkeeping per policy, independent of how objects are read
#[derive(Default)]
pub struct WatchRegistry {
    watches: DashMap<PolicyId, WatchSet>,
}

impl WatchRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a query made during the policy's running batch
    pub fn record(&self, policy: &PolicyId, query: WatchedQuery) -> Result<(), Error> {
        let mut entry = self.watches.entry(policy.clone()).or_default();
        match entry.pending.as_mut() {
            Some(pending) => {
                trace!(policy = %policy, kind = %query.kind, "recording watched query");
                pending.insert(query);
                Ok(())
            }
            None => Err(Error::watcher(
                policy.to_string(),
                "query made outside of a query batch",
            )),
        }
    }

    /// Begin a batch for the policy
    pub fn start_batch(&self, policy: &PolicyId) -> Result<(), Error> {
        let mut entry = self.watches.entry(policy.clone()).or_default();
        if entry.pending.is_some() {
            return Err(Error::watcher(
                policy.to_string(),
                "query batch already started",
            ));
        }
        entry.pending = Some(HashSet::new());
        Ok(())
    }

    /// End the policy's batch, swapping in the recorded queries
    pub fn end_batch(&self, policy: &PolicyId) -> Result<(), Error> {
        let Some(mut entry) = self.watches.get_mut(policy) else {
            return Err(Error::watcher(policy.to_string(), "no query batch started"));
        };
        match entry.pending.take() {
            Some(pending) => {
                debug!(policy = %policy, watches = pending.len(), "query batch ended");
                entry.active = pending;
                Ok(())
            }
            None => Err(Error::watcher(policy.to_string(), "no query batch started")),
        }
    }

    /// Forget the policy entirely
    pub fn remove(&self, policy: &PolicyId) {
        if self.watches.remove(policy).is_some() {
            debug!(policy = %policy, "removed policy watches");
        }
    }

    /// Policies whose last completed batch covers the given object
    pub fn dependents_of(&self, ar: &ApiResource, namespace: &str, name: &str) -> Vec<PolicyId> {
        let mut policies: Vec<PolicyId> = self
            .watches
            .iter()
            .filter(|entry| entry.active.iter().any(|q| q.covers(ar, namespace, name)))
            .map(|entry| entry.key().clone())
            .collect();
        policies.sort();
        policies
    }

    /// Number of active watched queries for the policy
    pub fn active_count(&self, policy: &PolicyId) -> usize {
        self.watches
            .get(policy)
            .map(|entry| entry.active.len())
            .unwrap_or(0)
    }
}

/// [`DependencyWatcher`] reading through the Kubernetes API
pub struct KubeDependencyWatcher {
    client: Client,
    registry: WatchRegistry,
}

impl KubeDependencyWatcher {
    /// Create a watcher reading with the given client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            registry: WatchRegistry::new(),
        }
    }

    /// Policies that depend on the given object
    pub fn dependents_of(&self, ar: &ApiResource, namespace: &str, name: &str) -> Vec<PolicyId> {
        self.registry.dependents_of(ar, namespace, name)
    }

    fn api(&self, ar: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        if namespace.is_empty() {
            Api::all_with(self.client.clone(), ar)
        } else {
            Api::namespaced_with(self.client.clone(), namespace, ar)
        }
    }
}

#[async_trait]
impl DependencyWatcher for KubeDependencyWatcher {
    async fn get(
        &self,
        policy: &PolicyId,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        self.registry
            .record(policy, WatchedQuery::get(resource, namespace, name))?;
        Ok(self.api(resource, namespace).get_opt(name).await?)
    }

    async fn list(
        &self,
        policy: &PolicyId,
        resource: &ApiResource,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<DynamicObject>, Error> {
        self.registry
            .record(policy, WatchedQuery::list(resource, namespace, selector))?;

        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(selector);
        }
        let list = self.api(resource, namespace).list(&params).await?;
        Ok(list.items)
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
