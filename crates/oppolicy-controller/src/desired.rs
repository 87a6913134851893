//! Desired-state builder
//!
//! Turns the loosely typed fragments of a policy into the Subscription and
//! OperatorGroup the policy requires. Every problem found is collected as a
//! validation message; a fragment that fails to build leaves its desired
//! object absent while the other one may still be built.

use k8s_openapi::api::core::v1::Namespace;
use kube::api::DynamicObject;
use kube::ResourceExt;
use serde_json::{json, Map, Value};
use tracing::debug;

use oppolicy_common::crd::olm::{
    OperatorGroup, OperatorGroupSpec, Subscription, SubscriptionSpec, APPROVAL_AUTOMATIC,
    APPROVAL_MANUAL,
};
use oppolicy_common::crd::{validate_dns1123_label, OperatorPolicy};
use oppolicy_common::kube_utils::HasApiResource;
use oppolicy_common::Error;

use crate::watcher::{DependencyWatcher, PolicyId};

/// The Subscription a policy requires
#[derive(Clone, Debug, PartialEq)]
pub struct DesiredSubscription {
    /// Subscription name; always the package name
    pub name: String,
    /// Namespace the operator is installed into
    pub namespace: String,
    /// Strictly decoded spec
    pub spec: SubscriptionSpec,
}

impl DesiredSubscription {
    /// Full object as JSON, ready to merge or create
    pub fn to_value(&self) -> Result<Value, Error> {
        let spec = serde_json::to_value(&self.spec)
            .map_err(|e| Error::serialization_for_kind(Subscription::KIND, e.to_string()))?;
        Ok(json!({
            "apiVersion": Subscription::API_VERSION,
            "kind": Subscription::KIND,
            "metadata": {"name": self.name, "namespace": self.namespace},
            "spec": spec,
        }))
    }

    /// Full object as a dynamic object
    pub fn to_dynamic(&self) -> Result<DynamicObject, Error> {
        serde_json::from_value(self.to_value()?)
            .map_err(|e| Error::serialization_for_kind(Subscription::KIND, e.to_string()))
    }

    /// The view downstream stages read when the subscription does not exist yet
    pub fn as_observed(&self) -> Subscription {
        let mut sub = Subscription::default();
        sub.metadata.name = Some(self.name.clone());
        sub.metadata.namespace = Some(self.namespace.clone());
        sub.spec.name = self.spec.name.clone();
        sub.spec.source = self.spec.source.clone();
        sub.spec.source_namespace = self.spec.source_namespace.clone();
        sub
    }
}

/// The OperatorGroup a policy requires
#[derive(Clone, Debug, PartialEq)]
pub struct DesiredOperatorGroup {
    /// Explicit name from the policy
    pub name: Option<String>,
    /// Name prefix for the synthesized default group
    pub generate_name: Option<String>,
    /// Namespace of the group; the subscription's namespace
    pub namespace: String,
    /// Strictly decoded spec
    pub spec: OperatorGroupSpec,
}

impl DesiredOperatorGroup {
    /// The default group used when a policy does not specify one: all namespaces
    pub fn default_for(namespace: &str) -> Self {
        Self {
            name: None,
            generate_name: Some(format!("{namespace}-")),
            namespace: namespace.to_string(),
            spec: OperatorGroupSpec::default(),
        }
    }

    /// Whether an existing group is the one this describes
    pub fn identifies(&self, found: &DynamicObject) -> bool {
        match &self.name {
            Some(name) => found.metadata.name.as_deref() == Some(name.as_str()),
            None => found.metadata.generate_name == self.generate_name,
        }
    }

    /// Name for display and related objects
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.generate_name.as_deref())
            .unwrap_or_default()
    }

    /// Full object as JSON, ready to merge or create
    pub fn to_value(&self) -> Result<Value, Error> {
        let spec = serde_json::to_value(&self.spec)
            .map_err(|e| Error::serialization_for_kind(OperatorGroup::KIND, e.to_string()))?;

        let mut metadata = Map::new();
        metadata.insert("namespace".to_string(), json!(self.namespace));
        if let Some(name) = &self.name {
            metadata.insert("name".to_string(), json!(name));
        }
        if let Some(prefix) = &self.generate_name {
            metadata.insert("generateName".to_string(), json!(prefix));
        }

        Ok(json!({
            "apiVersion": OperatorGroup::API_VERSION,
            "kind": OperatorGroup::KIND,
            "metadata": metadata,
            "spec": spec,
        }))
    }

    /// Full object as a dynamic object
    pub fn to_dynamic(&self) -> Result<DynamicObject, Error> {
        serde_json::from_value(self.to_value()?)
            .map_err(|e| Error::serialization_for_kind(OperatorGroup::KIND, e.to_string()))
    }
}

/// Everything the builder derived from a policy
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DesiredState {
    /// The required Subscription, if the fragment was valid
    pub subscription: Option<DesiredSubscription>,
    /// The required OperatorGroup, if it could be determined
    pub operator_group: Option<DesiredOperatorGroup>,
    /// Human-readable validation problems, in discovery order
    pub validation_errors: Vec<String>,
}

/// Build the desired Subscription from the policy's fragment
pub fn build_subscription(
    policy: &OperatorPolicy,
    default_namespace: &str,
) -> Result<DesiredSubscription, String> {
    let mut fragment = match &policy.spec.subscription {
        Value::Object(map) => map.clone(),
        other => {
            return Err(format!(
                "the policy spec.subscription is invalid: expected an object, found {}",
                json_type_name(other)
            ))
        }
    };

    let namespace = match fragment.get("namespace").and_then(Value::as_str) {
        Some(ns) => ns.to_string(),
        None if default_namespace.is_empty() => {
            return Err("namespace is required in spec.subscription".to_string())
        }
        None => default_namespace.to_string(),
    };

    if validate_dns1123_label(&namespace).is_err() {
        return Err(format!(
            "the namespace '{namespace}' used for the subscription is not a valid namespace identifier"
        ));
    }

    fragment.remove("namespace");

    let mut spec: SubscriptionSpec = serde_json::from_value(Value::Object(fragment))
        .map_err(|e| format!("the policy spec.subscription is invalid: {e}"))?;

    if spec.install_plan_approval != APPROVAL_AUTOMATIC && spec.install_plan_approval != APPROVAL_MANUAL {
        return Err(format!(
            "the policy spec.subscription.installPlanApproval ('{}') is invalid: must be '{APPROVAL_AUTOMATIC}' or '{APPROVAL_MANUAL}'",
            spec.install_plan_approval
        ));
    }

    // Version-gated upgrades must go through the approver
    if policy.spec.remediation_action.is_enforce() && !policy.spec.versions.is_empty() {
        spec.install_plan_approval = APPROVAL_MANUAL.to_string();
    }

    Ok(DesiredSubscription {
        name: spec.name.clone(),
        namespace,
        spec,
    })
}

/// Build the desired OperatorGroup for the given namespace
pub fn build_operator_group(
    policy: &OperatorPolicy,
    namespace: &str,
) -> Result<DesiredOperatorGroup, String> {
    let Some(raw) = &policy.spec.operator_group else {
        return Ok(DesiredOperatorGroup::default_for(namespace));
    };

    let mut fragment = match raw {
        Value::Object(map) => map.clone(),
        other => {
            return Err(format!(
                "the policy spec.operatorGroup is invalid: expected an object, found {}",
                json_type_name(other)
            ))
        }
    };

    if let Some(specified) = fragment.get("namespace").and_then(Value::as_str) {
        if !specified.is_empty() && !namespace.is_empty() && specified != namespace {
            return Err(format!(
                "the namespace specified in spec.operatorGroup ('{specified}') must match the namespace used for the subscription ('{namespace}')"
            ));
        }
    }

    let name = match fragment.get("name").and_then(Value::as_str) {
        Some(name) => name.to_string(),
        None => return Err("name is required in spec.operatorGroup".to_string()),
    };

    fragment.remove("name");
    fragment.remove("namespace");

    let spec: OperatorGroupSpec = serde_json::from_value(Value::Object(fragment))
        .map_err(|e| format!("the policy spec.operatorGroup is invalid: {e}"))?;

    Ok(DesiredOperatorGroup {
        name: Some(name),
        generate_name: None,
        namespace: namespace.to_string(),
        spec,
    })
}

/// Build the full desired state, including the operator namespace check.
///
/// Only a failed cluster read is an error; everything else is reported
/// through [`DesiredState::validation_errors`].
pub async fn build_desired_state(
    policy: &OperatorPolicy,
    id: &PolicyId,
    default_namespace: &str,
    watcher: &dyn DependencyWatcher,
) -> Result<DesiredState, Error> {
    let mut state = DesiredState::default();

    match build_subscription(policy, default_namespace) {
        Ok(sub) => state.subscription = Some(sub),
        Err(message) => state.validation_errors.push(message),
    }

    let namespace = state
        .subscription
        .as_ref()
        .map(|sub| sub.namespace.clone())
        .unwrap_or_else(|| default_namespace.to_string());

    // Without any namespace the group cannot be placed; the subscription
    // error already explains why
    if namespace.is_empty() {
        return Ok(state);
    }

    match build_operator_group(policy, &namespace) {
        Ok(group) => state.operator_group = Some(group),
        Err(message) => state.validation_errors.push(message),
    }

    let found = watcher
        .get(id, &Namespace::api_resource(), "", &namespace)
        .await?;
    if found.is_none() {
        state
            .validation_errors
            .push(format!("the operator namespace ('{namespace}') does not exist"));
    }

    debug!(
        policy = %policy.name_any(),
        namespace = %namespace,
        errors = state.validation_errors.len(),
        "built desired state"
    );
    Ok(state)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
