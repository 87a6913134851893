//! Compliance events on OperatorPolicies
//!
//! Each verdict a run settles on is recorded as a Kubernetes Event on the
//! policy, so `kubectl describe operatorpolicy` shows the compliance history.
//! Publishing failures are logged and swallowed.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

use crate::crd::ComplianceState;

/// Action recorded on every compliance event
pub const COMPLIANCE_UPDATE: &str = "ComplianceStateUpdate";

/// Event reason for a policy: `policy: <namespace>/<name>`
pub fn compliance_reason(policy: &ObjectReference) -> String {
    format!(
        "policy: {}/{}",
        policy.namespace.as_deref().unwrap_or_default(),
        policy.name.as_deref().unwrap_or_default()
    )
}

/// Normal for a Compliant verdict, Warning for anything else
pub fn event_type(state: ComplianceState) -> EventType {
    match state {
        ComplianceState::Compliant => EventType::Normal,
        _ => EventType::Warning,
    }
}

/// Sink for compliance events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Record `state` and its explanation on the policy
    async fn publish_compliance(&self, policy: &ObjectReference, state: ComplianceState, message: &str);
}

/// Publishes through `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// `controller_name` becomes the events' reporting component
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish_compliance(&self, policy: &ObjectReference, state: ComplianceState, message: &str) {
        let reason = compliance_reason(policy);
        let event = Event {
            type_: event_type(state),
            reason: reason.clone(),
            note: Some(message.to_string()),
            action: COMPLIANCE_UPDATE.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, policy).await {
            warn!(%reason, ?state, error = %e, "failed to publish compliance event");
        }
    }
}

/// Drops every event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish_compliance(&self, _policy: &ObjectReference, _state: ComplianceState, _message: &str) {}
}
