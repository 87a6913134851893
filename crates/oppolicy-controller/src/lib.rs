//! OperatorPolicy controller
//!
//! Keeps an OLM operator installation in line with an `OperatorPolicy`:
//!
//! - **Desired state**: builds the Subscription and OperatorGroup a policy asks for
//! - **Merge**: decides whether an existing object already satisfies a desired one
//! - **Reconcilers**: one stage per dependency kind, run in dependency order
//! - **Approver**: version-gated InstallPlan approval
//! - **Status**: per-dimension conditions, related objects and compliance events
//! - **Controller**: the reconcile entry point and its kube-runtime wiring

pub mod approver;
pub mod config;
pub mod controller;
pub mod correlation;
pub mod desired;
pub mod merge;
pub mod reconcilers;
pub mod runner;
pub mod status;
pub mod store;
pub mod watcher;

#[cfg(test)]
mod fake;
