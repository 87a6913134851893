//! Common types for the operator policy controller: CRDs, errors, events, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default name of the controller, used as field manager and event reporter
pub const DEFAULT_CONTROLLER_NAME: &str = "operator-policy-controller";
