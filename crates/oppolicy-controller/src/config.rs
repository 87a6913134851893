//! Process configuration
//!
//! Every flag can also be set through the environment so the controller can
//! be configured from a Deployment manifest without changing its args.

use std::time::Duration;

use clap::{Args, Parser};

use oppolicy_common::DEFAULT_CONTROLLER_NAME;

/// OperatorPolicy controller - keeps OLM operator installations in line with policy
#[derive(Parser, Debug)]
#[command(name = "oppolicy-controller", version, about, long_about = None)]
pub struct Cli {
    /// Print the OperatorPolicy CRD manifest and exit
    #[arg(long)]
    pub crd: bool,

    #[command(flatten)]
    pub config: ControllerConfig,
}

/// Settings for the reconcile loop
#[derive(Args, Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace used for subscriptions that do not name one
    #[arg(long, env = "OPPOLICY_DEFAULT_NAMESPACE", default_value = "")]
    pub default_namespace: String,

    /// Field manager for writes and reporting component for events
    #[arg(long, env = "OPPOLICY_CONTROLLER_NAME", default_value = DEFAULT_CONTROLLER_NAME)]
    pub controller_name: String,

    /// Seconds between periodic drift checks of a healthy policy
    #[arg(long, env = "OPPOLICY_REQUEUE_SECS", default_value_t = 60)]
    pub requeue_secs: u64,

    /// Seconds before retrying a policy whose reconciliation failed
    #[arg(long, env = "OPPOLICY_ERROR_REQUEUE_SECS", default_value_t = 30)]
    pub error_requeue_secs: u64,

    /// Emit logs as JSON
    #[arg(long, env = "OPPOLICY_LOG_JSON")]
    pub log_json: bool,
}

impl ControllerConfig {
    /// Periodic requeue interval
    pub fn requeue(&self) -> Duration {
        Duration::from_secs(self.requeue_secs)
    }

    /// Requeue interval after a retryable failure
    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            default_namespace: String::new(),
            controller_name: DEFAULT_CONTROLLER_NAME.to_string(),
            requeue_secs: 60,
            error_requeue_secs: 30,
            log_json: false,
        }
    }
}
