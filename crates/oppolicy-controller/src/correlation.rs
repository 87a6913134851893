//! Deciding whether an OLM resolution message is about a given subscription
//!
//! OLM reports dependency resolution failures for a whole namespace on every
//! Subscription in it. A failure only counts against a policy when the
//! message names its subscription or package, either bare or qualified by
//! namespace, as a whole token.

use regex::Regex;
use tracing::warn;

use oppolicy_common::crd::olm::Subscription;

/// Build the pattern matching references to a subscription or its package
fn reference_pattern(subscription: &Subscription) -> Result<Regex, regex::Error> {
    let namespace = regex::escape(subscription.namespace());
    let name = regex::escape(subscription.name());
    let package = regex::escape(&subscription.spec.name);

    Regex::new(&format!(
        r"(?:subscription (?:{name}|{namespace}/{name})|package (?:{package}|{namespace}/{package}))(?:$|\s|,|:)"
    ))
}

/// Whether `message` refers to this subscription or its package.
///
/// If the pattern cannot be built the message is assumed to apply.
pub fn message_includes_subscription(subscription: &Subscription, message: &str) -> bool {
    match reference_pattern(subscription) {
        Ok(pattern) => pattern.is_match(message),
        Err(e) => {
            warn!(
                subscription = %subscription.name(),
                error = %e,
                "could not build subscription reference pattern, assuming message applies"
            );
            true
        }
    }
}
