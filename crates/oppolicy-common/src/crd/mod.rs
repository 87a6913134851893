//! Custom Resource Definitions and OLM object views
//!
//! `OperatorPolicy` is the only CRD this controller owns. The OLM kinds it
//! supervises are modelled as partial views in [`olm`].

pub mod olm;
mod operator_policy;
mod types;

pub use operator_policy::{
    ComplianceType, OperatorPolicy, OperatorPolicySpec, OperatorPolicyStatus, RemediationAction,
};
pub use types::{ComplianceState, Condition, ConditionStatus, RelatedObject};

/// Maximum length of a DNS-1123 label
const DNS1123_LABEL_MAX_LEN: usize = 63;

/// Validate a DNS-1123 label (namespace names, for example).
///
/// Rules:
/// - 1 to 63 characters
/// - lowercase alphanumeric characters or '-'
/// - must start and end with an alphanumeric character
pub fn validate_dns1123_label(s: &str) -> Result<(), String> {
    if s.is_empty() {
        return Err("label cannot be empty".to_string());
    }
    if s.len() > DNS1123_LABEL_MAX_LEN {
        return Err(format!(
            "label must be no more than {} characters: {}",
            DNS1123_LABEL_MAX_LEN, s
        ));
    }

    let is_alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();

    if !s.chars().all(|c| is_alnum(c) || c == '-') {
        return Err(format!(
            "label must consist of lowercase alphanumeric characters or '-': {}",
            s
        ));
    }

    // Both ends must be alphanumeric
    let first_ok = s.chars().next().is_some_and(is_alnum);
    let last_ok = s.chars().last().is_some_and(is_alnum);
    if !first_ok || !last_ok {
        return Err(format!(
            "label must start and end with an alphanumeric character: {}",
            s
        ));
    }

    Ok(())
}
