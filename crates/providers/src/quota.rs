//! Quota-exhaustion classification.
//!
//! Distinguishes "this key is out of quota, rotate to the next one" from
//! any other provider failure (bad request, server error, network blip).
//! Only quota-class errors drive key rotation; other failures propagate
//! as-is so callers don't burn through a provider's whole key pool on a
//! transient 500.

use ao_domain::error::Error;

/// Substrings that indicate a provider rejected a request for quota or
/// billing reasons, as opposed to a transient or client error.
const QUOTA_KEYWORDS: &[&str] = &[
    "rate_limit",
    "rate limit",
    "quota",
    "429",
    "resource_exhausted",
    "insufficient_quota",
    "billing",
];

/// Whether an error indicates the active key/account is out of quota.
///
/// Only [`Error::Provider`] and [`Error::Http`] variants are inspected;
/// everything else (timeouts, config errors, json errors) is never
/// quota-class regardless of message content.
pub fn is_quota_error(err: &Error) -> bool {
    let message = match err {
        Error::Provider { message, .. } => message,
        Error::Http(message) => message,
        _ => return false,
    };
    let lower = message.to_lowercase();
    QUOTA_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_err(message: &str) -> Error {
        Error::Provider {
            provider: "test".into(),
            message: message.into(),
        }
    }

    #[test]
    fn detects_rate_limit_message() {
        assert!(is_quota_error(&provider_err("HTTP 429 - rate_limit_exceeded")));
    }

    #[test]
    fn detects_quota_keyword_case_insensitive() {
        assert!(is_quota_error(&provider_err("Quota Exceeded for this project")));
    }

    #[test]
    fn detects_resource_exhausted() {
        assert!(is_quota_error(&provider_err(
            "RESOURCE_EXHAUSTED: too many requests"
        )));
    }

    #[test]
    fn detects_insufficient_quota() {
        assert!(is_quota_error(&provider_err(
            "insufficient_quota: please check your plan"
        )));
    }

    #[test]
    fn detects_billing_keyword() {
        assert!(is_quota_error(&provider_err(
            "your billing details are out of date"
        )));
    }

    #[test]
    fn does_not_flag_server_error() {
        assert!(!is_quota_error(&provider_err("HTTP 503 - service unavailable")));
    }

    #[test]
    fn does_not_flag_bad_request() {
        assert!(!is_quota_error(&provider_err(
            "HTTP 400 - invalid request body"
        )));
    }

    #[test]
    fn does_not_flag_timeout() {
        assert!(!is_quota_error(&Error::Timeout("provider timed out".into())));
    }

    #[test]
    fn does_not_flag_config_error() {
        assert!(!is_quota_error(&Error::Config("missing field".into())));
    }

    #[test]
    fn flags_http_level_quota_message() {
        assert!(is_quota_error(&Error::Http(
            "429 Too Many Requests".into()
        )));
    }
}
