//! Deterministic classification of backend failures.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::error::{BackendError, FailureKind};
use crate::core::types::ErrorKind;

static QUOTA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(quota|rate[ _-]?limit(ed)?|too many requests)\b")
        .expect("quota pattern should be valid")
});

static AUTH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(invalid[ _-]api[ _-]key|unauthori[sz]ed|model_not_found|does not have access|insufficient[ _-]permissions?)\b")
        .expect("auth pattern should be valid")
});

/// Classify a backend failure into the user-facing taxonomy.
///
/// - `QuotaExceeded`: status 429, or quota/rate-limit wording.
/// - `AuthFailure`: status 401/403, or credential/model-access wording.
/// - `TransientBackendFailure`: any other status, timeout, malformed output
///   or abnormal process exit.
/// - `Unclassified`: nothing else to go on.
pub fn classify(err: &BackendError) -> ErrorKind {
    match err.status {
        Some(429) => return ErrorKind::QuotaExceeded,
        Some(401 | 403) => return ErrorKind::AuthFailure,
        _ => {}
    }
    if QUOTA_RE.is_match(&err.message) {
        return ErrorKind::QuotaExceeded;
    }
    if AUTH_RE.is_match(&err.message) {
        return ErrorKind::AuthFailure;
    }
    if err.status.is_some() {
        return ErrorKind::TransientBackendFailure;
    }
    match err.kind {
        FailureKind::Timeout | FailureKind::Protocol | FailureKind::Process => {
            ErrorKind::TransientBackendFailure
        }
        FailureKind::Http => ErrorKind::Unclassified,
    }
}

/// Fixed user-facing text for a classified failure.
pub fn user_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::QuotaExceeded => {
            "ERROR: the model provider rejected the request because the quota or rate limit was exceeded."
        }
        ErrorKind::AuthFailure => {
            "ERROR: the model provider rejected the credentials, or the account does not have access to the configured model."
        }
        ErrorKind::TransientBackendFailure => {
            "ERROR: the execution backend failed. This is usually temporary."
        }
        ErrorKind::Unclassified => "ERROR: an unexpected error occurred.",
    }
}

/// User-facing text with the backend's detail appended.
pub fn describe(kind: ErrorKind, err: &BackendError) -> String {
    let detail = err.message.trim();
    if detail.is_empty() {
        user_message(kind).to_string()
    } else {
        format!("{} ({detail})", user_message(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_take_priority() {
        assert_eq!(
            classify(&BackendError::http(429, "slow down")),
            ErrorKind::QuotaExceeded
        );
        assert_eq!(
            classify(&BackendError::http(401, "nope")),
            ErrorKind::AuthFailure
        );
        assert_eq!(
            classify(&BackendError::http(403, "")),
            ErrorKind::AuthFailure
        );
        assert_eq!(
            classify(&BackendError::http(500, "internal")),
            ErrorKind::TransientBackendFailure
        );
    }

    #[test]
    fn wording_is_matched_without_status() {
        let err = BackendError::new(FailureKind::Process, "You exceeded your current quota");
        assert_eq!(classify(&err), ErrorKind::QuotaExceeded);

        let err = BackendError::new(FailureKind::Process, "error: Invalid API key provided");
        assert_eq!(classify(&err), ErrorKind::AuthFailure);

        let err = BackendError::new(FailureKind::Process, "model_not_found: gpt-9");
        assert_eq!(classify(&err), ErrorKind::AuthFailure);
    }

    #[test]
    fn timeouts_and_protocol_errors_are_transient() {
        let err = BackendError::new(FailureKind::Timeout, "timed out after 5s");
        assert_eq!(classify(&err), ErrorKind::TransientBackendFailure);
        let err = BackendError::new(FailureKind::Protocol, "missing field `tasks`");
        assert_eq!(classify(&err), ErrorKind::TransientBackendFailure);
    }

    #[test]
    fn http_without_status_is_unclassified() {
        let err = BackendError::new(FailureKind::Http, "connection reset");
        assert_eq!(classify(&err), ErrorKind::Unclassified);
    }

    #[test]
    fn describe_appends_detail() {
        let err = BackendError::http(500, "upstream down");
        let text = describe(ErrorKind::TransientBackendFailure, &err);
        assert!(text.starts_with("ERROR: the execution backend failed."));
        assert!(text.ends_with("(upstream down)"));
    }
}
