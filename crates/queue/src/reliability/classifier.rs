//! Failure classification
//!
//! A failed attempt is either permanent (no further attempts can succeed) or
//! transient (worth retrying). Rules are applied in order; the first match wins.

use serde_json::Value;

use crate::job::JobKind;

/// Message substrings that mark a failure as permanent
const PERMANENT_PATTERNS: &[&str] = &[
    "invalid recipient",
    "invalid address",
    "hard bounce",
    "unsupported job type",
];

/// Message substrings that mark a failure as transient
const TRANSIENT_PATTERNS: &[&str] = &[
    "eai_again",
    "enotfound",
    "econnrefused",
    "timeout",
    "rate limit",
    "429",
];

/// Outcome of classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Permanent,
    Transient,
}

/// Classified job failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    /// Payload is missing a field the job kind requires
    #[error("invalid payload, missing {field}: {message}")]
    Validation { field: &'static str, message: String },

    /// Failure that no retry can fix
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Failure worth retrying
    #[error("transient failure: {0}")]
    Transient(String),
}

impl JobError {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Validation { .. } | Self::Permanent(_) => FailureClass::Permanent,
            Self::Transient(_) => FailureClass::Transient,
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.class() == FailureClass::Permanent
    }

    /// The handler's original message
    pub fn message(&self) -> &str {
        match self {
            Self::Validation { message, .. } => message,
            Self::Permanent(message) | Self::Transient(message) => message,
        }
    }
}

/// Classify a failed attempt.
///
/// 1. Missing `to` on any job is permanent.
/// 2. Missing `subject` on an email job is permanent.
/// 3. A message naming an invalid recipient or address, a hard bounce, or an
///    unsupported job type is permanent.
/// 4. Network errors, timeouts and rate limiting are transient.
/// 5. Anything else is transient.
pub fn classify(message: &str, kind: &JobKind, payload: &Value) -> JobError {
    if is_missing(payload.get("to")) {
        return JobError::Validation {
            field: "to",
            message: message.to_string(),
        };
    }

    if *kind == JobKind::Email && is_missing(payload.get("subject")) {
        return JobError::Validation {
            field: "subject",
            message: message.to_string(),
        };
    }

    let lowered = message.to_lowercase();

    if PERMANENT_PATTERNS.iter().any(|p| lowered.contains(p)) {
        return JobError::Permanent(message.to_string());
    }

    if TRANSIENT_PATTERNS.iter().any(|p| lowered.contains(p)) {
        return JobError::Transient(message.to_string());
    }

    JobError::Transient(message.to_string())
}

/// Absent, null, empty string and `false` all count as missing
fn is_missing(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Bool(b)) => !b,
        Some(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn email() -> Value {
        json!({"to": "a@b.c", "subject": "hi"})
    }

    #[test]
    fn test_missing_recipient_is_permanent() {
        let err = classify("anything", &JobKind::Sms, &json!({"text": "x"}));
        assert_eq!(
            err,
            JobError::Validation {
                field: "to",
                message: "anything".to_string()
            }
        );
        assert!(err.is_permanent());

        let err = classify("anything", &JobKind::Sms, &json!({"to": "", "text": "x"}));
        assert!(err.is_permanent());

        let err = classify("anything", &JobKind::Sms, &json!({"to": null}));
        assert!(err.is_permanent());
    }

    #[test]
    fn test_missing_subject_only_matters_for_email() {
        let err = classify("boom", &JobKind::Email, &json!({"to": "a@b.c"}));
        assert!(matches!(err, JobError::Validation { field: "subject", .. }));

        let err = classify("boom", &JobKind::Sms, &json!({"to": "+15550100"}));
        assert_eq!(err.class(), FailureClass::Transient);
    }

    #[test]
    fn test_permanent_message_patterns() {
        for message in [
            "Invalid recipient: nobody@",
            "550 invalid address",
            "HARD BOUNCE from upstream",
            "Unsupported job type: fax",
        ] {
            let err = classify(message, &JobKind::Email, &email());
            assert_eq!(err, JobError::Permanent(message.to_string()), "{message}");
        }
    }

    #[test]
    fn test_transient_message_patterns() {
        for message in [
            "getaddrinfo EAI_AGAIN smtp.example.com",
            "ENOTFOUND",
            "connect ECONNREFUSED 127.0.0.1:25",
            "Connection timeout",
            "Rate limit exceeded",
            "relay responded 429",
            "Simulated transient failure 1/2",
            "Forced permanent failure for DLQ demo",
        ] {
            let err = classify(message, &JobKind::Email, &email());
            assert_eq!(err.class(), FailureClass::Transient, "{message}");
        }
    }

    #[test]
    fn test_structural_rules_win_over_message() {
        let err = classify("timeout", &JobKind::Email, &json!({"subject": "hi"}));
        assert!(matches!(err, JobError::Validation { field: "to", .. }));
    }

    #[test]
    fn test_display_is_failed_reason() {
        let err = classify("hard bounce", &JobKind::Email, &email());
        assert_eq!(err.to_string(), "permanent failure: hard bounce");
        assert_eq!(err.message(), "hard bounce");

        let err = classify("x", &JobKind::Email, &json!({"to": "a@b.c"}));
        assert_eq!(err.to_string(), "invalid payload, missing subject: x");
    }
}
