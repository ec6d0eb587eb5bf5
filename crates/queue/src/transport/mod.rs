//! Outbound delivery transports
//!
//! This module provides:
//! - [`EmailTransport`] / [`SmsTransport`] - delivery ports used by the notification handlers
//! - [`ConsoleTransport`] - logs messages instead of sending them
//! - [`HttpRelayTransport`] - posts messages to an HTTP relay

mod console;
mod http;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use console::ConsoleTransport;
pub use http::HttpRelayTransport;

/// Email to deliver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    /// Template name, rendered by the relay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Template variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
}

/// SMS to deliver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmsMessage {
    pub to: String,
    pub text: String,
}

/// Acknowledgement from a transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub ok: bool,
    pub message_id: String,
}

/// Transport failure.
///
/// The display text is what the failure classifier sees, so variants keep the
/// upstream wording (status codes, `timeout`) intact.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Relay answered with a non-success status
    #[error("relay responded {status}: {body}")]
    Status { status: u16, body: String },

    /// Request did not complete in time
    #[error("relay request timeout: {0}")]
    Timeout(String),

    /// Connection could not be established
    #[error("relay connection failed: {0}")]
    Connect(String),

    /// Any other failure
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_connect() {
            Self::Connect(e.to_string())
        } else {
            Self::Other(e.to_string())
        }
    }
}

/// Delivers email
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send_email(&self, message: &EmailMessage) -> Result<SendReceipt, TransportError>;
}

/// Delivers SMS
#[async_trait]
pub trait SmsTransport: Send + Sync {
    async fn send_sms(&self, message: &SmsMessage) -> Result<SendReceipt, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_email_message_ignores_unknown_fields() {
        let message: EmailMessage = serde_json::from_value(json!({
            "to": "a@b.c",
            "subject": "hi",
            "failTimes": 2,
            "template": "welcome",
            "data": {"name": "Ada"},
            "headers": {"X-Tag": "welcome"}
        }))
        .unwrap();

        assert_eq!(message.to, "a@b.c");
        assert_eq!(message.template.as_deref(), Some("welcome"));
        assert!(message.text.is_none());
        assert_eq!(
            message.headers.unwrap().get("X-Tag").map(String::as_str),
            Some("welcome")
        );
    }

    #[test]
    fn test_email_message_requires_subject() {
        let err = serde_json::from_value::<EmailMessage>(json!({"to": "a@b.c"})).unwrap_err();
        assert!(err.to_string().contains("subject"));
    }

    #[test]
    fn test_status_error_mentions_code() {
        let err = TransportError::Status {
            status: 429,
            body: "slow down".to_string(),
        };
        assert_eq!(err.to_string(), "relay responded 429: slow down");
    }
}
