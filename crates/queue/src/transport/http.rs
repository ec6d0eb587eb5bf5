//! Transport that posts messages to an HTTP relay

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::{EmailMessage, EmailTransport, SendReceipt, SmsMessage, SmsTransport, TransportError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Relay response body; both fields are optional
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayResponse {
    #[serde(alias = "id")]
    message_id: Option<String>,
}

/// Posts each message as JSON to a relay endpoint (an SMTP bridge, an SMS
/// gateway). Any 2xx response is success; anything else is a
/// [`TransportError::Status`] carrying the status code.
#[derive(Debug, Clone)]
pub struct HttpRelayTransport {
    client: Client,
    url: String,
    from: Option<String>,
}

impl HttpRelayTransport {
    /// Create a transport posting to `url`
    pub fn new(url: impl Into<String>) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(TransportError::from)?;

        Ok(Self {
            client,
            url: url.into(),
            from: None,
        })
    }

    /// Sender address included with every email
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post(&self, body: serde_json::Value) -> Result<SendReceipt, TransportError> {
        let response = self.client.post(&self.url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(url = %self.url, status = status.as_u16(), "Relay rejected message");
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let relay: RelayResponse = response.json().await.unwrap_or_default();
        let message_id = relay
            .message_id
            .unwrap_or_else(|| format!("relay-{}", uuid::Uuid::now_v7()));
        debug!(url = %self.url, %message_id, "Relay accepted message");

        Ok(SendReceipt {
            ok: true,
            message_id,
        })
    }
}

#[async_trait]
impl EmailTransport for HttpRelayTransport {
    async fn send_email(&self, message: &EmailMessage) -> Result<SendReceipt, TransportError> {
        let mut body = serde_json::to_value(message)
            .map_err(|e| TransportError::Other(e.to_string()))?;
        if let (Some(from), Some(map)) = (&self.from, body.as_object_mut()) {
            map.insert("from".to_string(), json!(from));
        }
        self.post(body).await
    }
}

#[async_trait]
impl SmsTransport for HttpRelayTransport {
    async fn send_sms(&self, message: &SmsMessage) -> Result<SendReceipt, TransportError> {
        let body =
            serde_json::to_value(message).map_err(|e| TransportError::Other(e.to_string()))?;
        self.post(body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let transport = HttpRelayTransport::new("http://relay.local/send")
            .unwrap()
            .with_from("noreply@example.com");
        assert_eq!(transport.url(), "http://relay.local/send");
        assert_eq!(transport.from.as_deref(), Some("noreply@example.com"));
    }

    #[tokio::test]
    async fn test_unreachable_relay_is_an_error() {
        // Port 9 (discard) on localhost is expected to refuse connections
        let transport = HttpRelayTransport::new("http://127.0.0.1:9/send").unwrap();
        let result = transport
            .send_sms(&SmsMessage {
                to: "+15550100".to_string(),
                text: "hi".to_string(),
            })
            .await;
        assert!(result.is_err());
    }
}
