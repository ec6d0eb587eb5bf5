//! Transport that logs instead of sending

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use super::{EmailMessage, EmailTransport, SendReceipt, SmsMessage, SmsTransport, TransportError};

/// Logs every message and reports success.
///
/// Used for local runs and demos where no relay is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleTransport;

#[async_trait]
impl EmailTransport for ConsoleTransport {
    async fn send_email(&self, message: &EmailMessage) -> Result<SendReceipt, TransportError> {
        let message_id = format!("console-{}", Uuid::now_v7());
        info!(
            to = %message.to,
            subject = %message.subject,
            template = message.template.as_deref().unwrap_or("-"),
            %message_id,
            "Email delivered to console"
        );
        Ok(SendReceipt {
            ok: true,
            message_id,
        })
    }
}

#[async_trait]
impl SmsTransport for ConsoleTransport {
    async fn send_sms(&self, message: &SmsMessage) -> Result<SendReceipt, TransportError> {
        let message_id = format!("console-{}", Uuid::now_v7());
        info!(to = %message.to, text = %message.text, %message_id, "SMS delivered to console");
        Ok(SendReceipt {
            ok: true,
            message_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_console_always_succeeds() {
        let transport = ConsoleTransport;
        let receipt = transport
            .send_sms(&SmsMessage {
                to: "+15550100".to_string(),
                text: "hello".to_string(),
            })
            .await
            .unwrap();

        assert!(receipt.ok);
        assert!(receipt.message_id.starts_with("console-"));
    }
}
