//! Email and SMS job handlers
//!
//! Email payloads may carry two test hooks:
//! - `failTimes: n` fails the first `n` attempts with a transient error
//! - `forceFail: true` fails every attempt

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::job::{Job, JobKind};
use crate::transport::{EmailMessage, EmailTransport, SmsMessage, SmsTransport};
use crate::worker::{HandlerRegistry, HandlerResult};

/// Failure simulation flags read from an email payload
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimulatedFailure {
    #[serde(default)]
    fail_times: Option<u32>,
    #[serde(default)]
    force_fail: bool,
}

impl SimulatedFailure {
    fn from_payload(payload: &Value) -> Self {
        serde_json::from_value(payload.clone()).unwrap_or_default()
    }

    /// Failure message for this attempt, if the payload asks for one
    fn check(&self, attempt: u32) -> Option<String> {
        if self.force_fail {
            return Some("Forced permanent failure for DLQ demo".to_string());
        }
        match self.fail_times {
            Some(times) if attempt <= times => {
                Some(format!("Simulated transient failure {}/{}", attempt, times))
            }
            _ => None,
        }
    }
}

/// Deliver an email job
pub async fn handle_email(job: Job, transport: Arc<dyn EmailTransport>) -> HandlerResult {
    if let Some(message) = SimulatedFailure::from_payload(&job.payload).check(job.attempts_made) {
        return Err(message);
    }

    let message: EmailMessage = serde_json::from_value(job.payload)
        .map_err(|e| format!("invalid email payload: {}", e))?;

    let receipt = transport
        .send_email(&message)
        .await
        .map_err(|e| e.to_string())?;

    serde_json::to_value(receipt).map_err(|e| e.to_string())
}

/// Deliver an SMS job
pub async fn handle_sms(job: Job, transport: Arc<dyn SmsTransport>) -> HandlerResult {
    let message: SmsMessage = serde_json::from_value(job.payload)
        .map_err(|e| format!("invalid sms payload: {}", e))?;

    let receipt = transport
        .send_sms(&message)
        .await
        .map_err(|e| e.to_string())?;

    serde_json::to_value(receipt).map_err(|e| e.to_string())
}

/// Register the `email` and `sms` handlers
pub fn register_notification_handlers(
    registry: &mut HandlerRegistry,
    email: Arc<dyn EmailTransport>,
    sms: Arc<dyn SmsTransport>,
) {
    registry.register(JobKind::Email, move |job| handle_email(job, Arc::clone(&email)));
    registry.register(JobKind::Sms, move |job| handle_sms(job, Arc::clone(&sms)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobState, NewJob};
    use crate::persistence::{InMemoryQueueStore, QueueStore};
    use crate::transport::ConsoleTransport;
    use serde_json::json;

    async fn leased(kind: JobKind, payload: Value, attempts: u32) -> Job {
        let store = InMemoryQueueStore::new("q");
        store.enqueue(NewJob::new(kind, payload)).await.unwrap();
        let mut job = store.lease_next().await.unwrap().unwrap();
        job.attempts_made = attempts;
        job
    }

    #[tokio::test]
    async fn test_email_delivered() {
        let job = leased(JobKind::Email, json!({"to": "a@b.c", "subject": "hi"}), 1).await;
        let result = handle_email(job, Arc::new(ConsoleTransport)).await.unwrap();
        assert_eq!(result["ok"], true);
        assert!(result["messageId"].as_str().unwrap().starts_with("console-"));
    }

    #[tokio::test]
    async fn test_fail_times_simulation() {
        let payload = json!({"to": "a@b.c", "subject": "hi", "failTimes": 2});

        let job = leased(JobKind::Email, payload.clone(), 1).await;
        let err = handle_email(job, Arc::new(ConsoleTransport)).await.unwrap_err();
        assert_eq!(err, "Simulated transient failure 1/2");

        let job = leased(JobKind::Email, payload.clone(), 2).await;
        let err = handle_email(job, Arc::new(ConsoleTransport)).await.unwrap_err();
        assert_eq!(err, "Simulated transient failure 2/2");

        let job = leased(JobKind::Email, payload, 3).await;
        assert!(handle_email(job, Arc::new(ConsoleTransport)).await.is_ok());
    }

    #[tokio::test]
    async fn test_force_fail() {
        let payload = json!({"to": "a@b.c", "subject": "hi", "forceFail": true});
        let job = leased(JobKind::Email, payload, 3).await;
        let err = handle_email(job, Arc::new(ConsoleTransport)).await.unwrap_err();
        assert_eq!(err, "Forced permanent failure for DLQ demo");
    }

    #[tokio::test]
    async fn test_email_missing_subject() {
        let job = leased(JobKind::Email, json!({"to": "a@b.c"}), 1).await;
        let err = handle_email(job, Arc::new(ConsoleTransport)).await.unwrap_err();
        assert!(err.starts_with("invalid email payload"));
    }

    #[tokio::test]
    async fn test_sms_delivered() {
        let job = leased(JobKind::Sms, json!({"to": "+15550100", "text": "hi"}), 1).await;
        assert_eq!(job.state, JobState::Active);
        let result = handle_sms(job, Arc::new(ConsoleTransport)).await.unwrap();
        assert_eq!(result["ok"], true);
    }

    #[test]
    fn test_register_notification_handlers() {
        let mut registry = HandlerRegistry::new();
        register_notification_handlers(
            &mut registry,
            Arc::new(ConsoleTransport),
            Arc::new(ConsoleTransport),
        );
        assert_eq!(registry.kinds(), vec!["email", "sms"]);
    }
}
