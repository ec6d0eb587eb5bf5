// Server configuration loaded from environment variables.
// Decision: Every setting has a default so `courier-server` starts with no env at all
// Decision: No DATABASE_URL means in-memory queues (local development only)

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::HeaderValue;

/// Where outbound messages are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// Log the message and return a generated id
    #[default]
    Console,
    /// POST the message to a relay URL
    Http,
}

impl TransportKind {
    fn parse(var: &'static str, value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_lowercase().as_str() {
            "console" => Ok(TransportKind::Console),
            "http" => Ok(TransportKind::Http),
            _ => Err(ConfigError::invalid(var, value, "expected `console` or `http`")),
        }
    }
}

/// Configuration error naming the offending variable
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{var} must be set: {reason}")]
    Missing { var: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: impl ToString) -> Self {
        ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Complete server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listen address (`BIND_ADDR`, default `0.0.0.0:3005`)
    pub bind_addr: SocketAddr,
    /// Prefix for API routes, e.g. `/internal` (`API_PREFIX`)
    pub api_prefix: String,
    /// PostgreSQL URL (`DATABASE_URL`)
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub queue_name: String,
    pub dlq_name: String,
    pub worker_concurrency: usize,
    /// Poll interval while jobs are available (`POLL_INTERVAL_MS`)
    pub poll_interval: Duration,
    /// Reclaim leases older than this (`LEASE_TIMEOUT_MS`, disabled when unset)
    pub lease_timeout: Option<Duration>,
    /// Shared secret expected in `x-internal-api-key` (`INTERNAL_API_KEY`)
    pub internal_api_key: Option<String>,
    pub cors_allowed_origins: Vec<HeaderValue>,
    pub email_transport: TransportKind,
    pub sms_transport: TransportKind,
    pub email_relay_url: Option<String>,
    pub sms_relay_url: Option<String>,
    /// Sender address added to relayed email (`EMAIL_FROM`)
    pub email_from: Option<String>,
}

impl ServerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|value| !value.trim().is_empty());

        let bind_addr = match get("BIND_ADDR") {
            Some(value) => value
                .parse()
                .map_err(|e| ConfigError::invalid("BIND_ADDR", &value, e))?,
            None => SocketAddr::from(([0, 0, 0, 0], 3005)),
        };

        let api_prefix = get("API_PREFIX")
            .map(|prefix| normalize_prefix(&prefix))
            .unwrap_or_default();

        let lease_timeout = match get("LEASE_TIMEOUT_MS") {
            Some(value) => Some(Duration::from_millis(parse_positive(
                "LEASE_TIMEOUT_MS",
                &value,
            )?)),
            None => None,
        };

        let cors_allowed_origins = match get("CORS_ALLOWED_ORIGINS") {
            Some(value) => value
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(|origin| {
                    origin
                        .parse::<HeaderValue>()
                        .map_err(|e| ConfigError::invalid("CORS_ALLOWED_ORIGINS", origin, e))
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        let email_transport = match get("EMAIL_TRANSPORT") {
            Some(value) => TransportKind::parse("EMAIL_TRANSPORT", &value)?,
            None => TransportKind::Console,
        };
        let sms_transport = match get("SMS_TRANSPORT") {
            Some(value) => TransportKind::parse("SMS_TRANSPORT", &value)?,
            None => TransportKind::Console,
        };

        let email_relay_url = get("EMAIL_RELAY_URL");
        if email_transport == TransportKind::Http && email_relay_url.is_none() {
            return Err(ConfigError::Missing {
                var: "EMAIL_RELAY_URL",
                reason: "required when EMAIL_TRANSPORT=http".to_string(),
            });
        }
        let sms_relay_url = get("SMS_RELAY_URL");
        if sms_transport == TransportKind::Http && sms_relay_url.is_none() {
            return Err(ConfigError::Missing {
                var: "SMS_RELAY_URL",
                reason: "required when SMS_TRANSPORT=http".to_string(),
            });
        }

        Ok(Self {
            bind_addr,
            api_prefix,
            database_url: get("DATABASE_URL"),
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", get("DB_MAX_CONNECTIONS"), 10)?,
            queue_name: get("QUEUE_NAME").unwrap_or_else(|| "notification-queue".to_string()),
            dlq_name: get("DLQ_NAME").unwrap_or_else(|| "notification-dlq".to_string()),
            worker_concurrency: parse_or("WORKER_CONCURRENCY", get("WORKER_CONCURRENCY"), 4)?,
            poll_interval: Duration::from_millis(parse_or(
                "POLL_INTERVAL_MS",
                get("POLL_INTERVAL_MS"),
                100,
            )?),
            lease_timeout,
            internal_api_key: get("INTERNAL_API_KEY"),
            cors_allowed_origins,
            email_transport,
            sms_transport,
            email_relay_url,
            sms_relay_url,
            email_from: get("EMAIL_FROM"),
        })
    }
}

/// `api`, `/api/` and `/api` all become `/api`
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

fn parse_positive(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::invalid(var, value, "must be greater than zero")),
        Ok(n) => Ok(n),
        Err(e) => Err(ConfigError::invalid(var, value, e)),
    }
}

fn parse_or<T>(var: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: TryFrom<u64>,
{
    let Some(value) = value else {
        return Ok(default);
    };
    let n = parse_positive(var, &value)?;
    T::try_from(n).map_err(|_| ConfigError::invalid(var, &value, "out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:3005");
        assert_eq!(config.api_prefix, "");
        assert!(config.database_url.is_none());
        assert_eq!(config.db_max_connections, 10);
        assert_eq!(config.queue_name, "notification-queue");
        assert_eq!(config.dlq_name, "notification-dlq");
        assert_eq!(config.worker_concurrency, 4);
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert!(config.lease_timeout.is_none());
        assert!(config.internal_api_key.is_none());
        assert!(config.cors_allowed_origins.is_empty());
        assert_eq!(config.email_transport, TransportKind::Console);
        assert_eq!(config.sms_transport, TransportKind::Console);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("BIND_ADDR", "127.0.0.1:8080"),
            ("API_PREFIX", "internal/notify/"),
            ("DATABASE_URL", "postgres://localhost/courier"),
            ("WORKER_CONCURRENCY", "16"),
            ("LEASE_TIMEOUT_MS", "60000"),
            ("INTERNAL_API_KEY", "secret"),
            ("CORS_ALLOWED_ORIGINS", "https://a.example.com, https://b.example.com"),
            ("EMAIL_TRANSPORT", "HTTP"),
            ("EMAIL_RELAY_URL", "http://relay.local/email"),
        ])
        .unwrap();

        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.api_prefix, "/internal/notify");
        assert_eq!(config.worker_concurrency, 16);
        assert_eq!(config.lease_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.internal_api_key.as_deref(), Some("secret"));
        assert_eq!(config.cors_allowed_origins.len(), 2);
        assert_eq!(config.email_transport, TransportKind::Http);
    }

    #[test]
    fn test_empty_values_are_unset() {
        let config = load(&[("INTERNAL_API_KEY", ""), ("API_PREFIX", "/")]).unwrap();
        assert!(config.internal_api_key.is_none());
        assert_eq!(config.api_prefix, "");
    }

    #[test]
    fn test_invalid_values_name_the_variable() {
        let err = load(&[("WORKER_CONCURRENCY", "many")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                var: "WORKER_CONCURRENCY",
                ..
            }
        ));

        let err = load(&[("POLL_INTERVAL_MS", "0")]).unwrap_err();
        assert!(err.to_string().contains("POLL_INTERVAL_MS"));

        let err = load(&[("SMS_TRANSPORT", "pigeon")]).unwrap_err();
        assert!(err.to_string().contains("SMS_TRANSPORT"));
    }

    #[test]
    fn test_http_transport_requires_relay_url() {
        let err = load(&[("SMS_TRANSPORT", "http")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Missing {
                var: "SMS_RELAY_URL",
                reason: "required when SMS_TRANSPORT=http".to_string(),
            }
        );
    }
}
