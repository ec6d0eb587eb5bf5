//! Backoff policy implementation

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Shape of the delay curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// `delay * 2^(n-1)`
    Exponential,
    /// `delay * n`
    Linear,
    /// `delay`
    Fixed,
}

/// Delay to apply before re-attempting a failed job.
///
/// Serialized as `{"type": "exponential", "delay": 1000}` and stored with
/// each job, so a job keeps the policy it was enqueued with.
///
/// # Example
///
/// ```
/// use courier_queue::BackoffPolicy;
/// use std::time::Duration;
///
/// let policy = BackoffPolicy::exponential(Duration::from_secs(1));
///
/// assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
/// assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
/// assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    #[serde(rename = "type")]
    pub strategy: BackoffStrategy,

    /// Base delay
    #[serde(with = "duration_millis")]
    pub delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential(Duration::from_millis(1000))
    }
}

impl BackoffPolicy {
    fn with_strategy(strategy: BackoffStrategy, delay: Duration) -> Self {
        Self { strategy, delay }
    }

    /// Doubling delay starting at `delay`
    pub fn exponential(delay: Duration) -> Self {
        Self::with_strategy(BackoffStrategy::Exponential, delay)
    }

    /// Delay growing by `delay` each attempt
    pub fn linear(delay: Duration) -> Self {
        Self::with_strategy(BackoffStrategy::Linear, delay)
    }

    /// Constant delay
    pub fn fixed(delay: Duration) -> Self {
        Self::with_strategy(BackoffStrategy::Fixed, delay)
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-based).
    ///
    /// Attempt 0 is treated as attempt 1.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self.strategy {
            BackoffStrategy::Exponential => {
                let factor = 2u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
                self.delay.saturating_mul(factor)
            }
            BackoffStrategy::Linear => self.delay.saturating_mul(attempt),
            BackoffStrategy::Fixed => self.delay,
        }
    }
}

/// Anything that maps an attempt number to a delay.
///
/// Implemented for [`BackoffPolicy`] and for plain closures, so the processor
/// can take a custom curve without a new policy variant.
pub trait Backoff: Send + Sync {
    fn delay_for_attempt(&self, attempt: u32) -> Duration;
}

impl Backoff for BackoffPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        BackoffPolicy::delay_for_attempt(self, attempt)
    }
}

impl<F> Backoff for F
where
    F: Fn(u32) -> Duration + Send + Sync,
{
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self(attempt)
    }
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

pub(crate) mod optional_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| d.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_is_exponential_one_second() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.strategy, BackoffStrategy::Exponential);
        assert_eq!(policy.delay, Duration::from_secs(1));
    }

    #[test]
    fn test_exponential_delays() {
        let policy = BackoffPolicy::exponential(Duration::from_millis(1000));

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(1000));
    }

    #[test]
    fn test_exponential_saturates() {
        let policy = BackoffPolicy::exponential(Duration::from_secs(1));
        // Must not overflow or panic
        let delay = policy.delay_for_attempt(200);
        assert!(delay >= Duration::from_secs(u32::MAX as u64));
    }

    #[test]
    fn test_linear_and_fixed() {
        let linear = BackoffPolicy::linear(Duration::from_millis(500));
        assert_eq!(linear.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(linear.delay_for_attempt(3), Duration::from_millis(1500));

        let fixed = BackoffPolicy::fixed(Duration::from_secs(5));
        assert_eq!(fixed.delay_for_attempt(1), Duration::from_secs(5));
        assert_eq!(fixed.delay_for_attempt(7), Duration::from_secs(5));
    }

    #[test]
    fn test_closure_backoff() {
        let custom = |attempt: u32| Duration::from_millis(10 * attempt as u64);
        assert_eq!(Backoff::delay_for_attempt(&custom, 3), Duration::from_millis(30));
    }

    #[test]
    fn test_serialization_shape() {
        let policy = BackoffPolicy::exponential(Duration::from_millis(1000));
        let value = serde_json::to_value(&policy).unwrap();
        assert_eq!(value, json!({"type": "exponential", "delay": 1000}));

        let parsed: BackoffPolicy =
            serde_json::from_value(json!({"type": "fixed", "delay": 250})).unwrap();
        assert_eq!(parsed.strategy, BackoffStrategy::Fixed);
        assert_eq!(parsed.delay_for_attempt(1), Duration::from_millis(250));
        assert_eq!(parsed.delay_for_attempt(4), Duration::from_millis(250));
    }
}
