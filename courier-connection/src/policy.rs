//! Reconnect policy with configurable backoff strategies.
//!
//! ## Example
//!
//! ```rust
//! use courier_connection::{BackoffStrategy, ReconnectPolicy};
//! use std::time::Duration;
//!
//! let policy = ReconnectPolicy::new(BackoffStrategy::exponential(Duration::from_millis(500)));
//! assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(500));
//! assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConnectionError;

/// Delay applied before the broker is asked again for a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every retry.
    Constant(Duration),
    /// Linear backoff: delay increases by a fixed amount.
    Linear {
        /// Initial delay.
        initial: Duration,
        /// Increment per retry.
        increment: Duration,
        /// Maximum delay.
        max: Duration,
    },
    /// Exponential backoff: delay is multiplied on each retry.
    Exponential {
        /// Initial delay.
        initial: Duration,
        /// Multiplier (typically 2.0).
        multiplier: f64,
        /// Maximum delay.
        max: Duration,
    },
}

impl BackoffStrategy {
    /// Create constant backoff.
    pub fn constant(delay: Duration) -> Self {
        Self::Constant(delay)
    }

    /// Create linear backoff.
    pub fn linear(initial: Duration, increment: Duration) -> Self {
        Self::Linear {
            initial,
            increment,
            max: Duration::from_secs(300),
        }
    }

    /// Create exponential backoff.
    pub fn exponential(initial: Duration) -> Self {
        Self::Exponential {
            initial,
            multiplier: 2.0,
            max: Duration::from_secs(300),
        }
    }

    /// Set maximum delay.
    pub fn with_max(self, max: Duration) -> Self {
        match self {
            Self::Linear {
                initial, increment, ..
            } => Self::Linear {
                initial,
                increment,
                max,
            },
            Self::Exponential {
                initial,
                multiplier,
                ..
            } => Self::Exponential {
                initial,
                multiplier,
                max,
            },
            other => other,
        }
    }

    /// Calculate delay for a given retry (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Self::Constant(d) => *d,
            Self::Linear {
                initial,
                increment,
                max,
            } => {
                let delay = initial.saturating_add(increment.saturating_mul(attempt));
                delay.min(*max)
            }
            Self::Exponential {
                initial,
                multiplier,
                max,
            } => {
                let factor = multiplier.powi(attempt.min(i32::MAX as u32) as i32);
                let millis = initial.as_millis() as f64 * factor;
                if !millis.is_finite() || millis >= max.as_millis() as f64 {
                    *max
                } else {
                    Duration::from_millis(millis as u64)
                }
            }
        }
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::constant(Duration::from_secs(15))
    }
}

/// Retry-forever policy used while establishing the broker connection.
///
/// There is no attempt ceiling. Errors that are not transient
/// ([`ConnectionError::is_transient`]) are never retried.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconnectPolicy {
    backoff: BackoffStrategy,
}

impl ReconnectPolicy {
    /// Create a policy with the given backoff.
    pub fn new(backoff: BackoffStrategy) -> Self {
        Self { backoff }
    }

    /// Constant delay before every retry.
    pub fn fixed(delay: Duration) -> Self {
        Self::new(BackoffStrategy::constant(delay))
    }

    /// The backoff strategy in use.
    pub fn backoff(&self) -> &BackoffStrategy {
        &self.backoff
    }

    /// Whether a failed attempt may be retried.
    pub fn should_retry(&self, error: &ConnectionError) -> bool {
        error.is_transient()
    }

    /// Delay to wait after the given failed attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay_for_attempt(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_backoff() {
        let backoff = BackoffStrategy::constant(Duration::from_secs(15));
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_secs(15));
        assert_eq!(backoff.delay_for_attempt(1_000), Duration::from_secs(15));
    }

    #[test]
    fn test_linear_backoff_caps_at_max() {
        let backoff = BackoffStrategy::linear(Duration::from_secs(1), Duration::from_secs(2))
            .with_max(Duration::from_secs(6));

        assert_eq!(backoff.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_secs(3));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_secs(5));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_secs(6));
    }

    #[test]
    fn test_exponential_backoff() {
        let backoff = BackoffStrategy::exponential(Duration::from_millis(100))
            .with_max(Duration::from_secs(1));

        assert_eq!(backoff.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(backoff.delay_for_attempt(10), Duration::from_secs(1));
        assert_eq!(backoff.delay_for_attempt(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_default_policy_waits_fifteen_seconds() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(15));
    }

    #[test]
    fn test_policy_only_retries_transient_errors() {
        let policy = ReconnectPolicy::fixed(Duration::from_secs(1));

        assert!(policy.should_retry(&ConnectionError::BrokerUnreachable("down".into())));
        assert!(!policy.should_retry(&ConnectionError::Authentication("denied".into())));
    }
}
