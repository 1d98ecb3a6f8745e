//! Serializable retry and timeout settings.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay schedule between retry attempts.
///
/// Defines how long to pause after a failed attempt before the next one.
/// Attempt indexes passed to [`delay_for_attempt`](Backoff::delay_for_attempt)
/// are 0-based: index 0 is the pause after the first failure.
///
/// # Examples
///
/// ```
/// use kumihimo_core::Backoff;
/// use std::time::Duration;
///
/// // No pause (default)
/// let backoff = Backoff::None;
///
/// // Fixed delay of 1 second
/// let backoff = Backoff::fixed(Duration::from_secs(1));
///
/// // Exponential backoff starting at 100ms
/// let backoff = Backoff::exponential(Duration::from_millis(100));
/// assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(400));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Retry immediately.
    #[default]
    None,
    /// Fixed delay between attempts.
    Fixed {
        /// Delay after each failure.
        #[serde(rename = "delay_ms", with = "millis")]
        delay: Duration,
    },
    /// Exponential backoff with a cap.
    Exponential {
        /// Delay after the first failure.
        #[serde(rename = "initial_delay_ms", with = "millis")]
        initial_delay: Duration,
        /// Maximum delay cap.
        #[serde(rename = "max_delay_ms", with = "millis")]
        max_delay: Duration,
        /// Multiplier applied per attempt (e.g. 2 doubles the delay).
        multiplier: u32,
    },
}

impl Backoff {
    /// Creates a fixed-delay schedule.
    pub fn fixed(delay: Duration) -> Self {
        Backoff::Fixed { delay }
    }

    /// Creates an exponential schedule with `multiplier = 2` and a 60s cap.
    pub fn exponential(initial_delay: Duration) -> Self {
        Backoff::Exponential {
            initial_delay,
            max_delay: Duration::from_secs(60),
            multiplier: 2,
        }
    }

    /// Creates an exponential schedule with custom settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBackoff`] if:
    /// - `multiplier` is 0 (would result in no backoff)
    /// - `multiplier` is greater than 10 (risk of overflow)
    /// - `max_delay` is less than `initial_delay`
    pub fn exponential_backoff(
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: u32,
    ) -> Result<Self, ConfigError> {
        let backoff = Backoff::Exponential {
            initial_delay,
            max_delay,
            multiplier,
        };
        backoff.validate()?;
        Ok(backoff)
    }

    /// Checks the parameters of an exponential schedule.
    ///
    /// Deserialized values bypass [`exponential_backoff`](Backoff::exponential_backoff),
    /// so consumers of configuration call this before use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Backoff::Exponential {
            initial_delay,
            max_delay,
            multiplier,
        } = self
        {
            if *multiplier == 0 {
                return Err(ConfigError::InvalidBackoff(
                    "multiplier must be greater than 0",
                ));
            }
            if *multiplier > 10 {
                return Err(ConfigError::InvalidBackoff(
                    "multiplier must be 10 or less to avoid overflow",
                ));
            }
            if max_delay < initial_delay {
                return Err(ConfigError::InvalidBackoff(
                    "max_delay must be >= initial_delay",
                ));
            }
        }
        Ok(())
    }

    /// Returns the pause after the failure of attempt `index` (0-based).
    pub fn delay_for_attempt(&self, index: u32) -> Duration {
        match self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed { delay } => *delay,
            Backoff::Exponential {
                initial_delay,
                max_delay,
                multiplier,
            } => {
                let factor = (*multiplier as u64).saturating_pow(index);
                let delay = (initial_delay.as_millis() as u64).saturating_mul(factor);
                Duration::from_millis(delay.min(max_delay.as_millis() as u64))
            }
        }
    }
}

/// Attempt bound plus delay schedule for a retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one. Must be at least 1.
    pub max_attempts: u32,
    /// Pause between attempts.
    #[serde(default)]
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::None,
        }
    }
}

impl RetryConfig {
    /// Creates a retry configuration.
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Checks the attempt bound and the backoff parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        self.backoff.validate()
    }
}

/// Timeout and retry settings for guarding a single composable.
///
/// # Examples
///
/// ```
/// use kumihimo_core::{Backoff, RetryConfig, StepConfig};
/// use std::time::Duration;
///
/// let config = StepConfig {
///     timeout: Some(Duration::from_secs(60)),
///     retry: RetryConfig::new(3, Backoff::fixed(Duration::from_secs(1))),
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepConfig {
    /// Maximum time allowed per attempt. `None` means no timeout.
    /// Default: 30 seconds.
    #[serde(rename = "timeout_ms", default = "default_timeout", with = "millis::option")]
    pub timeout: Option<Duration>,
    /// Retry settings. Default: a single attempt.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_timeout() -> Option<Duration> {
    Some(Duration::from_secs(30))
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

impl StepConfig {
    /// Checks the retry settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
        }
    }
}
