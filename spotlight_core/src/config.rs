//! Rotation configuration.
//!
//! Every knob has a default matching the long-standing behaviour of the
//! observation carousel, so an empty TOML file is a valid configuration.
//!
//! ```toml
//! countdown_secs = 10
//! batch_size = 15
//! history_capacity = 200
//! failure_policy = "retry_next_rotation"
//!
//! [prefetch]
//! mode = "after_start"
//! secs = 3
//!
//! [exclusion]
//! series = true
//! deployment = true
//! ```

use crate::error::{Result, RotationError};
use crate::history::DEFAULT_HISTORY_CAPACITY;
use serde::{Deserialize, Serialize};
use spotlight_env::ValueKind;
use std::time::Duration;

/// Default candidate batch size.
pub const DEFAULT_BATCH_SIZE: usize = 15;

/// Largest candidate batch a single request may ask for.
pub const MAX_BATCH_SIZE: usize = 100;

/// When the next pending observation is requested within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PrefetchPolicy {
    /// A fixed delay after the countdown starts
    AfterStart { secs: u64 },

    /// A fixed lead time before the countdown expires
    BeforeExpiry { secs: u64 },
}

impl PrefetchPolicy {
    /// Resolves the policy into a delay from countdown start.
    pub fn delay_for(&self, countdown: Duration) -> Duration {
        match *self {
            PrefetchPolicy::AfterStart { secs } => Duration::from_secs(secs),
            PrefetchPolicy::BeforeExpiry { secs } => countdown.saturating_sub(Duration::from_secs(secs)),
        }
    }
}

impl Default for PrefetchPolicy {
    fn default() -> Self {
        PrefetchPolicy::AfterStart { secs: 3 }
    }
}

/// What a failed pre-fetch does to a running rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Keep counting; the next rotation requests a fresh pending record
    #[default]
    RetryNextRotation,

    /// Stop the rotation until play() is invoked again
    HaltOnAnyError,
}

/// Which diversity keys are excluded in the candidate request itself.
///
/// With `series = false` the request carries no series exclusion and
/// freshness is enforced client-side by the selector alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExclusionStrategy {
    pub series: bool,
    pub deployment: bool,
}

impl Default for ExclusionStrategy {
    fn default() -> Self {
        Self {
            series: true,
            deployment: true,
        }
    }
}

/// Configuration for a rotation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    /// Seconds each observation stays current (default: 10)
    pub countdown_secs: u64,

    /// Candidates requested per batch (default: 15)
    pub batch_size: usize,

    /// Series remembered for exclusion (default: 200)
    pub history_capacity: usize,

    /// When the next pending observation is requested
    pub prefetch: PrefetchPolicy,

    /// Reaction to a failed pre-fetch while rotating
    pub failure_policy: FailurePolicy,

    /// Exclusions sent with candidate requests
    pub exclusion: ExclusionStrategy,

    /// Restrict candidates to one kind of value
    pub value_kind: Option<ValueKind>,

    /// Skip observations that carry quality flags (default: true)
    pub exclude_flagged: bool,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            countdown_secs: 10,
            batch_size: DEFAULT_BATCH_SIZE,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            prefetch: PrefetchPolicy::default(),
            failure_policy: FailurePolicy::default(),
            exclusion: ExclusionStrategy::default(),
            value_kind: None,
            exclude_flagged: true,
        }
    }
}

impl RotationConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: RotationConfig =
            toml::from_str(text).map_err(|e| RotationError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Countdown length as a duration.
    pub fn countdown(&self) -> Duration {
        Duration::from_secs(self.countdown_secs)
    }

    /// Delay from countdown start until the next pending request.
    pub fn prefetch_delay(&self) -> Duration {
        self.prefetch.delay_for(self.countdown())
    }

    /// Checks the configuration for values the scheduler cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.countdown_secs == 0 {
            return Err(RotationError::InvalidConfig(
                "countdown_secs must be at least 1".to_string(),
            ));
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(RotationError::InvalidConfig(format!(
                "batch_size must be within 1..={}, got {}",
                MAX_BATCH_SIZE, self.batch_size
            )));
        }
        if self.history_capacity == 0 {
            return Err(RotationError::InvalidConfig(
                "history_capacity must be at least 1".to_string(),
            ));
        }
        let in_window = match self.prefetch {
            PrefetchPolicy::AfterStart { secs } => secs < self.countdown_secs,
            PrefetchPolicy::BeforeExpiry { secs } => secs > 0 && secs <= self.countdown_secs,
        };
        if !in_window {
            return Err(RotationError::InvalidConfig(format!(
                "prefetch {:?} does not fall inside a {}s countdown",
                self.prefetch, self.countdown_secs
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_config_default() {
        let config = RotationConfig::default();
        assert_eq!(config.countdown(), Duration::from_secs(10));
        assert_eq!(config.batch_size, 15);
        assert_eq!(config.history_capacity, 200);
        assert_eq!(config.prefetch_delay(), Duration::from_secs(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_prefetch_before_expiry() {
        let policy = PrefetchPolicy::BeforeExpiry { secs: 3 };
        assert_eq!(policy.delay_for(Duration::from_secs(10)), Duration::from_secs(7));
        assert_eq!(policy.delay_for(Duration::from_secs(30)), Duration::from_secs(27));
    }

    #[test]
    fn test_config_from_empty_toml() {
        let config = RotationConfig::from_toml_str("").unwrap();
        assert_eq!(config, RotationConfig::default());
    }

    #[test]
    fn test_config_from_toml() {
        let config = RotationConfig::from_toml_str(
            r#"
            countdown_secs = 20
            batch_size = 30
            failure_policy = "halt_on_any_error"
            value_kind = "number"

            [prefetch]
            mode = "before_expiry"
            secs = 3

            [exclusion]
            deployment = false
            "#,
        )
        .unwrap();

        assert_eq!(config.countdown_secs, 20);
        assert_eq!(config.batch_size, 30);
        assert_eq!(config.failure_policy, FailurePolicy::HaltOnAnyError);
        assert_eq!(config.value_kind, Some(ValueKind::Number));
        assert_eq!(config.prefetch_delay(), Duration::from_secs(17));
        assert!(config.exclusion.series);
        assert!(!config.exclusion.deployment);
    }

    #[test]
    fn test_config_validation_rejects_bad_values() {
        let mut config = RotationConfig {
            countdown_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.countdown_secs = 10;
        config.batch_size = 0;
        assert!(config.validate().is_err());

        config.batch_size = 15;
        config.prefetch = PrefetchPolicy::AfterStart { secs: 10 };
        assert!(config.validate().is_err());

        config.prefetch = PrefetchPolicy::BeforeExpiry { secs: 0 };
        assert!(config.validate().is_err());

        config.prefetch = PrefetchPolicy::BeforeExpiry { secs: 3 };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_malformed_toml() {
        let err = RotationConfig::from_toml_str("countdown_secs = \"ten\"").unwrap_err();
        assert!(matches!(err, RotationError::InvalidConfig(_)));
    }
}
