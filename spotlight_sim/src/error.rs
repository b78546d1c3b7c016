//! Error types for the simulator CLI.

use spotlight_core::RotationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid rotation config: {0}")]
    Config(#[from] RotationError),

    #[error("--countdown {secs} is not usable with this config ({reason}); pick a longer countdown or adjust the prefetch policy in --config")]
    Countdown { secs: u64, reason: String },
}

/// Loads a rotation config from a TOML file.
pub fn load_config(path: &str) -> Result<spotlight_core::RotationConfig, SimError> {
    let text = std::fs::read_to_string(path).map_err(|source| SimError::Io {
        path: path.to_string(),
        source,
    })?;
    Ok(spotlight_core::RotationConfig::from_toml_str(&text)?)
}

/// Applies a countdown override and revalidates the result.
///
/// The pre-fetch policy is left alone, so an override shorter than the
/// pre-fetch delay is rejected here rather than by every scenario.
pub fn override_countdown(
    mut config: spotlight_core::RotationConfig,
    countdown_secs: Option<u64>,
) -> Result<spotlight_core::RotationConfig, SimError> {
    if let Some(secs) = countdown_secs {
        config.countdown_secs = secs;
        config.validate().map_err(|e| SimError::Countdown {
            secs,
            reason: e.to_string(),
        })?;
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_countdown_override_shorter_than_prefetch() {
        let err = override_countdown(spotlight_core::RotationConfig::default(), Some(3)).unwrap_err();
        assert!(matches!(err, SimError::Countdown { secs: 3, .. }));
        assert!(err.to_string().starts_with("--countdown 3 is not usable"));
    }

    #[test]
    fn test_countdown_override_applied() {
        let config = override_countdown(spotlight_core::RotationConfig::default(), Some(20)).unwrap();
        assert_eq!(config.countdown_secs, 20);

        let untouched = override_countdown(spotlight_core::RotationConfig::default(), None).unwrap();
        assert_eq!(untouched.countdown_secs, 10);
    }

    #[test]
    fn test_missing_file() {
        let err = load_config("/nonexistent/spotlight.toml").unwrap_err();
        assert!(matches!(err, SimError::Io { .. }));
        assert!(err.to_string().starts_with("Failed to read /nonexistent/spotlight.toml"));
    }

    #[test]
    fn test_invalid_config() {
        let path = std::env::temp_dir().join(format!("spotlight-config-{}.toml", std::process::id()));
        std::fs::write(&path, "countdown_secs = 0\n").unwrap();
        let result = load_config(path.to_str().unwrap());
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(SimError::Config(RotationError::InvalidConfig(_)))));
    }
}
