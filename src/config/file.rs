//! Driver configuration file support
//!
//! The buffer-size policy and backend preference are user-tunable through a
//! small TOML file rather than hard-coded.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Driver configuration loaded from a TOML file
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DriverConfig {
    /// Backend API name to prefer (empty/absent = platform preference order)
    pub backend: Option<String>,

    /// Preferred period length in frames reported to the host
    pub preferred_period: Option<usize>,

    /// Working sample rate override applied at negotiation, in Hz
    pub sample_rate: Option<f64>,
}

impl DriverConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().to_string_lossy().to_string(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_string_lossy().to_string(),
            source: e,
        })
    }

    /// Load configuration from default locations
    ///
    /// Searches in order:
    /// 1. Same directory as executable: flexbridge.toml
    /// 2. The user config directory: flexbridge/config.toml
    pub fn load_default() -> Result<Self, ConfigError> {
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                let config_path = exe_dir.join("flexbridge.toml");
                if config_path.exists() {
                    return Self::load(&config_path);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("flexbridge").join("config.toml");
            if config_path.exists() {
                return Self::load(&config_path);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_string_lossy().to_string(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Io {
            path: path.as_ref().to_string_lossy().to_string(),
            source: e,
        })
    }
}

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading/writing config file
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// Error parsing TOML
    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    /// Error serializing config
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config: DriverConfig = toml::from_str(
            r#"
            backend = "jack"
            preferred_period = 256
            sample_rate = 48000.0
            "#,
        )
        .unwrap();
        assert_eq!(config.backend.as_deref(), Some("jack"));
        assert_eq!(config.preferred_period, Some(256));
        assert_eq!(config.sample_rate, Some(48000.0));
    }

    #[test]
    fn test_parse_empty_config() {
        let config: DriverConfig = toml::from_str("").unwrap();
        assert!(config.backend.is_none());
        assert!(config.preferred_period.is_none());
        assert!(config.sample_rate.is_none());
    }

    #[test]
    fn test_roundtrip() {
        let config = DriverConfig {
            backend: Some("mock".to_string()),
            preferred_period: Some(512),
            sample_rate: None,
        };
        let text = toml::to_string_pretty(&config).unwrap();
        let back: DriverConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.backend.as_deref(), Some("mock"));
        assert_eq!(back.preferred_period, Some(512));
        assert!(back.sample_rate.is_none());
    }
}
