//! Configuration loading and validation for the MRP daemon

use mrp::types::{DomainId, RecoveryProfile, RecoveryTimings, RingDefaults};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError};

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Invalid ring settings: {0}")]
    Ring(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub ring: RingSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Validate for Config {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        self.server.validate()?;
        self.ring.validate()?;
        Ok(())
    }
}

/// Server-level settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerSettings {
    #[validate(length(min = 1), custom = "validate_socket_path")]
    pub control_socket: String,
}

/// Defaults applied to every ring added over the control socket
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RingSettings {
    #[validate(custom = "validate_recovery")]
    pub recovery: String,

    /// MRP domain UUID, all ones when unset
    pub domain: Option<String>,

    /// Let the kernel generate ring test frames
    pub hw_test_offload: bool,

    /// Per-timer overrides of the recovery profile
    pub timers: TimerOverrides,
}

/// Optional overrides of single profile values
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerOverrides {
    #[serde(with = "humantime_serde")]
    pub topo_interval: Option<Duration>,
    pub topo_max: Option<u32>,

    #[serde(with = "humantime_serde")]
    pub test_short_interval: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub test_interval: Option<Duration>,
    pub test_short_max: Option<u32>,
    pub test_max: Option<u32>,
    pub test_ext_max: Option<u32>,

    #[serde(with = "humantime_serde")]
    pub link_interval: Option<Duration>,
    pub link_max: Option<u32>,
}

impl TimerOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the overrides on top of a profile.
    pub fn apply(&self, mut timings: RecoveryTimings) -> RecoveryTimings {
        if let Some(v) = self.topo_interval {
            timings.topo_interval = v;
        }
        if let Some(v) = self.topo_max {
            timings.topo_max = v;
        }
        if let Some(v) = self.test_short_interval {
            timings.test_short_interval = v;
        }
        if let Some(v) = self.test_interval {
            timings.test_interval = v;
        }
        if let Some(v) = self.test_short_max {
            timings.test_short_max = v;
        }
        if let Some(v) = self.test_max {
            timings.test_max = v;
        }
        if let Some(v) = self.test_ext_max {
            timings.test_ext_max = v;
        }
        if let Some(v) = self.link_interval {
            timings.link_interval = v;
        }
        if let Some(v) = self.link_max {
            timings.link_max = v;
        }
        timings
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: Option<String>,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            control_socket: "/var/run/mrp/mrp_server.sock".to_string(),
        }
    }
}

impl Default for RingSettings {
    fn default() -> Self {
        Self {
            recovery: RecoveryProfile::default().to_string(),
            domain: None,
            hw_test_offload: false,
            timers: TimerOverrides::default(),
        }
    }
}

fn validate_socket_path(path: &str) -> Result<(), ValidationError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new("socket_path_empty"));
    }

    // Must be absolute path or relative (starting with ./)
    if !trimmed.starts_with('/') && !trimmed.starts_with("./") {
        return Err(ValidationError::new("socket_path_invalid_format"));
    }

    Ok(())
}

fn validate_recovery(profile: &str) -> Result<(), ValidationError> {
    profile
        .parse::<RecoveryProfile>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("recovery_profile_unknown"))
}

impl Config {
    /// Load configuration from `explicit`, or else the default search paths
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            if !path.is_file() {
                return Err(ConfigError::FileNotFound(path.to_path_buf()));
            }
            return Self::load_from_file(path);
        }

        match Self::find_config_file() {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        config.ring_defaults()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/mrp/mrp_server.yaml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("./mrp_server.yaml"));

        paths.into_iter().find(|p: &PathBuf| p.is_file())
    }

    fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/mrp/mrp_server.yaml"))
    }

    /// Ring defaults handed to the registry.
    pub fn ring_defaults(&self) -> Result<RingDefaults, ConfigError> {
        let recovery: RecoveryProfile = self.ring.recovery.parse().map_err(ConfigError::Ring)?;

        let domain = match &self.ring.domain {
            Some(text) => text
                .parse::<DomainId>()
                .map_err(|e| ConfigError::Ring(format!("domain: {e}")))?,
            None => DomainId::default(),
        };

        let timings = if self.ring.timers.is_empty() {
            None
        } else {
            let timings = self.ring.timers.apply(recovery.timings());
            timings.validate().map_err(ConfigError::Ring)?;
            Some(timings)
        };

        Ok(RingDefaults {
            recovery,
            timings,
            domain,
            hw_test_offload: self.ring.hw_test_offload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());

        let defaults = config.ring_defaults().unwrap();
        assert_eq!(defaults.recovery, RecoveryProfile::Ms500);
        assert_eq!(defaults.timings, None);
        assert_eq!(defaults.domain, DomainId::default());
    }

    #[test]
    fn test_valid_yaml_parsing() {
        let yaml = r#"
server:
  control_socket: "/tmp/mrp-test.sock"

ring:
  recovery: 200ms
  domain: "00112233-4455-6677-8899-aabbccddeeff"
  hw_test_offload: true

logging:
  level: debug
  format: json
"#;

        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.server.control_socket, "/tmp/mrp-test.sock");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level.as_deref(), Some("debug"));

        let defaults = config.ring_defaults().unwrap();
        assert_eq!(defaults.recovery, RecoveryProfile::Ms200);
        assert!(defaults.hw_test_offload);
        assert_ne!(defaults.domain, DomainId::default());
    }

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let yaml = r#"
server:
  control_socket: "./mrp.sock"
"#;

        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.ring.recovery, "500ms");
        assert!(!config.ring.hw_test_offload);
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_timer_overrides() {
        let yaml = r#"
ring:
  recovery: 500ms
  timers:
    test_interval: 40ms
    test_max: 8
"#;

        let config = Config::from_yaml(yaml).unwrap();
        let timings = config.ring_defaults().unwrap().timings();
        assert_eq!(timings.test_interval, Duration::from_millis(40));
        assert_eq!(timings.test_max, 8);
        // untouched values come from the profile
        assert_eq!(timings.topo_interval, Duration::from_millis(20));
        assert_eq!(timings.link_max, 4);
    }

    #[test]
    fn test_zero_timer_override_rejected() {
        let yaml = r#"
ring:
  timers:
    link_interval: 0ms
"#;

        assert!(matches!(Config::from_yaml(yaml), Err(ConfigError::Ring(_))));
    }

    #[test]
    fn test_unknown_recovery_profile() {
        let yaml = r#"
ring:
  recovery: 42ms
"#;

        assert!(matches!(
            Config::from_yaml(yaml),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_bad_domain() {
        let yaml = r#"
ring:
  domain: "not-a-uuid"
"#;

        assert!(matches!(Config::from_yaml(yaml), Err(ConfigError::Ring(_))));
    }

    #[test]
    fn test_socket_path_validation() {
        assert!(validate_socket_path("/tmp/test.sock").is_ok());
        assert!(validate_socket_path("./test.sock").is_ok());

        assert!(validate_socket_path("").is_err());
        assert!(validate_socket_path("   ").is_err());
        assert!(validate_socket_path("relative/path.sock").is_err());
    }

    #[test]
    fn test_explicit_missing_file() {
        let result = Config::load(Some(Path::new("/nonexistent/mrp_server.yaml")));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }
}
