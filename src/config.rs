//! Layered configuration using Figment
//!
//! Settings are resolved from three layers, later layers winning:
//! 1. Built-in defaults ([`Settings::default`])
//! 2. A TOML file (by default `<config dir>/scale_reader/config.toml`)
//! 3. Environment variables prefixed with `SCALE_`
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! SCALE_APPLICATION__LOG_LEVEL=debug
//! SCALE_SCALE__PORT=/dev/ttyS1
//! SCALE_SCALE__MODE=text_token
//! SCALE_SCALE__BUFFER__CAPACITY=200
//! ```
//!
//! # Example
//!
//! ```no_run
//! use scale_reader::config::Settings;
//!
//! let settings = Settings::load().unwrap();
//! println!("Port: {}", settings.scale.port);
//! println!("Mode: {}", settings.scale.mode);
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::core::DecimalPlaces;
use crate::framing::{BufferLimits, DecimalPolicy, FramingMode, ENQ};

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "SCALE_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub scale: ScaleSettings,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSettings {
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit logs as JSON lines instead of human-readable text
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            name: "scale_reader".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Scale line and decoding configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleSettings {
    /// Endpoint used when `start` is called without one
    pub port: String,
    pub mode: FramingMode,
    /// Interval between poll bytes for poll-based modes
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    pub poll_byte: u8,
    /// Decimal places forced onto frames without a decimal marker
    #[serde(default)]
    pub forced_decimal_places: Option<u8>,
    /// Delay between the commands of the diagnostic sequence
    #[serde(with = "humantime_serde")]
    pub test_command_delay: Duration,
    /// Size of the buffer each read from the port fills
    pub read_buffer_size: usize,
    /// Capacity of the weight event broadcast channel
    pub event_capacity: usize,
    #[serde(default)]
    pub buffer: BufferLimits,
}

impl Default for ScaleSettings {
    fn default() -> Self {
        Self {
            port: default_port().to_string(),
            mode: FramingMode::default(),
            poll_interval: Duration::from_millis(300),
            poll_byte: ENQ,
            forced_decimal_places: None,
            test_command_delay: Duration::from_secs(1),
            read_buffer_size: 256,
            event_capacity: 64,
            buffer: BufferLimits::default(),
        }
    }
}

#[cfg(windows)]
fn default_port() -> &'static str {
    "COM1"
}

#[cfg(not(windows))]
fn default_port() -> &'static str {
    "/dev/ttyUSB0"
}

impl ScaleSettings {
    /// Decimal policy implied by `forced_decimal_places`.
    pub fn decimal_policy(&self) -> Result<DecimalPolicy, ConfigError> {
        match self.forced_decimal_places {
            None => Ok(DecimalPolicy::Heuristic),
            Some(n) => DecimalPlaces::new(n)
                .map(DecimalPolicy::Forced)
                .map_err(|e| ConfigError::ValidationError(e.to_string())),
        }
    }

    /// Checks the scale section on its own.
    ///
    /// [`ScaleManager`](crate::app_actor::ScaleManager) runs this before
    /// every open, so settings built in code get the same checks as a
    /// loaded file.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "scale.port must not be empty".to_string(),
            ));
        }
        if let Some(places) = self.forced_decimal_places {
            if places > DecimalPlaces::MAX {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid forced_decimal_places {}. Must be 0-{}",
                    places,
                    DecimalPlaces::MAX
                )));
            }
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "scale.poll_interval must be greater than zero".to_string(),
            ));
        }
        if self.read_buffer_size == 0 || self.event_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "scale.read_buffer_size and scale.event_capacity must be greater than zero"
                    .to_string(),
            ));
        }
        if self.buffer.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "scale.buffer.capacity must be greater than zero".to_string(),
            ));
        }
        if self.buffer.retain >= self.buffer.capacity {
            return Err(ConfigError::ValidationError(format!(
                "scale.buffer.retain ({}) must be smaller than scale.buffer.capacity ({})",
                self.buffer.retain, self.buffer.capacity
            )));
        }

        Ok(())
    }
}

/// `<config dir>/scale_reader/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("scale_reader").join("config.toml"))
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl Settings {
    /// Loads from the default config file (if present) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        match default_config_path() {
            Some(path) => Self::load_from(path),
            None => Self::extract(Self::figment(None)),
        }
    }

    /// Loads from `path` and the environment. A missing file is not an error.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::extract(Self::figment(Some(path.as_ref())))
    }

    /// The provider stack, exposed so callers can merge extra layers.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Extracts and validates settings from any figment.
    pub fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let settings: Self = figment.extract()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }
        self.scale.validate()
    }

    /// Effective configuration rendered as TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    #[serial]
    fn test_defaults_without_file() {
        let settings = Settings::load_from("/nonexistent/scale_reader.toml").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.scale.poll_interval, Duration::from_millis(300));
        assert_eq!(settings.scale.poll_byte, 0x05);
        assert_eq!(settings.scale.buffer, BufferLimits::default());
    }

    #[test]
    #[serial]
    fn test_file_overrides_defaults() {
        let file = write_config(
            r#"
            [application]
            name = "bench scale"
            log_level = "debug"

            [scale]
            port = "COM4"
            mode = "text_token"
            poll_interval = "500ms"
            forced_decimal_places = 3
            test_command_delay = "250ms"

            [scale.buffer]
            capacity = 200
            retain = 80
            "#,
        );
        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.application.name, "bench scale");
        assert_eq!(settings.scale.port, "COM4");
        assert_eq!(settings.scale.mode, FramingMode::TextToken);
        assert_eq!(settings.scale.poll_interval, Duration::from_millis(500));
        assert_eq!(settings.scale.test_command_delay, Duration::from_millis(250));
        assert_eq!(settings.scale.buffer.capacity, 200);
        assert_eq!(settings.scale.buffer.retain, 80);
        assert_eq!(
            settings.scale.decimal_policy().unwrap(),
            DecimalPolicy::Forced(DecimalPlaces::THREE)
        );
        // Unset keys keep their defaults.
        assert_eq!(settings.scale.read_buffer_size, 256);
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let file = write_config("[scale]\nport = \"COM4\"\n");
        std::env::set_var("SCALE_SCALE__PORT", "/dev/ttyS3");
        std::env::set_var("SCALE_APPLICATION__LOG_LEVEL", "warn");
        let result = Settings::load_from(file.path());
        std::env::remove_var("SCALE_SCALE__PORT");
        std::env::remove_var("SCALE_APPLICATION__LOG_LEVEL");

        let settings = result.unwrap();
        assert_eq!(settings.scale.port, "/dev/ttyS3");
        assert_eq!(settings.application.log_level, "warn");
    }

    #[test]
    #[serial]
    fn test_rejects_retain_not_below_capacity() {
        let file = write_config("[scale.buffer]\ncapacity = 50\nretain = 50\n");
        let err = Settings::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
        assert!(err.to_string().contains("retain"));
    }

    #[test]
    #[serial]
    fn test_rejects_forced_decimals_out_of_range() {
        let file = write_config("[scale]\nforced_decimal_places = 5\n");
        assert!(matches!(
            Settings::load_from(file.path()),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    #[serial]
    fn test_rejects_zero_poll_interval() {
        let file = write_config("[scale]\npoll_interval = \"0s\"\n");
        assert!(matches!(
            Settings::load_from(file.path()),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_scale_settings_validate_standalone() {
        assert!(ScaleSettings::default().validate().is_ok());
        let zero_poll = ScaleSettings {
            poll_interval: Duration::ZERO,
            ..ScaleSettings::default()
        };
        assert!(matches!(
            zero_poll.validate(),
            Err(ConfigError::ValidationError(msg)) if msg.contains("poll_interval")
        ));
        let no_events = ScaleSettings {
            event_capacity: 0,
            ..ScaleSettings::default()
        };
        assert!(no_events.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_unknown_mode_is_a_load_error() {
        let file = write_config("[scale]\nmode = \"slip\"\n");
        assert!(matches!(
            Settings::load_from(file.path()),
            Err(ConfigError::LoadError(_))
        ));
    }

    #[test]
    #[serial]
    fn test_sample_config_loads() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/scale.toml");
        let settings = Settings::load_from(path).unwrap();
        assert_eq!(settings.scale.mode, FramingMode::DelimitedAscii);
        assert_eq!(settings.scale.poll_byte, ENQ);
        assert_eq!(settings.scale.decimal_policy().unwrap(), DecimalPolicy::Heuristic);
    }

    #[test]
    fn test_toml_round_trip_of_defaults() {
        let rendered = Settings::default().to_toml().unwrap();
        assert!(rendered.contains("poll_interval = \"300ms\""));
        let parsed: Settings = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, Settings::default());
    }

    #[test]
    fn test_default_config_path_layout() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("scale_reader/config.toml"));
        }
    }
}
