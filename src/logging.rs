//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins when set; otherwise the filter comes from
//! `application.log_level`. Output is human-readable text, or JSON lines when
//! `application.json_logs` is enabled.

use tracing_subscriber::EnvFilter;

use crate::config::ApplicationSettings;

/// Error returned when a global subscriber cannot be installed.
pub type LoggingError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Builds the filter used by [`init_from_settings`].
pub fn env_filter(settings: &ApplicationSettings) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level))
}

/// Installs the global tracing subscriber.
///
/// Fails if a global subscriber is already set.
pub fn init_from_settings(settings: &ApplicationSettings) -> Result<(), LoggingError> {
    let filter = env_filter(settings);

    if settings.json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
    }
}
