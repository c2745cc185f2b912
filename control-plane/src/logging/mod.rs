//! Logging & tracing: `tracing` + `tracing-subscriber` as the sole
//! facade, an `EnvFilter` scoped to this crate's own target so third-party
//! crate noise is off by default, no file/OTel sink (this crate doesn't
//! carry those dependencies).

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::EnvFilter;

const LOGGING_ENABLED_CRATE: &str = "flowgate_control_plane";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("unable to install the global tracing subscriber")]
    AlreadyInitialized,

    #[error("invalid directive `{0}` in insecure_fine_grained_level: {1}")]
    InvalidDirective(String, String),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LoggingFormat,
    #[serde(default)]
    pub level: LogLevel,
    /// When set, overrides `level` and enables logs from any crate, not
    /// just this one — an escape hatch for debugging third-party crates.
    #[serde(default)]
    pub insecure_fine_grained_level: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LoggingFormat::default(),
            level: LogLevel::default(),
            insecure_fine_grained_level: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoggingFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogLevel(Level);

impl Default for LogLevel {
    fn default() -> Self {
        Self(Level::INFO)
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Level::from_str(&raw).map(LogLevel).map_err(serde::de::Error::custom)
    }
}

impl Serialize for LogLevel {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(&self.0.to_string())
    }
}

impl LoggingConfig {
    pub fn try_init(&self) -> Result<(), LoggingError> {
        let filter = self.env_filter()?;
        let builder = tracing_subscriber::fmt().with_env_filter(filter);

        let result = match self.format {
            LoggingFormat::Pretty => builder.try_init(),
            LoggingFormat::Json => builder.json().try_init(),
        };
        result.map_err(|_| LoggingError::AlreadyInitialized)
    }

    fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        if let Some(raw) = self
            .insecure_fine_grained_level
            .as_ref()
            .filter(|s| !s.is_empty())
        {
            return EnvFilter::builder()
                .parse(raw)
                .map_err(|err| LoggingError::InvalidDirective(raw.clone(), err.to_string()));
        }

        let directive = format!("{LOGGING_ENABLED_CRATE}={}", self.level.0.to_string().to_lowercase());
        Ok(EnvFilter::builder()
            .with_default_directive(LevelFilter::OFF.into())
            .parse_lossy(directive))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_scopes_to_this_crate_only() {
        let config = LoggingConfig::default();
        let filter = config.env_filter().unwrap();
        assert_eq!(filter.to_string(), "flowgate_control_plane=info,off");
    }

    #[test]
    fn insecure_override_replaces_scoped_filter() {
        let config = LoggingConfig {
            insecure_fine_grained_level: Some("actix_web=debug".into()),
            ..LoggingConfig::default()
        };
        let filter = config.env_filter().unwrap();
        assert_eq!(filter.to_string(), "actix_web=debug");
    }

    #[test]
    fn empty_insecure_override_does_not_apply() {
        let config = LoggingConfig {
            insecure_fine_grained_level: Some(String::new()),
            ..LoggingConfig::default()
        };
        let filter = config.env_filter().unwrap();
        assert_eq!(filter.to_string(), "flowgate_control_plane=info,off");
    }
}
