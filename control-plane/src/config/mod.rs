//! Configuration (SPEC_FULL §1.3): a `Config` value loaded from a YAML file
//! with environment overrides via the `config` crate, mirroring the
//! teacher's `config = { features = ["yaml"] }` dependency and its
//! loader/store split — this module's `ConfigLoader` reads and validates,
//! `Config` is the typed, validated result passed around the binary.

use config::{Environment, File};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::logging::LoggingConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to build configuration: `{0}`")]
    Build(#[from] config::ConfigError),

    #[error("configuration invalid: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    pub stream_listen_addr: SocketAddr,
    pub poll_listen_addr: SocketAddr,
    pub max_inbound_message_bytes: usize,
    pub max_sessions: usize,
    pub max_outbound_queue_depth: usize,
    pub session_idle_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            stream_listen_addr: "0.0.0.0:4320".parse().unwrap(),
            poll_listen_addr: "0.0.0.0:4321".parse().unwrap(),
            max_inbound_message_bytes: 4 * 1024 * 1024,
            max_sessions: 10_000,
            max_outbound_queue_depth: 64,
            session_idle_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DeploymentDefaultsConfig {
    pub deadline: Option<Duration>,
    pub canary_percent: u8,
    pub staged_wave_size: usize,
}

impl Default for DeploymentDefaultsConfig {
    fn default() -> Self {
        Self {
            deadline: Some(Duration::from_secs(3600)),
            canary_percent: 10,
            staged_wave_size: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenConfig {
    pub signing_key_paths: Vec<String>,
    pub registration_token_ttl: Duration,
    pub agent_token_ttl: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            signing_key_paths: Vec::new(),
            registration_token_ttl: Duration::from_secs(3600),
            agent_token_ttl: Duration::from_secs(86_400 * 365),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    pub transport: TransportConfig,
    pub deployment_defaults: DeploymentDefaultsConfig,
    pub token: TokenConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Loads `path` (YAML) then applies `FLOWGATE_*` environment overrides,
    /// e.g. `FLOWGATE_TRANSPORT__MAX_SESSIONS=50000`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = config::Config::builder()
            .add_source(File::from(path))
            .add_source(Environment::with_prefix("FLOWGATE").separator("__"))
            .build()?;

        let config: Config = raw.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.token.signing_key_paths.is_empty() {
            return Err(ConfigError::Invalid(
                "token.signing_key_paths must name at least one signing key".into(),
            ));
        }
        if !(1..=100).contains(&self.deployment_defaults.canary_percent) {
            return Err(ConfigError::Invalid(
                "deployment_defaults.canary_percent must be in 1..=100".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_yaml_with_defaults_for_missing_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "token:\n  signing_key_paths: [\"/etc/flowgate/key.pem\"]").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.deployment_defaults.canary_percent, 10);
        assert_eq!(config.token.signing_key_paths, vec!["/etc/flowgate/key.pem"]);
    }

    #[test]
    fn rejects_missing_signing_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "transport:\n  max_sessions: 1").unwrap();

        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
