//! Lock configuration
//!
//! A [`PortLockConfig`] can be built in code, parsed from TOML, or read from
//! `PORTLOCK_*` environment variables. Every field has a default, so an empty
//! document or an empty environment yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Port used when nothing else is configured
pub const DEFAULT_PORT: u16 = 32172;

pub const ENV_HOST: &str = "PORTLOCK_HOST";
pub const ENV_PORT: &str = "PORTLOCK_PORT";
pub const ENV_CHALLENGE_TIMEOUT_MS: &str = "PORTLOCK_CHALLENGE_TIMEOUT_MS";
pub const ENV_WAIT_TIMEOUT_MS: &str = "PORTLOCK_WAIT_TIMEOUT_MS";
pub const ENV_ON_HOLDER_VANISHED: &str = "PORTLOCK_ON_HOLDER_VANISHED";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("CONFIG_READ_ERROR: failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("CONFIG_PARSE_ERROR: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("CONFIG_INVALID_VALUE: {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// What a waiter does once the holder stops answering challenges
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VanishedPolicy {
    /// Go back to binding the port; never claim the lock without owning it
    #[default]
    Rebind,
    /// Report the lock as acquired without binding the port.
    ///
    /// Two processes may briefly both believe they hold the lock.
    Assume,
}

impl std::str::FromStr for VanishedPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rebind" => Ok(VanishedPolicy::Rebind),
            "assume" => Ok(VanishedPolicy::Assume),
            other => Err(ConfigError::InvalidValue {
                field: "on_holder_vanished".to_string(),
                reason: format!("expected 'rebind' or 'assume', got '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortLockConfig {
    /// Loopback address the lock port is bound on
    pub host: IpAddr,
    pub port: u16,
    /// How long a challenge waits for `SUCCESS`
    pub challenge_timeout_ms: u64,
    /// Per-read timeout of the wait loop before the holder is re-checked
    pub wait_timeout_ms: u64,
    /// Sleep of an idle accept loop between polls of the listener
    pub accept_poll_interval_ms: u64,
    pub on_holder_vanished: VanishedPolicy,
}

impl Default for PortLockConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            challenge_timeout_ms: 300,
            wait_timeout_ms: 1000,
            accept_poll_interval_ms: 25,
            on_holder_vanished: VanishedPolicy::Rebind,
        }
    }
}

impl PortLockConfig {
    /// Default configuration on a specific port
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Defaults overridden by whichever `PORTLOCK_*` variables are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(host) = env_var(ENV_HOST) {
            config.host = parse_field("host", &host)?;
        }
        if let Some(port) = env_var(ENV_PORT) {
            config.port = parse_field("port", &port)?;
        }
        if let Some(ms) = env_var(ENV_CHALLENGE_TIMEOUT_MS) {
            config.challenge_timeout_ms = parse_field("challenge_timeout_ms", &ms)?;
        }
        if let Some(ms) = env_var(ENV_WAIT_TIMEOUT_MS) {
            config.wait_timeout_ms = parse_field("wait_timeout_ms", &ms)?;
        }
        if let Some(policy) = env_var(ENV_ON_HOLDER_VANISHED) {
            config.on_holder_vanished = policy.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the lock cannot work with.
    ///
    /// The host must be a loopback address: every party of the protocol
    /// lives on the same machine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.host.is_loopback() {
            return Err(invalid("host", format!("{} is not a loopback address", self.host)));
        }
        if self.port == 0 {
            return Err(invalid("port", "port 0 cannot identify a lock".to_string()));
        }
        for (field, value) in [
            ("challenge_timeout_ms", self.challenge_timeout_ms),
            ("wait_timeout_ms", self.wait_timeout_ms),
            ("accept_poll_interval_ms", self.accept_poll_interval_ms),
        ] {
            if value == 0 {
                return Err(invalid(field, "must be greater than zero".to_string()));
            }
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn challenge_timeout(&self) -> Duration {
        Duration::from_millis(self.challenge_timeout_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn accept_poll_interval(&self) -> Duration {
        Duration::from_millis(self.accept_poll_interval_ms)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_field<T>(field: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| invalid(field, format!("'{}': {}", raw, e)))
}

fn invalid(field: &str, reason: String) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        let config = PortLockConfig::from_toml_str("").unwrap();
        assert_eq!(config, PortLockConfig::default());
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.challenge_timeout(), Duration::from_millis(300));
        assert_eq!(config.wait_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_toml_overrides() {
        let config = PortLockConfig::from_toml_str(
            r#"
            port = 40123
            wait_timeout_ms = 250
            on_holder_vanished = "assume"
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 40123);
        assert_eq!(config.wait_timeout_ms, 250);
        assert_eq!(config.on_holder_vanished, VanishedPolicy::Assume);
        assert_eq!(config.challenge_timeout_ms, 300);
    }

    #[test]
    fn test_rejects_non_loopback_host() {
        let result = PortLockConfig::from_toml_str(r#"host = "10.0.0.1""#);
        assert!(
            matches!(result, Err(ConfigError::InvalidValue { ref field, .. }) if field == "host"),
            "got {:?}",
            result
        );
    }

    #[test]
    fn test_rejects_zero_values() {
        assert!(PortLockConfig::from_toml_str("port = 0").is_err());
        assert!(PortLockConfig::from_toml_str("challenge_timeout_ms = 0").is_err());
    }

    #[test]
    fn test_rejects_unknown_policy() {
        let result = PortLockConfig::from_toml_str(r#"on_holder_vanished = "panic""#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_env_overrides() {
        temp_env::with_vars(
            [
                (ENV_PORT, Some("41000")),
                (ENV_HOST, Some("::1")),
                (ENV_ON_HOLDER_VANISHED, Some("Assume")),
                (ENV_CHALLENGE_TIMEOUT_MS, None),
                (ENV_WAIT_TIMEOUT_MS, None),
            ],
            || {
                let config = PortLockConfig::from_env().unwrap();
                assert_eq!(config.port, 41000);
                assert!(config.host.is_loopback());
                assert_eq!(config.on_holder_vanished, VanishedPolicy::Assume);
                assert_eq!(config.challenge_timeout_ms, 300);
            },
        );
    }

    #[test]
    fn test_env_invalid_port() {
        temp_env::with_var(ENV_PORT, Some("not-a-port"), || {
            let result = PortLockConfig::from_env();
            assert!(
                matches!(result, Err(ConfigError::InvalidValue { ref field, .. }) if field == "port"),
                "got {:?}",
                result
            );
        });
    }

    #[test]
    fn test_load_from_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("portlock.toml");
        std::fs::write(&path, "port = 45678\n").unwrap();

        assert_eq!(PortLockConfig::load(&path).unwrap().port, 45678);
        assert!(matches!(
            PortLockConfig::load(&temp.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
