// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Environment-driven configuration: endpoints, codec choice, timeouts,
//! and process identity.

use std::time::Duration;

use meru_proto::Backend;
use thiserror::Error;

const BIND_ADDRESS: &str = "BIND_ADDRESS";
const BROKER_ADDRESS: &str = "BROKER_ADDRESS";
const SERIALIZATION_METHOD: &str = "MERU_SERIALIZATION_METHOD";
const RECEIVE_TIMEOUT: &str = "MERU_RECEIVE_TIMEOUT";
const HOSTNAME_IN_IDENTITY: &str = "MERU_HOSTNAME_IN_IDENTITY";
const PROCESS: &str = "MERU_PROCESS";
const SSH_TUNNEL: &str = "SSH_TUNNEL";

/// Fixed TCP port the broker's egress (publisher) socket binds.
pub const PUBLISHER_PORT: u16 = 24051;
/// Fixed TCP port the broker's ingress (collector) socket binds.
pub const COLLECTOR_PORT: u16 = 24052;
/// Fixed TCP port the broker's snapshot/liveness socket binds.
pub const SNAPSHOT_PORT: u16 = 24053;

/// Errors loading configuration from the environment.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable was set but not valid for its purpose.
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue {
        /// The offending variable's name.
        var: &'static str,
        /// The value that failed to parse.
        value: String,
    },
}

/// Process-wide configuration, loaded once at startup from the
/// environment. Invalid values fail fast with [`ConfigError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Broker-side bind host (ports are fixed, see [`PUBLISHER_PORT`] etc).
    pub bind_address: String,
    /// Worker-side connect host.
    pub broker_address: String,
    /// Wire codec backend.
    pub serialization_method: Backend,
    /// Snapshot-client receive timeout.
    pub receive_timeout: Duration,
    /// Whether to include the local hostname in the process identity.
    pub hostname_in_identity: bool,
    /// Explicit process name override for the process identity.
    pub process_name: Option<String>,
    /// Optional SSH tunnel spec; `None` means direct TCP.
    pub ssh_tunnel: Option<String>,
}

impl Config {
    /// Load configuration from the process environment, applying the
    /// documented defaults for anything unset.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] if a set variable cannot be
    /// parsed for its expected shape.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_address = env_or(BIND_ADDRESS, "127.0.0.1");
        let broker_address = env_or(BROKER_ADDRESS, "127.0.0.1");

        let serialization_method = match env_or(SERIALIZATION_METHOD, "json").as_str() {
            "json" => Backend::Json,
            "binary" => Backend::Binary,
            other => {
                return Err(ConfigError::InvalidValue {
                    var: SERIALIZATION_METHOD,
                    value: other.to_string(),
                })
            }
        };

        let receive_timeout_ms: u64 = env_or(RECEIVE_TIMEOUT, "4000")
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                var: RECEIVE_TIMEOUT,
                value: std::env::var(RECEIVE_TIMEOUT).unwrap_or_default(),
            })?;

        let hostname_in_identity = parse_bool(HOSTNAME_IN_IDENTITY, &env_or(HOSTNAME_IN_IDENTITY, "true"))?;

        let process_name = std::env::var(PROCESS).ok().filter(|s| !s.is_empty());
        let ssh_tunnel = std::env::var(SSH_TUNNEL).ok().filter(|s| !s.is_empty());

        Ok(Self {
            bind_address,
            broker_address,
            serialization_method,
            receive_timeout: Duration::from_millis(receive_timeout_ms),
            hostname_in_identity,
            process_name,
            ssh_tunnel,
        })
    }
}

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for var in [
            BIND_ADDRESS,
            BROKER_ADDRESS,
            SERIALIZATION_METHOD,
            RECEIVE_TIMEOUT,
            HOSTNAME_IN_IDENTITY,
            PROCESS,
            SSH_TUNNEL,
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn defaults_match_the_documented_table() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.broker_address, "127.0.0.1");
        assert_eq!(config.serialization_method, Backend::Json);
        assert_eq!(config.receive_timeout, Duration::from_millis(4000));
        assert!(config.hostname_in_identity);
        assert_eq!(config.process_name, None);
        assert_eq!(config.ssh_tunnel, None);
    }

    #[test]
    fn invalid_serialization_method_fails_fast() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var(SERIALIZATION_METHOD, "xml");
        let err = Config::from_env().unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                var: SERIALIZATION_METHOD,
                value: "xml".to_string(),
            }
        );
        clear_env();
    }

    #[test]
    fn binary_backend_selectable() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var(SERIALIZATION_METHOD, "binary");
        let config = Config::from_env().unwrap();
        assert_eq!(config.serialization_method, Backend::Binary);
        clear_env();
    }
}
