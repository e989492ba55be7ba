//! Startup configuration read from the environment.

use std::fmt::Display;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use cuwhapp_core::{Credentials, Host, HostRole, HostSecret, SelectionPolicy, SelectionStrategy};
use thiserror::Error;

use crate::features::remote_execution::service::RetryPolicy;
use crate::features::waha_registry::service::ReadinessPolicy;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(String),
    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
    #[error("No usable credentials for {role} host: set {prefix}_SSH_KEY_PATH to an existing file or {prefix}_SSH_PASSWORD")]
    NoCredentials { role: HostRole, prefix: &'static str },
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub listen_addr: SocketAddr,
    pub waha_host: Host,
    pub user_host: Host,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub retry: RetryPolicy,
    pub invocation_budget: Duration,
    pub stop_grace: Duration,
    pub readiness: ReadinessPolicy,
    pub selection: SelectionPolicy,
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok(), |path| path.is_file())
    }

    /// Builds the configuration from an arbitrary variable source.
    ///
    /// `key_exists` decides whether a configured key file is usable; a
    /// usable key file wins over a password.
    pub fn from_lookup<F, K>(lookup: F, key_exists: K) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
        K: Fn(&Path) -> bool,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let listen_addr = parse_or(&get, "ORCHESTRATOR_ADDR", SocketAddr::from(([127, 0, 0, 1], 8080)))?;
        let waha_host = load_host(&get, &key_exists, HostRole::Waha, "WAHA")?;
        let user_host = load_host(&get, &key_exists, HostRole::User, "USER")?;

        let connect_timeout = secs(&get, "SSH_CONNECT_TIMEOUT_SECS", 10)?;
        let command_timeout = secs(&get, "REMOTE_COMMAND_TIMEOUT_SECS", 30)?;
        let attempts: u32 = parse_or(&get, "REMOTE_RETRY_ATTEMPTS", 3)?;
        let invocation_budget = secs(&get, "INVOCATION_DEADLINE_SECS", 120)?;
        let stop_grace = secs(&get, "CONTAINER_STOP_GRACE_SECS", 10)?;
        let readiness_timeout = secs(&get, "WAHA_READINESS_TIMEOUT_SECS", 60)?;
        let headroom: u32 = parse_or(&get, "WAHA_SESSION_HEADROOM", 0)?;
        let strategy: SelectionStrategy = match get("WAHA_SELECTION_STRATEGY") {
            Some(raw) => raw.trim().parse().map_err(|message| ConfigError::Invalid {
                key: "WAHA_SELECTION_STRATEGY".to_string(),
                message,
            })?,
            None => SelectionStrategy::default(),
        };

        Ok(Self {
            listen_addr,
            waha_host,
            user_host,
            connect_timeout,
            command_timeout,
            retry: RetryPolicy::default().with_max_attempts(attempts),
            invocation_budget,
            stop_grace,
            readiness: ReadinessPolicy {
                timeout: readiness_timeout,
                ..ReadinessPolicy::default()
            },
            selection: SelectionPolicy { strategy, headroom },
        })
    }
}

fn load_host<G, K>(get: &G, key_exists: &K, role: HostRole, prefix: &'static str) -> Result<Host, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    K: Fn(&Path) -> bool,
{
    let key = |suffix: &str| format!("{}_{}", prefix, suffix);

    let ip_key = key("VM_IP");
    let address = get(ip_key.as_str()).ok_or_else(|| ConfigError::Missing(ip_key.clone()))?;
    let port = parse_or(get, key("SSH_PORT").as_str(), Host::DEFAULT_SSH_PORT)?;
    let username = get(key("SSH_USER").as_str()).unwrap_or_else(|| "root".to_string());

    let key_path = get(key("SSH_KEY_PATH").as_str())
        .map(PathBuf::from)
        .filter(|path| key_exists(path.as_path()));
    let secret = match (key_path, get(key("SSH_PASSWORD").as_str())) {
        (Some(path), _) => HostSecret::KeyFile(path),
        (None, Some(password)) => HostSecret::Password(password),
        (None, None) => return Err(ConfigError::NoCredentials { role, prefix }),
    };

    Host::new(role, address.trim(), port, Credentials::new(username, secret)).map_err(|e| {
        ConfigError::Invalid {
            key: ip_key.clone(),
            message: e.to_string(),
        }
    })
}

fn parse_or<G, T>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match get(key) {
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn secs<G>(get: &G, key: &str, default: u64) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let value: u64 = parse_or(get, key, default)?;
    if value == 0 {
        return Err(ConfigError::Invalid {
            key: key.to_string(),
            message: "must be at least 1 second".to_string(),
        });
    }
    Ok(Duration::from_secs(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn base() -> HashMap<String, String> {
        env(&[
            ("WAHA_VM_IP", "10.0.0.3"),
            ("WAHA_SSH_PASSWORD", "secret"),
            ("USER_VM_IP", "10.0.0.9"),
            ("USER_SSH_KEY_PATH", "/keys/user"),
        ])
    }

    fn load(vars: &HashMap<String, String>) -> Result<OrchestratorConfig, ConfigError> {
        OrchestratorConfig::from_lookup(|k| vars.get(k).cloned(), |path| path == Path::new("/keys/user"))
    }

    #[test]
    fn test_defaults() {
        let config = load(&base()).unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.command_timeout, Duration::from_secs(30));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.invocation_budget, Duration::from_secs(120));
        assert_eq!(config.stop_grace, Duration::from_secs(10));
        assert_eq!(config.readiness.timeout, Duration::from_secs(60));
        assert_eq!(config.selection, SelectionPolicy::best_fit());
        assert_eq!(config.waha_host.port, 22);
        assert_eq!(config.waha_host.credentials.username, "root");
    }

    #[test]
    fn test_credentials_prefer_existing_key_file() {
        let mut vars = base();
        vars.insert("USER_SSH_PASSWORD".to_string(), "fallback".to_string());
        vars.insert("WAHA_SSH_KEY_PATH".to_string(), "/keys/missing".to_string());
        let config = load(&vars).unwrap();

        assert_eq!(
            config.user_host.credentials.secret,
            HostSecret::KeyFile(PathBuf::from("/keys/user"))
        );
        assert_eq!(
            config.waha_host.credentials.secret,
            HostSecret::Password("secret".to_string())
        );
    }

    #[test]
    fn test_missing_credentials_fail_fast() {
        let mut vars = base();
        vars.remove("WAHA_SSH_PASSWORD");

        assert_eq!(
            load(&vars).unwrap_err(),
            ConfigError::NoCredentials {
                role: HostRole::Waha,
                prefix: "WAHA",
            }
        );
    }

    #[test]
    fn test_missing_address_fails() {
        let mut vars = base();
        vars.remove("USER_VM_IP");
        assert_eq!(
            load(&vars).unwrap_err(),
            ConfigError::Missing("USER_VM_IP".to_string())
        );
    }

    #[test]
    fn test_overrides_are_parsed() {
        let mut vars = base();
        vars.extend(env(&[
            ("ORCHESTRATOR_ADDR", "0.0.0.0:9000"),
            ("WAHA_SSH_PORT", "2222"),
            ("REMOTE_RETRY_ATTEMPTS", "5"),
            ("WAHA_SESSION_HEADROOM", "10"),
            ("WAHA_SELECTION_STRATEGY", "first_fit"),
        ]));
        let config = load(&vars).unwrap();

        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.waha_host.port, 2222);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.selection.headroom, 10);
        assert_eq!(config.selection.strategy, SelectionStrategy::FirstFit);
    }

    #[test]
    fn test_invalid_values_name_the_variable() {
        let mut vars = base();
        vars.insert("REMOTE_COMMAND_TIMEOUT_SECS".to_string(), "soon".to_string());
        match load(&vars).unwrap_err() {
            ConfigError::Invalid { key, .. } => assert_eq!(key, "REMOTE_COMMAND_TIMEOUT_SECS"),
            other => panic!("unexpected error {other:?}"),
        }

        let mut vars = base();
        vars.insert("WAHA_SELECTION_STRATEGY".to_string(), "worst_fit".to_string());
        assert!(load(&vars).is_err());
    }
}
