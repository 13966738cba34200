//! Connection configuration for the MQTT sample
//!
//! Turns a raw key-value mapping (a `.env` file layered over the process
//! environment) into validated [`ConnectionSettings`]. Only two cross-field
//! rules can fail resolution: the host name is required, and a password needs
//! a username. Every other key is independently defaulted.

use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

pub const MQTT_HOST_NAME: &str = "MQTT_HOST_NAME";
pub const MQTT_TCP_PORT: &str = "MQTT_TCP_PORT";
pub const MQTT_USE_TLS: &str = "MQTT_USE_TLS";
pub const MQTT_CLEAN_SESSION: &str = "MQTT_CLEAN_SESSION";
pub const MQTT_KEEP_ALIVE_IN_SECONDS: &str = "MQTT_KEEP_ALIVE_IN_SECONDS";
pub const MQTT_CLIENT_ID: &str = "MQTT_CLIENT_ID";
pub const MQTT_USERNAME: &str = "MQTT_USERNAME";
pub const MQTT_PASSWORD: &str = "MQTT_PASSWORD";
pub const MQTT_CERT_FILE: &str = "MQTT_CERT_FILE";
pub const MQTT_KEY_FILE: &str = "MQTT_KEY_FILE";
pub const MQTT_CA_FILE: &str = "MQTT_CA_FILE";

/// Prefix shared by every configuration key
pub const KEY_PREFIX: &str = "MQTT_";

pub const DEFAULT_TCP_PORT: u16 = 8883;
pub const DEFAULT_USE_TLS: bool = true;
pub const DEFAULT_CLEAN_SESSION: bool = true;
pub const DEFAULT_KEEP_ALIVE_SECS: u16 = 30;

/// Default env file looked up when none is given on the command line
pub const DEFAULT_ENV_FILE: &str = ".env";

/// Validated connection settings, immutable once resolved
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSettings {
    pub hostname: String,
    pub tcp_port: u16,
    pub use_tls: bool,
    pub clean_session: bool,
    pub keep_alive_seconds: u16,
    pub client_id: String,
    pub username: String,
    #[serde(serialize_with = "serialize_redacted")]
    pub password: String,
    pub cert_file: String,
    pub key_file: String,
    pub ca_file: String,
}

impl ConnectionSettings {
    /// Whether client certificate authentication material is configured
    pub fn has_client_auth(&self) -> bool {
        !self.cert_file.is_empty() && !self.key_file.is_empty()
    }

    /// Whether the connection carries credentials
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty()
    }
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("hostname", &self.hostname)
            .field("tcp_port", &self.tcp_port)
            .field("use_tls", &self.use_tls)
            .field("clean_session", &self.clean_session)
            .field("keep_alive_seconds", &self.keep_alive_seconds)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("cert_file", &self.cert_file)
            .field("key_file", &self.key_file)
            .field("ca_file", &self.ca_file)
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        ""
    } else {
        "***"
    }
}

fn serialize_redacted<S: Serializer>(secret: &str, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(redact(secret))
}

/// Configuration errors. All of them are fatal and happen before any connect.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("MQTT_HOST_NAME is not set")]
    MissingHostName,
    #[error("MQTT_USERNAME is required if MQTT_PASSWORD is set")]
    PasswordWithoutUsername,
    #[error("Failed to read env file {path}: {source}")]
    EnvFile {
        path: String,
        #[source]
        source: dotenvy::Error,
    },
}

/// Resolve a raw key-value mapping into validated connection settings
pub fn resolve(raw: &HashMap<String, String>) -> Result<ConnectionSettings, ConfigError> {
    let hostname = string_value(raw, MQTT_HOST_NAME);
    if hostname.is_empty() {
        return Err(ConfigError::MissingHostName);
    }

    let username = string_value(raw, MQTT_USERNAME);
    let password = string_value(raw, MQTT_PASSWORD);
    if !password.is_empty() && username.is_empty() {
        return Err(ConfigError::PasswordWithoutUsername);
    }

    Ok(ConnectionSettings {
        hostname,
        tcp_port: number_value(raw, MQTT_TCP_PORT, DEFAULT_TCP_PORT),
        use_tls: flag_value(raw, MQTT_USE_TLS, DEFAULT_USE_TLS),
        clean_session: flag_value(raw, MQTT_CLEAN_SESSION, DEFAULT_CLEAN_SESSION),
        keep_alive_seconds: number_value(raw, MQTT_KEEP_ALIVE_IN_SECONDS, DEFAULT_KEEP_ALIVE_SECS),
        client_id: string_value(raw, MQTT_CLIENT_ID),
        username,
        password,
        cert_file: string_value(raw, MQTT_CERT_FILE),
        key_file: string_value(raw, MQTT_KEY_FILE),
        ca_file: string_value(raw, MQTT_CA_FILE),
    })
}

fn string_value(raw: &HashMap<String, String>, key: &str) -> String {
    raw.get(key).cloned().unwrap_or_default()
}

/// Absent, unparsable and zero values all yield the default
fn number_value<T>(raw: &HashMap<String, String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + Default + PartialEq,
{
    raw.get(key)
        .and_then(|value| value.trim().parse::<T>().ok())
        .filter(|value| *value != T::default())
        .unwrap_or(default)
}

/// Absent yields the default; any non-empty value is a set flag
fn flag_value(raw: &HashMap<String, String>, key: &str, default: bool) -> bool {
    match raw.get(key) {
        None => default,
        Some(value) => !value.is_empty(),
    }
}

/// Raw configuration mapping loaded from its sources
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawConfig {
    values: HashMap<String, String>,
}

impl RawConfig {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    /// Collect the `MQTT_*` variables of the process environment
    pub fn from_process_env() -> Self {
        Self::from_pairs(std::env::vars())
    }

    /// Parse a dotenv-style file into a mapping without touching the environment
    pub fn from_env_file(path: &Path) -> Result<Self, ConfigError> {
        let to_config_error = |source| ConfigError::EnvFile {
            path: path.display().to_string(),
            source,
        };

        let mut values = HashMap::new();
        for item in dotenvy::from_path_iter(path).map_err(to_config_error)? {
            let (key, value) = item.map_err(to_config_error)?;
            values.insert(key, value);
        }
        Ok(Self { values })
    }

    /// Process environment first, then the env file's entries on top.
    ///
    /// A missing file is tolerated only when `required` is false, which is the
    /// case for the default `.env` lookup.
    pub fn layered(env_file: &Path, required: bool) -> Result<Self, ConfigError> {
        let mut config = Self::from_process_env();
        match Self::from_env_file(env_file) {
            Ok(file_config) => config.merge(file_config),
            Err(ConfigError::EnvFile { ref source, .. }) if !required && source.not_found() => {
                tracing::debug!(path = %env_file.display(), "No env file found, using process environment");
            }
            Err(e) => return Err(e),
        }
        Ok(config)
    }

    fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let values = pairs
            .into_iter()
            .filter(|(key, _)| key.starts_with(KEY_PREFIX))
            .collect();
        Self { values }
    }

    /// Overlay another mapping; its entries win
    pub fn merge(&mut self, other: RawConfig) {
        self.values.extend(other.values);
    }

    pub fn values(&self) -> &HashMap<String, String> {
        &self.values
    }

    pub fn into_values(self) -> HashMap<String, String> {
        self.values
    }

    pub fn resolve(&self) -> Result<ConnectionSettings, ConfigError> {
        resolve(&self.values)
    }
}
