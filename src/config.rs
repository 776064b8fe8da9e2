//! Configuration for the connection multiplexer
//!
//! Loaded from a TOML file. Every field has a default, so an empty file (or no file at
//! all) yields a TLS-enabled client with 60 second connect and keep-alive bounds.

use crate::transport::mqtt::tls::{TlsError, TlsMaterial};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MuxConfig {
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub tls: TlsSection,
}

/// MQTT client section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSection {
    /// Client identifier presented to every broker (shared by all connections)
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Seconds to wait for CONNACK before giving up on a new connection
    #[serde(default = "default_sixty")]
    pub connect_timeout_secs: u64,
    /// MQTT keep-alive interval in seconds
    #[serde(default = "default_sixty")]
    pub keep_alive_secs: u64,
    /// Seconds to wait for SUBACK/UNSUBACK
    #[serde(default = "default_sixty")]
    pub operation_timeout_secs: u64,
}

fn default_client_id() -> String {
    "mqtt-mux".to_string()
}

fn default_sixty() -> u64 {
    60
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            connect_timeout_secs: default_sixty(),
            keep_alive_secs: default_sixty(),
            operation_timeout_secs: default_sixty(),
        }
    }
}

/// TLS section - certificate file names are resolved against `resources_dir`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TlsSection {
    #[serde(default = "default_tls_enabled")]
    pub enabled: bool,
    #[serde(default = "default_resources_dir")]
    pub resources_dir: PathBuf,
    #[serde(default = "default_ca_cert")]
    pub ca_cert: String,
    #[serde(default = "default_client_cert")]
    pub client_cert: String,
    #[serde(default = "default_client_key")]
    pub client_key: String,
    /// Environment variable holding the private key passphrase
    pub key_passphrase_env: Option<String>,
}

fn default_tls_enabled() -> bool {
    true
}

fn default_resources_dir() -> PathBuf {
    PathBuf::from("resources")
}

fn default_ca_cert() -> String {
    "ca.pem".to_string()
}

fn default_client_cert() -> String {
    "client-certificate.pem.crt".to_string()
}

fn default_client_key() -> String {
    "client-private.pem.key".to_string()
}

impl Default for TlsSection {
    fn default() -> Self {
        Self {
            enabled: default_tls_enabled(),
            resources_dir: default_resources_dir(),
            ca_cert: default_ca_cert(),
            client_cert: default_client_cert(),
            client_key: default_client_key(),
            key_passphrase_env: None,
        }
    }
}

impl TlsSection {
    /// Resolve the TLS material, or `None` when TLS is disabled.
    ///
    /// The passphrase is read from `key_passphrase_env` at call time; a configured but
    /// unset variable is an error, no variable at all means an unencrypted key.
    pub fn material(&self) -> Result<Option<TlsMaterial>, ConfigError> {
        if !self.enabled {
            return Ok(None);
        }

        let passphrase = match &self.key_passphrase_env {
            Some(name) => get_env_var_required(name)?,
            None => String::new(),
        };

        Ok(Some(TlsMaterial::in_dir(
            &self.resources_dir,
            &self.ca_cert,
            &self.client_cert,
            &self.client_key,
            passphrase,
        )))
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("TLS material error: {0}")]
    Tls(#[from] TlsError),
}

impl MuxConfig {
    /// Load configuration from TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: MuxConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_client_id(&self.client.client_id)?;

        if self.client.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "connect_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.client.operation_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "operation_timeout_secs must be greater than 0".to_string(),
            ));
        }
        // rumqttc rejects keep-alive intervals below 5 seconds
        if self.client.keep_alive_secs < 5 {
            return Err(ConfigError::InvalidConfig(format!(
                "keep_alive_secs must be at least 5, got {}",
                self.client.keep_alive_secs
            )));
        }

        if self.tls.enabled {
            for (field, value) in [
                ("ca_cert", &self.tls.ca_cert),
                ("client_cert", &self.tls.client_cert),
                ("client_key", &self.tls.client_key),
            ] {
                if value.trim().is_empty() {
                    return Err(ConfigError::InvalidConfig(format!(
                        "[tls] {field} must be set when TLS is enabled"
                    )));
                }
            }
        }

        Ok(())
    }
}

fn validate_client_id(client_id: &str) -> Result<(), ConfigError> {
    if client_id.is_empty() || client_id.starts_with(' ') {
        return Err(ConfigError::InvalidConfig(format!(
            "client_id '{client_id}' must be non-empty and must not start with a space"
        )));
    }
    Ok(())
}

fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
    std::env::var(env_var_name).map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
}
