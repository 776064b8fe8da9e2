//! Broker addressing
//!
//! A [`BrokerKey`] is the `(host, port)` pair the registry keys connections by.

use crate::error::{MuxError, MuxResult};
use std::fmt;
use url::Url;

/// Default port for MQTT over TLS
pub const DEFAULT_TLS_PORT: u16 = 8883;
/// Default port for plain MQTT
pub const DEFAULT_TCP_PORT: u16 = 1883;

/// Registry lookup key: exact host string plus port
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BrokerKey {
    host: String,
    port: u16,
}

impl BrokerKey {
    /// Build a key, rejecting an empty host or port 0
    pub fn new<S: Into<String>>(host: S, port: u16) -> MuxResult<Self> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(MuxError::invalid_broker_address("broker host must not be empty"));
        }
        if port == 0 {
            return Err(MuxError::invalid_broker_address(format!(
                "port 0 is not a valid broker port for host '{host}'"
            )));
        }
        Ok(Self { host, port })
    }

    /// Parse `ssl://`, `mqtts://`, `tcp://` or `mqtt://` broker URIs.
    ///
    /// Returns the key and whether the scheme asks for TLS.
    pub fn parse_uri(uri: &str) -> MuxResult<(Self, bool)> {
        let url = Url::parse(uri)
            .map_err(|e| MuxError::invalid_broker_address(format!("'{uri}': {e}")))?;

        let use_tls = match url.scheme() {
            "ssl" | "mqtts" => true,
            "tcp" | "mqtt" => false,
            other => {
                return Err(MuxError::invalid_broker_address(format!(
                    "unsupported scheme '{other}' in '{uri}'"
                )))
            }
        };

        let host = url
            .host_str()
            .ok_or_else(|| MuxError::invalid_broker_address(format!("'{uri}' has no host")))?;
        let port = url.port().unwrap_or(if use_tls {
            DEFAULT_TLS_PORT
        } else {
            DEFAULT_TCP_PORT
        });

        Ok((Self::new(host, port)?, use_tls))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Transport URI for this broker, `ssl://host:port` or `tcp://host:port`
    pub fn uri(&self, use_tls: bool) -> String {
        let scheme = if use_tls { "ssl" } else { "tcp" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for BrokerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
