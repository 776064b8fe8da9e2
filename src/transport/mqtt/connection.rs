//! Pure connection state management for MQTT sessions
//!
//! This module contains the session state type, the transport error type and the
//! construction of rumqttc options from configuration.

use crate::broker::BrokerKey;
use crate::config::ClientSection;
use rumqttc::{MqttOptions, NetworkOptions, Transport};
use std::time::Duration;
use thiserror::Error;

/// Connection state for an MQTT session
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Waiting for CONNACK
    Connecting,
    /// Broker accepted the session
    Connected,
    /// Handshake failed or the connection was lost; terminal
    Failed(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription to '{0}' rejected by broker")]
    SubscriptionRejected(String),
    #[error("Unsubscribe failed")]
    UnsubscribeFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Timed out waiting for {0}")]
    AckTimeout(String),
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),
}

/// Pure function to configure MQTT options for one broker.
///
/// Every connection presents the same configured client id and starts a clean session.
pub fn configure_mqtt_options(
    key: &BrokerKey,
    client: &ClientSection,
    transport: Transport,
) -> MqttOptions {
    let mut mqtt_options = MqttOptions::new(client.client_id.clone(), key.host(), key.port());
    mqtt_options.set_clean_session(true);
    mqtt_options.set_keep_alive(Duration::from_secs(client.keep_alive_secs));
    mqtt_options.set_transport(transport);
    mqtt_options
}

/// Socket options for one session.
///
/// rumqttc bounds TCP connect, TLS handshake and CONNACK together with this timeout,
/// which defaults to 5 seconds, so it must carry the configured connect timeout.
pub fn configure_network_options(client: &ClientSection) -> NetworkOptions {
    let mut network_options = NetworkOptions::new();
    network_options.set_connection_timeout(client.connect_timeout_secs);
    network_options
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configure_mqtt_options() {
        let key = BrokerKey::new("broker.example.com", 8883).unwrap();
        let client = ClientSection::default();

        let options = configure_mqtt_options(&key, &client, Transport::Tcp);

        assert_eq!(options.client_id(), "mqtt-mux");
        assert_eq!(
            options.broker_address(),
            ("broker.example.com".to_string(), 8883)
        );
        assert!(options.clean_session());
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
    }

    #[test]
    fn test_network_options_carry_connect_timeout() {
        let client = ClientSection {
            connect_timeout_secs: 45,
            ..Default::default()
        };

        let network_options = configure_network_options(&client);

        assert_eq!(network_options.connection_timeout(), 45);
        assert_eq!(
            configure_network_options(&ClientSection::default()).connection_timeout(),
            60
        );
    }

    #[test]
    fn test_client_id_is_shared_across_brokers() {
        let client = ClientSection::default();
        let a = configure_mqtt_options(
            &BrokerKey::new("a", 8883).unwrap(),
            &client,
            Transport::Tcp,
        );
        let b = configure_mqtt_options(
            &BrokerKey::new("b", 8883).unwrap(),
            &client,
            Transport::Tcp,
        );
        assert_eq!(a.client_id(), b.client_id());
    }

    #[test]
    fn test_connection_state() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert_eq!(
            ConnectionState::Failed("eof".to_string()),
            ConnectionState::Failed("eof".to_string())
        );
        assert_ne!(
            ConnectionState::Connected,
            ConnectionState::Failed("eof".to_string())
        );
    }

    #[test]
    fn test_mqtt_error_display() {
        let errors = vec![
            MqttError::ConnectionFailed("test".to_string()),
            MqttError::ConnectionLost("test".to_string()),
            MqttError::NotConnected {
                state: ConnectionState::Failed("test".to_string()),
            },
            MqttError::PublishFailed("test".to_string().into()),
            MqttError::SubscriptionFailed("test".to_string().into()),
            MqttError::SubscriptionRejected("test".to_string()),
            MqttError::UnsubscribeFailed("test".to_string().into()),
            MqttError::AckTimeout("SUBACK".to_string()),
            MqttError::InvalidTopic("test".to_string()),
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
