//! MQTT 3.1.1 session implementation over rumqttc
//!
//! # Architecture
//!
//! - [`connection`] - Pure connection state, errors and option construction
//! - [`message_handler`] - Pure event routing and acknowledgement bookkeeping
//! - [`tls`] - Mutual TLS client configuration from PEM files
//! - [`client`] - Impure I/O: the session, its event loop task and the connector
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_mux::broker::BrokerKey;
//! use mqtt_mux::config::MuxConfig;
//! use mqtt_mux::transport::mqtt::MqttConnector;
//! use mqtt_mux::transport::SessionConnector;
//!
//! # tokio_test::block_on(async {
//! let connector = MqttConnector::from_config(&MuxConfig::default())?;
//! let key = BrokerKey::new("broker.example.com", 8883)?;
//! let session = connector.connect(&key).await?;
//! session.publish("cmd/reset", b"hello".to_vec(), rumqttc::QoS::ExactlyOnce).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;
pub mod tls;

// Re-export public types for convenience
pub use client::{MqttConnector, MqttSession};
pub use connection::{
    configure_mqtt_options, configure_network_options, ConnectionState, MqttError,
};
pub use message_handler::{AckKind, AckTracker, EventRoute, MessageHandler};
pub use tls::{TlsError, TlsMaterial, TlsProvisioner};
