//! Transport layer for broker sessions
//!
//! This module provides the session abstraction the connection layer talks to, and the
//! MQTT implementation of it. The traits keep [`crate::connection::BrokerConnection`]
//! independent of rumqttc so it can be driven by mocks in tests.

use crate::broker::BrokerKey;
use crate::error::MuxError;
use bytes::Bytes;
use rumqttc::QoS;
use std::sync::Arc;

pub mod mqtt;

pub use mqtt::{ConnectionState, MqttError};

/// One live protocol session to one broker
#[async_trait::async_trait]
pub trait BrokerSession: Send + Sync {
    /// Subscribe and wait for the broker to acknowledge
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), MqttError>;

    /// Unsubscribe and wait for the broker to acknowledge
    async fn unsubscribe(&self, topic: &str) -> Result<(), MqttError>;

    /// Hand a message to the transport; returns once it is queued for delivery
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), MqttError>;

    /// Install the connection-wide inbound callback, replacing any previous one
    fn set_callback(&self, callback: Arc<dyn SessionCallback>);

    fn connection_state(&self) -> ConnectionState;
}

/// Inbound events raised by a session on its own I/O task.
///
/// Implementations must not block; long work belongs on a spawned task.
pub trait SessionCallback: Send + Sync {
    fn message_arrived(&self, topic: &str, payload: Bytes);

    fn connection_lost(&self, cause: &str);

    fn delivery_complete(&self, packet_id: u16);
}

/// Opens sessions for the registry
#[async_trait::async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self, key: &BrokerKey) -> Result<Arc<dyn BrokerSession>, MuxError>;
}
