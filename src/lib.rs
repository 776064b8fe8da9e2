//! MQTT broker-connection multiplexer
//!
//! Many independent callers can subscribe, publish and unsubscribe against the same
//! broker while sharing one mutual-TLS session per `(host, port)`.
//!
//! # Overview
//!
//! - [`registry`] - Process-wide map of broker connections with lazy, single creation
//! - [`connection`] - One broker session plus its topic dispatch table
//! - [`dispatch`] - Routes inbound messages to handlers on their own tasks
//! - [`transport`] - Session traits and the rumqttc/rustls implementation
//! - [`handler`] - The subscribe/publish/unsubscribe facade
//!
//! # Quick Start
//!
//! ```rust
//! use mqtt_mux::executor::HandlerRef;
//! use mqtt_mux::testing::{MockConnector, RecordingExecutor};
//! use mqtt_mux::MqttHandler;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let handler = MqttHandler::new(
//!     Arc::new(MockConnector::new()),
//!     Arc::new(RecordingExecutor::new()),
//! );
//!
//! handler
//!     .subscribe("broker.example.com", 8883, "sensors/temp", HandlerRef::new("OnTemp"))
//!     .await?;
//! handler.publish("broker.example.com", 8883, "cmd/reset", "hello").await?;
//! # Ok::<(), mqtt_mux::MuxError>(())
//! # });
//! ```

pub mod broker;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod handler;
pub mod observability;
pub mod registry;
pub mod testing;
pub mod transport;

pub use broker::BrokerKey;
pub use config::{ConfigError, MuxConfig};
pub use connection::BrokerConnection;
pub use error::{HandlerError, MuxError, MuxResult};
pub use executor::{HandlerExecutor, HandlerRef, LoggingExecutor, MessageParameters};
pub use handler::MqttHandler;
pub use registry::ConnectionRegistry;
pub use transport::mqtt::MqttConnector;
