//! Error types for the connection multiplexer
//!
//! Every failure raised by the facade is a [`MuxError`]. Transport level causes are kept
//! as the `source` so callers can walk the chain when they need the broker detail.

use crate::broker::BrokerKey;
use crate::config::ConfigError;
use crate::transport::mqtt::MqttError;
use thiserror::Error;

/// Main error type for subscribe/publish/unsubscribe operations
#[derive(Debug, Error)]
pub enum MuxError {
    #[error("Invalid broker address: {0}")]
    InvalidBrokerAddress(String),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Transport error for broker {broker}: {source}")]
    Transport {
        broker: BrokerKey,
        #[source]
        source: MqttError,
    },

    #[error("Subscribe to '{topic}' failed: {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: MqttError,
    },

    #[error("Publish to '{topic}' failed: {source}")]
    Publish {
        topic: String,
        #[source]
        source: MqttError,
    },

    #[error("Unsubscribe from '{topic}' failed: {source}")]
    Unsubscribe {
        topic: String,
        #[source]
        source: MqttError,
    },
}

impl MuxError {
    /// Create invalid broker address error
    pub fn invalid_broker_address<S: Into<String>>(message: S) -> Self {
        Self::InvalidBrokerAddress(message.into())
    }

    /// Create transport error
    pub fn transport(broker: &BrokerKey, source: MqttError) -> Self {
        Self::Transport {
            broker: broker.clone(),
            source,
        }
    }

    /// Create subscribe error
    pub fn subscribe<S: Into<String>>(topic: S, source: MqttError) -> Self {
        Self::Subscribe {
            topic: topic.into(),
            source,
        }
    }

    /// Create publish error
    pub fn publish<S: Into<String>>(topic: S, source: MqttError) -> Self {
        Self::Publish {
            topic: topic.into(),
            source,
        }
    }

    /// Create unsubscribe error
    pub fn unsubscribe<S: Into<String>>(topic: S, source: MqttError) -> Self {
        Self::Unsubscribe {
            topic: topic.into(),
            source,
        }
    }
}

/// Failure reported by a handler executor while running user logic
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Handler '{handler}' failed: {message}")]
    ExecutionFailed { handler: String, message: String },
}

impl HandlerError {
    pub fn execution_failed<H: Into<String>, M: Into<String>>(handler: H, message: M) -> Self {
        Self::ExecutionFailed {
            handler: handler.into(),
            message: message.into(),
        }
    }
}

/// Result type for multiplexer operations
pub type MuxResult<T> = Result<T, MuxError>;
