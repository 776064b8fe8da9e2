//! Handler invocation boundary
//!
//! The multiplexer never runs user logic itself. A subscription records a
//! [`HandlerRef`], and arriving messages are handed to a [`HandlerExecutor`] together
//! with a parameter map holding `Topic` and `Payload`.

use crate::error::HandlerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::info;

/// Parameter name carrying the concrete topic a message arrived on
pub const TOPIC_PARAM: &str = "Topic";
/// Parameter name carrying the payload decoded as text
pub const PAYLOAD_PARAM: &str = "Payload";

/// String-valued parameters passed to a handler
pub type MessageParameters = BTreeMap<String, String>;

/// Build the handler parameter map for one message
pub fn message_parameters(topic: &str, payload: &str) -> MessageParameters {
    let mut params = MessageParameters::new();
    params.insert(TOPIC_PARAM.to_string(), topic.to_string());
    params.insert(PAYLOAD_PARAM.to_string(), payload.to_string());
    params
}

/// Opaque identifier of the logic to run for a subscription
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandlerRef(String);

impl HandlerRef {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HandlerRef {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Runs handler logic on behalf of the dispatcher
#[async_trait]
pub trait HandlerExecutor: Send + Sync {
    async fn execute(
        &self,
        handler: &HandlerRef,
        params: MessageParameters,
    ) -> Result<(), HandlerError>;
}

/// Executor that only logs what it would have run
#[derive(Debug, Default)]
pub struct LoggingExecutor;

#[async_trait]
impl HandlerExecutor for LoggingExecutor {
    async fn execute(
        &self,
        handler: &HandlerRef,
        params: MessageParameters,
    ) -> Result<(), HandlerError> {
        let rendered = serde_json::to_string(&params)
            .map_err(|e| HandlerError::execution_failed(handler.as_str(), e.to_string()))?;
        info!(handler = %handler, "Handler invoked with {}", rendered);
        Ok(())
    }
}
