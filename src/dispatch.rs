//! Inbound message dispatch
//!
//! [`MessageDispatcher`] is the single callback a connection installs on its session.
//! It owns the `topic -> Subscription` table and hands matching messages to the
//! executor on a fresh task, so a slow or failing handler never stalls the session's
//! I/O task or the next message.

use crate::broker::BrokerKey;
use crate::error::HandlerError;
use crate::executor::{message_parameters, HandlerExecutor, HandlerRef};
use crate::transport::mqtt::MessageHandler;
use crate::transport::SessionCallback;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::task::JoinError;
use tracing::{debug, error, info, warn, Instrument};

/// Routing entry recorded by a successful subscribe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic: String,
    pub handler: HandlerRef,
}

impl Subscription {
    pub fn new<S: Into<String>>(topic: S, handler: HandlerRef) -> Self {
        Self {
            topic: topic.into(),
            handler,
        }
    }
}

pub struct MessageDispatcher {
    key: BrokerKey,
    subscriptions: RwLock<HashMap<String, Subscription>>,
    executor: Arc<dyn HandlerExecutor>,
}

impl MessageDispatcher {
    pub fn new(key: BrokerKey, executor: Arc<dyn HandlerExecutor>) -> Self {
        Self {
            key,
            subscriptions: RwLock::new(HashMap::new()),
            executor,
        }
    }

    /// Record a subscription, returning the one it replaced
    pub fn insert(&self, subscription: Subscription) -> Option<Subscription> {
        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(subscription.topic.clone(), subscription)
    }

    pub fn remove(&self, topic: &str) -> Option<Subscription> {
        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(topic)
    }

    pub fn lookup(&self, topic: &str) -> Option<Subscription> {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .cloned()
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.lookup(topic).is_some()
    }

    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        topics.sort();
        topics
    }

    /// Look up `topic` by exact match and run its handler on a new task.
    ///
    /// Wildcard filters are resolved by the broker; the topic seen here is the concrete
    /// one, so it only matches a subscription made on that exact string.
    pub fn dispatch(&self, topic: &str, payload: &[u8]) {
        let Some(subscription) = self.lookup(topic) else {
            debug!("No subscription for {} on {}, dropping message", topic, self.key);
            return;
        };

        let payload = MessageHandler::decode_payload(payload);
        info!(
            broker = %self.key,
            handler = %subscription.handler,
            "Message arrived on {}", topic
        );

        let params = message_parameters(topic, &payload);
        let executor = Arc::clone(&self.executor);
        let handler = subscription.handler;
        let span = crate::dispatch_span!(broker = %self.key, topic = %topic, handler = %handler);

        // The handler runs on its own task so a panic surfaces here as a JoinError
        let invocation = {
            let handler = handler.clone();
            tokio::spawn(
                async move { executor.execute(&handler, params).await }.instrument(span.clone()),
            )
        };
        tokio::spawn(
            async move { Self::log_outcome(&handler, invocation.await) }.instrument(span),
        );
    }

    fn log_outcome(handler: &HandlerRef, outcome: Result<Result<(), HandlerError>, JoinError>) {
        match outcome {
            Ok(Ok(())) => debug!("Handler {} completed", handler),
            Ok(Err(e)) => error!("Handler {} failed: {}", handler, e),
            Err(e) if e.is_panic() => error!("Handler {} panicked", handler),
            Err(_) => warn!("Handler {} was cancelled", handler),
        }
    }
}

impl SessionCallback for MessageDispatcher {
    fn message_arrived(&self, topic: &str, payload: Bytes) {
        self.dispatch(topic, &payload);
    }

    fn connection_lost(&self, cause: &str) {
        warn!(
            subscriptions = self.topics().len(),
            "Connection to {} lost, no reconnect will be attempted: {}", self.key, cause
        );
    }

    fn delivery_complete(&self, packet_id: u16) {
        debug!("Delivery complete on {} for packet {}", self.key, packet_id);
    }
}
