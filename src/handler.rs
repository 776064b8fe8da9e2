//! Subscribe/publish/unsubscribe facade
//!
//! [`MqttHandler`] is what the invoking environment talks to. Each operation resolves
//! the shared [`BrokerConnection`] for `(host, port)` through the registry, creating it
//! on first use, and delegates. Errors are logged here and returned unchanged.

use crate::broker::BrokerKey;
use crate::connection::BrokerConnection;
use crate::error::MuxResult;
use crate::executor::{HandlerExecutor, HandlerRef};
use crate::registry::ConnectionRegistry;
use crate::transport::SessionConnector;
use std::sync::Arc;
use tracing::{error, info, Instrument};

pub struct MqttHandler {
    registry: Arc<ConnectionRegistry<BrokerConnection>>,
    connector: Arc<dyn SessionConnector>,
    executor: Arc<dyn HandlerExecutor>,
}

impl MqttHandler {
    /// Create a facade with its own registry
    pub fn new(connector: Arc<dyn SessionConnector>, executor: Arc<dyn HandlerExecutor>) -> Self {
        Self::with_registry(Arc::new(ConnectionRegistry::new()), connector, executor)
    }

    /// Create a facade over a registry shared with other facades in the process
    pub fn with_registry(
        registry: Arc<ConnectionRegistry<BrokerConnection>>,
        connector: Arc<dyn SessionConnector>,
        executor: Arc<dyn HandlerExecutor>,
    ) -> Self {
        Self {
            registry,
            connector,
            executor,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry<BrokerConnection>> {
        &self.registry
    }

    pub async fn subscribe(
        &self,
        host: &str,
        port: u16,
        topic: &str,
        handler: HandlerRef,
    ) -> MuxResult<()> {
        let span =
            crate::mqtt_span!(operation = "subscribe", host = %host, port = port, topic = %topic);
        async {
            info!(handler = %handler, "Subscribing to topic {} on {}:{}", topic, host, port);
            let connection = self.connection(host, port).await?;
            connection.subscribe(topic, handler).await.map_err(|e| {
                error!("Subscribe failed: {}", e);
                e
            })
        }
        .instrument(span)
        .await
    }

    pub async fn publish(
        &self,
        host: &str,
        port: u16,
        topic: &str,
        message: &str,
    ) -> MuxResult<()> {
        let span =
            crate::mqtt_span!(operation = "publish", host = %host, port = port, topic = %topic);
        async {
            info!("Publishing to topic {} on {}:{}", topic, host, port);
            let connection = self.connection(host, port).await?;
            connection.publish(topic, message).await.map_err(|e| {
                error!("Publish failed: {}", e);
                e
            })
        }
        .instrument(span)
        .await
    }

    pub async fn unsubscribe(&self, host: &str, port: u16, topic: &str) -> MuxResult<()> {
        let span = crate::mqtt_span!(
            operation = "unsubscribe",
            host = %host,
            port = port,
            topic = %topic
        );
        async {
            info!("Unsubscribing from topic {} on {}:{}", topic, host, port);
            let connection = self.connection(host, port).await?;
            connection.unsubscribe(topic).await.map_err(|e| {
                error!("Unsubscribe failed: {}", e);
                e
            })
        }
        .instrument(span)
        .await
    }

    async fn connection(&self, host: &str, port: u16) -> MuxResult<Arc<BrokerConnection>> {
        let key = BrokerKey::new(host, port).map_err(|e| {
            error!("Rejected broker address {}:{}: {}", host, port, e);
            e
        })?;

        let connector = Arc::clone(&self.connector);
        let executor = Arc::clone(&self.executor);
        self.registry
            .get_or_create(&key, || {
                let key = key.clone();
                async move { BrokerConnection::connect(key, connector.as_ref(), executor).await }
            })
            .await
    }
}
