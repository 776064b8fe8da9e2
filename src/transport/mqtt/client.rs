//! Impure I/O operations for MQTT sessions
//!
//! This module owns the rumqttc client and its event loop task. The event loop routes
//! every event through [`MessageHandler::route_event`], feeds acknowledgements into the
//! [`AckTracker`] and forwards inbound traffic to the installed [`SessionCallback`].
//! There is no reconnection: the first transport error ends the session for good.

use super::connection::{
    configure_mqtt_options, configure_network_options, ConnectionState, MqttError,
};
use super::message_handler::{AckKind, AckTracker, EventRoute, MessageHandler};
use super::tls::{TlsMaterial, TlsProvisioner};
use crate::broker::BrokerKey;
use crate::config::{ClientSection, ConfigError, MuxConfig};
use crate::error::MuxError;
use crate::transport::{BrokerSession, SessionCallback, SessionConnector};
use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop, QoS, Transport};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the rumqttc request channel
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// State shared between a session handle and its event loop task
struct SessionShared {
    key: BrokerKey,
    state_tx: watch::Sender<ConnectionState>,
    callback: RwLock<Option<Arc<dyn SessionCallback>>>,
    acks: StdMutex<AckTracker>,
}

impl SessionShared {
    fn callback(&self) -> Option<Arc<dyn SessionCallback>> {
        self.callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn with_acks<R>(&self, f: impl FnOnce(&mut AckTracker) -> R) -> R {
        let mut acks = self.acks.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut acks)
    }
}

/// One MQTT session to one broker
pub struct MqttSession {
    client: Mutex<AsyncClient>,
    shared: Arc<SessionShared>,
    state_rx: watch::Receiver<ConnectionState>,
    operation_timeout: Duration,
    event_loop_handle: Option<JoinHandle<()>>,
}

impl MqttSession {
    /// Spawn the event loop for an already configured client
    pub fn start(
        key: BrokerKey,
        client: AsyncClient,
        event_loop: EventLoop,
        operation_timeout: Duration,
    ) -> Self {
        let mut session =
            Self::with_client(key, client, ConnectionState::Connecting, operation_timeout);
        let shared = Arc::clone(&session.shared);
        session.event_loop_handle = Some(tokio::spawn(Self::run_event_loop(event_loop, shared)));
        session
    }

    /// Session handle without a running event loop
    fn with_client(
        key: BrokerKey,
        client: AsyncClient,
        initial_state: ConnectionState,
        operation_timeout: Duration,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(initial_state);
        let shared = Arc::new(SessionShared {
            key,
            state_tx,
            callback: RwLock::new(None),
            acks: StdMutex::new(AckTracker::new()),
        });

        Self {
            client: Mutex::new(client),
            shared,
            state_rx,
            operation_timeout,
            event_loop_handle: None,
        }
    }

    /// Wait for connection confirmation (ConnAck) with timeout
    pub async fn wait_for_connection(&self, timeout: Duration) -> Result<(), MqttError> {
        Self::wait_for_connection_confirmation(self.state_rx.clone(), timeout).await
    }

    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let timeout_result = tokio::time::timeout(timeout, async {
            loop {
                let state = state_rx.borrow_and_update().clone();
                match state {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Failed(reason) => {
                        return Err(MqttError::ConnectionFailed(reason));
                    }
                    ConnectionState::Connecting => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailed(
                        "State channel closed".to_string(),
                    ));
                }
            }
        })
        .await;

        match timeout_result {
            Ok(result) => result,
            Err(_) => Err(MqttError::ConnectionFailed(format!(
                "ConnAck timeout - no connection confirmation within {}s",
                timeout.as_secs()
            ))),
        }
    }

    async fn run_event_loop(mut event_loop: EventLoop, shared: Arc<SessionShared>) {
        debug!("Starting MQTT event loop for {}", shared.key);
        loop {
            match event_loop.poll().await {
                Ok(event) => {
                    let route = MessageHandler::route_event(&event);
                    if !Self::process_event_route(route, &shared) {
                        break;
                    }
                }
                Err(e) => {
                    Self::handle_connection_lost(&shared, &e.to_string());
                    break;
                }
            }
        }
        debug!("MQTT event loop stopped for {}", shared.key);
    }

    /// Returns false when the session is over
    fn process_event_route(route: EventRoute, shared: &SessionShared) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                info!("Connected to broker {}", shared.key);
                let _ = shared.state_tx.send(ConnectionState::Connected);
            }
            EventRoute::MessageReceived { topic, payload } => {
                debug!(
                    target: "mqtt_transport",
                    "Message arrived on {} ({} bytes)",
                    topic,
                    payload.len()
                );
                match shared.callback() {
                    Some(callback) => callback.message_arrived(&topic, payload),
                    None => debug!("No callback installed, dropping message on {}", topic),
                }
            }
            EventRoute::SubscribeSent { packet_id } => {
                shared.with_acks(|acks| acks.on_sent(AckKind::Subscribe, packet_id));
            }
            EventRoute::SubscribeAcknowledged {
                packet_id,
                accepted,
            } => {
                let outcome = if accepted {
                    Ok(())
                } else {
                    Err("broker returned a failure code in SUBACK".to_string())
                };
                if !shared.with_acks(|acks| acks.on_ack(AckKind::Subscribe, packet_id, outcome)) {
                    debug!("SUBACK {} had no waiting caller", packet_id);
                }
            }
            EventRoute::UnsubscribeSent { packet_id } => {
                shared.with_acks(|acks| acks.on_sent(AckKind::Unsubscribe, packet_id));
            }
            EventRoute::UnsubscribeAcknowledged { packet_id } => {
                if !shared.with_acks(|acks| acks.on_ack(AckKind::Unsubscribe, packet_id, Ok(()))) {
                    debug!("UNSUBACK {} had no waiting caller", packet_id);
                }
            }
            EventRoute::DeliveryComplete { packet_id } => {
                if let Some(callback) = shared.callback() {
                    callback.delivery_complete(packet_id);
                } else {
                    debug!("Delivery complete for packet {}", packet_id);
                }
            }
            EventRoute::Disconnected => {
                Self::handle_connection_lost(shared, "broker sent DISCONNECT");
                return false;
            }
            EventRoute::InfrastructureEvent(event_str) => {
                tracing::trace!(target: "mqtt_transport", "MQTT event: {}", event_str);
            }
            EventRoute::OutgoingEvent => {}
        }
        true
    }

    fn handle_connection_lost(shared: &SessionShared, cause: &str) {
        let was_connected = shared.state_tx.borrow().is_connected();
        let _ = shared
            .state_tx
            .send(ConnectionState::Failed(cause.to_string()));
        shared.with_acks(|acks| acks.fail_all(cause));

        if was_connected {
            warn!("Connection to {} lost: {}", shared.key, cause);
        } else {
            error!("Connection to {} failed: {}", shared.key, cause);
        }

        if let Some(callback) = shared.callback() {
            callback.connection_lost(cause);
        }
    }

    /// Check connection state before operations
    fn check_connection_state(&self) -> Result<(), MqttError> {
        let current_state = self.state_rx.borrow().clone();
        if !current_state.is_connected() {
            return Err(MqttError::NotConnected {
                state: current_state,
            });
        }
        Ok(())
    }

    /// Queue a waiter, send the request, then wait for the broker's answer.
    ///
    /// The client lock is held from enqueue to send so waiters line up with the
    /// order rumqttc assigns packet ids.
    async fn request_with_ack<F, Fut>(
        &self,
        kind: AckKind,
        topic: &str,
        send: F,
    ) -> Result<(), MqttError>
    where
        F: FnOnce(AsyncClient) -> Fut,
        Fut: std::future::Future<Output = Result<(), rumqttc::ClientError>>,
    {
        self.check_connection_state()?;

        let (tx, rx) = oneshot::channel();
        {
            let client = self.client.lock().await;
            self.shared.with_acks(|acks| acks.enqueue(kind, tx));
            if let Err(e) = send(client.clone()).await {
                self.shared.with_acks(|acks| acks.cancel_last(kind));
                return Err(match kind {
                    AckKind::Subscribe => MqttError::SubscriptionFailed(Box::new(e)),
                    AckKind::Unsubscribe => MqttError::UnsubscribeFailed(Box::new(e)),
                });
            }
        }

        let ack_name = match kind {
            AckKind::Subscribe => "SUBACK",
            AckKind::Unsubscribe => "UNSUBACK",
        };
        let outcome = tokio::time::timeout(self.operation_timeout, rx).await;
        let connected = self.state_rx.borrow().is_connected();
        match outcome {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(reason))) => Err(match kind {
                AckKind::Subscribe if connected => {
                    MqttError::SubscriptionRejected(format!("{topic}: {reason}"))
                }
                _ => MqttError::ConnectionLost(reason),
            }),
            Ok(Err(_)) => Err(MqttError::ConnectionLost(format!(
                "session closed while waiting for {ack_name}"
            ))),
            Err(_) => {
                let released = self.shared.with_acks(|acks| acks.discard_abandoned(kind));
                debug!("Released {} abandoned {} waiter(s)", released, ack_name);
                Err(MqttError::AckTimeout(format!("{ack_name} for '{topic}'")))
            }
        }
    }
}

#[async_trait]
impl BrokerSession for MqttSession {
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), MqttError> {
        let owned_topic = topic.to_string();
        self.request_with_ack(AckKind::Subscribe, topic, |client| async move {
            client.subscribe(owned_topic, qos).await
        })
        .await?;
        debug!("Broker {} acknowledged subscription to {}", self.shared.key, topic);
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), MqttError> {
        let owned_topic = topic.to_string();
        self.request_with_ack(AckKind::Unsubscribe, topic, |client| async move {
            client.unsubscribe(owned_topic).await
        })
        .await?;
        debug!("Broker {} acknowledged unsubscribe from {}", self.shared.key, topic);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), MqttError> {
        self.check_connection_state()?;

        let client = self.client.lock().await;
        client
            .publish(topic, qos, false, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))
    }

    fn set_callback(&self, callback: Arc<dyn SessionCallback>) {
        let mut slot = self
            .shared
            .callback
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(callback);
    }

    fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        // Without the task the rumqttc request channel closes and the socket is dropped
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }
}

/// Opens TLS (or plain TCP) MQTT sessions for the registry
pub struct MqttConnector {
    client: ClientSection,
    tls: Option<TlsMaterial>,
}

impl MqttConnector {
    pub fn new(client: ClientSection, tls: Option<TlsMaterial>) -> Self {
        Self { client, tls }
    }

    /// Resolve TLS material (including the passphrase) from configuration
    pub fn from_config(config: &MuxConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.client.clone(), config.tls.material()?))
    }

    pub fn uses_tls(&self) -> bool {
        self.tls.is_some()
    }

    fn build_transport(&self) -> Result<Transport, ConfigError> {
        match &self.tls {
            Some(material) => Ok(TlsProvisioner::build_transport(material)?),
            None => Ok(Transport::Tcp),
        }
    }
}

#[async_trait]
impl SessionConnector for MqttConnector {
    async fn connect(&self, key: &BrokerKey) -> Result<Arc<dyn BrokerSession>, MuxError> {
        let transport = self.build_transport()?;
        let options = configure_mqtt_options(key, &self.client, transport);
        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        event_loop.set_network_options(configure_network_options(&self.client));

        info!("Connecting to broker: {}", key.uri(self.uses_tls()));
        let session = MqttSession::start(
            key.clone(),
            client,
            event_loop,
            Duration::from_secs(self.client.operation_timeout_secs),
        );

        // Dropping the session on failure stops its event loop
        session
            .wait_for_connection(Duration::from_secs(self.client.connect_timeout_secs))
            .await
            .map_err(|e| MuxError::transport(key, e))?;

        Ok(Arc::new(session))
    }
}
