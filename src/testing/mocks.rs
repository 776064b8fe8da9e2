//! Mock implementations for testing
//!
//! Provides mock BrokerSession, SessionConnector and HandlerExecutor implementations
//! so connections and the facade can be exercised without a broker.

use crate::broker::BrokerKey;
use crate::error::{HandlerError, MuxError};
use crate::executor::{HandlerExecutor, HandlerRef, MessageParameters};
use crate::transport::{
    BrokerSession, ConnectionState, MqttError, SessionCallback, SessionConnector,
};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::QoS;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;

/// One message handed to a [`MockSession`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

/// Mock broker session that records every operation
pub struct MockSession {
    subscriptions: Arc<Mutex<Vec<(String, QoS)>>>,
    unsubscriptions: Arc<Mutex<Vec<String>>>,
    published: Arc<Mutex<Vec<PublishedMessage>>>,
    callback: RwLock<Option<Arc<dyn SessionCallback>>>,
    callback_installs: AtomicUsize,
    state: RwLock<ConnectionState>,
    fail_subscribe: AtomicBool,
    fail_unsubscribe: AtomicBool,
    fail_publish: AtomicBool,
}

impl Default for MockSession {
    fn default() -> Self {
        Self {
            subscriptions: Arc::default(),
            unsubscriptions: Arc::default(),
            published: Arc::default(),
            callback: RwLock::new(None),
            callback_installs: AtomicUsize::new(0),
            state: RwLock::new(ConnectionState::Connected),
            fail_subscribe: AtomicBool::new(false),
            fail_unsubscribe: AtomicBool::new(false),
            fail_publish: AtomicBool::new(false),
        }
    }
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    pub fn fail_unsubscribe(&self, fail: bool) {
        self.fail_unsubscribe.store(fail, Ordering::SeqCst);
    }

    pub fn fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub async fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.subscriptions.lock().await.clone()
    }

    pub async fn unsubscriptions(&self) -> Vec<String> {
        self.unsubscriptions.lock().await.clone()
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.clone()
    }

    pub fn callback_installs(&self) -> usize {
        self.callback_installs.load(Ordering::SeqCst)
    }

    /// Simulate the broker delivering a message; no-op before a callback is installed
    pub fn deliver(&self, topic: &str, payload: &str) {
        if let Some(callback) = self.current_callback() {
            callback.message_arrived(topic, Bytes::copy_from_slice(payload.as_bytes()));
        }
    }

    /// Simulate the broker dropping the connection
    pub fn lose_connection(&self, cause: &str) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) =
            ConnectionState::Failed(cause.to_string());
        if let Some(callback) = self.current_callback() {
            callback.connection_lost(cause);
        }
    }

    fn current_callback(&self) -> Option<Arc<dyn SessionCallback>> {
        self.callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn ensure_connected(&self) -> Result<(), MqttError> {
        let state = self.connection_state();
        if state.is_connected() {
            Ok(())
        } else {
            Err(MqttError::NotConnected { state })
        }
    }
}

#[async_trait]
impl BrokerSession for MockSession {
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), MqttError> {
        self.ensure_connected()?;
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(MqttError::SubscriptionRejected(topic.to_string()));
        }
        self.subscriptions.lock().await.push((topic.to_string(), qos));
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), MqttError> {
        self.ensure_connected()?;
        if self.fail_unsubscribe.load(Ordering::SeqCst) {
            return Err(MqttError::AckTimeout(topic.to_string()));
        }
        self.unsubscriptions.lock().await.push(topic.to_string());
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), MqttError> {
        self.ensure_connected()?;
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(MqttError::ConnectionLost("mock publish failure".to_string()));
        }
        self.published.lock().await.push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            qos,
        });
        Ok(())
    }

    fn set_callback(&self, callback: Arc<dyn SessionCallback>) {
        *self.callback.write().unwrap_or_else(PoisonError::into_inner) = Some(callback);
        self.callback_installs.fetch_add(1, Ordering::SeqCst);
    }

    fn connection_state(&self) -> ConnectionState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Mock connector handing out one [`MockSession`] per successful connect
#[derive(Default)]
pub struct MockConnector {
    sessions: Arc<Mutex<HashMap<BrokerKey, Arc<MockSession>>>>,
    connects: Arc<Mutex<HashMap<BrokerKey, usize>>>,
    should_fail: AtomicBool,
    delay: Option<Duration>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure() -> Self {
        let connector = Self::default();
        connector.should_fail.store(true, Ordering::SeqCst);
        connector
    }

    /// Sleep for `delay` inside every connect, like a slow handshake
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn set_failure(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    /// Number of connect attempts made for `key`, including failed ones
    pub async fn connect_count(&self, key: &BrokerKey) -> usize {
        self.connects.lock().await.get(key).copied().unwrap_or(0)
    }

    pub async fn total_connects(&self) -> usize {
        self.connects.lock().await.values().sum()
    }

    /// Session created by the last successful connect for `key`
    pub async fn session_for(&self, key: &BrokerKey) -> Option<Arc<MockSession>> {
        self.sessions.lock().await.get(key).cloned()
    }
}

#[async_trait]
impl SessionConnector for MockConnector {
    async fn connect(&self, key: &BrokerKey) -> Result<Arc<dyn BrokerSession>, MuxError> {
        *self.connects.lock().await.entry(key.clone()).or_insert(0) += 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.should_fail.load(Ordering::SeqCst) {
            return Err(MuxError::transport(
                key,
                MqttError::ConnectionFailed("mock connection failure".to_string()),
            ));
        }

        let session = Arc::new(MockSession::new());
        self.sessions
            .lock()
            .await
            .insert(key.clone(), Arc::clone(&session));
        Ok(session)
    }
}

/// One handler invocation seen by [`RecordingExecutor`]
#[derive(Debug, Clone)]
pub struct Invocation {
    pub handler: HandlerRef,
    pub params: MessageParameters,
}

/// Executor that records every invocation.
///
/// Handlers registered with [`RecordingExecutor::fail_handler`] return an error and
/// those registered with [`RecordingExecutor::panic_handler`] panic; neither is recorded.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    invocations: Arc<Mutex<Vec<Invocation>>>,
    failing: RwLock<HashSet<HandlerRef>>,
    panicking: RwLock<HashSet<HandlerRef>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_handler(&self, handler: &str) {
        self.failing
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(HandlerRef::new(handler));
    }

    pub fn panic_handler(&self, handler: &str) {
        self.panicking
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(HandlerRef::new(handler));
    }

    pub async fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().await.clone()
    }

    /// Poll until at least `count` invocations were recorded or `timeout` passes
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<Invocation> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let current = self.invocations().await;
            if current.len() >= count || tokio::time::Instant::now() >= deadline {
                return current;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl HandlerExecutor for RecordingExecutor {
    async fn execute(
        &self,
        handler: &HandlerRef,
        params: MessageParameters,
    ) -> Result<(), HandlerError> {
        let panics = self
            .panicking
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(handler);
        if panics {
            panic!("handler {handler} panicked");
        }

        let fails = self
            .failing
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(handler);
        if fails {
            let message = "mock handler failure";
            return Err(HandlerError::execution_failed(handler.as_str(), message));
        }

        self.invocations.lock().await.push(Invocation {
            handler: handler.clone(),
            params,
        });
        Ok(())
    }
}
