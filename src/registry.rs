//! Registry of live broker connections
//!
//! One entry per [`BrokerKey`]. A single async mutex covers the whole map and is held
//! while a missing connection is being created, so concurrent first use of a key never
//! produces two connections. Creation for one key therefore also delays lookups for
//! every other key until it finishes or fails.

use crate::broker::BrokerKey;
use crate::error::MuxResult;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Process-wide map from broker key to shared connection
pub struct ConnectionRegistry<C> {
    connections: Mutex<HashMap<BrokerKey, Arc<C>>>,
}

impl<C> ConnectionRegistry<C> {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Return the connection for `key`, creating it with `factory` if absent.
    ///
    /// A failing factory leaves no entry behind, so the next call starts over.
    pub async fn get_or_create<F, Fut>(&self, key: &BrokerKey, factory: F) -> MuxResult<Arc<C>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = MuxResult<C>>,
    {
        let mut connections = self.connections.lock().await;
        debug!(connections = connections.len(), "Registry lookup for {}", key);

        if let Some(existing) = connections.get(key) {
            debug!("Found existing connection for {}", key);
            return Ok(Arc::clone(existing));
        }

        info!("Creating new connection for {}", key);
        let connection = match factory().await {
            Ok(connection) => Arc::new(connection),
            Err(e) => {
                error!("Failed to create connection for {}: {}", key, e);
                return Err(e);
            }
        };

        connections.insert(key.clone(), Arc::clone(&connection));
        info!(connections = connections.len(), "Registered connection for {}", key);
        Ok(connection)
    }

    /// Look up an existing connection without creating one
    pub async fn get(&self, key: &BrokerKey) -> Option<Arc<C>> {
        self.connections.lock().await.get(key).cloned()
    }

    pub async fn contains(&self, key: &BrokerKey) -> bool {
        self.connections.lock().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }
}

impl<C> Default for ConnectionRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
