//! Maps origins to pools and exposes the `send` entry point.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use crate::config::ClientConfig;
use crate::connect::{Connector, DirectConnector};
use crate::error::Result;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::origin::Origin;
use crate::pool::Pool;

/// Owns at most one pool per origin for its lifetime, constructing pools on
/// first use and tearing all of them down on `close`.
pub struct Client {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    pools: StdMutex<HashMap<String, Arc<Pool>>>,
}

impl Client {
    pub fn new() -> Client {
        Client::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Client {
        Client::with_connector(config, Arc::new(DirectConnector::new()))
    }

    /// Builds a client against a custom [`Connector`] — the seam tests use
    /// to dial an in-process loopback listener instead of a real socket.
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Client {
        Client {
            config,
            connector,
            pools: StdMutex::new(HashMap::new()),
        }
    }

    fn pool_for(&self, origin: &Origin) -> Arc<Pool> {
        let mut pools = self.pools.lock().unwrap_or_else(|e| e.into_inner());
        pools
            .entry(origin.key())
            .or_insert_with(|| Pool::new(origin.clone(), self.connector.clone(), self.config.pool.clone()))
            .clone()
    }

    /// Acquires an agent for the request's origin, dispatches it, and binds
    /// the agent's return-to-idle to releasing it back into the pool —
    /// without the agent itself knowing a pool exists.
    pub async fn send(&self, req: Request) -> Result<Response> {
        let origin = req.origin()?;
        let pool = self.pool_for(&origin);
        let cancel = req.cancel_token().cloned();

        let agent = pool.acquire(cancel.as_ref()).await?;
        let result = agent.send(req).await;

        let release_agent = agent.clone();
        let release_pool = pool.clone();
        tokio::spawn(async move {
            release_agent.when_idle().await;
            release_pool.release(release_agent);
        });

        result
    }

    /// Destroys every pool. Idempotent; subsequent sends to an origin build
    /// a fresh pool.
    pub fn close(&self) {
        let mut pools = self.pools.lock().unwrap_or_else(|e| e.into_inner());
        for (_, pool) in pools.drain() {
            pool.close();
        }
    }
}

impl Default for Client {
    fn default() -> Self {
        Client::new()
    }
}
