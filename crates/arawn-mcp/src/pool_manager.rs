//! Registry mapping server configs to their [`Pool`].
//!
//! One [`Pool`] exists per distinct [`McpServerConfig::pool_key`]. Looking up
//! a key that hasn't been seen before creates its pool atomically; looking up
//! a key whose config differs from what's already registered is a
//! [`McpError::DuplicateKey`] rather than silently picking one.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::client::McpServerConfig;
use crate::error::{McpError, Result};
use crate::pool::Pool;

/// Default number of warm clients kept per server.
pub const DEFAULT_POOL_CAPACITY: usize = 4;

/// Registry of per-server [`Pool`]s.
pub struct PoolManager {
    pools: RwLock<HashMap<String, Arc<Pool>>>,
    default_capacity: usize,
}

impl PoolManager {
    /// Create a manager that sizes new pools to `default_capacity` clients.
    pub fn new(default_capacity: usize) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            default_capacity: default_capacity.max(1),
        }
    }

    /// Fetch the pool for `config`'s key, creating it if this is the first
    /// time this key has been seen. Returns [`McpError::DuplicateKey`] if the
    /// key is already registered under a different config.
    pub async fn get_or_create(&self, config: McpServerConfig) -> Result<Arc<Pool>> {
        let key = config.pool_key().to_string();

        if let Some(pool) = self.pools.read().await.get(&key) {
            return Self::match_existing(pool, &config);
        }

        let mut pools = self.pools.write().await;
        if let Some(pool) = pools.get(&key) {
            return Self::match_existing(pool, &config);
        }

        let pool = Arc::new(Pool::new(config, self.default_capacity));
        pools.insert(key, pool.clone());
        Ok(pool)
    }

    fn match_existing(pool: &Arc<Pool>, config: &McpServerConfig) -> Result<Arc<Pool>> {
        if pool.config() == config {
            Ok(pool.clone())
        } else {
            Err(McpError::DuplicateKey(config.pool_key().to_string()))
        }
    }

    /// Look up an already-registered pool by key without creating one.
    pub async fn get(&self, key: &str) -> Option<Arc<Pool>> {
        self.pools.read().await.get(key).cloned()
    }

    /// All registered pool keys.
    pub async fn keys(&self) -> Vec<String> {
        self.pools.read().await.keys().cloned().collect()
    }

    /// Shut every registered pool down. The manager can still be queried
    /// afterward but every pool will refuse new acquires.
    pub async fn shutdown_all(&self) {
        let pools: Vec<Arc<Pool>> = self.pools.read().await.values().cloned().collect();
        for pool in pools {
            pool.shutdown().await;
        }
    }
}

impl Default for PoolManager {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}
