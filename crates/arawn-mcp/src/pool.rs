//! A pool of warm, initialized clients for a single MCP server.
//!
//! A [`Pool`] owns up to `capacity` concurrently-live [`McpClient`]s for one
//! [`McpServerConfig`]. Callers `acquire` a client, use it, and `release` it
//! back with an outcome: `Healthy` clients return to the idle set for reuse,
//! `Broken` clients are torn down. Waiters queue FIFO behind a oneshot
//! notification chain rather than a bare `Notify`, so the longest-waiting
//! caller is always served first when a slot frees up.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, oneshot};

use crate::client::{McpClient, McpServerConfig};
use crate::error::{McpError, Result};

/// What happened to a client while it was checked out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolOutcome {
    /// The client completed its work and its transport is still sound.
    Healthy,
    /// The client hit a fatal transport error (see
    /// [`McpError::is_fatal_to_client`]) or was cancelled mid-call; it must
    /// not be reused.
    Broken,
}

/// A checked-out client plus the bookkeeping needed to return it to its pool.
pub struct PooledClient {
    client: Arc<McpClient>,
    id: u64,
}

impl PooledClient {
    /// Borrow the underlying client.
    pub fn client(&self) -> &McpClient {
        &self.client
    }

    /// Stable id assigned when this client was first created, for logging.
    pub fn id(&self) -> u64 {
        self.id
    }
}

struct Slot {
    client: Arc<McpClient>,
    id: u64,
}

/// Point-in-time pool counters.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct PoolCounters {
    /// Clients spawned over the pool's lifetime.
    pub created: u64,
    /// Times an idle client was handed back out instead of spawning a new one.
    pub reused: u64,
    /// Clients currently checked out.
    pub in_use: usize,
    /// Clients idle and ready to be acquired.
    pub available: usize,
}

impl PoolCounters {
    /// Fraction of acquires served by reuse rather than a fresh spawn, in
    /// `[0.0, 1.0]`. `0.0` when nothing has been acquired yet.
    pub fn reuse_rate(&self) -> f64 {
        let total = self.created + self.reused;
        if total == 0 {
            0.0
        } else {
            self.reused as f64 / total as f64
        }
    }
}

struct PoolInner {
    idle: VecDeque<Slot>,
    in_use: usize,
    next_id: u64,
    created: u64,
    reused: u64,
    shutting_down: bool,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// A pool of warm clients for one [`McpServerConfig`].
pub struct Pool {
    config: McpServerConfig,
    capacity: usize,
    inner: Mutex<PoolInner>,
}

impl Pool {
    /// Create a new, empty pool. No clients are spawned until the first
    /// `acquire`.
    pub fn new(config: McpServerConfig, capacity: usize) -> Self {
        Self {
            config,
            capacity: capacity.max(1),
            inner: Mutex::new(PoolInner {
                idle: VecDeque::new(),
                in_use: 0,
                next_id: 1,
                created: 0,
                reused: 0,
                shutting_down: false,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// The config this pool was built from.
    pub fn config(&self) -> &McpServerConfig {
        &self.config
    }

    /// Acquire an idle client, spawning a fresh one if under capacity, or
    /// wait in FIFO order for one to free up. Fails with
    /// [`McpError::PoolExhausted`] if `deadline` elapses first, or
    /// [`McpError::PoolShuttingDown`] if `shutdown` has been called.
    pub async fn acquire(&self, deadline: Duration) -> Result<PooledClient> {
        let start = Instant::now();

        loop {
            enum Next {
                Got(PooledClient),
                Spawn,
                Wait(oneshot::Receiver<()>),
            }

            let next = {
                let mut inner = self.inner.lock().await;
                if inner.shutting_down {
                    return Err(McpError::PoolShuttingDown(self.config.name.clone()));
                }
                if let Some(slot) = inner.idle.pop_front() {
                    inner.in_use += 1;
                    inner.reused += 1;
                    Next::Got(PooledClient {
                        client: slot.client,
                        id: slot.id,
                    })
                } else if inner.in_use < self.capacity {
                    inner.in_use += 1;
                    Next::Spawn
                } else {
                    let (tx, rx) = oneshot::channel();
                    inner.waiters.push_back(tx);
                    Next::Wait(rx)
                }
            };

            match next {
                Next::Got(pooled) => return Ok(pooled),
                Next::Spawn => {
                    let remaining = deadline.saturating_sub(start.elapsed());
                    match self.spawn_client(remaining).await {
                        Ok(client) => {
                            let mut inner = self.inner.lock().await;
                            inner.created += 1;
                            let id = inner.next_id;
                            inner.next_id += 1;
                            return Ok(PooledClient {
                                client: Arc::new(client),
                                id,
                            });
                        }
                        Err(e) => {
                            let mut inner = self.inner.lock().await;
                            inner.in_use = inner.in_use.saturating_sub(1);
                            Self::wake_next(&mut inner);
                            return Err(e);
                        }
                    }
                }
                Next::Wait(rx) => {
                    let remaining = deadline.saturating_sub(start.elapsed());
                    if tokio::time::timeout(remaining, rx).await.is_err() {
                        return Err(McpError::PoolExhausted(self.config.name.clone(), deadline));
                    }
                    // Woken: loop around and try to claim the freed slot.
                }
            }
        }
    }

    async fn spawn_client(&self, remaining: Duration) -> Result<McpClient> {
        let mut client = McpClient::connect(self.config.clone()).await?;
        let startup_budget = remaining.min(self.config.startup_timeout);
        tokio::time::timeout(startup_budget, client.initialize())
            .await
            .map_err(|_| McpError::StartupTimeout(startup_budget))??;
        Ok(client)
    }

    /// Return a checked-out client. `Healthy` clients go back to the idle
    /// set; `Broken` ones are shut down and discarded.
    pub async fn release(&self, pooled: PooledClient, outcome: PoolOutcome) {
        let mut inner = self.inner.lock().await;
        inner.in_use = inner.in_use.saturating_sub(1);

        if outcome == PoolOutcome::Healthy && !inner.shutting_down {
            inner.idle.push_back(Slot {
                client: pooled.client,
                id: pooled.id,
            });
        } else {
            tokio::spawn(discard_client(pooled.client));
        }

        Self::wake_next(&mut inner);
    }

    fn wake_next(inner: &mut PoolInner) {
        while let Some(tx) = inner.waiters.pop_front() {
            if tx.send(()).is_ok() {
                break;
            }
        }
    }

    /// Snapshot the pool's counters.
    pub async fn counters(&self) -> PoolCounters {
        let inner = self.inner.lock().await;
        PoolCounters {
            created: inner.created,
            reused: inner.reused,
            in_use: inner.in_use,
            available: inner.idle.len(),
        }
    }

    /// Stop serving new acquires and tear down all idle clients. Clients
    /// currently checked out are discarded as they're released.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        inner.shutting_down = true;
        let idle: Vec<Slot> = inner.idle.drain(..).collect();
        while let Some(tx) = inner.waiters.pop_front() {
            let _ = tx.send(());
        }
        drop(inner);

        for slot in idle {
            discard_client(slot.client).await;
        }
    }
}

/// Best-effort shutdown of a client once nothing else holds a reference.
/// A client with outstanding references (e.g. a caller that leaked its
/// `PooledClient`) is simply dropped; its `kill_on_drop` child will still die.
async fn discard_client(client: Arc<McpClient>) {
    match Arc::try_unwrap(client) {
        Ok(mut client) => {
            let _ = client.shutdown().await;
        }
        Err(_) => {
            tracing::warn!("discarding pooled client with outstanding references");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_config(name: &str) -> McpServerConfig {
        McpServerConfig::http(name, "http://127.0.0.1:1/mcp")
    }

    #[tokio::test]
    async fn test_counters_start_empty() {
        let pool = Pool::new(http_config("t"), 2);
        let counters = pool.counters().await;
        assert_eq!(counters, PoolCounters::default());
        assert_eq!(counters.reuse_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_acquire_fails_fast_when_unreachable() {
        // HTTP connect succeeds without a round trip, but initialize() will
        // fail against nothing listening on 127.0.0.1:1.
        let pool = Pool::new(http_config("t"), 1);
        let result = pool.acquire(Duration::from_millis(200)).await;
        assert!(result.is_err());
        let counters = pool.counters().await;
        assert_eq!(counters.in_use, 0);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_acquires() {
        let pool = Pool::new(http_config("t"), 1);
        pool.shutdown().await;
        let result = pool.acquire(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(McpError::PoolShuttingDown(_))));
    }

    #[tokio::test]
    async fn test_pool_exhausted_when_waiter_times_out() {
        let pool = Arc::new(Pool::new(http_config("t"), 1));
        // Occupy the only slot by reserving it without a real client: we
        // simulate this by driving `in_use` up through the internal lock.
        {
            let mut inner = pool.inner.lock().await;
            inner.in_use = 1;
        }
        let result = pool.acquire(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(McpError::PoolExhausted(_, _))));
    }
}
