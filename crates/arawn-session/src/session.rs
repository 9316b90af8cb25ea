//! The session store: an atomic `id -> Session` registry with idle-TTL sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::config::SessionConfig;
use crate::context::ContextBuffer;
use crate::error::{Result, SessionError};

/// Which orchestration mode a session's last request used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Brainstorm,
    Analyze,
    Generate,
}

/// Structured side-state carried between requests on the same session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SideState {
    None,
    /// The last structured analysis result (Analyze mode).
    Analysis(serde_json::Value),
    /// The last generated template text, for revision requests (Generate mode).
    Template(String),
}

impl Default for SideState {
    fn default() -> Self {
        SideState::None
    }
}

/// Per-conversational-thread state.
///
/// A Session exclusively owns its [`ContextBuffer`]; the orchestrator borrows
/// it for the lifetime of one request and never retains it.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub mode: Option<Mode>,
    pub buffer: ContextBuffer,
    pub side_state: SideState,
    last_touch_at: Instant,
}

impl Session {
    fn new(id: impl Into<String>, context_budget_chars: usize) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            mode: None,
            buffer: ContextBuffer::new(context_budget_chars),
            side_state: SideState::None,
            last_touch_at: Instant::now(),
        }
    }

    /// Reset the idle timer. Called around every request's buffer mutation.
    pub fn touch(&mut self) {
        self.last_touch_at = Instant::now();
    }

    pub fn last_touch_at(&self) -> Instant {
        self.last_touch_at
    }

    pub fn is_expired(&self, idle_ttl: Duration) -> bool {
        self.last_touch_at.elapsed() > idle_ttl
    }
}

/// Concurrent map from session id to [`Session`], with idle-TTL eviction.
///
/// `get_or_create` is atomic: two concurrent callers racing on the same id
/// are guaranteed to observe the same underlying `Arc<Mutex<Session>>`. Each
/// session is individually locked so that two requests on the same session
/// id serialize only around the mutations they actually perform, while
/// requests on different sessions proceed fully in parallel.
///
/// Evicting a session destroys its buffer and side-state but never touches
/// pools — the store has no knowledge of MCP clients.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    config: SessionConfig,
}

impl SessionStore {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Fetch the session for `id`, creating it on first use.
    pub async fn get_or_create(&self, id: &str) -> Arc<Mutex<Session>> {
        if let Some(session) = self.sessions.read().await.get(id) {
            return session.clone();
        }

        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get(id) {
            return session.clone();
        }

        let session = Arc::new(Mutex::new(Session::new(
            id,
            self.config.context_budget_chars,
        )));
        sessions.insert(id.to_string(), session.clone());
        session
    }

    /// Look up a session without creating one.
    pub async fn get(&self, id: &str) -> Result<Arc<Mutex<Session>>> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// Explicitly delete a session.
    pub async fn remove(&self, id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Evict every session whose idle timer has elapsed `idle_ttl`. Returns
    /// the number of sessions evicted.
    pub async fn sweep_expired(&self) -> usize {
        let idle_ttl = self.config.idle_ttl;
        let mut expired = Vec::new();

        for (id, session) in self.sessions.read().await.iter() {
            if session.lock().await.is_expired(idle_ttl) {
                expired.push(id.clone());
            }
        }

        if expired.is_empty() {
            return 0;
        }

        let mut sessions = self.sessions.write().await;
        let mut count = 0;
        for id in expired {
            // Re-check under the write lock: the session may have been
            // touched between the scan above and acquiring this lock.
            let still_expired = match sessions.get(&id) {
                Some(session) => session.lock().await.is_expired(idle_ttl),
                None => false,
            };
            if still_expired && sessions.remove(&id).is_some() {
                debug!(session_id = %id, "evicted idle session");
                count += 1;
            }
        }
        count
    }

    /// Spawn a background task that periodically calls [`Self::sweep_expired`].
    /// No-op if `config.enable_sweep` is false.
    pub fn spawn_sweeper(self: Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        if !self.config.enable_sweep {
            return None;
        }
        let interval = self.config.sweep_interval;
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let evicted = self.sweep_expired().await;
                if evicted > 0 {
                    debug!(count = evicted, "TTL sweep evicted sessions");
                }
            }
        }))
    }
}
