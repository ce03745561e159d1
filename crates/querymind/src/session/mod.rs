//! Per-session state: pooled connections, conversation history and the
//! last-seen registry that drives idle-session reaping.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, info};

use crate::db::{ConnectionConfig, ConnectionPool, PooledConnection};
use crate::error::QueryError;
use crate::history::{ConversationHistory, ConversationTurn, HistoryStore, InMemoryHistoryStore};

/// Last time each session token was seen.
#[derive(Default)]
pub struct SessionRegistry {
    last_seen: DashMap<String, Instant>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touch_at(&self, session_id: &str, now: Instant) {
        self.last_seen.insert(session_id.to_string(), now);
    }

    pub fn is_active(&self, session_id: &str, now: Instant, ttl: Duration) -> bool {
        self.last_seen
            .get(session_id)
            .map(|seen| now.saturating_duration_since(*seen) <= ttl)
            .unwrap_or(false)
    }

    /// Drop tokens not seen within `ttl` and return them.
    pub fn expire(&self, now: Instant, ttl: Duration) -> Vec<String> {
        let stale: Vec<String> = self
            .last_seen
            .iter()
            .filter(|entry| now.saturating_duration_since(*entry.value()) > ttl)
            .map(|entry| entry.key().clone())
            .collect();
        for id in &stale {
            self.last_seen.remove(id);
        }
        stale
    }

    pub fn forget(&self, session_id: &str) {
        self.last_seen.remove(session_id);
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionTimings {
    pub sweep_interval: Duration,
    pub ttl: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(600),
            ttl: Duration::from_secs(1800),
        }
    }
}

pub struct SessionStore {
    pool: ConnectionPool,
    histories: InMemoryHistoryStore,
    registry: SessionRegistry,
    timings: SessionTimings,
    last_sweep: Mutex<Instant>,
}

impl SessionStore {
    pub fn new(pool: ConnectionPool, timings: SessionTimings) -> Self {
        Self {
            pool,
            histories: InMemoryHistoryStore::new(),
            registry: SessionRegistry::new(),
            timings,
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn touch(&self, session_id: &str) {
        self.registry.touch_at(session_id, Instant::now());
    }

    pub async fn acquire(
        &self,
        session_id: &str,
        config: &ConnectionConfig,
    ) -> Result<Arc<PooledConnection>, QueryError> {
        self.pool.acquire(session_id, config).await
    }

    pub fn history(&self, session_id: &str) -> ConversationHistory {
        self.histories.get_history(session_id)
    }

    pub fn record_turn(&self, session_id: &str, turn: ConversationTurn) {
        self.histories.add_turn(session_id, turn);
    }

    pub fn clear_history(&self, session_id: &str) {
        self.histories.clear_history(session_id);
    }

    pub async fn release_session(&self, session_id: &str) -> usize {
        self.pool.release_session(session_id).await
    }

    /// Run a sweep if the interval has elapsed since the last one.
    pub async fn maybe_sweep(&self) -> Vec<String> {
        self.maybe_sweep_at(Instant::now()).await
    }

    pub async fn maybe_sweep_at(&self, now: Instant) -> Vec<String> {
        {
            let mut last = match self.last_sweep.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if now.saturating_duration_since(*last) < self.timings.sweep_interval {
                return Vec::new();
            }
            *last = now;
        }
        self.sweep_at(now).await
    }

    /// Reclaim every session whose token is no longer active: close its
    /// connections and discard its history.
    pub async fn sweep_at(&self, now: Instant) -> Vec<String> {
        let ttl = self.timings.ttl;
        let mut reclaimed = self.registry.expire(now, ttl);
        let released = self
            .pool
            .retain_sessions(|id| self.registry.is_active(id, now, ttl))
            .await;
        for id in released {
            if !reclaimed.contains(&id) {
                reclaimed.push(id);
            }
        }
        for id in &reclaimed {
            self.histories.clear_history(id);
        }

        if reclaimed.is_empty() {
            debug!("Session sweep found nothing to reclaim");
        } else {
            info!("Session sweep reclaimed {} session(s)", reclaimed.len());
        }
        reclaimed
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}
