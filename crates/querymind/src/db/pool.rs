//! Session-scoped connection pool.
//!
//! Connections are keyed by (session id, config fingerprint). Every mutation of
//! the map happens under one async mutex that is held across connection
//! creation, so concurrent acquires for the same key never open two handles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::{ConfigFingerprint, ConnectionConfig, Connector, DbSession};
use crate::error::{DbError, QueryError};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// One live handle owned by the pool and leased to requests.
pub struct PooledConnection {
    id: u64,
    session_id: String,
    fingerprint: ConfigFingerprint,
    created_at: DateTime<Utc>,
    handle: Mutex<Option<Box<dyn DbSession>>>,
}

impl PooledConnection {
    fn new(session_id: &str, fingerprint: ConfigFingerprint, session: Box<dyn DbSession>) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            session_id: session_id.to_string(),
            fingerprint,
            created_at: Utc::now(),
            handle: Mutex::new(Some(session)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn fingerprint(&self) -> &ConfigFingerprint {
        &self.fingerprint
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Exclusive access to the underlying handle for the duration of the guard.
    pub async fn lease(&self) -> Result<ConnectionLease<'_>, DbError> {
        let guard = self.handle.lock().await;
        MutexGuard::try_map(guard, |slot| slot.as_deref_mut())
            .map(|session| ConnectionLease { session })
            .map_err(|_| DbError::Closed)
    }

    /// A connection currently leased by another request counts as alive.
    pub async fn is_alive(&self) -> bool {
        match self.handle.try_lock() {
            Ok(mut guard) => match guard.as_mut() {
                Some(session) => session.ping().await,
                None => false,
            },
            Err(_) => true,
        }
    }

    /// Roll back anything outstanding and close the handle. Idempotent.
    pub async fn close(&self) {
        let session = self.handle.lock().await.take();
        if let Some(mut session) = session {
            if let Err(e) = session.rollback().await {
                debug!("Rollback before close failed on connection {}: {}", self.id, e);
            }
            if let Err(e) = session.close().await {
                warn!("Error closing connection {}: {}", self.id, e);
            }
        }
    }
}

pub struct ConnectionLease<'a> {
    session: MappedMutexGuard<'a, dyn DbSession>,
}

impl ConnectionLease<'_> {
    pub fn session(&mut self) -> &mut dyn DbSession {
        &mut *self.session
    }
}

type SessionConnections = HashMap<ConfigFingerprint, Arc<PooledConnection>>;

pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    entries: Mutex<HashMap<String, SessionConnections>>,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        self.connector.clone()
    }

    /// Reuse the live connection for (session, fingerprint), replacing it if
    /// the liveness probe fails, or open a new one.
    pub async fn acquire(
        &self,
        session_id: &str,
        config: &ConnectionConfig,
    ) -> Result<Arc<PooledConnection>, QueryError> {
        let fingerprint = config.fingerprint();
        let mut entries = self.entries.lock().await;

        let existing = entries
            .get(session_id)
            .and_then(|conns| conns.get(&fingerprint))
            .cloned();

        if let Some(conn) = existing {
            if conn.is_alive().await {
                debug!("Reusing connection {} for session {}", conn.id(), session_id);
                return Ok(conn);
            }
            warn!(
                "Connection {} for session {} failed liveness check, replacing",
                conn.id(),
                session_id
            );
            if let Some(conns) = entries.get_mut(session_id) {
                conns.remove(&fingerprint);
            }
            conn.close().await;
        }

        let session = self
            .connector
            .connect(config)
            .await
            .map_err(|e| QueryError::Pool(e.to_string()))?;
        let conn = Arc::new(PooledConnection::new(session_id, fingerprint.clone(), session));
        info!("Opened connection {} ({}) for session {}", conn.id(), fingerprint, session_id);

        entries
            .entry(session_id.to_string())
            .or_default()
            .insert(fingerprint, conn.clone());
        Ok(conn)
    }

    /// Close and forget every connection owned by the session.
    pub async fn release_session(&self, session_id: &str) -> usize {
        let removed = self.entries.lock().await.remove(session_id);
        let Some(conns) = removed else {
            return 0;
        };
        let count = conns.len();
        for conn in conns.into_values() {
            conn.close().await;
        }
        info!("Released {} connection(s) for session {}", count, session_id);
        count
    }

    /// Release every session for which `keep` returns false.
    pub async fn retain_sessions<F>(&self, keep: F) -> Vec<String>
    where
        F: Fn(&str) -> bool,
    {
        let stale: Vec<(String, SessionConnections)> = {
            let mut entries = self.entries.lock().await;
            let ids: Vec<String> = entries.keys().filter(|id| !keep(id.as_str())).cloned().collect();
            ids.into_iter()
                .filter_map(|id| entries.remove(&id).map(|conns| (id, conns)))
                .collect()
        };

        let mut reclaimed = Vec::with_capacity(stale.len());
        for (id, conns) in stale {
            for conn in conns.into_values() {
                conn.close().await;
            }
            reclaimed.push(id);
        }
        reclaimed
    }

    pub async fn session_ids(&self) -> Vec<String> {
        self.entries.lock().await.keys().cloned().collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.entries.lock().await.values().map(HashMap::len).sum()
    }

    pub async fn shutdown(&self) {
        let all: Vec<Arc<PooledConnection>> = self
            .entries
            .lock()
            .await
            .drain()
            .flat_map(|(_, conns)| conns.into_values())
            .collect();
        let count = all.len();
        for conn in all {
            conn.close().await;
        }
        info!("Connection pool shut down ({} connection(s) closed)", count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_config, ScriptedConnector};

    #[tokio::test]
    async fn test_acquire_reuses_live_connection() {
        let connector = Arc::new(ScriptedConnector::new());
        let pool = ConnectionPool::new(connector.clone());
        let cfg = sample_config();

        let first = pool.acquire("s1", &cfg).await.unwrap();
        let other_password = ConnectionConfig { password: "different".into(), ..cfg.clone() };
        let second = pool.acquire("s1", &other_password).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_acquire_replaces_dead_connection() {
        let connector = Arc::new(ScriptedConnector::new());
        let pool = ConnectionPool::new(connector.clone());
        let cfg = sample_config();

        let first = pool.acquire("s1", &cfg).await.unwrap();
        connector.kill_all();
        let second = pool.acquire("s1", &cfg).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_ne!(first.id(), second.id());
        assert_eq!(connector.connect_count(), 2);
        assert_eq!(pool.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let connector = Arc::new(ScriptedConnector::new());
        let pool = ConnectionPool::new(connector.clone());
        let cfg = sample_config();

        let a = pool.acquire("a", &cfg).await.unwrap();
        let b = pool.acquire("b", &cfg).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(pool.connection_count().await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_opens_one_connection() {
        let connector = Arc::new(ScriptedConnector::new());
        let pool = Arc::new(ConnectionPool::new(connector.clone()));
        let cfg = sample_config();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                let cfg = cfg.clone();
                tokio::spawn(async move { pool.acquire("s1", &cfg).await.unwrap().id() })
            })
            .collect();

        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_release_session_closes_connections() {
        let connector = Arc::new(ScriptedConnector::new());
        let pool = ConnectionPool::new(connector.clone());
        let cfg = sample_config();

        let conn = pool.acquire("s1", &cfg).await.unwrap();
        assert_eq!(pool.release_session("s1").await, 1);
        assert_eq!(pool.release_session("s1").await, 0);
        assert!(conn.lease().await.is_err());
        assert_eq!(connector.closed_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_is_pool_error() {
        let connector = Arc::new(ScriptedConnector::new());
        connector.refuse_connections();
        let pool = ConnectionPool::new(connector);
        let err = pool.acquire("s1", &sample_config()).await.err().unwrap();
        assert_eq!(err.kind(), "pool_error");
    }

    #[tokio::test]
    async fn test_retain_sessions_reclaims_inactive() {
        let connector = Arc::new(ScriptedConnector::new());
        let pool = ConnectionPool::new(connector.clone());
        let cfg = sample_config();
        pool.acquire("keep", &cfg).await.unwrap();
        pool.acquire("drop", &cfg).await.unwrap();

        let reclaimed = pool.retain_sessions(|id| id == "keep").await;
        assert_eq!(reclaimed, vec!["drop".to_string()]);
        assert_eq!(pool.session_ids().await, vec!["keep".to_string()]);
    }
}
