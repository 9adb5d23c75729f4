//! Session Registry - owns the named sessions of one process.
//!
//! The name -> session map has its own lock, held only for lookups and
//! swaps. Connecting and disconnecting always happen outside it; each
//! [`RemoteSession`] serializes its own I/O.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::backend::Connector;
use crate::config::{validate_session_name, SessionConfig};
use crate::error::{Error, Result};
use crate::pool::WorkerPool;
use crate::session::{RemoteSession, SessionStatus, SessionTiming};

/// Result of [`SessionRegistry::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoveOutcome {
    Removed,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Connected { name: String, replaced: bool },
    Removed { name: String },
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<RemoteSession>>>,
    connector: Arc<dyn Connector>,
    pool: WorkerPool,
    timing: SessionTiming,
    event_tx: broadcast::Sender<RegistryEvent>,
}

impl SessionRegistry {
    /// All sessions share `pool` and connect through `connector`.
    pub fn new(connector: Arc<dyn Connector>, pool: WorkerPool, timing: SessionTiming) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            sessions: RwLock::new(HashMap::new()),
            connector,
            pool,
            timing,
            event_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_tx.subscribe()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Connect a fresh session under `name`, replacing any existing one.
    ///
    /// The old session is unregistered and disconnected first. If the new
    /// connect fails, nothing is registered under `name`.
    pub async fn create_or_replace(&self, name: &str, config: SessionConfig) -> Result<Arc<RemoteSession>> {
        validate_session_name(name)?;

        let previous = self.sessions.write().await.remove(name);
        let replaced = previous.is_some();
        if let Some(old) = previous {
            info!(session = %name, "Replacing existing session");
            old.disconnect().await;
        }

        let session = Arc::new(RemoteSession::new(
            name,
            config,
            Arc::clone(&self.connector),
            self.pool.clone(),
            self.timing.clone(),
        ));
        session.connect().await?;

        // Another caller may have registered the same name while we connected.
        let displaced = self
            .sessions
            .write()
            .await
            .insert(name.to_string(), Arc::clone(&session));
        if let Some(other) = displaced {
            warn!(session = %name, "Concurrent create, closing displaced session");
            other.disconnect().await;
        }

        let _ = self.event_tx.send(RegistryEvent::Connected {
            name: name.to_string(),
            replaced,
        });
        Ok(session)
    }

    pub async fn get(&self, name: &str) -> Result<Arc<RemoteSession>> {
        self.sessions
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.sessions.read().await.contains_key(name)
    }

    /// Unregister and disconnect. Removing an absent name reports `NotFound`.
    pub async fn remove(&self, name: &str) -> RemoveOutcome {
        let removed = self.sessions.write().await.remove(name);
        match removed {
            Some(session) => {
                session.disconnect().await;
                info!(session = %name, "Session removed");
                let _ = self.event_tx.send(RegistryEvent::Removed {
                    name: name.to_string(),
                });
                RemoveOutcome::Removed
            }
            None => {
                debug!(session = %name, "Remove of unknown session");
                RemoveOutcome::NotFound
            }
        }
    }

    /// Status of every registered session, sorted by name.
    pub async fn list(&self) -> Vec<SessionStatus> {
        let sessions: Vec<Arc<RemoteSession>> =
            self.sessions.read().await.values().cloned().collect();
        let mut statuses: Vec<SessionStatus> = sessions.iter().map(|s| s.status()).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Disconnect and unregister every session.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, Arc<RemoteSession>)> =
            self.sessions.write().await.drain().collect();
        if drained.is_empty() {
            return;
        }
        info!(count = drained.len(), "Shutting down sessions");
        for (name, session) in drained {
            session.disconnect().await;
            let _ = self.event_tx.send(RegistryEvent::Removed { name });
        }
    }
}
