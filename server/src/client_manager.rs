//! Registry of live client sessions for the relay server
//!
//! This module tracks every accepted connection that is still being served:
//! - Registration with an optional capacity limit
//! - Idempotent removal, safe to call from any exit path of a session
//! - Ordered snapshots for fan-out that never hold the lock across a write
//!
//! The registry is owned by one `ChatServer` and shared with its session tasks
//! through an `Arc`. Broadcasts copy the current session handles under a read
//! lock and release it before writing, so a slow peer never blocks sessions
//! from joining or leaving.

use log::info;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::client::{ClientSession, SessionId};

pub struct ClientRegistry {
    /// Live sessions keyed by id; ids grow monotonically so iteration follows join order
    sessions: RwLock<BTreeMap<SessionId, Arc<ClientSession>>>,
    /// Maximum number of concurrent sessions allowed
    max_clients: usize,
}

impl ClientRegistry {
    /// Creates an empty registry that accepts at most `max_clients` sessions
    pub fn new(max_clients: usize) -> Self {
        Self {
            sessions: RwLock::new(BTreeMap::new()),
            max_clients,
        }
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    /// Registers a fully constructed session
    ///
    /// Returns false if the registry is at capacity or a session with the same
    /// id is already present; the registry is left unchanged in both cases.
    pub async fn add(&self, session: Arc<ClientSession>) -> bool {
        let mut sessions = self.sessions.write().await;

        if sessions.len() >= self.max_clients || sessions.contains_key(&session.id) {
            return false;
        }

        info!("Client {} connected from {}", session.id, session.addr);
        sessions.insert(session.id, session);
        true
    }

    /// Removes a session
    ///
    /// Returns true if the session was found and removed, false if it was
    /// already gone or never added. Either way the call succeeds.
    pub async fn remove(&self, id: SessionId) -> bool {
        let removed = self.sessions.write().await.remove(&id);

        match removed {
            Some(session) => {
                info!(
                    "Client {} disconnected after {:.1?}",
                    session.display_name(),
                    session.connected_for()
                );
                true
            }
            None => false,
        }
    }

    /// Every registered session except `excluded`, in join order
    ///
    /// The returned handles stay valid after the lock is released. A session
    /// removed after the snapshot was taken is still in the list; its
    /// connection reports `NotConnected` on write.
    pub async fn snapshot_excluding(&self, excluded: SessionId) -> Vec<Arc<ClientSession>> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|session| session.id != excluded)
            .cloned()
            .collect()
    }

    pub async fn snapshot(&self) -> Vec<Arc<ClientSession>> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn contains(&self, id: SessionId) -> bool {
        self.sessions.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
