//! Session table.
//!
//! One entry per peer address. Every insert, lookup and removal goes through
//! a single async mutex, so the accept loop and per-session teardown never
//! race.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};

use crate::session::Session;

/// Session entry with metadata
struct SessionEntry {
    /// The session
    session: Arc<Session>,
    /// Datagram routing sender (UDP only)
    inbox: Option<mpsc::Sender<Bytes>>,
    /// Accept time
    accepted_at: Instant,
}

/// Result of [`SessionTable::get_or_insert_with`].
pub(crate) struct Lookup {
    pub session: Arc<Session>,
    pub inbox: Option<mpsc::Sender<Bytes>>,
    pub fresh: bool,
}

/// Sessions keyed by peer address
#[derive(Clone, Default)]
pub struct SessionTable {
    sessions: Arc<Mutex<HashMap<SocketAddr, SessionEntry>>>,
}

impl SessionTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session, returning the one it replaced.
    pub(crate) async fn insert(
        &self,
        session: Arc<Session>,
        inbox: Option<mpsc::Sender<Bytes>>,
    ) -> Option<Arc<Session>> {
        let entry = SessionEntry {
            session: session.clone(),
            inbox,
            accepted_at: Instant::now(),
        };
        self.sessions
            .lock()
            .await
            .insert(session.peer_addr(), entry)
            .map(|old| old.session)
    }

    /// Look up `peer`, creating its entry with `make` if absent or if the
    /// existing session is no longer alive.
    pub(crate) async fn get_or_insert_with<F>(&self, peer: SocketAddr, make: F) -> Lookup
    where
        F: FnOnce() -> (Arc<Session>, Option<mpsc::Sender<Bytes>>),
    {
        let mut sessions = self.sessions.lock().await;

        if let Some(entry) = sessions.get(&peer).filter(|e| e.session.is_alive()) {
            return Lookup {
                session: entry.session.clone(),
                inbox: entry.inbox.clone(),
                fresh: false,
            };
        }

        let (session, inbox) = make();
        sessions.insert(
            peer,
            SessionEntry {
                session: session.clone(),
                inbox: inbox.clone(),
                accepted_at: Instant::now(),
            },
        );
        Lookup {
            session,
            inbox,
            fresh: true,
        }
    }

    /// Get session by peer address
    pub async fn get(&self, peer: &SocketAddr) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .await
            .get(peer)
            .map(|entry| entry.session.clone())
    }

    /// Remove session by peer address
    pub async fn remove(&self, peer: &SocketAddr) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .await
            .remove(peer)
            .map(|entry| entry.session)
    }

    /// Remove the entry for `peer` only if it still holds session `id`.
    pub async fn remove_if(&self, peer: &SocketAddr, id: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        match sessions.get(peer) {
            Some(entry) if entry.session.id() == id => {
                sessions.remove(peer);
                true
            },
            _ => false,
        }
    }

    /// Remove and return every session
    pub async fn drain(&self) -> Vec<Arc<Session>> {
        self.sessions
            .lock()
            .await
            .drain()
            .map(|(_, entry)| entry.session)
            .collect()
    }

    /// Get session count
    pub async fn count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// All sessions
    pub async fn list(&self) -> Vec<Arc<Session>> {
        self.sessions
            .lock()
            .await
            .values()
            .map(|entry| entry.session.clone())
            .collect()
    }

    /// How long `peer` has been in the table
    pub async fn age(&self, peer: &SocketAddr) -> Option<Duration> {
        self.sessions
            .lock()
            .await
            .get(peer)
            .map(|entry| entry.accepted_at.elapsed())
    }
}

impl std::fmt::Debug for SessionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTable").finish_non_exhaustive()
    }
}
