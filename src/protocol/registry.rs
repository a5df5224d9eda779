//! Concurrent session map plus the nonce index used to route challenges.
//!
//! A challenge carries no sender id, only the nonce of the packet it answers, so
//! every outbound request packet is indexed by nonce until its request resolves.

use crate::core::packet::Nonce;
use crate::node::record::NodeRecord;
use crate::protocol::session::{Session, SessionKey};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

/// Shared handle to one session.
#[derive(Clone)]
pub struct SessionHandle {
    key: SessionKey,
    inner: Arc<Mutex<Session>>,
}

impl SessionHandle {
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn lock(&self) -> parking_lot::MutexGuard<'_, Session> {
        self.inner.lock()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionHandle({})", self.key)
    }
}

#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<SessionKey, Arc<Mutex<Session>>>,
    nonces: DashMap<Nonce, SessionKey>,
    max_requests: usize,
}

impl SessionRegistry {
    pub fn new(max_requests: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            nonces: DashMap::new(),
            max_requests,
        }
    }

    /// Return the session for `key`, creating it atomically if absent.
    ///
    /// The flag is `true` when this call created the session. `record` seeds a new
    /// session and refreshes an existing one if newer.
    pub fn get_or_create(&self, key: SessionKey, record: Option<NodeRecord>) -> (SessionHandle, bool) {
        let (inner, created) = match self.sessions.entry(key) {
            Entry::Occupied(entry) => {
                let inner = Arc::clone(entry.get());
                drop(entry);
                if let Some(record) = record {
                    inner.lock().update_record(record);
                }
                (inner, false)
            }
            Entry::Vacant(entry) => {
                let session = Session::new(key, record, self.max_requests);
                let inner = Arc::new(Mutex::new(session));
                entry.insert(Arc::clone(&inner));
                trace!(session = %key, "Session created");
                (inner, true)
            }
        };
        (SessionHandle { key, inner }, created)
    }

    pub fn get(&self, key: &SessionKey) -> Option<SessionHandle> {
        self.sessions.get(key).map(|entry| SessionHandle {
            key: *key,
            inner: Arc::clone(entry.value()),
        })
    }

    /// Drop the session and every nonce that points at it.
    pub fn remove(&self, key: &SessionKey) -> Option<SessionHandle> {
        let (_, inner) = self.sessions.remove(key)?;
        self.nonces.retain(|_, owner| owner != key);
        Some(SessionHandle { key: *key, inner })
    }

    pub fn index_nonce(&self, nonce: Nonce, key: SessionKey) {
        self.nonces.insert(nonce, key);
    }

    pub fn session_for_nonce(&self, nonce: &Nonce) -> Option<SessionKey> {
        self.nonces.get(nonce).map(|entry| *entry.value())
    }

    pub fn forget_nonce(&self, nonce: &Nonce) {
        self.nonces.remove(nonce);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn keys(&self) -> Vec<SessionKey> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::node::id::NodeId;
    use std::thread;

    fn key(byte: u8) -> SessionKey {
        SessionKey::new(NodeId::new([byte; 32]), "127.0.0.1:9000".parse().unwrap())
    }

    #[test]
    fn test_concurrent_get_or_create_builds_one_session() {
        let registry = Arc::new(SessionRegistry::new(16));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.get_or_create(key(1), None).1)
            })
            .collect();
        let created = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|created| *created)
            .count();
        assert_eq!(created, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_purges_nonces() {
        let registry = SessionRegistry::new(16);
        registry.get_or_create(key(1), None);
        registry.get_or_create(key(2), None);
        registry.index_nonce([1u8; 12], key(1));
        registry.index_nonce([2u8; 12], key(2));

        assert!(registry.remove(&key(1)).is_some());
        assert_eq!(registry.session_for_nonce(&[1u8; 12]), None);
        assert_eq!(registry.session_for_nonce(&[2u8; 12]), Some(key(2)));
        assert!(registry.get(&key(1)).is_none());
    }
}
