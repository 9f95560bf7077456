use crate::{
    chat::Frame,
    entity::{ConnectionId, ConversationKey},
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

/// Sending half of one live connection's outbound queue.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    pub id: ConnectionId,
    tx: mpsc::Sender<Frame>,
}

impl PeerHandle {
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Frame>) -> Self {
        Self { id, tx }
    }

    /// Queue a frame for this connection without waiting. Fails if the
    /// connection is gone or its queue is full.
    pub fn try_send(&self, frame: Frame) -> Result<(), mpsc::error::TrySendError<Frame>> {
        self.tx.try_send(frame)
    }
}

/// Live connections listening under one key.
#[derive(Debug, Default)]
struct ChatSession {
    connections: HashMap<ConnectionId, PeerHandle>,
}

/// Which connections are currently listening under which conversation key.
///
/// The lock is only held to touch the map. Callers get snapshots, never the
/// live sets, and do their I/O after the lock is released.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: Mutex<HashMap<ConversationKey, ChatSession>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<ConversationKey, ChatSession>> {
        // The map is never left half-updated, so a poisoned lock is still usable.
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, key: ConversationKey, peer: PeerHandle) {
        let id = peer.id;
        self.sessions()
            .entry(key)
            .or_default()
            .connections
            .insert(id, peer);
        debug!(%key, conn = %id, "connection registered");
    }

    /// Remove a connection. Unknown connections are ignored. The session is
    /// dropped with its last connection.
    pub fn unregister(&self, key: ConversationKey, id: ConnectionId) {
        let mut sessions = self.sessions();
        if let Some(session) = sessions.get_mut(&key) {
            if session.connections.remove(&id).is_some() {
                debug!(%key, conn = %id, "connection unregistered");
            }
            if session.connections.is_empty() {
                sessions.remove(&key);
            }
        }
    }

    pub fn lookup(&self, key: &ConversationKey) -> Vec<PeerHandle> {
        self.sessions()
            .get(key)
            .map(|session| session.connections.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn session_count(&self) -> usize {
        self.sessions().len()
    }

    pub fn connection_count(&self) -> usize {
        self.sessions()
            .values()
            .map(|session| session.connections.len())
            .sum()
    }
}

/// Keeps a connection registered for as long as it is alive and removes it
/// on drop, whichever way the owning task ends.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<Registry>,
    key: ConversationKey,
    id: ConnectionId,
}

impl Registration {
    pub fn new(registry: Arc<Registry>, key: ConversationKey, peer: PeerHandle) -> Self {
        let id = peer.id;
        registry.register(key, peer);
        Self { registry, key, id }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(self.key, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> (PeerHandle, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(8);
        (PeerHandle::new(ConnectionId::next(), tx), rx)
    }

    fn ids(peers: &[PeerHandle]) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = peers.iter().map(|p| p.id).collect();
        ids.sort_by_key(|id| id.to_string());
        ids
    }

    #[test]
    fn test_lookup_empty_key() {
        let registry = Registry::new();
        assert!(registry.lookup(&ConversationKey::new(1, 2, Some(10))).is_empty());
    }

    #[test]
    fn test_register_and_unregister() {
        let registry = Registry::new();
        let key = ConversationKey::new(1, 2, Some(10));
        let (a, _rx_a) = peer();
        let (b, _rx_b) = peer();
        let (a_id, b_id) = (a.id, b.id);

        registry.register(key, a);
        registry.register(key, b);
        assert_eq!(registry.lookup(&key).len(), 2);
        assert_eq!(registry.connection_count(), 2);
        assert_eq!(registry.session_count(), 1);

        registry.unregister(key, a_id);
        assert_eq!(ids(&registry.lookup(&key)), vec![b_id]);

        // Second removal of the same connection is a no-op.
        registry.unregister(key, a_id);
        assert_eq!(registry.connection_count(), 1);

        registry.unregister(key, b_id);
        assert!(registry.lookup(&key).is_empty());
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn test_keys_are_isolated() {
        let registry = Registry::new();
        let key = ConversationKey::new(1, 2, Some(10));
        let others = [
            key.mirror(),
            ConversationKey::new(1, 2, Some(11)),
            ConversationKey::new(1, 3, Some(10)),
        ];

        let (p, _rx) = peer();
        let p_id = p.id;
        let mut receivers = Vec::new();
        let mut other_ids = Vec::new();
        for other in others {
            let (q, rx) = peer();
            other_ids.push(q.id);
            receivers.push(rx);
            registry.register(other, q);
        }

        registry.register(key, p);
        for (other, id) in others.iter().zip(&other_ids) {
            assert_eq!(ids(&registry.lookup(other)), vec![*id]);
        }

        registry.unregister(key, p_id);
        for (other, id) in others.iter().zip(&other_ids) {
            assert_eq!(ids(&registry.lookup(other)), vec![*id]);
        }

        // Unregistering under the wrong key does nothing.
        registry.unregister(key, other_ids[0]);
        assert_eq!(ids(&registry.lookup(&others[0])), vec![other_ids[0]]);
    }

    #[test]
    fn test_lookup_is_a_snapshot() {
        let registry = Registry::new();
        let key = ConversationKey::new(1, 2, Some(10));
        let (a, _rx_a) = peer();
        let a_id = a.id;
        registry.register(key, a);

        let snapshot = registry.lookup(&key);
        registry.unregister(key, a_id);

        assert_eq!(ids(&snapshot), vec![a_id]);
        assert!(registry.lookup(&key).is_empty());
    }

    #[test]
    fn test_registration_unregisters_on_drop() {
        let registry = Arc::new(Registry::new());
        let key = ConversationKey::new(1, 2, Some(10));
        let (a, _rx) = peer();

        let registration = Registration::new(registry.clone(), key, a);
        assert_eq!(ids(&registry.lookup(&key)), vec![registration.id()]);

        drop(registration);
        assert!(registry.lookup(&key).is_empty());
    }

    #[test]
    fn test_registration_unregisters_on_panic() {
        let registry = Arc::new(Registry::new());
        let key = ConversationKey::new(1, 2, Some(10));
        let (a, _rx) = peer();

        let inner = registry.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _registration = Registration::new(inner, key, a);
            panic!("connection task failed");
        }));

        assert!(result.is_err());
        assert!(registry.lookup(&key).is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_registration() {
        let registry = Arc::new(Registry::new());
        let key = ConversationKey::new(1, 2, Some(10));

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    let (p, rx) = peer();
                    let id = p.id;
                    registry.register(key, p);
                    tokio::task::yield_now().await;
                    registry.unregister(key, id);
                    drop(rx);
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.session_count(), 0);
    }
}
