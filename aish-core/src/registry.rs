//! Registry of wrapped sessions known to a console process.
//!
//! Each wrapper that connects to the console announces the command line it
//! wraps. The registry maps the session id to that announcement and to the
//! channel used to inject input back into the session.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

pub type SessionId = u64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no wrapped session with id {0}")]
    UnknownSession(SessionId),
    #[error("wrapped session {0} is disconnected")]
    Disconnected(SessionId),
}

struct Entry {
    announcement: String,
    injector: mpsc::Sender<Vec<u8>>,
}

#[derive(Default)]
pub struct SessionRegistry {
    next_id: AtomicU64,
    sessions: RwLock<BTreeMap<SessionId, Entry>>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.list())
            .finish()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<SessionId, Entry>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<SessionId, Entry>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a session and return its id. Ids are never reused.
    pub fn register(&self, announcement: String, injector: mpsc::Sender<Vec<u8>>) -> SessionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("registering session {}: {}", id, announcement);
        self.write().insert(
            id,
            Entry {
                announcement,
                injector,
            },
        );
        id
    }

    pub fn unregister(&self, id: SessionId) -> bool {
        debug!("unregistering session {}", id);
        self.write().remove(&id).is_some()
    }

    /// The command line a session announced.
    pub fn announcement(&self, id: SessionId) -> Option<String> {
        self.read().get(&id).map(|e| e.announcement.clone())
    }

    /// All sessions, ordered by id.
    pub fn list(&self) -> Vec<(SessionId, String)> {
        self.read()
            .iter()
            .map(|(id, e)| (*id, e.announcement.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue `data` to be written into the session's pty input.
    pub async fn inject(&self, id: SessionId, data: Vec<u8>) -> Result<(), RegistryError> {
        let injector = self
            .read()
            .get(&id)
            .map(|e| e.injector.clone())
            .ok_or(RegistryError::UnknownSession(id))?;

        injector
            .send(data)
            .await
            .map_err(|_| RegistryError::Disconnected(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_register_and_inject() {
        let registry = SessionRegistry::new();
        let (tx, mut rx) = mpsc::channel(4);
        let id = registry.register("zsh".into(), tx);

        assert_eq!(registry.announcement(id).as_deref(), Some("zsh"));
        registry.inject(id, b"ls\r".to_vec()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"ls\r".to_vec());
    }

    #[tokio::test]
    async fn test_register_after_poisoned_lock() {
        let registry = std::sync::Arc::new(SessionRegistry::new());
        let poisoner = std::sync::Arc::clone(&registry);
        let result = std::thread::spawn(move || {
            let _sessions = poisoner.sessions.write().unwrap();
            panic!("poison the registry lock");
        })
        .join();
        assert!(result.is_err());
        assert!(registry.sessions.is_poisoned());

        let (tx, mut rx) = mpsc::channel(1);
        let id = registry.register("fish".into(), tx);
        assert_eq!(registry.list(), vec![(id, "fish".to_string())]);
        registry.inject(id, b"\r".to_vec()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"\r".to_vec());
        assert!(registry.unregister(id));
    }

    #[tokio::test]
    async fn test_ids_are_unique_and_ordered() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        let a = registry.register("bash".into(), tx.clone());
        let b = registry.register("zsh".into(), tx);
        assert!(b > a);
        assert_eq!(
            registry.list(),
            vec![(a, "bash".to_string()), (b, "zsh".to_string())]
        );
    }

    #[tokio::test]
    async fn test_inject_unknown_session() {
        let registry = SessionRegistry::new();
        let err = registry.inject(42, vec![1]).await.unwrap_err();
        assert_eq!(err, RegistryError::UnknownSession(42));
    }

    #[tokio::test]
    async fn test_inject_disconnected_session() {
        let registry = SessionRegistry::new();
        let (tx, rx) = mpsc::channel(1);
        let id = registry.register("sh".into(), tx);
        drop(rx);
        let err = registry.inject(id, vec![1]).await.unwrap_err();
        assert_eq!(err, RegistryError::Disconnected(id));
    }

    #[test]
    fn test_unregister() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        let id = registry.register("sh".into(), tx);
        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(registry.is_empty());
    }
}
