use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use super::{Session, SessionError, SessionPhase};

pub type SessionHandle = Arc<Mutex<Session>>;

const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct Entry {
    handle: SessionHandle,
    last_seen: Instant,
}

/// In-memory registry of live sessions. Nothing is persisted; a restart
/// starts everyone over, and sessions left alone past the TTL are dropped.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, Entry>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self) -> (Uuid, SessionHandle) {
        let id = Uuid::new_v4();
        let handle = Arc::new(Mutex::new(Session::new(id)));
        self.sessions.write().await.insert(
            id,
            Entry {
                handle: handle.clone(),
                last_seen: Instant::now(),
            },
        );
        info!(session_id = %id, "Session created");
        (id, handle)
    }

    /// Look a session up and mark it as seen
    pub async fn get(&self, id: Uuid) -> Result<SessionHandle, SessionError> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        entry.last_seen = Instant::now();
        Ok(entry.handle.clone())
    }

    pub async fn remove(&self, id: Uuid) -> Result<(), SessionError> {
        match self.sessions.write().await.remove(&id) {
            Some(_) => {
                info!(session_id = %id, "Session removed");
                Ok(())
            }
            None => Err(SessionError::NotFound(id)),
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drop sessions not seen within `ttl`
    pub async fn evict_idle(&self, ttl: Duration) -> usize {
        self.evict_expired(ttl, Instant::now()).await
    }

    /// Drop sessions whose last use is more than `ttl` before `now`. Sessions
    /// in the middle of a request are kept.
    pub async fn evict_expired(&self, ttl: Duration, now: Instant) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|id, entry| {
            if now.saturating_duration_since(entry.last_seen) < ttl {
                return true;
            }
            let busy = match entry.handle.try_lock() {
                Ok(session) => session.phase() == SessionPhase::Invoking,
                Err(_) => true,
            };
            if !busy {
                debug!(session_id = %id, "Evicting idle session");
            }
            busy
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted, remaining = sessions.len(), "Evicted idle sessions");
        }
        evicted
    }

    /// Sweep idle sessions in the background for the life of the process
    pub fn spawn_sweeper(&self, ttl: Duration) -> JoinHandle<()> {
        let store = self.clone();
        let every = ttl.clamp(Duration::from_secs(1), MAX_SWEEP_INTERVAL);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                store.evict_idle(ttl).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_get_remove() {
        let store = SessionStore::new();
        let (id, _) = store.create().await;
        assert_eq!(store.len().await, 1);

        let handle = store.get(id).await.unwrap();
        assert_eq!(handle.lock().await.id(), id);

        store.remove(id).await.unwrap();
        assert!(matches!(store.get(id).await, Err(SessionError::NotFound(_))));
        assert!(store.remove(id).await.is_err());
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let store = SessionStore::new();
        let (a, _) = store.create().await;
        let (b, _) = store.create().await;
        assert_ne!(a, b);
        store.remove(a).await.unwrap();
        assert!(store.get(b).await.is_ok());
    }

    #[tokio::test]
    async fn test_idle_sessions_are_evicted() {
        let store = SessionStore::new();
        let ttl = Duration::from_secs(60);
        let (idle, _) = store.create().await;
        let (locked, handle) = store.create().await;

        assert_eq!(store.evict_idle(ttl).await, 0);
        assert_eq!(store.len().await, 2);

        // A session whose lock is held counts as in use
        let guard = handle.lock().await;
        let later = Instant::now() + ttl + Duration::from_secs(1);
        assert_eq!(store.evict_expired(ttl, later).await, 1);
        assert!(matches!(store.get(idle).await, Err(SessionError::NotFound(_))));
        drop(guard);

        assert!(store.get(locked).await.is_ok());
        let later = Instant::now() + ttl + Duration::from_secs(1);
        assert_eq!(store.evict_expired(ttl, later).await, 1);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_lookup_refreshes_last_seen() {
        let store = SessionStore::new();
        let ttl = Duration::from_secs(60);
        let (id, _) = store.create().await;

        let just_inside = Instant::now() + ttl - Duration::from_secs(5);
        assert_eq!(store.evict_expired(ttl, just_inside).await, 0);
        store.get(id).await.unwrap();
        assert_eq!(store.evict_expired(ttl, Instant::now()).await, 0);
        assert_eq!(store.len().await, 1);
    }
}
