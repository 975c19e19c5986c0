use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use kondate_core::types::UserId;

use crate::error::{Result, SessionError};
use crate::types::Session;

/// Thread-safe, in-process session store.
///
/// One lock per session linearizes mutations; different sessions never
/// contend. Persistence is intentionally behind this type: a single-node
/// deployment keeps everything in memory, and the TTL sweep bounds growth.
pub struct SessionStore {
    sessions: DashMap<String, Arc<Mutex<Session>>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    /// Return the existing session or create a fresh one.
    ///
    /// A colliding id owned by a different user is refused; sessions must
    /// not leak across users.
    #[instrument(skip(self), fields(session = %id, user = %user_id))]
    pub async fn get_or_create(&self, id: &str, user_id: &UserId) -> Result<Arc<Mutex<Session>>> {
        if let Some(entry) = self.sessions.get(id) {
            let handle = entry.value().clone();
            drop(entry);
            {
                let mut session = handle.lock().await;
                if session.user_id != *user_id {
                    return Err(SessionError::Ownership { id: id.to_string() });
                }
                session.touch();
            }
            debug!("session hit");
            return Ok(handle);
        }

        let handle = Arc::new(Mutex::new(Session::new(id, user_id.clone())));
        // entry() handles the race where two requests create the same id
        // simultaneously: the loser adopts the winner's session.
        let stored = self
            .sessions
            .entry(id.to_string())
            .or_insert_with(|| handle.clone())
            .value()
            .clone();
        {
            let mut session = stored.lock().await;
            if session.user_id != *user_id {
                return Err(SessionError::Ownership { id: id.to_string() });
            }
            session.touch();
        }
        info!("session created");
        Ok(stored)
    }

    /// Fetch without creating. Ownership is still enforced.
    pub async fn get(&self, id: &str, user_id: &UserId) -> Result<Arc<Mutex<Session>>> {
        let handle = self
            .sessions
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;
        {
            let mut session = handle.lock().await;
            if session.user_id != *user_id {
                return Err(SessionError::Ownership { id: id.to_string() });
            }
            session.touch();
        }
        Ok(handle)
    }

    /// Run a mutator under the session lock.
    pub async fn update<F, T>(&self, id: &str, user_id: &UserId, f: F) -> Result<T>
    where
        F: FnOnce(&mut Session) -> T,
    {
        let handle = self.get(id, user_id).await?;
        let mut session = handle.lock().await;
        let out = f(&mut session);
        session.touch();
        Ok(out)
    }

    /// Remove sessions idle longer than the TTL; returns the evicted ids
    /// so the caller can close their progress streams.
    pub async fn evict_idle(&self, now: DateTime<Utc>) -> Vec<String> {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::hours(1));
        let mut expired = Vec::new();
        for entry in self.sessions.iter() {
            let session = entry.value().lock().await;
            if now - session.last_accessed > ttl {
                expired.push(entry.key().clone());
            }
        }
        for id in &expired {
            self.sessions.remove(id);
            info!(session = %id, "evicted idle session");
        }
        expired
    }

    /// Explicit purge (logout).
    pub fn remove(&self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Stage;

    fn store() -> SessionStore {
        SessionStore::new(Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn creates_then_returns_same_session() {
        let store = store();
        let user = UserId::from("u-1");
        let first = store.get_or_create("s-1", &user).await.unwrap();
        first.lock().await.context.menu_type = "和食".to_string();

        let second = store.get_or_create("s-1", &user).await.unwrap();
        assert_eq!(second.lock().await.context.menu_type, "和食");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn rejects_colliding_id_from_other_user() {
        let store = store();
        store
            .get_or_create("s-1", &UserId::from("alice"))
            .await
            .unwrap();
        let err = store
            .get_or_create("s-1", &UserId::from("bob"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Ownership { .. }));
    }

    #[tokio::test]
    async fn update_mutates_under_lock() {
        let store = store();
        let user = UserId::from("u-1");
        store.get_or_create("s-1", &user).await.unwrap();
        store
            .update("s-1", &user, |s| {
                s.used_ingredients.push("milk".to_string());
            })
            .await
            .unwrap();
        let handle = store.get("s-1", &user).await.unwrap();
        assert_eq!(handle.lock().await.used_ingredients, vec!["milk"]);
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let store = store();
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");
        store.get_or_create("s-a", &alice).await.unwrap();
        store.get_or_create("s-b", &bob).await.unwrap();

        store
            .update("s-a", &alice, |s| s.stage = Stage::Soup)
            .await
            .unwrap();

        let b = store.get("s-b", &bob).await.unwrap();
        assert_eq!(b.lock().await.stage, Stage::Main);
    }

    #[tokio::test]
    async fn evicts_only_idle_sessions() {
        let store = SessionStore::new(Duration::from_secs(60));
        let user = UserId::from("u-1");
        let stale = store.get_or_create("stale", &user).await.unwrap();
        store.get_or_create("fresh", &user).await.unwrap();

        stale.lock().await.last_accessed = Utc::now() - chrono::Duration::seconds(120);

        let evicted = store.evict_idle(Utc::now()).await;
        assert_eq!(evicted, vec!["stale".to_string()]);
        assert_eq!(store.len(), 1);
        assert!(store.get("stale", &user).await.is_err());
    }

    #[tokio::test]
    async fn remove_purges() {
        let store = store();
        let user = UserId::from("u-1");
        store.get_or_create("s-1", &user).await.unwrap();
        assert!(store.remove("s-1"));
        assert!(!store.remove("s-1"));
        assert!(store.is_empty());
    }
}
