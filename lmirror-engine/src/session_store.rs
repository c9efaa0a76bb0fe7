//! Durable, resumable practice state
//!
//! The scheduler talks to a `SessionStore`; production uses
//! `SqliteSessionStore`, tests substitute in-memory or failing stores.

use crate::db::sessions;
use crate::error::StoreError;
use async_trait::async_trait;
use lmirror_common::models::{Clip, PracticeConfiguration, PracticeSession, RecentSession, SessionKey};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Storage for practice sessions keyed by (pack, track, practice set)
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Most recently updated session for the key
    async fn load(&self, key: &SessionKey) -> Result<Option<PracticeSession>, StoreError>;

    /// Upsert by id, stamping `last_updated_at`
    async fn save(&self, session: &mut PracticeSession) -> Result<(), StoreError>;

    /// Newest first, one entry per (pack, track)
    async fn list_recent(&self, limit: usize) -> Result<Vec<RecentSession>, StoreError>;

    /// Remove a session; `Ok(false)` if it did not exist
    async fn delete(&self, session_id: Uuid) -> Result<bool, StoreError>;

    /// Fresh session for `key`, persisted before it is returned
    async fn create(
        &self,
        clips: &[Clip],
        key: SessionKey,
        config: &PracticeConfiguration,
    ) -> Result<PracticeSession, StoreError> {
        let mut session = PracticeSession::create(clips, key, config);
        self.save(&mut session).await?;
        Ok(session)
    }

    /// Load the latest session for `key`, creating one if none exists
    async fn load_or_create(
        &self,
        clips: &[Clip],
        key: SessionKey,
        config: &PracticeConfiguration,
    ) -> Result<PracticeSession, StoreError> {
        match self.load(&key).await? {
            Some(session) => Ok(session),
            None => self.create(clips, key, config).await,
        }
    }
}

/// Stamp `last_updated_at`, never moving it backwards
///
/// Two saves inside the same clock tick still order correctly.
fn touch(session: &mut PracticeSession) {
    let now = lmirror_common::time::now();
    session.last_updated_at = if now > session.last_updated_at {
        now
    } else {
        session.last_updated_at + chrono::Duration::nanoseconds(1)
    };
}

/// SQLite-backed store over the `practice_sessions` table
#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Load by session id
    pub async fn load_by_id(&self, id: Uuid) -> Result<Option<PracticeSession>, StoreError> {
        sessions::load_session(&self.pool, id).await
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn load(&self, key: &SessionKey) -> Result<Option<PracticeSession>, StoreError> {
        sessions::load_latest_session(&self.pool, key).await
    }

    async fn save(&self, session: &mut PracticeSession) -> Result<(), StoreError> {
        touch(session);
        sessions::save_session(&self.pool, session).await?;
        debug!(
            session_id = %session.id,
            clip_index = session.current_clip_index,
            loop_count = session.current_loop_count,
            speed = session.current_speed,
            "Saved practice session"
        );
        Ok(())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<RecentSession>, StoreError> {
        sessions::list_recent_sessions(&self.pool, limit).await
    }

    async fn delete(&self, session_id: Uuid) -> Result<bool, StoreError> {
        sessions::delete_session(&self.pool, session_id).await
    }
}

/// Process-local store
///
/// Used by the command-line driver's `--no-persist` mode and by tests.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<Uuid, PracticeSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, PracticeSession>>, StoreError> {
        self.sessions
            .lock()
            .map_err(|_| StoreError::Persistence("session map poisoned".to_string()))
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, key: &SessionKey) -> Result<Option<PracticeSession>, StoreError> {
        let sessions = self.lock()?;
        Ok(sessions
            .values()
            .filter(|s| s.is_bound_to(key))
            .max_by_key(|s| s.last_updated_at)
            .cloned())
    }

    async fn save(&self, session: &mut PracticeSession) -> Result<(), StoreError> {
        touch(session);
        self.lock()?.insert(session.id, session.clone());
        Ok(())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<RecentSession>, StoreError> {
        let sessions = self.lock()?;
        let mut all: Vec<&PracticeSession> = sessions.values().collect();
        all.sort_by(|a, b| b.last_updated_at.cmp(&a.last_updated_at));

        let mut seen = std::collections::HashSet::new();
        Ok(all
            .into_iter()
            .filter(|s| seen.insert((s.pack_id.clone(), s.track_id.clone())))
            .take(limit)
            .map(|s| RecentSession {
                pack_id: s.pack_id.clone(),
                track_id: s.track_id.clone(),
                practice_set_id: s.practice_set_id.clone(),
                last_updated_at: s.last_updated_at,
            })
            .collect())
    }

    async fn delete(&self, session_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.lock()?.remove(&session_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lmirror_common::models::ClipKind;

    fn key(track: &str) -> SessionKey {
        SessionKey::new("pack-1", track, "set-1")
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemorySessionStore::new();
        let clips = vec![Clip::new(0, 1000, ClipKind::Drill)];
        let config = PracticeConfiguration::default();

        let mut session = store.create(&clips, key("t1"), &config).await.unwrap();
        session.current_loop_count = 2;
        session.record_completed_repeat(clips[0].id);
        store.save(&mut session).await.unwrap();

        let loaded = store.load(&key("t1")).await.unwrap().unwrap();
        assert_eq!(loaded, session);
        assert!(store.load(&key("t2")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_advances_timestamp() {
        let store = MemorySessionStore::new();
        let config = PracticeConfiguration::default();
        let mut session = store.create(&[], key("t1"), &config).await.unwrap();

        let first = session.last_updated_at;
        store.save(&mut session).await.unwrap();
        assert!(session.last_updated_at > first);
    }

    #[tokio::test]
    async fn test_load_or_create_reuses_existing() {
        let store = MemorySessionStore::new();
        let config = PracticeConfiguration::default();

        let created = store.load_or_create(&[], key("t1"), &config).await.unwrap();
        let again = store.load_or_create(&[], key("t1"), &config).await.unwrap();
        assert_eq!(created.id, again.id);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemorySessionStore::new();
        let config = PracticeConfiguration::default();
        let session = store.create(&[], key("t1"), &config).await.unwrap();

        assert!(store.delete(session.id).await.unwrap());
        assert!(!store.delete(session.id).await.unwrap());
        assert!(store.load(&key("t1")).await.unwrap().is_none());
    }
}
