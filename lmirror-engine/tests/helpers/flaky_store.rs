//! Session store with injectable save failures

use async_trait::async_trait;
use lmirror_common::models::{PracticeSession, RecentSession, SessionKey};
use lmirror_engine::error::StoreError;
use lmirror_engine::session_store::{MemorySessionStore, SessionStore};
use std::sync::atomic::{AtomicU32, Ordering};
use uuid::Uuid;

#[derive(Default)]
pub struct FlakyStore {
    inner: MemorySessionStore,
    failures_left: AtomicU32,
    attempts: AtomicU32,
    failed: AtomicU32,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` saves fail
    pub fn fail_next_saves(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn save_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn failed_saves(&self) -> u32 {
        self.failed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionStore for FlakyStore {
    async fn load(&self, key: &SessionKey) -> Result<Option<PracticeSession>, StoreError> {
        self.inner.load(key).await
    }

    async fn save(&self, session: &mut PracticeSession) -> Result<(), StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            self.failed.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Persistence("injected failure".to_string()));
        }
        self.inner.save(session).await
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<RecentSession>, StoreError> {
        self.inner.list_recent(limit).await
    }

    async fn delete(&self, session_id: Uuid) -> Result<bool, StoreError> {
        self.inner.delete(session_id).await
    }
}
