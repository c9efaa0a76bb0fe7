//! Session store that journals saves against bus emissions
//!
//! Holds its own subscription to the scheduler's bus. Every save first moves
//! the events already published into the journal, then appends the saved
//! state, so the journal reflects the real order of writes and emissions.

use async_trait::async_trait;
use lmirror_common::events::{EventBus, PracticeEvent};
use lmirror_common::models::{PracticeSession, RecentSession, SessionKey};
use lmirror_engine::error::StoreError;
use lmirror_engine::session_store::{MemorySessionStore, SessionStore};
use std::sync::Mutex;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum JournalEntry {
    Saved(PracticeSession),
    Emitted(PracticeEvent),
}

pub struct JournalStore {
    inner: MemorySessionStore,
    observer: Mutex<broadcast::Receiver<PracticeEvent>>,
    journal: Mutex<Vec<JournalEntry>>,
}

impl JournalStore {
    pub fn new(bus: &EventBus) -> Self {
        Self {
            inner: MemorySessionStore::new(),
            observer: Mutex::new(bus.subscribe()),
            journal: Mutex::new(Vec::new()),
        }
    }

    fn pull_emitted(&self) {
        let mut observer = self.observer.lock().unwrap();
        let mut journal = self.journal.lock().unwrap();
        while let Ok(event) = observer.try_recv() {
            journal.push(JournalEntry::Emitted(event));
        }
    }

    /// Journal so far, including events published since the last save
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.pull_emitted();
        self.journal.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionStore for JournalStore {
    async fn load(&self, key: &SessionKey) -> Result<Option<PracticeSession>, StoreError> {
        self.inner.load(key).await
    }

    async fn save(&self, session: &mut PracticeSession) -> Result<(), StoreError> {
        self.pull_emitted();
        self.inner.save(session).await?;
        self.journal
            .lock()
            .unwrap()
            .push(JournalEntry::Saved(session.clone()));
        Ok(())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<RecentSession>, StoreError> {
        self.inner.list_recent(limit).await
    }

    async fn delete(&self, session_id: Uuid) -> Result<bool, StoreError> {
        self.inner.delete(session_id).await
    }
}
