//! Backoff for SQLite lock contention
//!
//! A practice run and a CLI `recent` listing can hold the same database file
//! at once. Writes that hit "database is locked" wait and try again within a
//! fixed time budget; every other error returns on the first attempt.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How long to keep retrying a locked write, and how to space the attempts
#[derive(Debug, Clone, Copy)]
pub struct LockBackoff {
    pub budget: Duration,
    pub first_delay: Duration,
    pub max_delay: Duration,
}

/// Policy for session saves and deletes
pub const SESSION_WRITES: LockBackoff = LockBackoff {
    budget: Duration::from_secs(2),
    first_delay: Duration::from_millis(10),
    max_delay: Duration::from_millis(500),
};

impl LockBackoff {
    /// Run `write` until it succeeds, fails with a non-lock error, or the
    /// budget is spent. Delays double from `first_delay` up to `max_delay`.
    pub async fn run<F, Fut, T>(&self, label: &str, mut write: F) -> Result<T, sqlx::Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let began = Instant::now();
        let mut delay = self.first_delay;
        let mut tries = 0u32;

        loop {
            tries += 1;
            let err = match write().await {
                Ok(value) => {
                    if tries > 1 {
                        debug!(label, tries, "Locked write went through");
                    }
                    return Ok(value);
                }
                Err(err) if is_locked(&err) => err,
                Err(err) => return Err(err),
            };

            if began.elapsed() >= self.budget {
                warn!(
                    label,
                    tries,
                    budget_ms = self.budget.as_millis() as u64,
                    "Giving up on locked database"
                );
                return Err(err);
            }

            debug!(label, tries, delay_ms = delay.as_millis() as u64, "Database locked");
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(self.max_delay);
        }
    }
}

fn is_locked(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db) = err {
        // SQLITE_BUSY and SQLITE_LOCKED
        if matches!(db.code().as_deref(), Some("5") | Some("6")) {
            return true;
        }
    }
    err.to_string().contains("is locked")
}
