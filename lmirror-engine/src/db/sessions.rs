//! Practice session database operations
//!
//! One row per session in `practice_sessions`. Play counts are stored as a
//! JSON object keyed by clip id.

use crate::db::retry::SESSION_WRITES;
use crate::error::StoreError;
use lmirror_common::models::{PracticeSession, RecentSession, SessionKey};
use lmirror_common::time::{parse_db_timestamp, to_db_timestamp};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use uuid::Uuid;

type Result<T> = std::result::Result<T, StoreError>;

const SESSION_COLUMNS: &str = "id, pack_id, track_id, practice_set_id, current_clip_index, \
     current_loop_count, current_speed, clip_play_counts, forever_mode, created_at, last_updated_at";

/// Insert or update a session by id
///
/// Retries while another connection holds the write lock.
pub async fn save_session(pool: &SqlitePool, session: &PracticeSession) -> Result<()> {
    // Prepare all data before touching the database
    let id = session.id.to_string();
    let play_counts = serde_json::to_string(&session.clip_play_counts)
        .map_err(|e| StoreError::Persistence(format!("Failed to serialize play counts: {}", e)))?;
    let created_at = to_db_timestamp(&session.created_at);
    let last_updated_at = to_db_timestamp(&session.last_updated_at);
    let clip_index = session.current_clip_index as i64;
    let loop_count = session.current_loop_count as i64;
    let speed = session.current_speed as f64;

    SESSION_WRITES.run("save_session", || async {
        sqlx::query(
            r#"
            INSERT INTO practice_sessions (
                id, pack_id, track_id, practice_set_id,
                current_clip_index, current_loop_count, current_speed,
                clip_play_counts, forever_mode, created_at, last_updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                current_clip_index = excluded.current_clip_index,
                current_loop_count = excluded.current_loop_count,
                current_speed = excluded.current_speed,
                clip_play_counts = excluded.clip_play_counts,
                forever_mode = excluded.forever_mode,
                last_updated_at = excluded.last_updated_at
            "#,
        )
        .bind(&id)
        .bind(&session.pack_id)
        .bind(&session.track_id)
        .bind(&session.practice_set_id)
        .bind(clip_index)
        .bind(loop_count)
        .bind(speed)
        .bind(&play_counts)
        .bind(session.forever_mode)
        .bind(&created_at)
        .bind(&last_updated_at)
        .execute(pool)
        .await?;

        Ok(())
    })
    .await?;

    Ok(())
}

/// Most recently updated session for a (pack, track, practice set)
pub async fn load_latest_session(
    pool: &SqlitePool,
    key: &SessionKey,
) -> Result<Option<PracticeSession>> {
    let query = format!(
        "SELECT {} FROM practice_sessions \
         WHERE pack_id = ? AND track_id = ? AND practice_set_id = ? \
         ORDER BY last_updated_at DESC LIMIT 1",
        SESSION_COLUMNS
    );

    let row = sqlx::query(&query)
        .bind(&key.pack_id)
        .bind(&key.track_id)
        .bind(&key.practice_set_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(session_from_row).transpose()
}

/// Load a session by id
pub async fn load_session(pool: &SqlitePool, id: Uuid) -> Result<Option<PracticeSession>> {
    let query = format!("SELECT {} FROM practice_sessions WHERE id = ?", SESSION_COLUMNS);

    let row = sqlx::query(&query)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(session_from_row).transpose()
}

/// Newest first, one row per (pack, track)
pub async fn list_recent_sessions(pool: &SqlitePool, limit: usize) -> Result<Vec<RecentSession>> {
    let rows = sqlx::query(
        "SELECT pack_id, track_id, practice_set_id, last_updated_at \
         FROM practice_sessions ORDER BY last_updated_at DESC",
    )
    .fetch_all(pool)
    .await?;

    let mut seen = HashSet::new();
    let mut recent = Vec::new();

    for row in rows {
        if recent.len() >= limit {
            break;
        }
        let pack_id: String = row.try_get("pack_id")?;
        let track_id: String = row.try_get("track_id")?;
        if !seen.insert((pack_id.clone(), track_id.clone())) {
            continue;
        }

        let updated: String = row.try_get("last_updated_at")?;
        let last_updated_at = parse_db_timestamp(&updated).map_err(|e| StoreError::Corrupt {
            id: format!("{}/{}", pack_id, track_id),
            reason: format!("Failed to parse last_updated_at: {}", e),
        })?;

        recent.push(RecentSession {
            pack_id,
            track_id,
            practice_set_id: row.try_get("practice_set_id")?,
            last_updated_at,
        });
    }

    Ok(recent)
}

/// Delete a session, returning whether a row was removed
pub async fn delete_session(pool: &SqlitePool, id: Uuid) -> Result<bool> {
    let result = SESSION_WRITES.run("delete_session", || async {
        sqlx::query("DELETE FROM practice_sessions WHERE id = ?")
            .bind(id.to_string())
            .execute(pool)
            .await
    })
    .await?;

    Ok(result.rows_affected() > 0)
}

fn session_from_row(row: &SqliteRow) -> Result<PracticeSession> {
    let id_str: String = row.try_get("id")?;
    let corrupt = |reason: String| StoreError::Corrupt {
        id: id_str.clone(),
        reason,
    };

    let id = Uuid::parse_str(&id_str).map_err(|e| corrupt(format!("Invalid id: {}", e)))?;

    let play_counts: String = row.try_get("clip_play_counts")?;
    let clip_play_counts = serde_json::from_str(&play_counts)
        .map_err(|e| corrupt(format!("Failed to deserialize play counts: {}", e)))?;

    let created_at: String = row.try_get("created_at")?;
    let created_at = parse_db_timestamp(&created_at)
        .map_err(|e| corrupt(format!("Failed to parse created_at: {}", e)))?;

    let last_updated_at: String = row.try_get("last_updated_at")?;
    let last_updated_at = parse_db_timestamp(&last_updated_at)
        .map_err(|e| corrupt(format!("Failed to parse last_updated_at: {}", e)))?;

    let clip_index: i64 = row.try_get("current_clip_index")?;
    let loop_count: i64 = row.try_get("current_loop_count")?;
    let speed: f64 = row.try_get("current_speed")?;

    Ok(PracticeSession {
        id,
        pack_id: row.try_get("pack_id")?,
        track_id: row.try_get("track_id")?,
        practice_set_id: row.try_get("practice_set_id")?,
        current_clip_index: clip_index.max(0) as usize,
        current_loop_count: loop_count.max(0) as u32,
        current_speed: speed as f32,
        clip_play_counts,
        forever_mode: row.try_get("forever_mode")?,
        created_at,
        last_updated_at,
    })
}
