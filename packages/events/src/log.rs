// ABOUTME: Durable append-only event log, one ordered history per session
// ABOUTME: SQLite-backed implementation with sequence numbers assigned inside the insert

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::Row;
use std::str::FromStr;
use tracing::debug;

use crate::error::{EventError, Result};
use crate::locks::SessionLocks;
use crate::types::{Event, EventPayload};

/// Ordered, durable storage of session events
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append an event, assigning the next sequence number for the session.
    /// Returns only after the event is persisted.
    async fn append(&self, session_id: &str, payload: &EventPayload) -> Result<Event>;

    /// Full history in append order; empty for unknown sessions
    async fn replay(&self, session_id: &str) -> Result<Vec<Event>> {
        self.replay_after(session_id, 0).await
    }

    /// Events with `seq > after_seq`, in append order
    async fn replay_after(&self, session_id: &str, after_seq: u64) -> Result<Vec<Event>>;

    /// Drop the session's history so numbering starts again at 1
    async fn clear(&self, session_id: &str) -> Result<()>;
}

pub struct SqliteEventLog {
    pool: SqlitePool,
    appends: SessionLocks,
}

impl SqliteEventLog {
    /// Open (creating if needed) the database at `url` and run migrations
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::new(pool).await
    }

    /// Private in-memory database, mostly for tests
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // A single long-lived connection keeps the in-memory database alive
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::new(pool).await
    }

    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self {
            pool,
            appends: SessionLocks::default(),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn row_to_event(session_id: &str, row: &sqlx::sqlite::SqliteRow) -> Result<Event> {
        let seq: i64 = row.try_get("seq")?;
        let payload: String = row.try_get("payload")?;
        let created_at: String = row.try_get("created_at")?;

        let corrupt = |reason: String| EventError::CorruptRecord {
            session_id: session_id.to_string(),
            seq,
            reason,
        };

        let payload: EventPayload =
            serde_json::from_str(&payload).map_err(|e| corrupt(e.to_string()))?;
        let timestamp = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| corrupt(e.to_string()))?
            .with_timezone(&Utc);
        let seq = u64::try_from(seq).map_err(|e| corrupt(e.to_string()))?;

        Ok(Event {
            seq,
            timestamp,
            payload,
        })
    }
}

#[async_trait]
impl EventLog for SqliteEventLog {
    async fn append(&self, session_id: &str, payload: &EventPayload) -> Result<Event> {
        let _guard = self.appends.lock(session_id).await;

        let timestamp = Utc::now();
        let body = serde_json::to_string(payload)?;

        let row = sqlx::query(
            r#"
            INSERT INTO session_events (session_id, seq, kind, payload, created_at)
            VALUES (
                ?,
                (SELECT COALESCE(MAX(seq), 0) + 1 FROM session_events WHERE session_id = ?),
                ?, ?, ?
            )
            RETURNING seq
            "#,
        )
        .bind(session_id)
        .bind(session_id)
        .bind(payload.kind().as_str())
        .bind(&body)
        .bind(timestamp.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        let seq: i64 = row.try_get("seq")?;
        let seq = u64::try_from(seq).map_err(|e| EventError::CorruptRecord {
            session_id: session_id.to_string(),
            seq,
            reason: e.to_string(),
        })?;

        debug!(
            "Appended {} event seq={} for session {}",
            payload.kind().as_str(),
            seq,
            session_id
        );

        Ok(Event {
            seq,
            timestamp,
            payload: payload.clone(),
        })
    }

    async fn replay_after(&self, session_id: &str, after_seq: u64) -> Result<Vec<Event>> {
        let after = i64::try_from(after_seq).unwrap_or(i64::MAX);

        let rows = sqlx::query(
            r#"
            SELECT seq, payload, created_at
            FROM session_events
            WHERE session_id = ? AND seq > ?
            ORDER BY seq ASC
            "#,
        )
        .bind(session_id)
        .bind(after)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Self::row_to_event(session_id, row))
            .collect()
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        let _guard = self.appends.lock(session_id).await;

        let result = sqlx::query("DELETE FROM session_events WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        debug!(
            "Cleared {} events for session {}",
            result.rows_affected(),
            session_id
        );
        Ok(())
    }
}
