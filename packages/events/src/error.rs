// ABOUTME: Error types for the session event log and hub
// ABOUTME: Wraps storage, migration and JSON failures

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Stored row could not be turned back into an event
    #[error("Corrupt event record for session {session_id} at seq {seq}: {reason}")]
    CorruptRecord {
        session_id: String,
        seq: i64,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, EventError>;
