pub mod duckdb;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use duckdb::DuckDbQueue;

/// One locally queued unit of work. `created_at` is set at insertion and is
/// the sole ordering key, both locally and after remote retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub record_type: String,
    /// Opaque payload: structured data serialized to JSON text. Parsed into a
    /// [`RecordBody`] only when the record is projected onto the wire.
    pub body: String,
}

impl LogRecord {
    pub fn new(record_type: impl Into<String>, body: &RecordBody) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            record_type: record_type.into(),
            body: serde_json::to_string(body).expect("record body serialization is infallible"),
        }
    }
}

/// Structured content carried inside a record body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordBody {
    pub actor_id: String,
    pub agent_id: String,
    pub source_text: String,
    pub log_text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] ::duckdb::Error),

    #[error("queue error: {0}")]
    Generic(String),
}

/// Durable local append log; the only source of truth for what has not yet
/// been shipped.
///
/// Sync progress is tracked by an external timestamp cursor, not a per-record
/// flag, so reads have no side effects and the schema never needs a
/// migration when the cursor moves.
#[async_trait]
pub trait RecordQueue: Send + Sync {
    async fn init_schema(&self) -> Result<(), QueueError>;

    /// Appends durably; returns once committed.
    async fn enqueue(&self, record: &LogRecord) -> Result<(), QueueError>;

    /// Returns records of `record_type` with `created_at > after`, ascending
    /// by `created_at`, capped at `limit`.
    async fn fetch_unsynced(
        &self,
        record_type: &str,
        after: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<LogRecord>, QueueError>;

    /// Deletes records of `record_type` with `created_at <= before`. An
    /// operator helper for reclaiming space once records are durably stored
    /// remotely; the engine never calls it on its own.
    async fn purge_synced(
        &self,
        record_type: &str,
        before: DateTime<Utc>,
    ) -> Result<usize, QueueError>;
}
