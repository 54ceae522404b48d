use super::{LogRecord, QueueError, RecordQueue};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use duckdb::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// DuckDB implementation of the record queue.
///
/// The connection is shared behind a mutex and every call hops to a blocking
/// thread; DuckDB itself is synchronous.
pub struct DuckDbQueue {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbQueue {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, QueueError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| QueueError::Generic(format!("create queue dir: {}", e)))?;
            }
        }

        let conn = Connection::open(path.as_ref())?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory queue (for testing)
    pub fn in_memory() -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn micros_to_datetime(micros: i64) -> DateTime<Utc> {
    Utc.timestamp_micros(micros).single().unwrap_or_default()
}

#[async_trait]
impl RecordQueue for DuckDbQueue {
    async fn init_schema(&self) -> Result<(), QueueError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            conn.execute(
                "CREATE TABLE IF NOT EXISTS log_records (
                    id UUID PRIMARY KEY,
                    created_at TIMESTAMPTZ NOT NULL,
                    record_type VARCHAR NOT NULL,
                    body VARCHAR NOT NULL
                )",
                [],
            )?;

            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_log_records_created_at
                 ON log_records(created_at)",
                [],
            )?;

            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_log_records_type
                 ON log_records(record_type)",
                [],
            )?;

            Ok::<(), QueueError>(())
        })
        .await
        .map_err(|e| QueueError::Generic(format!("task join error: {}", e)))?
    }

    async fn enqueue(&self, record: &LogRecord) -> Result<(), QueueError> {
        let conn = self.conn.clone();
        let record = record.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute(
                "INSERT INTO log_records (id, created_at, record_type, body)
                 VALUES (?, to_timestamp(? / 1000000.0), ?, ?)",
                duckdb::params![
                    record.id.to_string(),
                    record.created_at.timestamp_micros(),
                    record.record_type,
                    record.body,
                ],
            )?;

            Ok::<(), QueueError>(())
        })
        .await
        .map_err(|e| QueueError::Generic(format!("task join error: {}", e)))?
    }

    async fn fetch_unsynced(
        &self,
        record_type: &str,
        after: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<LogRecord>, QueueError> {
        let conn = self.conn.clone();
        let record_type = record_type.to_string();
        // Epoch lower bound stands in for "no cursor yet"
        let after_micros = after.map(|ts| ts.timestamp_micros()).unwrap_or(i64::MIN);

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT id, epoch_us(created_at), record_type, body
                 FROM log_records
                 WHERE record_type = ? AND epoch_us(created_at) > ?
                 ORDER BY created_at ASC
                 LIMIT ?",
            )?;

            let mut rows = stmt.query(duckdb::params![
                record_type,
                after_micros,
                limit as i64
            ])?;

            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                let id_str: String = row.get(0)?;
                let id = Uuid::parse_str(&id_str).map_err(|e| {
                    duckdb::Error::FromSqlConversionFailure(
                        0,
                        duckdb::types::Type::Text,
                        Box::new(e),
                    )
                })?;

                records.push(LogRecord {
                    id,
                    created_at: micros_to_datetime(row.get::<_, i64>(1)?),
                    record_type: row.get(2)?,
                    body: row.get(3)?,
                });
            }

            Ok::<Vec<LogRecord>, QueueError>(records)
        })
        .await
        .map_err(|e| QueueError::Generic(format!("task join error: {}", e)))?
    }

    async fn purge_synced(
        &self,
        record_type: &str,
        before: DateTime<Utc>,
    ) -> Result<usize, QueueError> {
        let conn = self.conn.clone();
        let record_type = record_type.to_string();
        let before_micros = before.timestamp_micros();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let removed = conn.execute(
                "DELETE FROM log_records
                 WHERE record_type = ? AND epoch_us(created_at) <= ?",
                duckdb::params![record_type, before_micros],
            )?;

            Ok::<usize, QueueError>(removed)
        })
        .await
        .map_err(|e| QueueError::Generic(format!("task join error: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::RecordBody;
    use chrono::TimeZone;

    fn body(text: &str) -> RecordBody {
        RecordBody {
            actor_id: "actor-1".to_string(),
            agent_id: "agent-1".to_string(),
            source_text: text.to_string(),
            log_text: format!("derived: {}", text),
        }
    }

    fn record_at(secs: i64, record_type: &str) -> LogRecord {
        LogRecord {
            id: Uuid::new_v4(),
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
            record_type: record_type.to_string(),
            body: serde_json::to_string(&body("hello")).unwrap(),
        }
    }

    async fn setup() -> DuckDbQueue {
        let queue = DuckDbQueue::in_memory().unwrap();
        queue.init_schema().await.unwrap();
        queue
    }

    #[tokio::test]
    async fn test_enqueue_and_fetch_ordered() {
        let queue = setup().await;

        // Insert out of order; fetch must come back ascending by created_at
        queue.enqueue(&record_at(300, "reasoning")).await.unwrap();
        queue.enqueue(&record_at(100, "reasoning")).await.unwrap();
        queue.enqueue(&record_at(200, "reasoning")).await.unwrap();

        let records = queue
            .fetch_unsynced("reasoning", None, 1000)
            .await
            .unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].created_at.timestamp(), 100);
        assert_eq!(records[1].created_at.timestamp(), 200);
        assert_eq!(records[2].created_at.timestamp(), 300);
    }

    #[tokio::test]
    async fn test_fetch_respects_cursor() {
        let queue = setup().await;

        queue.enqueue(&record_at(100, "reasoning")).await.unwrap();
        queue.enqueue(&record_at(200, "reasoning")).await.unwrap();
        queue.enqueue(&record_at(300, "reasoning")).await.unwrap();

        let cursor = Utc.timestamp_opt(100, 0).unwrap();
        let records = queue
            .fetch_unsynced("reasoning", Some(cursor), 1000)
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].created_at.timestamp(), 200);
    }

    #[tokio::test]
    async fn test_fetch_cursor_is_exclusive() {
        let queue = setup().await;

        queue.enqueue(&record_at(100, "reasoning")).await.unwrap();

        let cursor = Utc.timestamp_opt(100, 0).unwrap();
        let records = queue
            .fetch_unsynced("reasoning", Some(cursor), 1000)
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_filters_record_type() {
        let queue = setup().await;

        queue.enqueue(&record_at(100, "reasoning")).await.unwrap();
        queue.enqueue(&record_at(200, "chat")).await.unwrap();

        let records = queue
            .fetch_unsynced("reasoning", None, 1000)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record_type, "reasoning");
    }

    #[tokio::test]
    async fn test_fetch_respects_limit() {
        let queue = setup().await;

        for i in 0..10 {
            queue
                .enqueue(&record_at(100 + i, "reasoning"))
                .await
                .unwrap();
        }

        let records = queue.fetch_unsynced("reasoning", None, 3).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].created_at.timestamp(), 100);
        assert_eq!(records[2].created_at.timestamp(), 102);
    }

    #[tokio::test]
    async fn test_fetch_has_no_side_effects() {
        let queue = setup().await;

        queue.enqueue(&record_at(100, "reasoning")).await.unwrap();

        let first = queue.fetch_unsynced("reasoning", None, 1000).await.unwrap();
        let second = queue.fetch_unsynced("reasoning", None, 1000).await.unwrap();
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].id, second[0].id);
    }

    #[tokio::test]
    async fn test_purge_synced_removes_old_records() {
        let queue = setup().await;

        queue.enqueue(&record_at(100, "reasoning")).await.unwrap();
        queue.enqueue(&record_at(200, "reasoning")).await.unwrap();
        queue.enqueue(&record_at(300, "reasoning")).await.unwrap();

        let removed = queue
            .purge_synced("reasoning", Utc.timestamp_opt(200, 0).unwrap())
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let remaining = queue.fetch_unsynced("reasoning", None, 1000).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].created_at.timestamp(), 300);
    }

    #[tokio::test]
    async fn test_body_round_trips() {
        let queue = setup().await;

        let record = LogRecord::new("reasoning", &body("original text"));
        queue.enqueue(&record).await.unwrap();

        let fetched = queue.fetch_unsynced("reasoning", None, 1).await.unwrap();
        let parsed: RecordBody = serde_json::from_str(&fetched[0].body).unwrap();
        assert_eq!(parsed.source_text, "original text");
    }

    #[tokio::test]
    async fn test_on_disk_queue_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");

        {
            let queue = DuckDbQueue::new(&path).unwrap();
            queue.init_schema().await.unwrap();
            queue.enqueue(&record_at(100, "reasoning")).await.unwrap();
        }

        let queue = DuckDbQueue::new(&path).unwrap();
        queue.init_schema().await.unwrap();
        let records = queue.fetch_unsynced("reasoning", None, 1000).await.unwrap();
        assert_eq!(records.len(), 1);
    }
}
