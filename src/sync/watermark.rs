use super::{watermark_key, PendingBatchMeta};
use crate::remote::{BucketAddress, ObjectStore, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Persisted synchronization progress for one bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncWatermark {
    /// `created_at` of the newest record confirmed durably stored. None until
    /// the first confirmed flush.
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Deferred partial batch, if one was carried out of the last cycle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingBatchMeta>,
}

impl SyncWatermark {
    /// The point to resume reading from: the latest *processed* record when a
    /// partial batch is pending, otherwise the latest *synced* one. Resuming
    /// from the synced cursor alone would re-process records already
    /// buffered.
    pub fn effective_cursor(&self) -> Option<DateTime<Utc>> {
        self.pending
            .as_ref()
            .map(|p| p.last_processed_at)
            .or(self.last_synced_at)
    }
}

/// Stores the watermark as a single object at a fixed well-known key inside
/// the data bucket, so recovery needs no durable store beyond the bucket
/// itself.
pub struct WatermarkStore {
    store: Arc<dyn ObjectStore>,
    bucket: BucketAddress,
    key: String,
    current: SyncWatermark,
}

impl WatermarkStore {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: BucketAddress, key_prefix: &str) -> Self {
        Self {
            store,
            bucket,
            key: watermark_key(key_prefix),
            current: SyncWatermark {
                last_synced_at: None,
                pending: None,
            },
        }
    }

    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        self.current.last_synced_at
    }

    pub fn effective_cursor(&self) -> Option<DateTime<Utc>> {
        self.current.effective_cursor()
    }

    pub fn pending(&self) -> Option<&PendingBatchMeta> {
        self.current.pending.as_ref()
    }

    /// Loads the persisted watermark, once at process start. Absent means a
    /// fresh bucket. A corrupt watermark body is logged and treated as
    /// absent; re-sending already-stored records is acceptable under
    /// at-least-once delivery, losing progress silently is not.
    pub async fn load(&mut self) -> Result<Option<SyncWatermark>, StoreError> {
        let bytes = match self.store.get_object(&self.bucket, &self.key).await? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };

        match serde_json::from_slice::<SyncWatermark>(&bytes) {
            Ok(watermark) => {
                self.current = watermark.clone();
                Ok(Some(watermark))
            }
            Err(e) => {
                tracing::error!(
                    key = %self.key,
                    error = %e,
                    "Watermark object is unparsable, starting from scratch"
                );
                Ok(None)
            }
        }
    }

    /// Advances the cursor after a confirmed flush and persists. Monotonic: a
    /// cursor at or behind the held one is a no-op, so a slow or retried
    /// cycle cannot erase progress made by a faster one. Advancing clears any
    /// pending-batch metadata; the flush it described has been superseded.
    pub async fn advance(&mut self, cursor: DateTime<Utc>) -> Result<bool, StoreError> {
        if let Some(held) = self.current.last_synced_at {
            if cursor <= held {
                tracing::debug!(
                    held = %held,
                    offered = %cursor,
                    "Ignoring non-monotonic watermark advance"
                );
                return Ok(false);
            }
        }

        self.current.last_synced_at = Some(cursor);
        self.current.pending = None;
        self.persist().await?;
        Ok(true)
    }

    /// Pending-tracking update only: records (or clears) deferred-batch
    /// metadata without moving the cursor.
    pub async fn track_pending(
        &mut self,
        pending: Option<PendingBatchMeta>,
    ) -> Result<(), StoreError> {
        if self.current.pending == pending {
            return Ok(());
        }
        self.current.pending = pending;
        self.persist().await
    }

    async fn persist(&self) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(&self.current)?;
        self.store
            .put_object(&self.bucket, &self.key, bytes, true)
            .await?;
        tracing::debug!(
            key = %self.key,
            cursor = ?self.current.last_synced_at,
            pending = ?self.current.pending,
            "Persisted sync watermark"
        );
        Ok(())
    }
}
