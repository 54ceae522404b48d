use crate::remote::{ObjectStore, StoreError};
use crate::sync::{batch_key_millis, watermark_key, SyncedRecord};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error("remote store error: {0}")]
    Store(#[from] StoreError),
}

/// Reconstructs the single chronological record stream from all batch
/// objects stored under `prefix` in the bucket behind `alias`.
///
/// Keys are first sorted by their embedded timestamp; that is only an
/// optimization to read batches in rough order. The correctness guarantee
/// comes from the final stable sort by each record's own `created_at`:
/// deferred-batch merging means later-created records can legitimately land
/// in an earlier-flushed batch.
///
/// Best effort on corrupt data: an unparsable line is skipped with a logged
/// error and the rest of its batch continues.
pub async fn retrieve_ordered(
    store: &dyn ObjectStore,
    alias: &str,
    prefix: &str,
) -> Result<Vec<SyncedRecord>, RetrieveError> {
    let bucket = store.resolve_or_create_bucket(alias).await?;

    let watermark = watermark_key(prefix);
    let mut batch_keys: Vec<(i64, String)> = Vec::new();
    for key in store.list_objects(&bucket, prefix).await? {
        if key == watermark {
            continue;
        }
        match batch_key_millis(prefix, &key) {
            Some(millis) => batch_keys.push((millis, key)),
            None => {
                warn!(bucket = %alias, key = %key, "Ignoring object without a batch timestamp");
            }
        }
    }
    batch_keys.sort();

    debug!(bucket = %alias, batches = batch_keys.len(), "Reconstructing record stream");

    let mut records = Vec::new();
    for (_, key) in &batch_keys {
        let bytes = match store.get_object(&bucket, key).await? {
            Some(bytes) => bytes,
            None => {
                // Listed but gone by the time we read it; nothing to do
                warn!(bucket = %alias, key = %key, "Batch object listed but absent");
                continue;
            }
        };

        let body = String::from_utf8_lossy(&bytes);
        let mut skipped = 0usize;
        for line in body.lines() {
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<SyncedRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    skipped += 1;
                    warn!(
                        bucket = %alias,
                        key = %key,
                        error = %e,
                        "Skipping unparsable batch line"
                    );
                }
            }
        }
        if skipped > 0 {
            warn!(bucket = %alias, key = %key, skipped = skipped, "Batch partially unparsable");
        }
    }

    // Stable, so records with equal timestamps keep batch order
    records.sort_by_key(|r| r.created_at);

    Ok(records)
}
