pub mod batch;
pub mod runner;
pub mod watermark;

pub use runner::{run_scheduler, CycleOutcome, CycleSummary, SyncEngine, SyncError};
pub use watermark::SyncWatermark;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wire projection of a log record: one JSON object per line inside a batch
/// object. `created_at` travels with the projection because it is the sole
/// ordering key during retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedRecord {
    pub actor_id: String,
    pub agent_id: String,
    pub source_text: String,
    pub log_text: String,
    pub created_at: DateTime<Utc>,
}

/// Description of an accumulated-but-unshipped partial batch, persisted with
/// the watermark so a restart resumes reading from the latest *processed*
/// point rather than the latest *synced* one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingBatchMeta {
    pub bytes: usize,
    pub records: usize,
    pub last_processed_at: DateTime<Utc>,
}

/// Fixed well-known key suffix for the watermark object, co-located with the
/// batches it describes.
pub const WATERMARK_KEY_SUFFIX: &str = "last_synced_timestamp";

pub const BATCH_EXT: &str = "jsonl";

pub fn watermark_key(prefix: &str) -> String {
    format!("{}{}", prefix, WATERMARK_KEY_SUFFIX)
}

/// Batch object key: `<prefix><unix-millis>-<writer>.jsonl`. The leading
/// millis field gives the coarse, batch-level retrieval order; the writer id
/// keeps keys unique when multiple processes share a bucket alias.
pub fn batch_key(prefix: &str, millis: i64, writer_id: &str) -> String {
    format!("{}{}-{}.{}", prefix, millis, writer_id, BATCH_EXT)
}

/// Parses the unix-millis timestamp embedded in a batch key. Returns None for
/// keys that do not carry one (foreign objects under the same prefix).
pub fn batch_key_millis(prefix: &str, key: &str) -> Option<i64> {
    let rest = key.strip_prefix(prefix)?;
    let digits: &str = rest
        .split(|c: char| !c.is_ascii_digit())
        .next()
        .unwrap_or("");
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_key_round_trip() {
        let key = batch_key("reasoning/", 1756400000123, "host-a");
        assert_eq!(key, "reasoning/1756400000123-host-a.jsonl");
        assert_eq!(batch_key_millis("reasoning/", &key), Some(1756400000123));
    }

    #[test]
    fn test_batch_key_millis_rejects_foreign_keys() {
        assert_eq!(batch_key_millis("reasoning/", "reasoning/notes.txt"), None);
        assert_eq!(batch_key_millis("reasoning/", "other/123.jsonl"), None);
        assert_eq!(
            batch_key_millis("reasoning/", &watermark_key("reasoning/")),
            None
        );
    }
}
