pub mod http;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

pub use http::HttpObjectStore;
pub use memory::MemoryObjectStore;

/// Store-assigned bucket address, immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketAddress(pub String);

impl std::fmt::Display for BucketAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store returned error status {status}: {message}")]
    Status { status: u16, message: String },

    /// The call did not complete in time. The outcome is unknown: the
    /// operation may have partially succeeded on the remote side, so this is
    /// never treated as a definitive rejection.
    #[error("timeout after {timeout:?} during {operation}")]
    Timeout {
        operation: &'static str,
        timeout: std::time::Duration,
    },

    #[error("object key already exists: {0}")]
    KeyExists(String),
}

impl StoreError {
    /// True for failures worth retrying on the next sync cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Timeout { .. } | StoreError::Http(_)
        ) || matches!(self, StoreError::Status { status, .. } if *status >= 500)
    }
}

/// Remote append-only object store, addressed by bucket alias.
///
/// All implementations bound every call with a timeout and surface a timeout
/// as [`StoreError::Timeout`] so that callers can apply at-least-once
/// semantics instead of assuming the operation was rejected.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Looks a bucket up by alias among all buckets visible to this identity,
    /// creating one tagged with the alias on first miss. Safe to call
    /// concurrently from multiple processes sharing the alias: a duplicate
    /// create under a race is tolerated because the lookup is re-attempted on
    /// next use.
    async fn resolve_or_create_bucket(&self, alias: &str) -> Result<BucketAddress, StoreError>;

    /// Atomic from the caller's perspective. With `overwrite` false, an
    /// existing key is a [`StoreError::KeyExists`] failure.
    async fn put_object(
        &self,
        bucket: &BucketAddress,
        key: &str,
        bytes: Vec<u8>,
        overwrite: bool,
    ) -> Result<(), StoreError>;

    /// Absent is not an error; a missing object is valid output.
    async fn get_object(
        &self,
        bucket: &BucketAddress,
        key: &str,
    ) -> Result<Option<Vec<u8>>, StoreError>;

    /// Returns all keys sharing `prefix`.
    async fn list_objects(
        &self,
        bucket: &BucketAddress,
        prefix: &str,
    ) -> Result<Vec<String>, StoreError>;
}
