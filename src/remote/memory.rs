use super::{BucketAddress, ObjectStore, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// In-process object store (for testing), the remote-side analogue of
/// [`crate::queue::DuckDbQueue::in_memory`].
#[derive(Default)]
pub struct MemoryObjectStore {
    buckets: Mutex<HashMap<String, String>>,
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    fail_puts: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `put_object` fail with a timeout, simulating a
    /// transient store outage.
    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn resolve_or_create_bucket(&self, alias: &str) -> Result<BucketAddress, StoreError> {
        let mut buckets = self.buckets.lock().unwrap();
        let address = buckets
            .entry(alias.to_string())
            .or_insert_with(|| format!("mem-{}", Uuid::new_v4()))
            .clone();
        Ok(BucketAddress(address))
    }

    async fn put_object(
        &self,
        bucket: &BucketAddress,
        key: &str,
        bytes: Vec<u8>,
        overwrite: bool,
    ) -> Result<(), StoreError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StoreError::Timeout {
                operation: "put object",
                timeout: std::time::Duration::from_secs(30),
            });
        }

        let mut objects = self.objects.lock().unwrap();
        let entry = (bucket.0.clone(), key.to_string());
        if !overwrite && objects.contains_key(&entry) {
            return Err(StoreError::KeyExists(key.to_string()));
        }
        objects.insert(entry, bytes);
        Ok(())
    }

    async fn get_object(
        &self,
        bucket: &BucketAddress,
        key: &str,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let objects = self.objects.lock().unwrap();
        Ok(objects.get(&(bucket.0.clone(), key.to_string())).cloned())
    }

    async fn list_objects(
        &self,
        bucket: &BucketAddress,
        prefix: &str,
    ) -> Result<Vec<String>, StoreError> {
        let objects = self.objects.lock().unwrap();
        let mut keys: Vec<String> = objects
            .keys()
            .filter(|(b, k)| b == &bucket.0 && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
