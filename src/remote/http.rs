use super::{BucketAddress, ObjectStore, StoreError};
use crate::config::RemoteConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

/// HTTP client for the remote object store.
///
/// Buckets are resolved by an `alias` entry in their metadata; objects are
/// opaque byte bodies under string keys. Every call is wrapped with an
/// explicit timeout so a hung store degrades a sync cycle instead of wedging
/// the scheduler.
#[derive(Debug)]
pub struct HttpObjectStore {
    base_url: String,
    client: reqwest::Client,
    metadata_timeout: Duration,
    object_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BucketInfo {
    address: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
struct CreateBucketRequest {
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ListBucketsResponse {
    buckets: Vec<BucketInfo>,
}

#[derive(Debug, Deserialize)]
struct ListObjectsResponse {
    objects: Vec<ObjectEntry>,
}

#[derive(Debug, Deserialize)]
struct ObjectEntry {
    key: String,
}

impl HttpObjectStore {
    pub fn new(config: &RemoteConfig) -> Result<Self, StoreError> {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut auth = reqwest::header::HeaderValue::from_str(&format!(
            "Bearer {}",
            config.token
        ))
        .map_err(|_| StoreError::Status {
            status: 0,
            message: "remote token contains invalid header characters".to_string(),
        })?;
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);

        let client = reqwest::Client::builder().default_headers(headers).build()?;

        Ok(Self {
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            client,
            metadata_timeout: config.metadata_timeout,
            object_timeout: config.object_timeout,
        })
    }

    async fn bounded<T, F>(
        &self,
        operation: &'static str,
        timeout: Duration,
        fut: F,
    ) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout { operation, timeout }),
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            Err(StoreError::Status { status, message })
        }
    }

    async fn list_buckets(&self) -> Result<Vec<BucketInfo>, StoreError> {
        let url = format!("{}/v1/buckets", self.base_url);
        let response = Self::check_status(self.client.get(&url).send().await?).await?;
        let listing: ListBucketsResponse = response.json().await?;
        Ok(listing.buckets)
    }

    async fn create_bucket(&self, alias: &str) -> Result<BucketInfo, StoreError> {
        let url = format!("{}/v1/buckets", self.base_url);
        let request = CreateBucketRequest {
            metadata: HashMap::from([("alias".to_string(), alias.to_string())]),
        };
        let response =
            Self::check_status(self.client.post(&url).json(&request).send().await?).await?;
        let info: BucketInfo = response.json().await?;
        Ok(info)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn resolve_or_create_bucket(&self, alias: &str) -> Result<BucketAddress, StoreError> {
        let timeout = self.metadata_timeout;
        self.bounded("resolve bucket", timeout, async {
            let buckets = self.list_buckets().await?;
            if let Some(existing) = buckets
                .into_iter()
                .find(|b| b.metadata.get("alias").map(String::as_str) == Some(alias))
            {
                return Ok(BucketAddress(existing.address));
            }

            tracing::info!(alias = %alias, "Bucket not found, creating");
            let created = self.create_bucket(alias).await?;
            Ok(BucketAddress(created.address))
        })
        .await
    }

    async fn put_object(
        &self,
        bucket: &BucketAddress,
        key: &str,
        bytes: Vec<u8>,
        overwrite: bool,
    ) -> Result<(), StoreError> {
        let url = format!(
            "{}/v1/buckets/{}/objects/{}?overwrite={}",
            self.base_url, bucket, key, overwrite
        );
        let timeout = self.object_timeout;
        self.bounded("put object", timeout, async {
            let response = self.client.put(&url).body(bytes).send().await?;
            if response.status() == reqwest::StatusCode::CONFLICT {
                return Err(StoreError::KeyExists(key.to_string()));
            }
            Self::check_status(response).await?;
            Ok(())
        })
        .await
    }

    async fn get_object(
        &self,
        bucket: &BucketAddress,
        key: &str,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let url = format!("{}/v1/buckets/{}/objects/{}", self.base_url, bucket, key);
        let timeout = self.object_timeout;
        self.bounded("get object", timeout, async {
            let response = self.client.get(&url).send().await?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let response = Self::check_status(response).await?;
            let bytes = response.bytes().await?;
            Ok(Some(bytes.to_vec()))
        })
        .await
    }

    async fn list_objects(
        &self,
        bucket: &BucketAddress,
        prefix: &str,
    ) -> Result<Vec<String>, StoreError> {
        let url = format!(
            "{}/v1/buckets/{}/objects?prefix={}",
            self.base_url, bucket, prefix
        );
        let timeout = self.metadata_timeout;
        self.bounded("list objects", timeout, async {
            let response = Self::check_status(self.client.get(&url).send().await?).await?;
            let listing: ListObjectsResponse = response.json().await?;
            Ok(listing.objects.into_iter().map(|o| o.key).collect())
        })
        .await
    }
}
