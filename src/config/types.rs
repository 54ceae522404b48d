use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub remote: RemoteConfig,
    pub sync: SyncConfig,
    pub storage: StorageConfig,
}

/// Connection settings for the remote object store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub endpoint: String,
    /// Bearer token identifying the writer. Required: without an identity the
    /// store cannot resolve which buckets are visible to us.
    pub token: String,
    #[serde(default = "default_metadata_timeout", with = "duration_format")]
    pub metadata_timeout: Duration,
    #[serde(default = "default_object_timeout", with = "duration_format")]
    pub object_timeout: Duration,
}

fn default_metadata_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_object_timeout() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub bucket_alias: String,
    pub key_prefix: String,
    #[serde(default = "default_record_type")]
    pub record_type: String,
    #[serde(default = "default_interval", with = "duration_format")]
    pub interval: Duration,
    #[serde(default = "default_batch_size_kb")]
    pub batch_size_kb: usize,
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
}

fn default_record_type() -> String {
    "reasoning".to_string()
}

fn default_interval() -> Duration {
    Duration::from_secs(120)
}

fn default_batch_size_kb() -> usize {
    256
}

fn default_fetch_limit() -> usize {
    1000
}

impl SyncConfig {
    pub fn batch_size_bytes(&self) -> usize {
        self.batch_size_kb * 1024
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub path: PathBuf,
}

// Custom serde module for duration parsing ("500ms", "30s", "2m", "1h")
pub(crate) mod duration_format {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty duration string".to_string());
        }

        let (value_str, unit) = if s.ends_with("ms") {
            (&s[..s.len() - 2], "ms")
        } else if s.ends_with('s') {
            (&s[..s.len() - 1], "s")
        } else if s.ends_with('m') {
            (&s[..s.len() - 1], "m")
        } else if s.ends_with('h') {
            (&s[..s.len() - 1], "h")
        } else {
            return Err(format!("invalid duration format: {}", s));
        };

        let value: u64 = value_str
            .parse()
            .map_err(|_| format!("invalid numeric value: {}", value_str))?;

        let duration = match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3600),
            _ => return Err(format!("unknown unit: {}", unit)),
        };

        Ok(duration)
    }

    fn format_duration(d: Duration) -> String {
        let secs = d.as_secs();
        if secs % 3600 == 0 && secs > 0 {
            format!("{}h", secs / 3600)
        } else if secs % 60 == 0 && secs > 0 {
            format!("{}m", secs / 60)
        } else if secs > 0 {
            format!("{}s", secs)
        } else {
            format!("{}ms", d.as_millis())
        }
    }
}
