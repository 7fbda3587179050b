//! Cache partition storage: stored responses and pluggable backends.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::Result;

/// A response stored in a cache partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    /// HTTP status code of the original response.
    pub status: u16,
    /// Content type, if the source declared one.
    pub content_type: Option<String>,
    /// Response body.
    #[serde(with = "body_encoding")]
    pub body: Bytes,
}

impl CachedResponse {
    /// Creates a `200 OK` response with the given body.
    #[must_use]
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::with_status(200, body)
    }

    /// Creates a response with an explicit status code.
    #[must_use]
    pub fn with_status(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type: None,
            body: body.into(),
        }
    }

    /// Sets the content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Returns true for 2xx responses. Only successful responses are
    /// eligible for lazy caching.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Base64 body encoding for the JSON persistence form.
mod body_encoding {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(&encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

/// Abstraction over cache partition storage.
///
/// Keys are content-addressed by request path, so concurrent writes to
/// distinct keys never conflict; the last write to the same key wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Looks up a stored response.
    async fn get(&self, partition: &str, key: &str) -> Result<Option<CachedResponse>>;

    /// Stores a response, overwriting any previous entry for the key.
    async fn put(&self, partition: &str, key: &str, response: CachedResponse) -> Result<()>;

    /// Removes a single entry. Returns true if an entry existed.
    async fn delete(&self, partition: &str, key: &str) -> Result<bool>;

    /// Lists the keys currently stored in a partition.
    async fn keys(&self, partition: &str) -> Result<Vec<String>>;

    /// Removes a partition and everything in it. Removing a partition that
    /// does not exist is not an error.
    async fn delete_partition(&self, partition: &str) -> Result<()>;
}

/// In-process store backed by a map, for ephemeral use and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    partitions: RwLock<HashMap<String, HashMap<String, CachedResponse>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, partition: &str, key: &str) -> Result<Option<CachedResponse>> {
        let partitions = self.partitions.read().await;
        Ok(partitions.get(partition).and_then(|p| p.get(key)).cloned())
    }

    async fn put(&self, partition: &str, key: &str, response: CachedResponse) -> Result<()> {
        let mut partitions = self.partitions.write().await;
        partitions
            .entry(partition.to_string())
            .or_default()
            .insert(key.to_string(), response);
        Ok(())
    }

    async fn delete(&self, partition: &str, key: &str) -> Result<bool> {
        let mut partitions = self.partitions.write().await;
        Ok(partitions
            .get_mut(partition)
            .is_some_and(|p| p.remove(key).is_some()))
    }

    async fn keys(&self, partition: &str) -> Result<Vec<String>> {
        let partitions = self.partitions.read().await;
        Ok(partitions
            .get(partition)
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_partition(&self, partition: &str) -> Result<()> {
        let mut partitions = self.partitions.write().await;
        partitions.remove(partition);
        Ok(())
    }
}

/// Durable store with one directory per partition and one JSON file per key.
///
/// File names are the URL-safe base64 encoding of the key, so arbitrary
/// request paths (including `/`) map to flat, portable file names. Writes go
/// through a temp file and rename so a crash never leaves a half-written
/// entry behind.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Creates a store rooted at the given directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn partition_dir(&self, partition: &str) -> PathBuf {
        self.root.join(partition)
    }

    fn entry_path(&self, partition: &str, key: &str) -> PathBuf {
        self.partition_dir(partition)
            .join(format!("{}.json", URL_SAFE_NO_PAD.encode(key)))
    }

    fn decode_entry_name(path: &Path) -> Option<String> {
        let stem = path.file_stem()?.to_str()?;
        let bytes = URL_SAFE_NO_PAD.decode(stem).ok()?;
        String::from_utf8(bytes).ok()
    }
}

#[async_trait]
impl CacheStore for DiskStore {
    async fn get(&self, partition: &str, key: &str) -> Result<Option<CachedResponse>> {
        let path = self.entry_path(partition, key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, partition: &str, key: &str, response: CachedResponse) -> Result<()> {
        let dir = self.partition_dir(partition);
        tokio::fs::create_dir_all(&dir).await?;

        let path = self.entry_path(partition, key);
        // Writer-unique temp name: concurrent puts to the same key must
        // never race each other's rename.
        static TMP_SEQ: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
        let seq = TMP_SEQ.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let tmp_path = path.with_extension(format!("tmp{}-{seq}", std::process::id()));
        let json = serde_json::to_vec(&response)?;
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn delete(&self, partition: &str, key: &str) -> Result<bool> {
        let path = self.entry_path(partition, key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self, partition: &str) -> Result<Vec<String>> {
        let dir = self.partition_dir(partition);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json")
                && let Some(key) = Self::decode_entry_name(&path)
            {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    async fn delete_partition(&self, partition: &str) -> Result<()> {
        let dir = self.partition_dir(partition);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
