//! Cache buckets and the storage that holds them.
//!
//! ```text
//! CacheStorage (caches)
//!     └── Cache "fixflow-cache-v1"
//!             └── GET url → CacheEntry
//! ```
//!
//! Storage is either purely in memory or backed by a directory holding one
//! JSON file per bucket. Every mutation is written through before it
//! returns, so a bucket outlives the process that filled it.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use offline_net::{Response, ResponseType};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{Result, ServiceWorkerError};

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers, in order, repeats kept.
    pub headers: Vec<HeaderField>,

    /// Response body.
    #[serde(with = "base64_bytes")]
    pub body: Bytes,

    /// Response type at the time it was stored.
    #[serde(default)]
    pub response_type: ResponseType,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

/// One stored header line. The value keeps its raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderField {
    pub name: String,

    #[serde(with = "base64_bytes")]
    pub value: Bytes,
}

impl CacheEntry {
    /// Snapshot `response` under the identity of the request that produced it.
    pub fn from_response(request_url: &Url, method: &Method, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .map(|(name, value)| HeaderField {
                name: name.as_str().to_string(),
                value: Bytes::copy_from_slice(value.as_bytes()),
            })
            .collect();

        Self {
            url: request_url.to_string(),
            method: method.to_string(),
            status: response.status.as_u16(),
            headers,
            body: response.body.clone(),
            response_type: response.response_type,
            cached_at: now_millis(),
        }
    }

    /// Rebuild the stored response.
    pub fn to_response(&self) -> Result<Response> {
        let url = Url::parse(&self.url)
            .map_err(|e| ServiceWorkerError::CacheError(format!("Stored URL '{}': {}", self.url, e)))?;
        let status = StatusCode::from_u16(self.status).map_err(|e| {
            ServiceWorkerError::CacheError(format!("Stored status {} for {}: {}", self.status, self.url, e))
        })?;

        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for field in &self.headers {
            let name = HeaderName::from_bytes(field.name.as_bytes()).map_err(|e| {
                ServiceWorkerError::CacheError(format!("Stored header '{}': {}", field.name, e))
            })?;
            let value = HeaderValue::from_bytes(&field.value).map_err(|e| {
                ServiceWorkerError::CacheError(format!("Stored value for '{}': {}", field.name, e))
            })?;
            headers.append(name, value);
        }

        let mut response = Response::new(url, status, self.body.clone()).with_type(self.response_type);
        response.headers = headers;
        Ok(response)
    }
}

/// A cache instance.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Cached entries keyed by URL.
    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a GET request by URL.
    pub fn match_request(&self, url: &str) -> Option<&CacheEntry> {
        self.entries.get(url)
    }

    /// Add or overwrite an entry.
    pub fn put(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.url.clone(), entry);
    }

    /// All cached URLs, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(|s| s.as_str()).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Cache storage (caches global).
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
    root: Option<PathBuf>,
}

impl CacheStorage {
    /// Create in-memory cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open directory-backed storage, loading every bucket already on disk.
    pub async fn open_dir(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;

        let mut caches = HashMap::new();
        let mut dir = tokio::fs::read_dir(&root).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let contents = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<Cache>(&contents) {
                Ok(cache) => {
                    trace!(name = %cache.name, entries = cache.len(), "Loaded cache bucket");
                    caches.insert(cache.name.clone(), cache);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable cache bucket"),
            }
        }

        debug!(root = %root.display(), buckets = caches.len(), "Opened cache storage");
        Ok(Self {
            caches,
            root: Some(root),
        })
    }

    /// Directory buckets are persisted to, if any.
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Open a cache, creating it if absent. Returns true if it was created.
    pub async fn open(&mut self, name: &str) -> Result<bool> {
        if self.caches.contains_key(name) {
            return Ok(false);
        }
        let cache = Cache::new(name);
        self.write_bucket(&cache).await?;
        self.caches.insert(name.to_string(), cache);
        Ok(true)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Look up a URL in one bucket.
    pub fn match_in(&self, name: &str, url: &str) -> Option<&CacheEntry> {
        self.caches.get(name).and_then(|c| c.match_request(url))
    }

    /// Store one entry, creating the bucket if needed.
    pub async fn put(&mut self, name: &str, entry: CacheEntry) -> Result<()> {
        self.put_all(name, vec![entry]).await
    }

    /// Store a batch of entries with a single write.
    ///
    /// If the write fails the bucket is left exactly as it was.
    pub async fn put_all(&mut self, name: &str, entries: Vec<CacheEntry>) -> Result<()> {
        let mut updated = self
            .caches
            .get(name)
            .cloned()
            .unwrap_or_else(|| Cache::new(name));
        for entry in entries {
            updated.put(entry);
        }
        self.write_bucket(&updated).await?;
        self.caches.insert(name.to_string(), updated);
        Ok(())
    }

    /// Delete a cache. Returns false if it did not exist.
    pub async fn delete(&mut self, name: &str) -> Result<bool> {
        if !self.caches.contains_key(name) {
            return Ok(false);
        }
        if let Some(path) = self.bucket_path(name) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(ServiceWorkerError::EvictionFailed {
                        name: name.to_string(),
                        reason: e.to_string(),
                    })
                }
            }
        }
        Ok(self.caches.remove(name).is_some())
    }

    /// Get all cache names, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    fn bucket_path(&self, name: &str) -> Option<PathBuf> {
        self.root
            .as_ref()
            .map(|root| root.join(format!("{}.json", urlencoding::encode(name))))
    }

    async fn write_bucket(&self, cache: &Cache) -> Result<()> {
        let Some(path) = self.bucket_path(&cache.name) else {
            return Ok(());
        };
        let data = serde_json::to_vec(cache)
            .map_err(|e| ServiceWorkerError::CacheError(format!("Failed to serialize '{}': {}", cache.name, e)))?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &path).await?;
        trace!(name = %cache.name, path = %path.display(), "Persisted cache bucket");
        Ok(())
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
