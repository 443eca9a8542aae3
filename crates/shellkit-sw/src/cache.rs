//! Cache API: named stores of request → response snapshots.
//!
//! ```text
//! CacheStorage (caches)
//!     └── Cache (one per name, e.g. "shellkit-v1.2.0")
//!             └── RequestKey → CacheEntry { snapshot, cached_at }
//! ```
//!
//! Entries keep their insertion order, which is what the retention policy
//! trims by.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, Method, StatusCode};
use shellkit_common::SharedClock;
use shellkit_net::{Request, Response};
use tokio::sync::RwLock;
use tracing::{debug, trace};
use url::Url;

use crate::CacheError;

// ==================== Keys and entries ====================

/// Request identity: method plus absolute URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(String);

impl RequestKey {
    /// Key for `method` on `url`.
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self(format!("{} {}", method, url))
    }

    /// Key for a GET of `url`.
    pub fn get(url: &Url) -> Self {
        Self::new(&Method::GET, url)
    }

    /// Key for a request.
    pub fn for_request(request: &Request) -> Self {
        Self::new(&request.method, &request.url)
    }

    /// Method part.
    pub fn method(&self) -> &str {
        self.0.split_once(' ').map(|(m, _)| m).unwrap_or_default()
    }

    /// URL part.
    pub fn url(&self) -> Option<Url> {
        self.0
            .split_once(' ')
            .and_then(|(_, url)| Url::parse(url).ok())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stored copy of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSnapshot {
    /// Response status.
    pub status: u16,

    /// Response headers, repeated values included.
    pub headers: HeaderMap,

    /// Response body.
    pub body: Bytes,
}

impl ResponseSnapshot {
    /// Snapshot with no headers.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Capture a network response.
    pub fn from_response(response: &Response) -> Self {
        Self {
            status: response.status.as_u16(),
            headers: response.headers.clone(),
            body: response.body.clone(),
        }
    }

    /// Rebuild a response for `url`.
    pub fn to_response(&self, url: Url) -> Response {
        Response {
            url,
            status: StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK),
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }

    /// Approximate storage footprint in bytes.
    pub fn size(&self) -> usize {
        self.body.len()
            + self
                .headers
                .iter()
                .map(|(name, value)| name.as_str().len() + value.len())
                .sum::<usize>()
    }
}

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Request identity.
    pub key: RequestKey,

    /// Stored response.
    pub snapshot: ResponseSnapshot,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Milliseconds since the entry was written.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.cached_at)
    }

    /// Rebuild the response, addressed to the entry's own URL when parseable.
    pub fn to_response(&self, fallback_url: &Url) -> Response {
        let url = self.key.url().unwrap_or_else(|| fallback_url.clone());
        self.snapshot.to_response(url)
    }
}

// ==================== Traits ====================

/// One named store.
#[async_trait]
pub trait Cache: Send + Sync + fmt::Debug {
    /// Store name.
    fn name(&self) -> &str;

    /// Look up an entry.
    async fn get(&self, key: &RequestKey) -> Result<Option<CacheEntry>, CacheError>;

    /// Insert or overwrite an entry, stamping it with the current time.
    async fn put(&self, key: RequestKey, snapshot: ResponseSnapshot) -> Result<(), CacheError>;

    /// Keys in insertion order.
    async fn keys(&self) -> Result<Vec<RequestKey>, CacheError>;

    /// Delete an entry. Returns whether it existed.
    async fn delete(&self, key: &RequestKey) -> Result<bool, CacheError>;

    /// Number of entries.
    async fn len(&self) -> Result<usize, CacheError> {
        Ok(self.keys().await?.len())
    }
}

/// Handle to an open store.
pub type CacheHandle = Arc<dyn Cache>;

/// Storage of named stores.
#[async_trait]
pub trait CacheStorage: Send + Sync + fmt::Debug {
    /// Open a store, creating it if absent.
    async fn open(&self, name: &str) -> Result<CacheHandle, CacheError>;

    /// Check if a store exists.
    async fn has(&self, name: &str) -> bool;

    /// Delete a store and everything in it. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool, CacheError>;

    /// All store names.
    async fn keys(&self) -> Result<Vec<String>, CacheError>;
}

// ==================== In-memory storage ====================

/// Byte budget shared by every store of one storage.
#[derive(Debug)]
struct Quota {
    limit: Option<usize>,
    used: AtomicUsize,
}

impl Quota {
    fn reserve(&self, bytes: usize) -> Result<(), CacheError> {
        let previous = self.used.fetch_add(bytes, Ordering::SeqCst);
        match self.limit {
            Some(limit) if previous + bytes > limit => {
                self.used.fetch_sub(bytes, Ordering::SeqCst);
                Err(CacheError::QuotaExceeded {
                    requested: bytes,
                    available: limit.saturating_sub(previous),
                })
            }
            _ => Ok(()),
        }
    }

    fn release(&self, bytes: usize) {
        self.used.fetch_sub(bytes, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<RequestKey, CacheEntry>,
    order: Vec<RequestKey>,
    size: usize,
}

/// In-memory [`Cache`].
#[derive(Debug)]
pub struct MemoryCache {
    name: String,
    entries: RwLock<Entries>,
    quota: Arc<Quota>,
    clock: SharedClock,
    /// Set once the store is deleted; handles still held elsewhere stop accepting writes.
    detached: AtomicBool,
}

impl MemoryCache {
    fn new(name: &str, quota: Arc<Quota>, clock: SharedClock) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(Entries::default()),
            quota,
            clock,
            detached: AtomicBool::new(false),
        }
    }

    /// Bytes held by this store.
    pub async fn size(&self) -> usize {
        self.entries.read().await.size
    }

    /// Drop every entry and give the bytes back to the quota.
    async fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
        let entries = std::mem::take(&mut *self.entries.write().await);
        self.quota.release(entries.size);
    }
}

#[async_trait]
impl Cache for MemoryCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &RequestKey) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.entries.read().await.map.get(key).cloned())
    }

    async fn put(&self, key: RequestKey, snapshot: ResponseSnapshot) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        if self.detached.load(Ordering::SeqCst) {
            return Err(CacheError::NotFound(self.name.clone()));
        }

        let new_size = snapshot.size();
        let old_size = entries.map.get(&key).map_or(0, |e| e.snapshot.size());
        if new_size > old_size {
            self.quota.reserve(new_size - old_size)?;
        } else {
            self.quota.release(old_size - new_size);
        }
        entries.size = entries.size + new_size - old_size;

        let entry = CacheEntry {
            key: key.clone(),
            snapshot,
            cached_at: self.clock.now_ms(),
        };
        if entries.map.insert(key.clone(), entry).is_none() {
            entries.order.push(key);
        }

        trace!(cache = %self.name, entries = entries.order.len(), "Entry stored");
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<RequestKey>, CacheError> {
        Ok(self.entries.read().await.order.clone())
    }

    async fn delete(&self, key: &RequestKey) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().await;
        match entries.map.remove(key) {
            Some(entry) => {
                let size = entry.snapshot.size();
                entries.size -= size;
                entries.order.retain(|k| k != key);
                self.quota.release(size);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn len(&self) -> Result<usize, CacheError> {
        Ok(self.entries.read().await.order.len())
    }
}

/// In-memory [`CacheStorage`] with an optional byte quota.
#[derive(Debug)]
pub struct MemoryCacheStorage {
    caches: RwLock<HashMap<String, Arc<MemoryCache>>>,
    quota: Arc<Quota>,
    clock: SharedClock,
}

impl MemoryCacheStorage {
    /// Create unbounded storage.
    pub fn new(clock: SharedClock) -> Self {
        Self::with_quota(clock, None)
    }

    /// Create storage that rejects writes beyond `limit` bytes.
    pub fn with_quota(clock: SharedClock, limit: Option<usize>) -> Self {
        Self {
            caches: RwLock::new(HashMap::new()),
            quota: Arc::new(Quota {
                limit,
                used: AtomicUsize::new(0),
            }),
            clock,
        }
    }

    /// Bytes used across all stores.
    pub fn used_bytes(&self) -> usize {
        self.quota.used.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<CacheHandle, CacheError> {
        if let Some(cache) = self.caches.read().await.get(name) {
            return Ok(cache.clone());
        }

        let mut caches = self.caches.write().await;
        let cache = caches
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(cache = name, "Creating cache");
                Arc::new(MemoryCache::new(
                    name,
                    self.quota.clone(),
                    self.clock.clone(),
                ))
            })
            .clone();
        Ok(cache)
    }

    async fn has(&self, name: &str) -> bool {
        self.caches.read().await.contains_key(name)
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let removed = self.caches.write().await.remove(name);
        match removed {
            Some(cache) => {
                cache.detach().await;
                debug!(cache = name, "Cache deleted");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use shellkit_common::{Clock, ManualClock};

    fn storage() -> (Arc<ManualClock>, MemoryCacheStorage) {
        let clock = Arc::new(ManualClock::new(1_000));
        let storage = MemoryCacheStorage::new(clock.clone());
        (clock, storage)
    }

    fn key(path: &str) -> RequestKey {
        RequestKey::get(&Url::parse("https://example.com").unwrap().join(path).unwrap())
    }

    #[test]
    fn test_request_key_drops_fragment() {
        let a = RequestKey::get(&Url::parse("https://example.com/page#top").unwrap());
        let b = RequestKey::get(&Url::parse("https://example.com/page").unwrap());
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "GET https://example.com/page");
        assert_eq!(a.method(), "GET");
        assert_eq!(a.url().unwrap().path(), "/page");
    }

    #[test]
    fn test_request_key_keeps_query() {
        let a = RequestKey::get(&Url::parse("https://example.com/a?x=1").unwrap());
        let b = RequestKey::get(&Url::parse("https://example.com/a?x=2").unwrap());
        assert_ne!(a, b);
    }

    #[test]
    fn test_snapshot_response_conversion() {
        let url = Url::parse("https://example.com/style.css").unwrap();
        let mut response = Response::new(url.clone(), StatusCode::OK, "body{}");
        response
            .headers
            .insert("content-type", HeaderValue::from_static("text/css"));

        let snapshot = ResponseSnapshot::from_response(&response);
        assert_eq!(snapshot.status, 200);
        assert_eq!(snapshot.headers.get("content-type").unwrap(), "text/css");

        let rebuilt = snapshot.to_response(url);
        assert_eq!(rebuilt.content_type(), Some("text/css"));
        assert_eq!(rebuilt.body, response.body);
    }

    #[test]
    fn test_snapshot_keeps_repeated_and_opaque_headers() {
        let url = Url::parse("https://example.com/").unwrap();
        let mut response = Response::new(url.clone(), StatusCode::OK, "<html>");
        response.headers.append(
            "link",
            HeaderValue::from_static("</style.css>; rel=preload; as=style"),
        );
        response.headers.append(
            "link",
            HeaderValue::from_static("</script.js>; rel=preload; as=script"),
        );
        response
            .headers
            .insert("x-raw", HeaderValue::from_bytes(&[0x80, 0xff]).unwrap());

        let rebuilt = ResponseSnapshot::from_response(&response).to_response(url);

        let links: Vec<_> = rebuilt.headers.get_all("link").iter().collect();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0], "</style.css>; rel=preload; as=style");
        assert_eq!(links[1], "</script.js>; rel=preload; as=script");
        assert_eq!(rebuilt.headers.get("x-raw").unwrap().as_bytes(), &[0x80, 0xff]);
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let (clock, storage) = storage();
        let cache = storage.open("v1").await.unwrap();

        let snapshot = ResponseSnapshot::new(200, vec![0u8, 159, 146, 150]);
        cache.put(key("/hero.jpg"), snapshot.clone()).await.unwrap();
        clock.advance(std::time::Duration::from_secs(5));

        let entry = cache.get(&key("/hero.jpg")).await.unwrap().unwrap();
        assert_eq!(entry.snapshot, snapshot);
        assert_eq!(entry.cached_at, 1_000);
        assert_eq!(entry.age_ms(clock.now_ms()), 5_000);
    }

    #[tokio::test]
    async fn test_overwrite_resets_time_keeps_order() {
        let (clock, storage) = storage();
        let cache = storage.open("v1").await.unwrap();

        cache.put(key("/a"), ResponseSnapshot::new(200, "a1")).await.unwrap();
        cache.put(key("/b"), ResponseSnapshot::new(200, "b")).await.unwrap();
        clock.advance(std::time::Duration::from_secs(60));
        cache.put(key("/a"), ResponseSnapshot::new(200, "a2")).await.unwrap();

        assert_eq!(cache.keys().await.unwrap(), vec![key("/a"), key("/b")]);
        let a = cache.get(&key("/a")).await.unwrap().unwrap();
        assert_eq!(a.snapshot.body, Bytes::from("a2"));
        assert_eq!(a.cached_at, 61_000);
    }

    #[tokio::test]
    async fn test_open_is_idempotent_and_shared() {
        let (_, storage) = storage();
        let first = storage.open("v1").await.unwrap();
        let second = storage.open("v1").await.unwrap();

        first.put(key("/"), ResponseSnapshot::new(200, "home")).await.unwrap();
        assert!(second.get(&key("/")).await.unwrap().is_some());
        assert_eq!(storage.keys().await.unwrap(), vec!["v1".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_entry() {
        let (_, storage) = storage();
        let cache = storage.open("v1").await.unwrap();
        cache.put(key("/a"), ResponseSnapshot::new(200, "a")).await.unwrap();

        assert!(cache.delete(&key("/a")).await.unwrap());
        assert!(!cache.delete(&key("/a")).await.unwrap());
        assert!(cache.keys().await.unwrap().is_empty());
        assert_eq!(storage.used_bytes(), 0);
    }

    #[tokio::test]
    async fn test_delete_store() {
        let (_, storage) = storage();
        storage.open("v1").await.unwrap();
        storage.open("v2").await.unwrap();

        assert!(storage.delete("v1").await.unwrap());
        assert!(!storage.delete("v1").await.unwrap());
        assert!(!storage.has("v1").await);
        assert_eq!(storage.keys().await.unwrap(), vec!["v2".to_string()]);
    }

    #[tokio::test]
    async fn test_quota_exceeded() {
        let clock = Arc::new(ManualClock::new(0));
        let storage = MemoryCacheStorage::with_quota(clock, Some(8));
        let cache = storage.open("v1").await.unwrap();

        cache.put(key("/a"), ResponseSnapshot::new(200, "12345")).await.unwrap();
        let err = cache
            .put(key("/b"), ResponseSnapshot::new(200, "12345"))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            CacheError::QuotaExceeded {
                requested: 5,
                available: 3
            }
        );
        assert!(cache.get(&key("/b")).await.unwrap().is_none());
        assert_eq!(storage.used_bytes(), 5);
    }

    #[tokio::test]
    async fn test_deleting_store_releases_quota() {
        let clock = Arc::new(ManualClock::new(0));
        let storage = MemoryCacheStorage::with_quota(clock, Some(8));
        let cache = storage.open("v1").await.unwrap();
        cache.put(key("/a"), ResponseSnapshot::new(200, "12345")).await.unwrap();

        storage.delete("v1").await.unwrap();
        assert_eq!(storage.used_bytes(), 0);

        let cache = storage.open("v2").await.unwrap();
        assert!(cache
            .put(key("/b"), ResponseSnapshot::new(200, "1234567"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_handle_to_deleted_store() {
        let (_, storage) = storage();
        let orphan = storage.open("v1").await.unwrap();
        orphan.put(key("/a"), ResponseSnapshot::new(200, "abc")).await.unwrap();

        storage.delete("v1").await.unwrap();

        assert!(orphan.keys().await.unwrap().is_empty());
        assert!(!orphan.delete(&key("/a")).await.unwrap());
        assert!(matches!(
            orphan.put(key("/b"), ResponseSnapshot::new(200, "b")).await,
            Err(CacheError::NotFound(_))
        ));
        assert_eq!(storage.used_bytes(), 0);
    }
}
