//! Fetch strategies.
//!
//! | Request                         | Strategy                                  |
//! |---------------------------------|-------------------------------------------|
//! | navigation                      | network first, cached page, root document |
//! | `Critical` / `PatternMatch`     | cache first, background refresh           |
//! | `Never` / `Unclassified`        | network only                              |
//! | non-GET, foreign origin         | passed through untouched                  |

use std::sync::Arc;

use shellkit_common::{Clock, SharedClock};
use shellkit_net::{Fetcher, Request, Response};
use tracing::{debug, trace, warn};
use url::{Origin, Url};

use crate::cache::{CacheEntry, CacheHandle, CacheStorage, RequestKey, ResponseSnapshot};
use crate::classify::{Classifier, Verdict};
use crate::config::CacheConfig;
use crate::retention::RetentionPolicy;
use crate::{ConfigError, ServiceWorkerError};

// ==================== Scope ====================

/// Which requests the worker handles.
#[derive(Debug, Clone)]
pub struct FetchScope {
    origin: Origin,
    allowed_hosts: Vec<String>,
}

impl FetchScope {
    /// Scope for the worker's own origin plus `allowed_hosts`.
    pub fn new(scope: &Url, allowed_hosts: &[String]) -> Self {
        Self {
            origin: scope.origin(),
            allowed_hosts: allowed_hosts
                .iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
        }
    }

    /// Whether the worker should handle `request`.
    ///
    /// Only GET requests to the worker origin, or to an allow-listed host
    /// or one of its subdomains, are intercepted.
    pub fn intercepts(&self, request: &Request) -> bool {
        if request.method != http::Method::GET {
            return false;
        }
        if request.url.origin() == self.origin {
            return true;
        }
        match request.url.host_str() {
            Some(host) => self.allowed_hosts.iter().any(|allowed| {
                host == allowed
                    || host
                        .strip_suffix(allowed.as_str())
                        .is_some_and(|prefix| prefix.ends_with('.'))
            }),
            None => false,
        }
    }
}

// ==================== Responses ====================

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// Straight from the network.
    Network,
    /// A fresh (or navigation) cache hit for the request itself.
    Cache,
    /// A stale entry served because the network failed.
    StaleCache,
    /// The cached root document, served for a failed navigation.
    Fallback,
}

/// Response produced by the fetch handler.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub response: Response,
    pub source: ResponseSource,
}

impl FetchResponse {
    pub(crate) fn network(response: Response) -> Self {
        Self {
            response,
            source: ResponseSource::Network,
        }
    }

    fn cached(entry: &CacheEntry, request_url: &Url, source: ResponseSource) -> Self {
        Self {
            response: entry.to_response(request_url),
            source,
        }
    }

    /// Whether the response was served from cache.
    pub fn from_cache(&self) -> bool {
        self.source != ResponseSource::Network
    }
}

// ==================== Handler ====================

/// Strategy engine for intercepted requests.
///
/// Cheap to clone; background work holds its own clone.
#[derive(Clone)]
pub struct FetchHandler {
    cache_name: Arc<str>,
    /// Worker scope URL; shell documents are stored under it.
    root: Arc<Url>,
    scope: Arc<FetchScope>,
    classifier: Arc<Classifier>,
    retention: RetentionPolicy,
    fallbacks: Arc<[String]>,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    clock: SharedClock,
}

impl std::fmt::Debug for FetchHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchHandler")
            .field("cache_name", &self.cache_name)
            .field("root", &self.root.as_str())
            .field("scope", &self.scope)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl FetchHandler {
    /// Create a handler for `config` serving the origin of `scope`.
    pub fn new(
        config: &CacheConfig,
        scope: &Url,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        clock: SharedClock,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            cache_name: config.cache_name().into(),
            root: Arc::new(scope.clone()),
            scope: Arc::new(FetchScope::new(scope, &config.allowed_hosts)),
            classifier: Arc::new(config.classifier()?),
            retention: config.retention(),
            fallbacks: config.navigation_fallbacks.clone().into(),
            storage,
            fetcher,
            clock,
        })
    }

    /// Name of the store this handler reads and writes.
    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    /// The classifier in use.
    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Handle a request.
    ///
    /// Errors are network errors that no cache entry could cover.
    pub async fn handle(&self, request: Request) -> Result<FetchResponse, ServiceWorkerError> {
        if !self.scope.intercepts(&request) {
            trace!(url = %request.url, method = %request.method, "Passing request through");
            return self.network_only(&request).await;
        }

        if request.is_navigation() {
            return self.network_first(&request).await;
        }

        match self.classifier.classify(request.path()) {
            Verdict::Critical | Verdict::PatternMatch => self.cache_first(&request).await,
            Verdict::Never | Verdict::Unclassified => self.network_only(&request).await,
        }
    }

    async fn network_only(&self, request: &Request) -> Result<FetchResponse, ServiceWorkerError> {
        let response = self.fetcher.fetch(request).await?;
        Ok(FetchResponse::network(response))
    }

    async fn network_first(&self, request: &Request) -> Result<FetchResponse, ServiceWorkerError> {
        let key = RequestKey::for_request(request);

        let error = match self.fetcher.fetch(request).await {
            Ok(response) => {
                if let Some(cache) = self.open_current().await {
                    self.store(&cache, key, &response).await;
                }
                return Ok(FetchResponse::network(response));
            }
            Err(error) => error,
        };

        warn!(url = %request.url, %error, "Navigation failed, falling back to cache");

        if let Some(cache) = self.open_current().await {
            if let Some(entry) = lookup(&cache, &key).await {
                return Ok(FetchResponse::cached(
                    &entry,
                    &request.url,
                    ResponseSource::Cache,
                ));
            }

            // Fallback documents live under the worker's own origin, even
            // when the navigation targets an allow-listed host.
            for path in self.fallbacks.iter() {
                let Ok(url) = self.root.join(path) else {
                    continue;
                };

                if let Some(entry) = lookup(&cache, &RequestKey::get(&url)).await {
                    debug!(url = %request.url, fallback = %path, "Serving fallback document");
                    return Ok(FetchResponse::cached(
                        &entry,
                        &url,
                        ResponseSource::Fallback,
                    ));
                }
            }
        }

        Err(error.into())
    }

    async fn cache_first(&self, request: &Request) -> Result<FetchResponse, ServiceWorkerError> {
        let key = RequestKey::for_request(request);
        let cache = self.open_current().await;

        let cached = match &cache {
            Some(cache) => lookup(cache, &key).await,
            None => None,
        };

        if let (Some(cache), Some(entry)) = (&cache, &cached) {
            if !self.retention.is_stale(entry, self.clock.now_ms()) {
                trace!(url = %request.url, "Cache hit");
                self.spawn_refresh(request.clone(), cache.clone(), key);
                return Ok(FetchResponse::cached(
                    entry,
                    &request.url,
                    ResponseSource::Cache,
                ));
            }
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if let Some(cache) = &cache {
                    self.store(cache, key, &response).await;
                }
                Ok(FetchResponse::network(response))
            }
            Err(error) => match cached {
                Some(entry) => {
                    warn!(url = %request.url, %error, "Network failed, serving stale entry");
                    Ok(FetchResponse::cached(
                        &entry,
                        &request.url,
                        ResponseSource::StaleCache,
                    ))
                }
                None => Err(error.into()),
            },
        }
    }

    /// Re-fetch in the background and overwrite the entry on success.
    fn spawn_refresh(&self, request: Request, cache: CacheHandle, key: RequestKey) {
        let this = self.clone();
        tokio::spawn(async move {
            match this.fetcher.fetch(&request).await {
                Ok(response) => this.store(&cache, key, &response).await,
                Err(error) => {
                    debug!(url = %request.url, %error, "Background refresh failed");
                }
            }
        });
    }

    /// Write a successful response and trim. Failures are logged only.
    pub(crate) async fn store(&self, cache: &CacheHandle, key: RequestKey, response: &Response) {
        if !response.ok() {
            trace!(key = %key, status = %response.status, "Not caching unsuccessful response");
            return;
        }

        match cache.put(key, ResponseSnapshot::from_response(response)).await {
            Ok(()) => self.retention.spawn_trim(cache.clone()),
            Err(error) => {
                warn!(cache = cache.name(), url = %response.url, %error, "Cache write failed");
            }
        }
    }

    async fn open_current(&self) -> Option<CacheHandle> {
        match self.storage.open(&self.cache_name).await {
            Ok(cache) => Some(cache),
            Err(error) => {
                warn!(cache = %self.cache_name, %error, "Failed to open cache");
                None
            }
        }
    }
}

async fn lookup(cache: &CacheHandle, key: &RequestKey) -> Option<CacheEntry> {
    match cache.get(key).await {
        Ok(entry) => entry,
        Err(error) => {
            warn!(cache = cache.name(), key = %key, %error, "Cache read failed");
            None
        }
    }
}
