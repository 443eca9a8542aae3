//! Worker lifecycle: install, activate, messages, sync and push.
//!
//! ```text
//! register ──► Installing ──► Installed (waiting) ──► Activating ──► Activated
//!                  │                                                    │
//!                  └── install failed ──► Redundant ◄── replaced ───────┘
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use shellkit_common::{Clock, SharedClock};
use shellkit_net::{Fetcher, NetError, Request};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheHandle, CacheStorage, RequestKey, ResponseSnapshot};
use crate::clients::{Client, Clients};
use crate::config::CacheConfig;
use crate::message::{MessageOutcome, PageEvent, VersionReply, WorkerMessage};
use crate::push::{Notification, NotificationClick, PushPayload};
use crate::strategy::{FetchHandler, FetchResponse};
use crate::ServiceWorkerError;

// ==================== Types ====================

/// Unique identifier for a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorkerState {
    /// Created, not yet installing.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Replaced or install failed.
    Redundant,
}

/// Outcome of pre-caching the critical resources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    /// Paths stored in the current store.
    pub cached: Vec<String>,
    /// Paths that could not be fetched or stored.
    pub failed: Vec<String>,
    /// Stores of other versions deleted after pre-caching.
    pub removed_stores: Vec<String>,
}

/// Outcome of a background sync sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub refreshed: usize,
    pub failed: usize,
}

// ==================== Worker ====================

/// One version of the caching worker.
pub struct CacheWorker {
    id: WorkerId,
    config: Arc<CacheConfig>,
    scope: Url,
    handler: FetchHandler,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    clock: SharedClock,
    clients: Arc<RwLock<Clients>>,
    events: mpsc::UnboundedSender<PageEvent>,
}

impl fmt::Debug for CacheWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheWorker")
            .field("id", &self.id)
            .field("version", &self.config.version)
            .field("scope", &self.scope.as_str())
            .finish_non_exhaustive()
    }
}

impl CacheWorker {
    /// Create a worker for `config`, serving `scope`.
    pub fn new(
        config: CacheConfig,
        scope: Url,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        clock: SharedClock,
        clients: Arc<RwLock<Clients>>,
        events: mpsc::UnboundedSender<PageEvent>,
    ) -> Result<Self, ServiceWorkerError> {
        config.validate()?;
        let handler = FetchHandler::new(
            &config,
            &scope,
            storage.clone(),
            fetcher.clone(),
            clock.clone(),
        )?;

        Ok(Self {
            id: WorkerId::new(),
            config: Arc::new(config),
            scope,
            handler,
            storage,
            fetcher,
            clock,
            clients,
            events,
        })
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Running version.
    pub fn version(&self) -> &str {
        &self.config.version
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Name of the store owned by this version.
    pub fn cache_name(&self) -> &str {
        self.handler.cache_name()
    }

    /// The strategy engine.
    pub fn handler(&self) -> &FetchHandler {
        &self.handler
    }

    /// Handle an intercepted fetch.
    pub async fn handle_fetch(&self, request: Request) -> Result<FetchResponse, ServiceWorkerError> {
        self.handler.handle(request).await
    }

    /// Pre-cache the critical resources, trim to `max_entries`, then drop
    /// other versions' stores.
    ///
    /// Individual fetch or write failures are logged and reported, never
    /// fatal. Only failing to open the store fails the install.
    pub async fn install(&self) -> Result<InstallReport, ServiceWorkerError> {
        info!(version = %self.config.version, "Installing");

        let cache = self.storage.open(self.cache_name()).await?;
        let results = join_all(
            self.config
                .critical_resources
                .iter()
                .map(|path| self.precache(&cache, path)),
        )
        .await;

        let mut report = InstallReport::default();
        for (path, result) in self.config.critical_resources.iter().zip(results) {
            match result {
                Ok(()) => {
                    debug!(path = %path, "Cached");
                    report.cached.push(path.clone());
                }
                Err(error) => {
                    warn!(path = %path, %error, "Failed to cache");
                    report.failed.push(path.clone());
                }
            }
        }

        match self.config.retention().trim(cache.as_ref()).await {
            Ok(0) => {}
            Ok(evicted) => warn!(evicted, "Critical set exceeds max_entries"),
            Err(error) => warn!(%error, "Failed to trim after install"),
        }

        report.removed_stores = self.cleanup_old_caches().await?;

        info!(
            version = %self.config.version,
            cached = report.cached.len(),
            failed = report.failed.len(),
            "Installed"
        );
        Ok(report)
    }

    async fn precache(&self, cache: &CacheHandle, path: &str) -> Result<(), ServiceWorkerError> {
        let url = self
            .scope
            .join(path)
            .map_err(|e| NetError::InvalidUrl(e.to_string()))?;

        let response = self.fetcher.fetch(&Request::get(url.clone())).await?;
        if !response.ok() {
            return Err(NetError::RequestFailed(format!("{url} returned {}", response.status)).into());
        }

        cache
            .put(RequestKey::get(&url), ResponseSnapshot::from_response(&response))
            .await?;
        Ok(())
    }

    /// Delete every store of this application that is not the current one.
    pub async fn cleanup_old_caches(&self) -> Result<Vec<String>, ServiceWorkerError> {
        let mut removed = Vec::new();
        for name in self.storage.keys().await? {
            if !self.config.is_stale_store(&name) {
                continue;
            }
            match self.storage.delete(&name).await {
                Ok(true) => {
                    info!(cache = %name, "Deleted old cache");
                    removed.push(name);
                }
                Ok(false) => {}
                Err(error) => warn!(cache = %name, %error, "Failed to delete old cache"),
            }
        }
        Ok(removed)
    }

    /// Drop old stores and take control of every client.
    pub async fn activate(&self) -> Result<Vec<String>, ServiceWorkerError> {
        info!(version = %self.config.version, "Activating");

        let removed = self.cleanup_old_caches().await?;

        let claimed = self.clients.write().await.claim(self.id);
        for client_id in claimed {
            let _ = self.events.send(PageEvent::ControllerChange {
                client_id,
                version: self.config.version.clone(),
            });
        }

        info!(version = %self.config.version, removed = removed.len(), "Activated");
        Ok(removed)
    }

    /// Handle a page message.
    pub async fn handle_message(
        &self,
        message: WorkerMessage,
    ) -> Result<MessageOutcome, ServiceWorkerError> {
        debug!(?message, "Message received");
        match message {
            WorkerMessage::SkipWaiting => Ok(MessageOutcome::SkipWaiting),
            WorkerMessage::GetVersion => Ok(MessageOutcome::Reply(VersionReply {
                version: self.config.version.clone(),
            })),
            WorkerMessage::ClearCache => Ok(MessageOutcome::Cleared(self.clear_cache().await?)),
        }
    }

    /// Delete the current store.
    pub async fn clear_cache(&self) -> Result<bool, ServiceWorkerError> {
        let deleted = self.storage.delete(self.cache_name()).await?;
        info!(cache = %self.cache_name(), deleted, "Cache cleared");
        Ok(deleted)
    }

    /// Background sync: re-fetch every cached entry and overwrite on success.
    ///
    /// Returns `None` for tags this worker does not handle.
    pub async fn sync(&self, tag: &str) -> Result<Option<SyncReport>, ServiceWorkerError> {
        if tag != self.config.sync_tag {
            debug!(tag, "Ignoring sync event");
            return Ok(None);
        }

        info!(tag, "Background sync");
        let cache = self.storage.open(self.cache_name()).await?;
        let keys = cache.keys().await?;
        let results = join_all(keys.iter().map(|key| self.refresh_entry(&cache, key))).await;

        let mut report = SyncReport::default();
        for (key, result) in keys.iter().zip(results) {
            match result {
                Ok(()) => report.refreshed += 1,
                Err(error) => {
                    debug!(key = %key, %error, "Sync refresh failed");
                    report.failed += 1;
                }
            }
        }
        Ok(Some(report))
    }

    async fn refresh_entry(
        &self,
        cache: &CacheHandle,
        key: &RequestKey,
    ) -> Result<(), ServiceWorkerError> {
        let url = key
            .url()
            .ok_or_else(|| NetError::InvalidUrl(key.to_string()))?;
        let response = self.fetcher.fetch(&Request::get(url)).await?;
        if !response.ok() {
            return Err(NetError::RequestFailed(format!("status {}", response.status)).into());
        }
        cache
            .put(key.clone(), ResponseSnapshot::from_response(&response))
            .await?;
        Ok(())
    }

    /// Show the notification for a push message. No payload, no notification.
    pub async fn push(&self, data: Option<&str>) -> Result<Option<Notification>, ServiceWorkerError> {
        let Some(json) = data else {
            debug!("Push without payload");
            return Ok(None);
        };

        let payload = PushPayload::from_json(json)?;
        let notification = Notification::from_push(payload, &self.config, self.clock.now_ms());
        info!(title = %notification.title, "Showing notification");

        let _ = self.events.send(PageEvent::NotificationShown {
            notification: notification.clone(),
        });
        Ok(Some(notification))
    }

    /// Handle a notification click: `view` focuses or opens a window.
    pub async fn notification_click(
        &self,
        click: NotificationClick,
    ) -> Result<Option<Client>, ServiceWorkerError> {
        if !click.wants_view() {
            return Ok(None);
        }

        let url = self
            .scope
            .join(&click.notification.data.url)
            .map_err(|e| NetError::InvalidUrl(e.to_string()))?;

        let mut clients = self.clients.write().await;
        let existing = clients
            .windows()
            .into_iter()
            .find(|c| c.url == url)
            .map(|c| c.id.clone());

        let (client, event) = match existing {
            Some(id) => {
                let client = clients.focus(&id)?.clone();
                let event = PageEvent::FocusClient {
                    client_id: client.id.clone(),
                    url: url.to_string(),
                };
                (client, event)
            }
            None => {
                let client = clients.open_window(url.clone(), Some(self.id));
                let event = PageEvent::OpenWindow {
                    client_id: client.id.clone(),
                    url: url.to_string(),
                };
                (client, event)
            }
        };

        let _ = self.events.send(event);
        Ok(Some(client))
    }
}

// ==================== Registration ====================

#[derive(Debug, Clone)]
struct Slot {
    worker: Arc<CacheWorker>,
    state: WorkerState,
}

impl Slot {
    fn new(worker: Arc<CacheWorker>, state: WorkerState) -> Self {
        Self { worker, state }
    }
}

/// Installing, waiting and active workers for one scope.
#[derive(Debug)]
pub struct Registration {
    /// Scope URL.
    pub scope: Url,
    installing: Option<Slot>,
    waiting: Option<Slot>,
    active: Option<Slot>,
}

impl Registration {
    /// Create a new registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
        }
    }

    pub fn installing(&self) -> Option<&Arc<CacheWorker>> {
        self.installing.as_ref().map(|s| &s.worker)
    }

    pub fn waiting(&self) -> Option<&Arc<CacheWorker>> {
        self.waiting.as_ref().map(|s| &s.worker)
    }

    pub fn active(&self) -> Option<&Arc<CacheWorker>> {
        self.active.as_ref().map(|s| &s.worker)
    }

    /// State of a worker held by this registration.
    pub fn state_of(&self, id: WorkerId) -> Option<WorkerState> {
        [&self.installing, &self.waiting, &self.active]
            .into_iter()
            .flatten()
            .find(|s| s.worker.id() == id)
            .map(|s| s.state)
    }

    /// Start installing `worker`, replacing any other installing worker.
    pub fn begin_install(&mut self, worker: Arc<CacheWorker>) {
        if let Some(old) = self.installing.replace(Slot::new(worker, WorkerState::Installing)) {
            debug!(worker = ?old.worker.id(), "Installing worker replaced");
        }
    }

    /// Move the installing worker to waiting.
    ///
    /// Returns whether an active worker already controls the scope, which
    /// means an update is available.
    pub fn install_complete(&mut self) -> bool {
        if let Some(mut slot) = self.installing.take() {
            slot.state = WorkerState::Installed;
            if let Some(old) = self.waiting.replace(slot) {
                debug!(worker = ?old.worker.id(), "Waiting worker replaced");
            }
        }
        self.active.is_some()
    }

    /// Drop the installing worker after a failed install.
    pub fn fail_install(&mut self) {
        if let Some(slot) = self.installing.take() {
            warn!(worker = ?slot.worker.id(), "Install failed, worker is redundant");
        }
    }

    /// Move the waiting worker to active (state `Activating`).
    pub fn begin_activate(&mut self) -> Option<Arc<CacheWorker>> {
        let mut slot = self.waiting.take()?;
        slot.state = WorkerState::Activating;
        let worker = slot.worker.clone();

        if let Some(old) = self.active.replace(slot) {
            debug!(worker = ?old.worker.id(), "Active worker is redundant");
        }
        Some(worker)
    }

    /// Mark the active worker `Activated`.
    pub fn activate_complete(&mut self, id: WorkerId) {
        if let Some(slot) = self.active.as_mut().filter(|s| s.worker.id() == id) {
            slot.state = WorkerState::Activated;
        }
    }
}

// ==================== Container ====================

/// Hosts the registration for one origin and routes page traffic to it.
pub struct WorkerContainer {
    scope: Url,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    clock: SharedClock,
    registration: RwLock<Registration>,
    clients: Arc<RwLock<Clients>>,
    event_tx: mpsc::UnboundedSender<PageEvent>,
}

impl WorkerContainer {
    /// Create a container. The receiver yields events for the page layer.
    pub fn new(
        scope: Url,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        clock: SharedClock,
    ) -> (Self, mpsc::UnboundedReceiver<PageEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                registration: RwLock::new(Registration::new(scope.clone())),
                scope,
                storage,
                fetcher,
                clock,
                clients: Arc::new(RwLock::new(Clients::new())),
                event_tx,
            },
            event_rx,
        )
    }

    /// Register and install a worker for `config`.
    ///
    /// Emits [`PageEvent::UpdateAvailable`] when another worker already
    /// controls the scope, and activates immediately when the config asks
    /// to skip waiting.
    pub async fn register(&self, config: CacheConfig) -> Result<Arc<CacheWorker>, ServiceWorkerError> {
        let worker = Arc::new(CacheWorker::new(
            config,
            self.scope.clone(),
            self.storage.clone(),
            self.fetcher.clone(),
            self.clock.clone(),
            self.clients.clone(),
            self.event_tx.clone(),
        )?);

        self.registration.write().await.begin_install(worker.clone());

        if let Err(error) = worker.install().await {
            self.registration.write().await.fail_install();
            return Err(error);
        }

        let update_available = self.registration.write().await.install_complete();
        if update_available {
            info!(version = %worker.version(), "Update available");
            let _ = self.event_tx.send(PageEvent::UpdateAvailable {
                version: worker.version().to_string(),
            });
        }

        if worker.config().skip_waiting_on_install {
            self.skip_waiting().await?;
        }

        Ok(worker)
    }

    /// Activate the waiting worker, if any. Returns whether one was activated.
    pub async fn skip_waiting(&self) -> Result<bool, ServiceWorkerError> {
        let Some(worker) = self.registration.write().await.begin_activate() else {
            return Ok(false);
        };

        let result = worker.activate().await;
        self.registration.write().await.activate_complete(worker.id());
        result.map(|_| true)
    }

    /// The active worker.
    pub async fn controller(&self) -> Option<Arc<CacheWorker>> {
        self.registration.read().await.active().cloned()
    }

    /// State of a worker in this container's registration.
    pub async fn state_of(&self, id: WorkerId) -> Option<WorkerState> {
        self.registration.read().await.state_of(id)
    }

    /// Route a page request through the controller, or straight to the
    /// network when nothing controls the scope.
    pub async fn fetch(&self, request: Request) -> Result<FetchResponse, ServiceWorkerError> {
        match self.controller().await {
            Some(worker) => worker.handle_fetch(request).await,
            None => Ok(FetchResponse::network(self.fetcher.fetch(&request).await?)),
        }
    }

    /// Post a message from a page. `GET_VERSION` yields a reply.
    pub async fn post_message(
        &self,
        message: WorkerMessage,
    ) -> Result<Option<VersionReply>, ServiceWorkerError> {
        let registration = self.registration.read().await;
        let worker = registration
            .active()
            .or_else(|| registration.waiting())
            .cloned();
        drop(registration);

        let worker = worker.ok_or_else(|| {
            ServiceWorkerError::StateError("No worker to receive message".to_string())
        })?;

        match worker.handle_message(message).await? {
            MessageOutcome::SkipWaiting => {
                self.skip_waiting().await?;
                Ok(None)
            }
            MessageOutcome::Reply(reply) => Ok(Some(reply)),
            MessageOutcome::Cleared(_) => Ok(None),
        }
    }

    /// Deliver a background sync event to the controller.
    pub async fn sync(&self, tag: &str) -> Result<Option<SyncReport>, ServiceWorkerError> {
        self.require_controller().await?.sync(tag).await
    }

    /// Deliver a push message to the controller.
    pub async fn push(&self, data: Option<&str>) -> Result<Option<Notification>, ServiceWorkerError> {
        self.require_controller().await?.push(data).await
    }

    /// Deliver a notification click to the controller.
    pub async fn notification_click(
        &self,
        click: NotificationClick,
    ) -> Result<Option<Client>, ServiceWorkerError> {
        self.require_controller().await?.notification_click(click).await
    }

    /// Record a page load; the page is controlled by the active worker.
    pub async fn open_page(&self, url: Url) -> Client {
        let controller = self.controller().await.map(|w| w.id());
        let mut client = Client::window(url);
        client.controller = controller;
        self.clients.write().await.add(client.clone());
        client
    }

    /// The clients registry.
    pub fn clients(&self) -> Arc<RwLock<Clients>> {
        self.clients.clone()
    }

    async fn require_controller(&self) -> Result<Arc<CacheWorker>, ServiceWorkerError> {
        self.controller()
            .await
            .ok_or_else(|| ServiceWorkerError::StateError("No active worker".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStorage;
    use async_trait::async_trait;
    use shellkit_common::ManualClock;
    use shellkit_net::Response;

    #[derive(Debug)]
    struct Offline;

    #[async_trait]
    impl Fetcher for Offline {
        async fn fetch(&self, _request: &Request) -> Result<Response, NetError> {
            Err(NetError::RequestFailed("offline".to_string()))
        }
    }

    fn worker(version: &str) -> Arc<CacheWorker> {
        let clock: SharedClock = Arc::new(ManualClock::new(0));
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = CacheConfig {
            version: version.to_string(),
            ..Default::default()
        };
        Arc::new(
            CacheWorker::new(
                config,
                Url::parse("https://example.com/").unwrap(),
                Arc::new(MemoryCacheStorage::new(clock.clone())),
                Arc::new(Offline),
                clock,
                Arc::new(RwLock::new(Clients::new())),
                tx,
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_worker_ids_unique() {
        assert_ne!(WorkerId::new(), WorkerId::new());
    }

    #[test]
    fn test_registration_lifecycle() {
        let mut registration = Registration::new(Url::parse("https://example.com/").unwrap());
        let first = worker("1.0.0");

        registration.begin_install(first.clone());
        assert_eq!(registration.state_of(first.id()), Some(WorkerState::Installing));

        // Installing -> Installed, nothing active yet
        assert!(!registration.install_complete());
        assert_eq!(registration.state_of(first.id()), Some(WorkerState::Installed));
        assert!(registration.installing().is_none());

        // Installed -> Activating -> Activated
        let activating = registration.begin_activate().unwrap();
        assert_eq!(activating.id(), first.id());
        assert_eq!(registration.state_of(first.id()), Some(WorkerState::Activating));
        registration.activate_complete(first.id());
        assert_eq!(registration.state_of(first.id()), Some(WorkerState::Activated));
        assert!(registration.waiting().is_none());
    }

    #[test]
    fn test_update_detected_when_active_exists() {
        let mut registration = Registration::new(Url::parse("https://example.com/").unwrap());
        let first = worker("1.0.0");
        registration.begin_install(first.clone());
        registration.install_complete();
        registration.begin_activate();
        registration.activate_complete(first.id());

        let second = worker("1.1.0");
        registration.begin_install(second.clone());
        assert!(registration.install_complete());
        assert_eq!(registration.waiting().unwrap().id(), second.id());

        registration.begin_activate();
        assert_eq!(registration.state_of(first.id()), None);
        assert_eq!(registration.active().unwrap().version(), "1.1.0");
    }

    #[test]
    fn test_fail_install() {
        let mut registration = Registration::new(Url::parse("https://example.com/").unwrap());
        let w = worker("1.0.0");
        registration.begin_install(w.clone());
        registration.fail_install();

        assert_eq!(registration.state_of(w.id()), None);
        assert!(registration.begin_activate().is_none());
    }

    #[tokio::test]
    async fn test_install_offline_reports_failures() {
        let w = worker("1.0.0");
        let report = w.install().await.unwrap();

        assert!(report.cached.is_empty());
        assert_eq!(report.failed.len(), w.config().critical_resources.len());
    }

    #[tokio::test]
    async fn test_messages() {
        let w = worker("3.1.4");
        assert_eq!(
            w.handle_message(WorkerMessage::GetVersion).await.unwrap(),
            MessageOutcome::Reply(VersionReply {
                version: "3.1.4".to_string()
            })
        );
        assert_eq!(
            w.handle_message(WorkerMessage::SkipWaiting).await.unwrap(),
            MessageOutcome::SkipWaiting
        );
        assert_eq!(
            w.handle_message(WorkerMessage::ClearCache).await.unwrap(),
            MessageOutcome::Cleared(false)
        );
    }

    #[tokio::test]
    async fn test_sync_ignores_other_tags() {
        let w = worker("1.0.0");
        assert_eq!(w.sync("periodic-refresh").await.unwrap(), None);
        assert_eq!(
            w.sync("background-sync").await.unwrap(),
            Some(SyncReport::default())
        );
    }

    #[tokio::test]
    async fn test_push_without_payload() {
        let w = worker("1.0.0");
        assert!(w.push(None).await.unwrap().is_none());
        assert!(w.push(Some("{broken")).await.is_err());
    }
}
