//! The asset cache manager: populate, resolve, evict, push, click.

use std::sync::Arc;

use futures::future::try_join_all;
use http::Method;
use offline_net::{matches_any, Fetcher, Request, Response};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::cache::{CacheEntry, CacheStorage};
use crate::clients::{Client, Clients};
use crate::config::{CachePolicy, WorkerConfig};
use crate::error::{Result, ServiceWorkerError};
use crate::lifecycle::{ServiceWorkerId, ServiceWorkerState, StateChange};
use crate::notification::{Notification, NotificationCenter, NotificationId, PushPayload};

/// Response handed back to the page.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub response: Response,

    /// Whether it was served from the current cache bucket.
    pub from_cache: bool,
}

impl FetchResponse {
    fn cached(response: Response) -> Self {
        Self {
            response,
            from_cache: true,
        }
    }

    fn network(response: Response) -> Self {
        Self {
            response,
            from_cache: false,
        }
    }
}

/// Things the host may want to observe.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// Worker state changed.
    StateChange {
        worker_id: ServiceWorkerId,
        cache_name: String,
        new_state: ServiceWorkerState,
    },
    /// Stale cache bucket removed.
    CacheDeleted { name: String },
    /// Notification displayed.
    NotificationShown { id: NotificationId, title: String },
    /// Notification dismissed.
    NotificationClosed { id: NotificationId },
    /// Window opened for a notification click.
    WindowOpened { client_id: String, url: Url },
}

impl From<StateChange> for WorkerEvent {
    fn from(change: StateChange) -> Self {
        WorkerEvent::StateChange {
            worker_id: change.worker_id,
            cache_name: change.cache_name,
            new_state: change.new_state,
        }
    }
}

/// Owns the current cache bucket and answers every lifecycle hook.
pub struct AssetCacheManager {
    config: WorkerConfig,
    scope: Url,
    caches: Arc<RwLock<CacheStorage>>,
    fetcher: Arc<dyn Fetcher>,
    notifications: RwLock<NotificationCenter>,
    clients: RwLock<Clients>,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl AssetCacheManager {
    /// Create a manager over `storage`. The config is validated first.
    pub fn new(
        config: WorkerConfig,
        fetcher: Arc<dyn Fetcher>,
        storage: CacheStorage,
    ) -> Result<(Self, mpsc::UnboundedReceiver<WorkerEvent>)> {
        config.validate()?;
        let scope = config.scope_url()?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        info!(
            cache = %config.cache_name,
            scope = %scope,
            policy = ?config.policy,
            assets = config.manifest.len(),
            persistent = storage.root().is_some(),
            "AssetCacheManager initialized"
        );

        Ok((
            Self {
                config,
                scope,
                caches: Arc::new(RwLock::new(storage)),
                fetcher,
                notifications: RwLock::new(NotificationCenter::new()),
                clients: RwLock::new(Clients::new()),
                event_tx,
            },
            event_rx,
        ))
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    /// Name of the current bucket.
    pub fn cache_name(&self) -> &str {
        &self.config.cache_name
    }

    /// Shared handle to the cache storage.
    pub fn caches(&self) -> Arc<RwLock<CacheStorage>> {
        Arc::clone(&self.caches)
    }

    /// Send an event to the host. A dropped receiver is not an error.
    pub fn emit(&self, event: WorkerEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Fetch every manifest asset and store them in the current bucket.
    ///
    /// Entries are committed in one batch only after every fetch succeeded,
    /// so a failure leaves no entries behind (the bucket itself is created
    /// up front).
    pub async fn populate(&self) -> Result<usize> {
        let name = self.cache_name();
        let urls = self.config.manifest.resolve(&self.scope)?;

        let created = self.caches.write().await.open(name).await?;
        info!(cache = %name, created, "Opened cache");

        let entries = try_join_all(urls.into_iter().map(|url| self.fetch_asset(url))).await?;
        let count = entries.len();

        self.caches.write().await.put_all(name, entries).await?;
        info!(cache = %name, assets = count, "Pre-cached manifest");
        Ok(count)
    }

    async fn fetch_asset(&self, url: Url) -> Result<CacheEntry> {
        let request = Request::get(url.clone()).timeout(self.config.request_timeout());
        let response = self.fetcher.fetch(request).await.map_err(|e| {
            ServiceWorkerError::PopulationFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        })?;

        if !response.ok() {
            return Err(ServiceWorkerError::PopulationFailed {
                url: url.to_string(),
                reason: format!(
                    "{:?} response with status {}",
                    response.response_type, response.status
                ),
            });
        }

        trace!(url = %url, bytes = response.body.len(), "Fetched manifest asset");
        Ok(CacheEntry::from_response(&url, &Method::GET, &response))
    }

    /// Answer a request: cache first, then network.
    pub async fn resolve(&self, request: Request) -> Result<FetchResponse> {
        if matches_any(&self.config.network_only, &request.url) {
            debug!(url = %request.url, "Network-only request, bypassing cache");
            return self.network_fetch(request).await;
        }

        if !request.is_cacheable_method() {
            debug!(url = %request.url, method = %request.method, "Uncacheable method, bypassing cache");
            return self.network_fetch(request).await;
        }

        let cached = {
            let caches = self.caches.read().await;
            caches
                .match_in(self.cache_name(), request.url.as_str())
                .cloned()
        };

        if let Some(entry) = cached {
            match entry.to_response() {
                Ok(response) => {
                    trace!(url = %request.url, "Cache hit");
                    return Ok(FetchResponse::cached(response));
                }
                Err(e) => warn!(url = %request.url, error = %e, "Ignoring unreadable cache entry"),
            }
        }

        let url = request.url.clone();
        let fetched = self.network_fetch(request).await?;

        if self.config.policy == CachePolicy::PrecacheAndRuntime {
            if fetched.response.is_cacheable() {
                let entry = CacheEntry::from_response(&url, &Method::GET, &fetched.response);
                match self.caches.write().await.put(self.cache_name(), entry).await {
                    Ok(()) => debug!(url = %url, "Cached network response"),
                    Err(e) => warn!(url = %url, error = %e, "Failed to cache network response"),
                }
            } else {
                trace!(
                    url = %url,
                    status = %fetched.response.status,
                    response_type = ?fetched.response.response_type,
                    "Response not cacheable"
                );
            }
        }

        Ok(fetched)
    }

    /// Go straight to the network. Failures surface as [`ServiceWorkerError::NetworkMiss`].
    pub async fn network_fetch(&self, mut request: Request) -> Result<FetchResponse> {
        if request.timeout.is_none() {
            request.timeout = Some(self.config.request_timeout());
        }
        let url = request.url.to_string();

        match self.fetcher.fetch(request).await {
            Ok(response) => Ok(FetchResponse::network(response)),
            Err(source) => {
                warn!(error = %source, "Network request failed and no cache match for {url}");
                Err(ServiceWorkerError::NetworkMiss { url, source })
            }
        }
    }

    /// Delete every bucket except `current`. Returns the names deleted.
    ///
    /// A bucket that fails to delete is logged and skipped.
    pub async fn evict(&self, current: &str) -> Vec<String> {
        let mut caches = self.caches.write().await;
        let stale: Vec<String> = caches
            .keys()
            .into_iter()
            .filter(|name| name != current)
            .collect();

        let mut deleted = Vec::with_capacity(stale.len());
        for name in stale {
            match caches.delete(&name).await {
                Ok(true) => {
                    info!("Deleting old cache: {name}");
                    self.emit(WorkerEvent::CacheDeleted { name: name.clone() });
                    deleted.push(name);
                }
                Ok(false) => {}
                Err(e) => warn!(cache = %name, error = %e, "Failed to delete old cache"),
            }
        }
        deleted
    }

    /// Show a notification for a push message.
    pub async fn notify_push(&self, data: Option<&[u8]>) -> Result<NotificationId> {
        let payload = PushPayload::parse(data)?;
        debug!(?payload, "Push received");

        let notification = Notification::from_payload(payload, &self.config.notifications);
        let title = notification.title.clone();
        let id = self.notifications.write().await.show(notification);

        info!(%id, %title, "Showing notification");
        self.emit(WorkerEvent::NotificationShown { id, title });
        Ok(id)
    }

    /// Close the notification and open its target (or the entry page).
    pub async fn on_notification_click(&self, notification: &Notification) -> Result<Client> {
        if self
            .notifications
            .write()
            .await
            .close(notification.id)
            .is_some()
        {
            self.emit(WorkerEvent::NotificationClosed {
                id: notification.id,
            });
        }

        let target = notification
            .data
            .url
            .as_deref()
            .unwrap_or(&self.config.entry_page);
        let url = self
            .scope
            .join(target)
            .map_err(|e| ServiceWorkerError::InvalidUrl(format!("{target}: {e}")))?;

        let client = self.clients.write().await.open_window(url.clone());
        info!(client = %client.id, url = %url, "Opened window for notification");
        self.emit(WorkerEvent::WindowOpened {
            client_id: client.id.clone(),
            url,
        });
        Ok(client)
    }

    /// Notification still on screen, if any.
    pub async fn notification(&self, id: NotificationId) -> Option<Notification> {
        self.notifications.read().await.get(id).cloned()
    }

    /// Notifications still on screen, oldest first.
    pub async fn notifications(&self) -> Vec<Notification> {
        self.notifications
            .read()
            .await
            .get_notifications()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Window clients opened so far.
    pub async fn windows(&self) -> Vec<Client> {
        self.clients
            .read()
            .await
            .windows()
            .into_iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::AssetManifest;
    use crate::test_support::StaticFetcher;
    use http::StatusCode;
    use offline_net::{ResponseType, UrlPattern};

    const SCOPE: &str = "https://fixflow.app/";

    fn config(policy: CachePolicy) -> WorkerConfig {
        WorkerConfig {
            cache_name: "fixflow-cache-v2".into(),
            scope: SCOPE.into(),
            manifest: AssetManifest::new(["./", "./index.html", "https://cdn.example/lib.js"]),
            policy,
            ..Default::default()
        }
    }

    fn fetcher_with_manifest() -> Arc<StaticFetcher> {
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.route("https://fixflow.app/", StatusCode::OK, "<root>");
        fetcher.route("https://fixflow.app/index.html", StatusCode::OK, "<index>");
        fetcher.route("https://cdn.example/lib.js", StatusCode::OK, "lib()");
        fetcher
    }

    fn manager(
        policy: CachePolicy,
        fetcher: Arc<StaticFetcher>,
    ) -> (AssetCacheManager, mpsc::UnboundedReceiver<WorkerEvent>) {
        AssetCacheManager::new(config(policy), fetcher, CacheStorage::new()).unwrap()
    }

    fn get(url: &str) -> Request {
        Request::parse(url).unwrap()
    }

    #[tokio::test]
    async fn test_populate_stores_every_asset() {
        let fetcher = fetcher_with_manifest();
        let (manager, _rx) = manager(CachePolicy::PrecacheOnly, fetcher);

        assert_eq!(manager.populate().await.unwrap(), 3);

        let caches = manager.caches();
        let caches = caches.read().await;
        for url in [
            "https://fixflow.app/",
            "https://fixflow.app/index.html",
            "https://cdn.example/lib.js",
        ] {
            assert!(caches.match_in("fixflow-cache-v2", url).is_some(), "{url} missing");
        }
    }

    #[tokio::test]
    async fn test_populate_is_all_or_nothing() {
        let fetcher = fetcher_with_manifest();
        fetcher.route("https://fixflow.app/index.html", StatusCode::NOT_FOUND, "");
        let (manager, _rx) = manager(CachePolicy::PrecacheOnly, fetcher);

        let err = manager.populate().await.unwrap_err();
        assert!(matches!(
            err,
            ServiceWorkerError::PopulationFailed { ref url, .. } if url == "https://fixflow.app/index.html"
        ));

        let caches = manager.caches();
        let caches = caches.read().await;
        assert!(caches.has("fixflow-cache-v2"));
        assert_eq!(caches.get("fixflow-cache-v2").map(|c| c.len()), Some(0));
    }

    #[tokio::test]
    async fn test_populate_rejects_unreachable_and_opaque_assets() {
        let fetcher = fetcher_with_manifest();
        fetcher.unroute("https://cdn.example/lib.js");
        let (manager, _rx) = manager(CachePolicy::PrecacheOnly, Arc::clone(&fetcher));
        assert!(matches!(
            manager.populate().await,
            Err(ServiceWorkerError::PopulationFailed { .. })
        ));

        let url = Url::parse("https://cdn.example/lib.js").unwrap();
        fetcher.route_response(
            Response::new(url, StatusCode::OK, "lib()").with_type(ResponseType::Opaque),
        );
        assert!(matches!(
            manager.populate().await,
            Err(ServiceWorkerError::PopulationFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let fetcher = fetcher_with_manifest();
        let (manager, _rx) = manager(CachePolicy::PrecacheOnly, Arc::clone(&fetcher));
        manager.populate().await.unwrap();
        fetcher.set_offline(true);

        let hit = manager.resolve(get("https://fixflow.app/index.html")).await.unwrap();
        assert!(hit.from_cache);
        assert_eq!(hit.response.text().unwrap(), "<index>");
        assert_eq!(fetcher.calls("https://fixflow.app/index.html"), 1);
    }

    #[tokio::test]
    async fn test_miss_without_network_is_network_miss() {
        let fetcher = fetcher_with_manifest();
        let (manager, _rx) = manager(CachePolicy::PrecacheOnly, Arc::clone(&fetcher));
        fetcher.set_offline(true);

        let err = manager.resolve(get("https://fixflow.app/jobs.html")).await.unwrap_err();
        assert!(matches!(err, ServiceWorkerError::NetworkMiss { .. }));
    }

    #[tokio::test]
    async fn test_precache_only_never_writes_back() {
        let fetcher = fetcher_with_manifest();
        fetcher.route("https://fixflow.app/jobs.html", StatusCode::OK, "<jobs>");
        let (manager, _rx) = manager(CachePolicy::PrecacheOnly, Arc::clone(&fetcher));

        for _ in 0..2 {
            let response = manager.resolve(get("https://fixflow.app/jobs.html")).await.unwrap();
            assert!(!response.from_cache);
        }
        assert_eq!(fetcher.calls("https://fixflow.app/jobs.html"), 2);
    }

    #[tokio::test]
    async fn test_runtime_policy_caches_same_origin_200() {
        let fetcher = fetcher_with_manifest();
        fetcher.route("https://fixflow.app/jobs.html", StatusCode::OK, "<jobs>");
        let (manager, _rx) = manager(CachePolicy::PrecacheAndRuntime, Arc::clone(&fetcher));

        let first = manager.resolve(get("https://fixflow.app/jobs.html")).await.unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.response.text().unwrap(), "<jobs>");

        let second = manager.resolve(get("https://fixflow.app/jobs.html")).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.response.text().unwrap(), "<jobs>");
        assert_eq!(fetcher.calls("https://fixflow.app/jobs.html"), 1);
    }

    #[tokio::test]
    async fn test_runtime_policy_skips_uncacheable_responses() {
        let fetcher = fetcher_with_manifest();
        fetcher.route("https://fixflow.app/missing", StatusCode::NOT_FOUND, "");
        let opaque_url = Url::parse("https://fonts.example/font.woff2").unwrap();
        fetcher.route_response(
            Response::new(opaque_url, StatusCode::OK, "woff").with_type(ResponseType::Opaque),
        );
        let moved_url = Url::parse("https://fixflow.app/moved").unwrap();
        fetcher.route_response(
            Response::new(moved_url, StatusCode::OK, "moved").with_redirected(true),
        );
        let (manager, _rx) = manager(CachePolicy::PrecacheAndRuntime, Arc::clone(&fetcher));

        for url in [
            "https://fixflow.app/missing",
            "https://fonts.example/font.woff2",
            "https://fixflow.app/moved",
        ] {
            let response = manager.resolve(get(url)).await.unwrap();
            assert!(!response.from_cache);
            let caches = manager.caches();
            assert!(caches.read().await.match_in("fixflow-cache-v2", url).is_none());
        }
        assert_eq!(
            manager.resolve(get("https://fixflow.app/missing")).await.unwrap().response.status,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_network_only_pattern_ignores_cache() {
        let fetcher = fetcher_with_manifest();
        fetcher.route("https://fixflow.app/api/jobs", StatusCode::OK, "fresh");
        let mut cfg = config(CachePolicy::PrecacheAndRuntime);
        cfg.network_only = vec![UrlPattern::contains("/api/")];
        let (manager, _rx) =
            AssetCacheManager::new(cfg, Arc::clone(&fetcher) as Arc<dyn Fetcher>, CacheStorage::new())
                .unwrap();

        let stale_url = Url::parse("https://fixflow.app/api/jobs").unwrap();
        let stale = Response::new(stale_url.clone(), StatusCode::OK, "stale");
        manager
            .caches()
            .write()
            .await
            .put(
                "fixflow-cache-v2",
                CacheEntry::from_response(&stale_url, &Method::GET, &stale),
            )
            .await
            .unwrap();

        for _ in 0..2 {
            let response = manager.resolve(get("https://fixflow.app/api/jobs")).await.unwrap();
            assert!(!response.from_cache);
            assert_eq!(response.response.text().unwrap(), "fresh");
        }
        assert_eq!(fetcher.calls("https://fixflow.app/api/jobs"), 2);
        let caches = manager.caches();
        let caches = caches.read().await;
        let entry = caches
            .match_in("fixflow-cache-v2", "https://fixflow.app/api/jobs")
            .unwrap();
        assert_eq!(&entry.body[..], b"stale");
    }

    #[tokio::test]
    async fn test_post_bypasses_cache() {
        let fetcher = fetcher_with_manifest();
        let (manager, _rx) = manager(CachePolicy::PrecacheAndRuntime, Arc::clone(&fetcher));
        manager.populate().await.unwrap();

        let url = Url::parse("https://fixflow.app/index.html").unwrap();
        let response = manager.resolve(Request::new(Method::POST, url)).await.unwrap();
        assert!(!response.from_cache);
        assert_eq!(fetcher.calls("https://fixflow.app/index.html"), 2);
    }

    #[tokio::test]
    async fn test_evict_keeps_only_current() {
        let fetcher = fetcher_with_manifest();
        let (manager, mut rx) = manager(CachePolicy::PrecacheOnly, fetcher);
        {
            let caches = manager.caches();
            let mut caches = caches.write().await;
            caches.open("fixflow-cache-v0").await.unwrap();
            caches.open("fixflow-cache-v1").await.unwrap();
            caches.open("fixflow-cache-v2").await.unwrap();
        }

        let deleted = manager.evict("fixflow-cache-v2").await;
        assert_eq!(deleted, vec!["fixflow-cache-v0", "fixflow-cache-v1"]);
        assert_eq!(manager.caches().read().await.keys(), vec!["fixflow-cache-v2"]);

        assert_eq!(
            rx.recv().await,
            Some(WorkerEvent::CacheDeleted {
                name: "fixflow-cache-v0".into()
            })
        );
    }

    #[tokio::test]
    async fn test_push_then_click_opens_target() {
        let (manager, mut rx) = manager(CachePolicy::PrecacheOnly, fetcher_with_manifest());

        let id = manager
            .notify_push(Some(br#"{"title":"Job done","url":"/page"}"#.as_slice()))
            .await
            .unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(WorkerEvent::NotificationShown { ref title, .. }) if title == "Job done"
        ));

        let notification = manager.notification(id).await.unwrap();
        let client = manager.on_notification_click(&notification).await.unwrap();
        assert_eq!(client.url.as_str(), "https://fixflow.app/page");
        assert!(manager.notifications().await.is_empty());
        assert_eq!(rx.recv().await, Some(WorkerEvent::NotificationClosed { id }));
        assert_eq!(manager.windows().await.len(), 1);
    }

    #[tokio::test]
    async fn test_click_without_url_opens_entry_page() {
        let (manager, _rx) = manager(CachePolicy::PrecacheOnly, fetcher_with_manifest());
        let id = manager.notify_push(Some(b"{}".as_slice())).await.unwrap();

        let notification = manager.notification(id).await.unwrap();
        let client = manager.on_notification_click(&notification).await.unwrap();
        assert_eq!(client.url.as_str(), "https://fixflow.app/index.html");
    }

    #[tokio::test]
    async fn test_bad_push_shows_nothing() {
        let (manager, _rx) = manager(CachePolicy::PrecacheOnly, fetcher_with_manifest());
        assert!(matches!(
            manager.notify_push(Some(b"{oops".as_slice())).await,
            Err(ServiceWorkerError::PushParse(_))
        ));
        assert!(manager.notifications().await.is_empty());
    }
}
