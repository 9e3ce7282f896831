//! The offline worker: lifecycle state plus event dispatch.

use std::sync::Arc;

use bytes::Bytes;
use offline_net::Request;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::clients::Client;
use crate::dispatch::{EventDispatcher, EventHandler, EventKind, EventOutcome, LifecycleEvent};
use crate::error::{Result, ServiceWorkerError};
use crate::lifecycle::{Registration, ServiceWorkerState, StateChange};
use crate::manager::{AssetCacheManager, FetchResponse};
use crate::notification::{Notification, NotificationId};

/// Drives an [`AssetCacheManager`] through install and activate, and routes
/// fetch, push and click events once active.
pub struct OfflineWorker {
    manager: Arc<AssetCacheManager>,
    dispatcher: EventDispatcher,
    registration: RwLock<Registration>,
}

impl OfflineWorker {
    pub fn new(manager: AssetCacheManager) -> Self {
        let manager = Arc::new(manager);
        let dispatcher = EventDispatcher::with_default(manager.clone());
        let registration = RwLock::new(Registration::new(manager.scope().clone()));
        Self {
            manager,
            dispatcher,
            registration,
        }
    }

    /// Replace the handler for one event kind.
    pub fn with_handler(mut self, kind: EventKind, handler: Arc<dyn EventHandler>) -> Self {
        self.dispatcher.register(kind, handler);
        self
    }

    pub fn manager(&self) -> &Arc<AssetCacheManager> {
        &self.manager
    }

    /// State of the newest worker version, if any.
    pub async fn state(&self) -> Option<ServiceWorkerState> {
        self.registration.read().await.newest().map(|w| w.state)
    }

    /// Whether an activated worker controls the scope.
    pub async fn is_active(&self) -> bool {
        self.registration.read().await.controller().is_some()
    }

    fn report(&self, changes: impl IntoIterator<Item = StateChange>) {
        for change in changes {
            info!(
                worker = %change.worker_id,
                cache = %change.cache_name,
                state = %change.new_state,
                "Worker state changed"
            );
            self.manager.emit(change.into());
        }
    }

    /// Run the install step. On failure the new version is discarded and
    /// any active version keeps control.
    ///
    /// If another install starts before this one finishes, this one
    /// resolves as [`ServiceWorkerError::Superseded`] and leaves the newer
    /// install alone.
    pub async fn install(&self) -> Result<usize> {
        let (id, changes) = self
            .registration
            .write()
            .await
            .begin_install(self.manager.cache_name());
        self.report(changes);

        let result = match self.dispatcher.dispatch(LifecycleEvent::Install).await {
            Ok(EventOutcome::Installed { assets }) => Ok(assets),
            Ok(other) => Err(unexpected(EventKind::Install, &other)),
            Err(e) => Err(e),
        };

        let mut registration = self.registration.write().await;
        match result {
            Ok(assets) => {
                let changes = registration.install_complete(id);
                drop(registration);
                match changes {
                    Ok(changes) => {
                        self.report(changes);
                        Ok(assets)
                    }
                    Err(e) => {
                        warn!(worker = %id, "Install finished after a newer one started");
                        Err(e)
                    }
                }
            }
            Err(e) => {
                error!(worker = %id, error = %e, category = e.category(), "Install failed");
                let change = registration.install_failed(id, e.to_string());
                drop(registration);
                if let Ok(change) = change {
                    self.report([change]);
                }
                Err(e)
            }
        }
    }

    /// Activate the waiting version and evict stale buckets.
    ///
    /// Eviction problems never block activation.
    pub async fn activate(&self) -> Result<Vec<String>> {
        let (_, changes) = self.registration.write().await.begin_activation()?;
        self.report(changes);

        let evicted = match self.dispatcher.dispatch(LifecycleEvent::Activate).await {
            Ok(EventOutcome::Activated { evicted }) => evicted,
            Ok(other) => {
                warn!(error = %unexpected(EventKind::Activate, &other), "Activate handler misbehaved");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "Activate handler failed");
                Vec::new()
            }
        };

        let change = self.registration.write().await.activation_complete()?;
        self.report([change]);
        Ok(evicted)
    }

    /// Install then activate.
    pub async fn install_and_activate(&self) -> Result<(usize, Vec<String>)> {
        let assets = self.install().await?;
        let evicted = self.activate().await?;
        Ok((assets, evicted))
    }

    /// Answer a request. Without an active worker the request goes straight
    /// to the network.
    pub async fn fetch(&self, request: Request) -> Result<FetchResponse> {
        if !self.is_active().await {
            return self.manager.network_fetch(request).await;
        }
        match self.dispatcher.dispatch(LifecycleEvent::Fetch(request)).await? {
            EventOutcome::Response(response) => Ok(response),
            other => Err(unexpected(EventKind::Fetch, &other)),
        }
    }

    /// Deliver a push message. A malformed message shows nothing and is
    /// only logged.
    pub async fn push(&self, data: Option<&[u8]>) -> Option<NotificationId> {
        let event = LifecycleEvent::Push(data.map(Bytes::copy_from_slice));
        match self.dispatcher.dispatch(event).await {
            Ok(EventOutcome::Notified(id)) => Some(id),
            Ok(other) => {
                warn!(error = %unexpected(EventKind::Push, &other), "Push handler misbehaved");
                None
            }
            Err(e) => {
                warn!(error = %e, "Push message ignored");
                None
            }
        }
    }

    /// Handle a click on a shown notification.
    pub async fn notification_click(&self, notification: Notification) -> Result<Client> {
        let event = LifecycleEvent::NotificationClick(notification);
        match self.dispatcher.dispatch(event).await? {
            EventOutcome::WindowOpened(client) => Ok(client),
            other => Err(unexpected(EventKind::NotificationClick, &other)),
        }
    }

    /// Route any event through the lifecycle-aware entry points above.
    pub async fn dispatch(&self, event: LifecycleEvent) -> Result<EventOutcome> {
        match event {
            LifecycleEvent::Install => {
                let assets = self.install().await?;
                Ok(EventOutcome::Installed { assets })
            }
            LifecycleEvent::Activate => {
                let evicted = self.activate().await?;
                Ok(EventOutcome::Activated { evicted })
            }
            LifecycleEvent::Fetch(request) => self.fetch(request).await.map(EventOutcome::Response),
            LifecycleEvent::Push(data) => self
                .push(data.as_deref())
                .await
                .map(EventOutcome::Notified)
                .ok_or_else(|| ServiceWorkerError::PushParse("push message ignored".into())),
            LifecycleEvent::NotificationClick(notification) => self
                .notification_click(notification)
                .await
                .map(EventOutcome::WindowOpened),
        }
    }

    /// Retire every worker version. Buckets are left on disk.
    pub async fn unregister(&self) {
        let changes = self.registration.write().await.unregister();
        self.report(changes);
    }
}

fn unexpected(kind: EventKind, outcome: &EventOutcome) -> ServiceWorkerError {
    ServiceWorkerError::StateError(format!(
        "{kind:?} handler returned an unexpected outcome: {outcome:?}"
    ))
}
