//! Event dispatch table.
//!
//! Every lifecycle hook goes through an [`EventDispatcher`] keyed by
//! [`EventKind`]. The [`AssetCacheManager`] handles all kinds by default;
//! individual kinds can be overridden by registering another handler.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use offline_net::Request;
use tracing::trace;

use crate::clients::Client;
use crate::error::{Result, ServiceWorkerError};
use crate::manager::{AssetCacheManager, FetchResponse};
use crate::notification::{Notification, NotificationId};

/// Kinds of event a worker can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
    Push,
    NotificationClick,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Install,
        EventKind::Activate,
        EventKind::Fetch,
        EventKind::Push,
        EventKind::NotificationClick,
    ];
}

/// An event and its payload.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Install,
    Activate,
    Fetch(Request),
    Push(Option<Bytes>),
    NotificationClick(Notification),
}

impl LifecycleEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            LifecycleEvent::Install => EventKind::Install,
            LifecycleEvent::Activate => EventKind::Activate,
            LifecycleEvent::Fetch(_) => EventKind::Fetch,
            LifecycleEvent::Push(_) => EventKind::Push,
            LifecycleEvent::NotificationClick(_) => EventKind::NotificationClick,
        }
    }
}

/// What a handler produced.
#[derive(Debug, Clone)]
pub enum EventOutcome {
    /// Number of assets pre-cached.
    Installed { assets: usize },
    /// Buckets removed during activation.
    Activated { evicted: Vec<String> },
    Response(FetchResponse),
    Notified(NotificationId),
    WindowOpened(Client),
}

/// Handles one or more event kinds.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: LifecycleEvent) -> Result<EventOutcome>;
}

#[async_trait]
impl EventHandler for AssetCacheManager {
    async fn handle(&self, event: LifecycleEvent) -> Result<EventOutcome> {
        match event {
            LifecycleEvent::Install => {
                let assets = self.populate().await?;
                Ok(EventOutcome::Installed { assets })
            }
            LifecycleEvent::Activate => {
                let evicted = self.evict(self.cache_name()).await;
                Ok(EventOutcome::Activated { evicted })
            }
            LifecycleEvent::Fetch(request) => self.resolve(request).await.map(EventOutcome::Response),
            LifecycleEvent::Push(data) => self
                .notify_push(data.as_deref())
                .await
                .map(EventOutcome::Notified),
            LifecycleEvent::NotificationClick(notification) => self
                .on_notification_click(&notification)
                .await
                .map(EventOutcome::WindowOpened),
        }
    }
}

/// Maps event kinds to handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<EventKind, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table routing every kind to `handler`.
    pub fn with_default(handler: Arc<dyn EventHandler>) -> Self {
        let mut dispatcher = Self::new();
        for kind in EventKind::ALL {
            dispatcher.register(kind, Arc::clone(&handler));
        }
        dispatcher
    }

    /// Register a handler, returning the one it replaced.
    pub fn register(
        &mut self,
        kind: EventKind,
        handler: Arc<dyn EventHandler>,
    ) -> Option<Arc<dyn EventHandler>> {
        self.handlers.insert(kind, handler)
    }

    pub fn has_handler(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub async fn dispatch(&self, event: LifecycleEvent) -> Result<EventOutcome> {
        let kind = event.kind();
        let handler = self.handlers.get(&kind).ok_or_else(|| {
            ServiceWorkerError::NotFound(format!("No handler registered for {kind:?}"))
        })?;
        trace!(?kind, "Dispatching event");
        handler.handle(event).await
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&EventKind> = self.handlers.keys().collect();
        kinds.sort_by_key(|k| format!("{k:?}"));
        f.debug_struct("EventDispatcher")
            .field("kinds", &kinds)
            .finish()
    }
}
