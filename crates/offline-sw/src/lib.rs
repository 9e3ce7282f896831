//! # Offline Service Worker
//!
//! Versioned offline asset cache driven by service-worker style lifecycle
//! hooks.
//!
//! ## Features
//!
//! - **Install**: pre-cache a manifest of assets, all or nothing
//! - **Activate**: delete every bucket but the current version
//! - **Fetch**: cache first, network fallback, optional runtime caching
//! - **Push**: show notifications from JSON push payloads
//! - **Notification click**: open a window at the notification's target
//!
//! ## Architecture
//!
//! ```text
//! OfflineWorker
//!     │
//!     ├── Registration
//!     │       ├── installing (ServiceWorker)
//!     │       ├── waiting (ServiceWorker)
//!     │       └── active (ServiceWorker)
//!     │
//!     └── EventDispatcher
//!             └── EventKind → EventHandler (AssetCacheManager)
//!                                 ├── CacheStorage
//!                                 │       └── Cache
//!                                 │               └── URL → CacheEntry
//!                                 ├── NotificationCenter
//!                                 ├── Clients
//!                                 └── Fetcher (network)
//! ```

pub mod cache;
pub mod clients;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod manager;
pub mod manifest;
pub mod notification;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use cache::{Cache, CacheEntry, CacheStorage, HeaderField};
pub use clients::{Client, Clients};
pub use config::{CachePolicy, NotificationDefaults, WorkerConfig};
pub use dispatch::{EventDispatcher, EventHandler, EventKind, EventOutcome, LifecycleEvent};
pub use error::{Result, ServiceWorkerError};
pub use lifecycle::{Registration, ServiceWorker, ServiceWorkerId, ServiceWorkerState, StateChange};
pub use manager::{AssetCacheManager, FetchResponse, WorkerEvent};
pub use manifest::{AssetManifest, FIXFLOW_ASSETS};
pub use notification::{Notification, NotificationCenter, NotificationData, NotificationId, PushPayload};
pub use worker::OfflineWorker;
