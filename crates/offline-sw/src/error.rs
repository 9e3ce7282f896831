//! Error types for the offline cache.

use offline_net::NetError;
use thiserror::Error;

use crate::lifecycle::ServiceWorkerId;

/// Result type alias for cache and lifecycle operations.
pub type Result<T> = std::result::Result<T, ServiceWorkerError>;

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    /// A manifest asset could not be stored; the install step is rejected.
    #[error("Population failed for {url}: {reason}")]
    PopulationFailed { url: String, reason: String },

    /// The network failed and the cache had nothing to offer.
    #[error("Network request failed for {url}: {source}")]
    NetworkMiss {
        url: String,
        #[source]
        source: NetError,
    },

    #[error("Failed to delete cache '{name}': {reason}")]
    EvictionFailed { name: String, reason: String },

    #[error("Push payload error: {0}")]
    PushParse(String),

    #[error("State error: {0}")]
    StateError(String),

    /// A newer install started before this one finished.
    #[error("Install of {0} was superseded by a newer version")]
    Superseded(ServiceWorkerId),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceWorkerError {
    /// Short name used in log fields.
    pub fn category(&self) -> &'static str {
        match self {
            ServiceWorkerError::PopulationFailed { .. } => "population",
            ServiceWorkerError::NetworkMiss { .. } => "network_miss",
            ServiceWorkerError::EvictionFailed { .. } => "eviction",
            ServiceWorkerError::PushParse(_) => "push_parse",
            ServiceWorkerError::StateError(_) => "state",
            ServiceWorkerError::Superseded(_) => "superseded",
            ServiceWorkerError::CacheError(_) => "cache",
            ServiceWorkerError::Config(_) => "config",
            ServiceWorkerError::InvalidUrl(_) => "invalid_url",
            ServiceWorkerError::NotFound(_) => "not_found",
            ServiceWorkerError::Io(_) => "io",
        }
    }
}
