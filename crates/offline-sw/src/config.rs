//! Worker configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use offline_net::UrlPattern;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, ServiceWorkerError};
use crate::manifest::AssetManifest;

/// What happens to network responses on a cache miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Only install-time assets are cached; misses are never written back.
    #[default]
    PrecacheOnly,
    /// Same-origin 200 responses are also written into the current bucket.
    PrecacheAndRuntime,
}

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Versioned name of the current cache bucket.
    pub cache_name: String,

    /// Scope URL; relative manifest entries and click targets resolve here.
    pub scope: String,

    /// Assets cached on install.
    pub manifest: AssetManifest,

    /// Runtime caching policy.
    pub policy: CachePolicy,

    /// Requests matching any of these always go to the network.
    pub network_only: Vec<UrlPattern>,

    /// Fallback notification content.
    pub notifications: NotificationDefaults,

    /// Page opened when a clicked notification carries no URL.
    pub entry_page: String,

    /// Where buckets are persisted; in memory when unset.
    pub storage_dir: Option<PathBuf>,

    /// Per-request network timeout in seconds.
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_name: "fixflow-cache-v1".to_string(),
            scope: "http://localhost:8080/".to_string(),
            manifest: AssetManifest::fixflow(),
            policy: CachePolicy::PrecacheOnly,
            network_only: vec![UrlPattern::contains("/api/")],
            notifications: NotificationDefaults::default(),
            entry_page: "./index.html".to_string(),
            storage_dir: None,
            request_timeout_secs: 30,
        }
    }
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            title: "FixFlow Notification".to_string(),
            body: "You have a new update.".to_string(),
            icon: "./icon-192.png".to_string(),
            badge: "./icon-72.png".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Load and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents).map_err(|e| {
            ServiceWorkerError::Config(format!("{}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| ServiceWorkerError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Parsed scope URL.
    pub fn scope_url(&self) -> Result<Url> {
        let scope = Url::parse(&self.scope)
            .map_err(|e| ServiceWorkerError::Config(format!("Invalid scope '{}': {}", self.scope, e)))?;
        if scope.cannot_be_a_base() {
            return Err(ServiceWorkerError::Config(format!(
                "Scope '{}' cannot resolve relative URLs",
                self.scope
            )));
        }
        Ok(scope)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Check everything that would otherwise fail at install time.
    pub fn validate(&self) -> Result<()> {
        if self.cache_name.trim().is_empty() {
            return Err(ServiceWorkerError::Config("cache_name must not be empty".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ServiceWorkerError::Config(
                "request_timeout_secs must be positive".into(),
            ));
        }
        let scope = self.scope_url()?;
        self.manifest.resolve(&scope)?;
        scope
            .join(&self.entry_page)
            .map_err(|e| ServiceWorkerError::Config(format!("Invalid entry_page: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_is_fixflow() {
        let config = WorkerConfig::default();
        assert_eq!(config.cache_name, "fixflow-cache-v1");
        assert_eq!(config.policy, CachePolicy::PrecacheOnly);
        assert_eq!(config.notifications.title, "FixFlow Notification");
        assert_eq!(config.entry_page, "./index.html");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: WorkerConfig = serde_json::from_str(
            r#"{
                "cache_name": "notes-cache-v3",
                "policy": "precache_and_runtime",
                "network_only": [{"prefix": "https://notes.example/api"}]
            }"#,
        )
        .unwrap();

        assert_eq!(config.cache_name, "notes-cache-v3");
        assert_eq!(config.policy, CachePolicy::PrecacheAndRuntime);
        assert_eq!(config.network_only.len(), 1);
        assert_eq!(config.manifest, AssetManifest::fixflow());
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = WorkerConfig {
            cache_name: "  ".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ServiceWorkerError::Config(_))));

        let config = WorkerConfig {
            scope: "not a url".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ServiceWorkerError::Config(_))));

        let config = WorkerConfig {
            scope: "mailto:ops@fixflow.app".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ServiceWorkerError::Config(_))));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("worker.json");

        let config = WorkerConfig {
            cache_name: "fixflow-cache-v2".into(),
            policy: CachePolicy::PrecacheAndRuntime,
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = WorkerConfig::load(&path).unwrap();
        assert_eq!(loaded.cache_name, "fixflow-cache-v2");
        assert_eq!(loaded.policy, CachePolicy::PrecacheAndRuntime);
    }

    #[test]
    fn test_load_reports_path_on_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = WorkerConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("broken.json"));
    }
}
