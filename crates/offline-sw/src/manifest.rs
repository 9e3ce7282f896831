//! The fixed list of assets pre-cached for one deployed version.

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, ServiceWorkerError};

/// Assets the FixFlow PWA needs offline.
pub const FIXFLOW_ASSETS: &[&str] = &[
    "./",
    "./index.html",
    "./manifest.json",
    "./icon-192.png",
    "https://cdn.tailwindcss.com",
    "https://fonts.googleapis.com/css2?family=Kanit:wght@300;400;500;700&display=swap",
    "https://fonts.gstatic.com/s/kanit/v15/nKKX-Go_rpPzWzF.woff2",
    "https://unpkg.com/lucide@latest",
];

/// Ordered asset URLs, relative entries resolved against the worker scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetManifest {
    urls: Vec<String>,
}

impl AssetManifest {
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
        }
    }

    /// The manifest shipped with the FixFlow app.
    pub fn fixflow() -> Self {
        Self::new(FIXFLOW_ASSETS.iter().copied())
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.urls.iter().map(String::as_str)
    }

    /// Resolve every entry against `scope`, keeping declaration order.
    ///
    /// Two entries that resolve to the same URL are rejected.
    pub fn resolve(&self, scope: &Url) -> Result<Vec<Url>> {
        let mut seen = HashSet::with_capacity(self.urls.len());
        let mut resolved = Vec::with_capacity(self.urls.len());

        for entry in &self.urls {
            let url = scope
                .join(entry)
                .map_err(|e| ServiceWorkerError::InvalidUrl(format!("{entry}: {e}")))?;
            if !seen.insert(url.clone()) {
                return Err(ServiceWorkerError::Config(format!(
                    "Duplicate manifest entry: {url}"
                )));
            }
            resolved.push(url);
        }

        Ok(resolved)
    }
}

impl Default for AssetManifest {
    fn default() -> Self {
        Self::fixflow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Url {
        Url::parse("https://fixflow.app/app/").unwrap()
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let manifest = AssetManifest::new(["./", "./index.html", "https://cdn.tailwindcss.com"]);
        let urls = manifest.resolve(&scope()).unwrap();

        assert_eq!(urls[0].as_str(), "https://fixflow.app/app/");
        assert_eq!(urls[1].as_str(), "https://fixflow.app/app/index.html");
        assert_eq!(urls[2].as_str(), "https://cdn.tailwindcss.com/");
    }

    #[test]
    fn test_fixflow_manifest_resolves() {
        let manifest = AssetManifest::fixflow();
        assert_eq!(manifest.len(), 8);
        let urls = manifest.resolve(&scope()).unwrap();
        assert_eq!(urls.len(), 8);
        assert!(urls[5].as_str().contains("family=Kanit"));
    }

    #[test]
    fn test_duplicate_entries_rejected() {
        let manifest = AssetManifest::new(["./index.html", "index.html"]);
        assert!(matches!(
            manifest.resolve(&scope()),
            Err(ServiceWorkerError::Config(_))
        ));
    }

    #[test]
    fn test_manifest_is_a_plain_json_list() {
        let manifest: AssetManifest = serde_json::from_str(r#"["./", "./app.js"]"#).unwrap();
        assert_eq!(manifest.iter().collect::<Vec<_>>(), vec!["./", "./app.js"]);
    }
}
