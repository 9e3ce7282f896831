//! URL patterns for routing requests around the cache.

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

/// A pattern matched against the full serialized URL.
///
/// Serialized externally tagged, e.g. `{"contains": "/api/"}` or
/// `{"regex": "^https://api\\."}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlPattern {
    /// Exact URL match.
    Exact(String),
    /// Prefix match.
    Prefix(String),
    /// Suffix match.
    Suffix(String),
    /// Contains substring.
    Contains(String),
    /// Regular expression.
    Regex(#[serde(with = "regex_serde")] Regex),
}

impl UrlPattern {
    /// Create an exact match pattern.
    pub fn exact(url: &str) -> Self {
        Self::Exact(url.to_string())
    }

    /// Create a prefix match pattern.
    pub fn prefix(prefix: &str) -> Self {
        Self::Prefix(prefix.to_string())
    }

    /// Create a suffix match pattern.
    pub fn suffix(suffix: &str) -> Self {
        Self::Suffix(suffix.to_string())
    }

    /// Create a contains pattern.
    pub fn contains(substring: &str) -> Self {
        Self::Contains(substring.to_string())
    }

    /// Compile a regular expression pattern.
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Self::Regex)
    }

    /// Check if a URL matches this pattern.
    pub fn matches(&self, url: &Url) -> bool {
        let url_str = url.as_str();
        match self {
            UrlPattern::Exact(pattern) => url_str == pattern,
            UrlPattern::Prefix(pattern) => url_str.starts_with(pattern.as_str()),
            UrlPattern::Suffix(pattern) => url_str.ends_with(pattern.as_str()),
            UrlPattern::Contains(pattern) => url_str.contains(pattern.as_str()),
            UrlPattern::Regex(re) => re.is_match(url_str),
        }
    }
}

/// True if any pattern matches.
pub fn matches_any(patterns: &[UrlPattern], url: &Url) -> bool {
    patterns.iter().any(|p| p.matches(url))
}

mod regex_serde {
    use regex::Regex;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(re: &Regex, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(re.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Regex, D::Error> {
        let pattern = String::deserialize(deserializer)?;
        Regex::new(&pattern).map_err(serde::de::Error::custom)
    }
}
