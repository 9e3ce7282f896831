//! Command-line host for the offline service worker.
//!
//! Runs the worker's lifecycle hooks against a directory of persisted
//! cache buckets.
//!
//! ## Usage
//!
//! ```bash
//! # Pre-cache the manifest and drop stale buckets
//! offline-host install
//!
//! # Resolve a request the way a controlled page would
//! offline-host fetch http://localhost:8080/index.html
//!
//! # Show a notification and click it
//! offline-host click --url /jobs/42
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use http::Method;
use offline_common::{init_logging, LogConfig, LogFormat};
use offline_net::{LoaderConfig, Request, ResourceLoader};
use offline_sw::{AssetCacheManager, CacheStorage, OfflineWorker, WorkerConfig};
use tracing::{debug, info};
use url::Url;

const APP_DIR: &str = "offline-kit";

#[derive(Parser)]
#[command(name = "offline-host")]
#[command(about = "Run offline cache lifecycle hooks from the command line")]
struct Cli {
    /// Worker config file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding cache buckets
    #[arg(short, long, global = true)]
    storage: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pre-cache the manifest, then activate and evict stale buckets
    Install,

    /// Resolve a request through the cache
    Fetch {
        /// Absolute URL to request
        url: String,
        /// HTTP method
        #[arg(short, long, default_value = "GET")]
        method: String,
    },

    /// Delete every bucket except the configured one, if it is populated
    Evict,

    /// Deliver a push message and print the notification
    Push {
        /// JSON payload; omit to send a message without data
        payload: Option<String>,
    },

    /// Show a notification and click it
    Click {
        /// Target URL; the entry page when omitted
        #[arg(long)]
        url: Option<String>,
    },

    /// List cache buckets and their entries
    Caches,

    /// Write the default config to a file
    InitConfig {
        /// Output path
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_verbosity(cli.verbose);
    if cli.json_logs {
        log_config = log_config.with_format(LogFormat::Json);
    }
    init_logging(log_config).context("Failed to initialize logging")?;

    let command = match cli.command {
        Commands::InitConfig { output } => return write_default_config(&output),
        command => command,
    };

    let config = load_config(cli.config.as_deref())?;
    let storage_dir = storage_dir(cli.storage, &config)?;
    let worker = build_worker(config, &storage_dir).await?;

    match command {
        Commands::Install => {
            let (assets, evicted) = worker.install_and_activate().await?;
            println!(
                "Installed {} ({} assets)",
                worker.manager().cache_name(),
                assets
            );
            for name in evicted {
                println!("Deleted {name}");
            }
        }
        Commands::Fetch { url, method } => {
            let method = Method::from_bytes(method.to_uppercase().as_bytes())
                .with_context(|| format!("Invalid method '{method}'"))?;
            let url = Url::parse(&url).with_context(|| format!("Invalid URL '{url}'"))?;
            let fetched = worker
                .manager()
                .resolve(Request::new(method, url))
                .await?;
            let source = if fetched.from_cache { "cache" } else { "network" };
            println!(
                "{} {} ({}, {} bytes)",
                fetched.response.status,
                fetched.response.url,
                source,
                fetched.response.body.len()
            );
        }
        Commands::Evict => {
            let manager = worker.manager();
            ensure_populated(&*manager.caches().read().await, manager.cache_name())?;
            for name in manager.evict(manager.cache_name()).await {
                println!("Deleted {name}");
            }
        }
        Commands::Push { payload } => {
            let Some(id) = worker.push(payload.as_deref().map(str::as_bytes)).await else {
                bail!("Push message was not shown");
            };
            let notification = worker
                .manager()
                .notification(id)
                .await
                .context("Notification disappeared")?;
            println!("{id}: {} - {}", notification.title, notification.body);
        }
        Commands::Click { url } => {
            let payload = serde_json::json!({ "url": url }).to_string();
            let Some(id) = worker.push(Some(payload.as_bytes())).await else {
                bail!("Push message was not shown");
            };
            let notification = worker
                .manager()
                .notification(id)
                .await
                .context("Notification disappeared")?;
            let client = worker.notification_click(notification).await?;
            println!("Opened {} at {}", client.id, client.url);
        }
        Commands::Caches => {
            let caches = worker.manager().caches();
            let caches = caches.read().await;
            for name in caches.keys() {
                let marker = if name == worker.manager().cache_name() { "*" } else { " " };
                let entries = caches.get(&name).map(|c| c.keys()).unwrap_or_default();
                println!("{marker} {name} ({} entries)", entries.len());
                for url in entries {
                    println!("    {url}");
                }
            }
        }
        Commands::InitConfig { output } => write_default_config(&output)?,
    }

    Ok(())
}

/// Refuse to drop older buckets while the current one holds nothing to serve.
fn ensure_populated(caches: &CacheStorage, current: &str) -> Result<()> {
    match caches.get(current) {
        Some(cache) if !cache.is_empty() => Ok(()),
        Some(_) => bail!("Cache '{current}' is empty; run install before evicting"),
        None => bail!("Cache '{current}' does not exist; run install before evicting"),
    }
}

fn write_default_config(output: &Path) -> Result<()> {
    WorkerConfig::default()
        .save(output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Wrote default config to {}", output.display());
    Ok(())
}

/// Load `path`, or the per-user config if present, or the defaults.
fn load_config(path: Option<&Path>) -> Result<WorkerConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match dirs::config_dir().map(|d| d.join(APP_DIR).join("config.json")) {
            Some(path) if path.exists() => path,
            _ => {
                debug!("No config file, using defaults");
                return Ok(WorkerConfig::default());
            }
        },
    };

    info!(path = %path.display(), "Loading config");
    WorkerConfig::load(&path).with_context(|| format!("Failed to load {}", path.display()))
}

/// Command line beats config; otherwise the per-user cache directory.
fn storage_dir(flag: Option<PathBuf>, config: &WorkerConfig) -> Result<PathBuf> {
    if let Some(dir) = flag.or_else(|| config.storage_dir.clone()) {
        return Ok(dir);
    }
    dirs::cache_dir()
        .map(|d| d.join(APP_DIR).join("caches"))
        .context("No cache directory available; pass --storage")
}

async fn build_worker(config: WorkerConfig, storage_dir: &Path) -> Result<OfflineWorker> {
    let loader = ResourceLoader::new(LoaderConfig {
        default_timeout: config.request_timeout(),
        origin: Some(config.scope_url()?),
        ..Default::default()
    })?;
    let storage = CacheStorage::open_dir(storage_dir)
        .await
        .with_context(|| format!("Failed to open {}", storage_dir.display()))?;

    let (manager, _events) = AssetCacheManager::new(config, Arc::new(loader), storage)?;
    Ok(OfflineWorker::new(manager))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use offline_net::Response;
    use offline_sw::CacheEntry;
    use tempfile::TempDir;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "offline-host",
            "fetch",
            "http://localhost:8080/",
            "-vv",
            "--storage",
            "/tmp/buckets",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.storage, Some(PathBuf::from("/tmp/buckets")));
        assert!(matches!(cli.command, Commands::Fetch { ref method, .. } if method == "GET"));
    }

    #[tokio::test]
    async fn test_evict_requires_populated_current_bucket() {
        let mut caches = CacheStorage::new();
        assert!(ensure_populated(&caches, "fixflow-cache-v2").is_err());

        caches.open("fixflow-cache-v2").await.unwrap();
        assert!(ensure_populated(&caches, "fixflow-cache-v2").is_err());

        let url = Url::parse("http://localhost:8080/index.html").unwrap();
        let response = Response::new(url.clone(), http::StatusCode::OK, "<index>");
        caches
            .put(
                "fixflow-cache-v2",
                CacheEntry::from_response(&url, &Method::GET, &response),
            )
            .await
            .unwrap();
        assert!(ensure_populated(&caches, "fixflow-cache-v2").is_ok());
    }

    #[test]
    fn test_storage_dir_precedence() {
        let mut config = WorkerConfig::default();
        config.storage_dir = Some(PathBuf::from("/from/config"));

        let dir = storage_dir(Some(PathBuf::from("/from/flag")), &config).unwrap();
        assert_eq!(dir, PathBuf::from("/from/flag"));

        let dir = storage_dir(None, &config).unwrap();
        assert_eq!(dir, PathBuf::from("/from/config"));
    }

    #[test]
    fn test_load_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"cache_name": "fixflow-cache-v9"}"#).unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.cache_name, "fixflow-cache-v9");
        assert!(load_config(Some(&dir.path().join("missing.json"))).is_err());
    }
}
