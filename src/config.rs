use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Default spacing between two upstream catalog calls
const DEFAULT_INTERVAL_MS: u64 = 1000;

/// Default number of lookups that may wait for the worker
const DEFAULT_QUEUE_CAPACITY: usize = 15;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Base URL; the identifier is appended verbatim
    pub api_url: String,
    pub api_key: String,
    pub interval: Duration,
    pub queue_capacity: usize,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AssetConfig {
    pub image_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How often expired cache entries are swept
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub catalog: CatalogConfig,
    pub assets: AssetConfig,
    pub cache: CacheConfig,
    /// Enable debug logging for upstream requests (set via CLI)
    pub debug_requests: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let api_key =
            env::var("CATALOG_API_KEY").context("CATALOG_API_KEY is required")?;

        let queue_capacity = parse_or("CATALOG_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY);
        if queue_capacity == 0 {
            bail!("CATALOG_QUEUE_CAPACITY must be greater than zero");
        }

        Ok(Self {
            server: ServerConfig {
                port: env::var("PORT")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()
                    .context("PORT must be a valid port number")?,
            },
            catalog: CatalogConfig {
                api_url: env::var("CATALOG_API_URL").context("CATALOG_API_URL is required")?,
                api_key,
                interval: Duration::from_millis(parse_or("CATALOG_INTERVAL_MS", DEFAULT_INTERVAL_MS)),
                queue_capacity,
                timeout: Duration::from_secs(parse_or("CATALOG_TIMEOUT_SECS", 30)),
            },
            assets: AssetConfig {
                image_dir: env::var("BOOK_IMAGE_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("public/images/books")),
            },
            cache: CacheConfig {
                sweep_interval: Duration::from_secs(parse_or("CACHE_SWEEP_SECS", 300)),
            },
            debug_requests: false, // Set by CLI args in main.rs
        })
    }
}

/// Read an env var, falling back to `default` when unset or unparseable.
fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
