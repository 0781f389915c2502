//! Cover image storage.
//!
//! Covers are addressed by filename only. Writes are "write if absent" and
//! best-effort: the lookup never waits for them and never fails because of
//! them.

use crate::error::FolioError;
use crate::metrics::SharedMetrics;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

static COVER_FILENAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+\.[A-Za-z0-9]+$").expect("valid cover filename regex"));

/// Distinguishes temp files of concurrent writes within one process.
static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// What a persist call ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Written { bytes: usize },
    AlreadyPresent,
}

#[async_trait]
pub trait AssetSink: Send + Sync + 'static {
    /// Store the bytes behind `url` as `filename` unless that file already exists.
    async fn persist(&self, url: &str, filename: &str) -> Result<PersistOutcome, FolioError>;
}

/// Derive the canonical cover filename from the trailing path segment of `url`.
///
/// Query string and fragment are ignored. Fails with `DataIntegrity` when the
/// segment is not a plain `name.ext` filename.
pub fn cover_filename(url: &str) -> Result<String, FolioError> {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let path = without_fragment.split('?').next().unwrap_or(without_fragment);
    let segment = path.rsplit('/').next().unwrap_or(path);

    if COVER_FILENAME.is_match(segment) {
        Ok(segment.to_string())
    } else {
        Err(FolioError::DataIntegrity(format!(
            "cannot derive a cover filename from {}",
            url
        )))
    }
}

/// Hand a cover to `sink` on a detached task.
///
/// Not awaited by anyone; errors are logged and dropped, and the write may not
/// finish before process shutdown.
pub fn spawn_persist(
    sink: Arc<dyn AssetSink>,
    url: String,
    filename: String,
    metrics: Option<SharedMetrics>,
) {
    tokio::spawn(async move {
        let outcome = sink.persist(&url, &filename).await;
        let label = match &outcome {
            Ok(PersistOutcome::Written { bytes }) => {
                debug!(filename = %filename, bytes = bytes, "Cover image stored");
                "written"
            }
            Ok(PersistOutcome::AlreadyPresent) => {
                debug!(filename = %filename, "Cover image already present");
                "present"
            }
            Err(e) => {
                warn!(filename = %filename, url = %url, error = %e, "Failed to store cover image");
                "error"
            }
        };
        if let Some(metrics) = metrics {
            metrics.record_asset_write(label);
        }
    });
}

/// Stores covers as plain files inside one directory.
#[derive(Clone)]
pub struct DiskAssetSink {
    client: Client,
    dir: PathBuf,
}

impl DiskAssetSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `bytes` as `filename`, via a temp file and rename so readers
    /// never see a partial image.
    pub async fn write_if_absent(
        &self,
        filename: &str,
        bytes: &[u8],
    ) -> Result<PersistOutcome, FolioError> {
        if !COVER_FILENAME.is_match(filename) {
            return Err(FolioError::DataIntegrity(format!(
                "refusing to store cover under {:?}",
                filename
            )));
        }

        let target = self.dir.join(filename);
        if fs::try_exists(&target).await? {
            return Ok(PersistOutcome::AlreadyPresent);
        }

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| FolioError::Cache(format!("Failed to create image directory: {}", e)))?;

        let temp_path = self.dir.join(format!(
            ".{}.{}.{}.tmp",
            filename,
            std::process::id(),
            TEMP_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&temp_path, bytes)
            .await
            .map_err(|e| FolioError::Cache(format!("Failed to write temp image file: {}", e)))?;
        fs::rename(&temp_path, &target)
            .await
            .map_err(|e| FolioError::Cache(format!("Failed to rename image file: {}", e)))?;

        Ok(PersistOutcome::Written { bytes: bytes.len() })
    }
}

#[async_trait]
impl AssetSink for DiskAssetSink {
    async fn persist(&self, url: &str, filename: &str) -> Result<PersistOutcome, FolioError> {
        if fs::try_exists(self.dir.join(filename)).await? {
            return Ok(PersistOutcome::AlreadyPresent);
        }

        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FolioError::Upstream(format!("HTTP {} fetching cover", status)));
        }
        let bytes = resp.bytes().await?;

        self.write_if_absent(filename, &bytes).await
    }
}
