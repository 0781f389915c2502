//! The single background worker that drains the lookup queue.
//!
//! Requests are served strictly one at a time in FIFO order, with a fixed
//! pause after every request (success or failure). That pause is the whole
//! rate limit towards the catalog API.

use crate::cache::{isbn_key, CacheStore};
use crate::error::FolioError;
use crate::lookup::pending::PendingRequest;
use crate::lookup::queue::QueueConsumer;
use crate::metrics::SharedMetrics;
use crate::services::assets::{cover_filename, spawn_persist, AssetSink};
use crate::services::catalog::{BookDetails, CatalogClient};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

pub struct LookupWorker {
    consumer: QueueConsumer,
    cache: Arc<dyn CacheStore>,
    catalog: Arc<dyn CatalogClient>,
    assets: Arc<dyn AssetSink>,
    interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
    metrics: Option<SharedMetrics>,
}

impl LookupWorker {
    /// Takes ownership of the queue's only consumer, so at most one worker
    /// can ever exist per queue.
    pub fn new(
        consumer: QueueConsumer,
        cache: Arc<dyn CacheStore>,
        catalog: Arc<dyn CatalogClient>,
        assets: Arc<dyn AssetSink>,
        interval: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            consumer,
            cache,
            catalog,
            assets,
            interval,
            shutdown_rx,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run until shutdown is signalled (or the signal sender is dropped).
    pub async fn run(mut self) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            capacity = self.consumer.queue().capacity(),
            "Starting lookup worker"
        );

        loop {
            if *self.shutdown_rx.borrow() {
                info!("Lookup worker received shutdown signal");
                break;
            }

            let request = tokio::select! {
                next = self.consumer.next() => match next {
                    Some(request) => request,
                    None => break,
                },
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            self.process(&request).await;
            sleep(self.interval).await;
        }

        let failed = self.consumer.close();
        info!(failed_requests = failed, "Lookup worker stopped");
    }

    async fn process(&self, request: &Arc<PendingRequest>) {
        let isbn = request.key();
        let waited = request.age();
        if let Some(metrics) = &self.metrics {
            metrics.record_queue_wait(waited.as_secs_f64());
        }

        debug!(
            isbn = %isbn,
            waited_ms = waited.as_millis() as u64,
            followers = request.follower_count(),
            "Processing lookup"
        );

        let start = Instant::now();
        let outcome = self.fetch(isbn).await.map(Arc::new);
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match &outcome {
            Ok(details) => {
                debug!(isbn = %isbn, elapsed_ms = elapsed_ms, "Lookup fetched");
                self.write_through(isbn, details).await;
            }
            Err(e) => warn!(isbn = %isbn, elapsed_ms = elapsed_ms, error = %e, "Lookup failed"),
        }

        let delivered = self.consumer.queue().complete(request, outcome);
        debug!(isbn = %isbn, delivered = delivered, "Lookup settled");

        if let Some(metrics) = &self.metrics {
            metrics.update_queue_metrics(self.consumer.queue());
        }
    }

    /// Cache a fetched result before any waiter is released, so it lands even
    /// if every caller has gone away.
    async fn write_through(&self, isbn: &str, details: &BookDetails) {
        let key = isbn_key(isbn);
        match serde_json::to_value(details) {
            Ok(value) => {
                if let Err(e) = self.cache.set(&key, &value, None).await {
                    warn!(isbn = %isbn, error = %e, "Failed to write lookup result to cache");
                }
            }
            Err(e) => warn!(isbn = %isbn, error = %e, "Failed to serialize lookup result"),
        }
    }

    /// One catalog call plus cover handling for a single identifier.
    async fn fetch(&self, isbn: &str) -> Result<BookDetails, FolioError> {
        let mut details = self.catalog.fetch(isbn).await?;

        let Some(url) = details.cover_url().map(str::to_string) else {
            return Ok(details);
        };

        match cover_filename(&url) {
            Ok(filename) => {
                spawn_persist(
                    self.assets.clone(),
                    url,
                    filename.clone(),
                    self.metrics.clone(),
                );
                details.photo_url = Some(filename);
            }
            Err(e) => {
                // Only the cover is lost; the metadata is still good.
                warn!(isbn = %isbn, error = %e, "Dropping unusable cover URL");
                details.photo_url = None;
            }
        }

        Ok(details)
    }
}
