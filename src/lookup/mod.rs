//! Book metadata lookup: cache-aside in front of a coalescing, rate-limited
//! queue towards the upstream catalog.
//!
//! ```text
//! lookup(isbn)
//!   -> cache hit?                  return it
//!   -> already in flight?          join as follower, wait
//!   -> admit (or ResourceExhausted), wait for the worker
//!   -> worker writes the result into the cache, then releases every waiter
//! ```

pub mod pending;
pub mod queue;
pub mod worker;

pub use pending::{LookupHandle, LookupOutcome, PendingRequest, Role};
pub use queue::{CoalescingQueue, QueueConsumer};
pub use worker::LookupWorker;

use crate::cache::{isbn_key, CacheStore};
use crate::error::FolioError;
use crate::metrics::SharedMetrics;
use crate::services::assets::AssetSink;
use crate::services::catalog::{BookDetails, CatalogClient};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

/// Queue sizing and pacing
#[derive(Debug, Clone)]
pub struct LookupSettings {
    pub capacity: usize,
    pub interval: Duration,
}

/// Public entry point for metadata lookups. Cheap to clone.
#[derive(Clone)]
pub struct BookLookup {
    cache: Arc<dyn CacheStore>,
    queue: CoalescingQueue,
    metrics: Option<SharedMetrics>,
}

impl BookLookup {
    pub fn new(cache: Arc<dyn CacheStore>, queue: CoalescingQueue) -> Self {
        Self {
            cache,
            queue,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn queue(&self) -> &CoalescingQueue {
        &self.queue
    }

    /// Build the queue, spawn its worker and return the lookup front end.
    pub fn start(
        settings: LookupSettings,
        cache: Arc<dyn CacheStore>,
        catalog: Arc<dyn CatalogClient>,
        assets: Arc<dyn AssetSink>,
        shutdown_rx: watch::Receiver<bool>,
        metrics: Option<SharedMetrics>,
    ) -> (Self, JoinHandle<()>) {
        let (queue, consumer) = CoalescingQueue::new(settings.capacity);

        let mut worker = LookupWorker::new(
            consumer,
            cache.clone(),
            catalog,
            assets,
            settings.interval,
            shutdown_rx,
        );
        let mut lookup = Self::new(cache, queue);
        if let Some(metrics) = metrics {
            metrics.update_queue_metrics(lookup.queue());
            worker = worker.with_metrics(metrics.clone());
            lookup = lookup.with_metrics(metrics);
        }

        let handle = tokio::spawn(worker.run());
        (lookup, handle)
    }

    /// Fetch metadata for `isbn`, from cache when possible.
    ///
    /// Fails with `ResourceExhausted` when the queue is full, or with the
    /// upstream error shared by every caller of the same request.
    #[instrument(skip(self))]
    pub async fn lookup(&self, isbn: &str) -> LookupOutcome {
        let start = Instant::now();
        let result = self.lookup_inner(isbn).await;

        if let Some(metrics) = &self.metrics {
            let label = match &result {
                Ok((_, served)) => served.label(),
                Err(e) if e.is_busy() => "rejected",
                Err(_) => "error",
            };
            metrics.record_lookup(label, start.elapsed().as_secs_f64());
            metrics.update_queue_metrics(&self.queue);
        }

        result.map(|(details, _)| details)
    }

    async fn lookup_inner(&self, isbn: &str) -> Result<(Arc<BookDetails>, Served), FolioError> {
        let isbn = isbn.trim();
        if isbn.is_empty() {
            return Err(FolioError::InvalidInput("isbn must not be empty".to_string()));
        }
        let key = isbn_key(isbn);

        if let Some(details) = self.cached(&key).await {
            debug!(isbn = %isbn, "Cache HIT");
            return Ok((details, Served::Cache));
        }
        debug!(isbn = %isbn, "Cache MISS, submitting to lookup queue");

        let handle = self.queue.submit(isbn)?;
        let role = handle.role();
        let details = handle.wait().await?;

        // The worker has already written the result through to the cache.
        let served = match role {
            Role::Primary => Served::Upstream,
            Role::Follower => Served::Coalesced,
        };
        Ok((details, served))
    }

    /// Cached metadata, if present and decodable. Undecodable entries are removed.
    async fn cached(&self, key: &str) -> Option<Arc<BookDetails>> {
        let value = match self.cache.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(cache_key = %key, error = %e, "Cache read failed, treating as miss");
                None
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_cache(value.is_some());
        }

        match serde_json::from_value::<BookDetails>(value?) {
            Ok(details) => Some(Arc::new(details)),
            Err(e) => {
                warn!(cache_key = %key, error = %e, "Discarding undecodable cache entry");
                if let Err(e) = self.cache.del(key).await {
                    warn!(cache_key = %key, error = %e, "Failed to delete cache entry");
                }
                None
            }
        }
    }
}

/// Where a successful lookup was answered from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Served {
    Cache,
    Coalesced,
    Upstream,
}

impl Served {
    fn label(self) -> &'static str {
        match self {
            Served::Cache => "cache",
            Served::Coalesced => "coalesced",
            Served::Upstream => "upstream",
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory stand-ins for the catalog and the cover store.

    use super::*;
    use crate::services::assets::PersistOutcome;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::Semaphore;

    /// Start and end of one upstream call
    #[derive(Debug, Clone)]
    pub struct CallRecord {
        pub isbn: String,
        pub started: Instant,
        pub finished: Instant,
    }

    /// Catalog fake with scripted responses and an optional gate that holds
    /// every call until a permit is released.
    #[derive(Default)]
    pub struct FakeCatalog {
        responses: Mutex<HashMap<String, Result<BookDetails, FolioError>>>,
        calls: Mutex<Vec<CallRecord>>,
        gate: Option<Arc<Semaphore>>,
        latency: Duration,
    }

    impl FakeCatalog {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn gated(gate: Arc<Semaphore>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::default()
            }
        }

        pub fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }

        pub fn respond(self, isbn: &str, response: Result<BookDetails, FolioError>) -> Self {
            self.responses
                .lock()
                .unwrap()
                .insert(isbn.to_string(), response);
            self
        }

        pub fn calls(&self) -> Vec<CallRecord> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count(&self, isbn: &str) -> usize {
            self.calls().iter().filter(|c| c.isbn == isbn).count()
        }
    }

    #[async_trait]
    impl CatalogClient for FakeCatalog {
        async fn fetch(&self, isbn: &str) -> Result<BookDetails, FolioError> {
            let started = Instant::now();
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let response = self
                .responses
                .lock()
                .unwrap()
                .get(isbn)
                .cloned()
                .unwrap_or_else(|| {
                    Ok(BookDetails {
                        name: Some(format!("Book {isbn}")),
                        ..Default::default()
                    })
                });
            self.calls.lock().unwrap().push(CallRecord {
                isbn: isbn.to_string(),
                started,
                finished: Instant::now(),
            });
            response
        }
    }

    /// Records persist requests without touching the network or disk.
    #[derive(Default)]
    pub struct RecordingSink {
        pub requests: Mutex<Vec<(String, String)>>,
    }

    impl RecordingSink {
        pub fn filenames(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|(_, name)| name.clone())
                .collect()
        }
    }

    #[async_trait]
    impl AssetSink for RecordingSink {
        async fn persist(&self, url: &str, filename: &str) -> Result<PersistOutcome, FolioError> {
            self.requests
                .lock()
                .unwrap()
                .push((url.to_string(), filename.to_string()));
            Ok(PersistOutcome::Written { bytes: 0 })
        }
    }
}
