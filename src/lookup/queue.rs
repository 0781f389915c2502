//! Bounded, coalescing request queue with exactly one consumer.
//!
//! Admission is fail-fast: when `capacity` requests are already waiting for
//! the worker, new identifiers are rejected with `ResourceExhausted` instead
//! of queueing unboundedly. Identifiers already in flight (waiting or being
//! fetched) never create a second request; callers join the existing one.

use crate::error::FolioError;
use crate::lookup::pending::{LookupHandle, LookupOutcome, PendingRequest};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

struct QueueInner {
    tx: mpsc::Sender<Arc<PendingRequest>>,
    /// Identifier -> request, for both queued and processing requests
    in_flight: DashMap<String, Arc<PendingRequest>>,
    capacity: usize,
}

/// Producer side of the lookup queue. Cheap to clone.
#[derive(Clone)]
pub struct CoalescingQueue {
    inner: Arc<QueueInner>,
}

impl CoalescingQueue {
    /// Create a queue and its only consumer.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> (Self, QueueConsumer) {
        assert!(capacity > 0, "lookup queue capacity must be greater than zero");

        let (tx, rx) = mpsc::channel(capacity);
        let queue = Self {
            inner: Arc::new(QueueInner {
                tx,
                in_flight: DashMap::new(),
                capacity,
            }),
        };
        let consumer = QueueConsumer {
            rx,
            queue: queue.clone(),
        };
        (queue, consumer)
    }

    /// The in-flight request for `key`, queued or currently being fetched.
    pub fn find_pending(&self, key: &str) -> Option<Arc<PendingRequest>> {
        self.inner.in_flight.get(key).map(|entry| entry.value().clone())
    }

    /// Join the in-flight request for `key`, or admit a new one.
    ///
    /// The lookup and the admission happen under the same registry entry lock,
    /// so concurrent first-time callers for one key produce a single request.
    pub fn submit(&self, key: &str) -> Result<LookupHandle, FolioError> {
        match self.inner.in_flight.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                let handle = entry.get().follow();
                debug!(isbn = %key, "Joined in-flight lookup");
                Ok(handle)
            }
            Entry::Vacant(entry) => {
                let (request, handle) = self.admit(key)?;
                entry.insert(request);
                Ok(handle)
            }
        }
    }

    /// Enqueue a new request. The caller must hold the vacant registry entry.
    fn admit(&self, key: &str) -> Result<(Arc<PendingRequest>, LookupHandle), FolioError> {
        let (request, handle) = PendingRequest::new(key);
        match self.inner.tx.try_send(request.clone()) {
            Ok(()) => {
                debug!(isbn = %key, queued = self.len(), "Admitted lookup");
                Ok((request, handle))
            }
            Err(TrySendError::Full(_)) => {
                warn!(isbn = %key, capacity = self.inner.capacity, "Lookup queue full, rejecting");
                Err(FolioError::ResourceExhausted {
                    capacity: self.inner.capacity,
                })
            }
            Err(TrySendError::Closed(_)) => Err(FolioError::Internal(
                "lookup service shutting down".to_string(),
            )),
        }
    }

    /// Settle `request` and drop it from the registry.
    ///
    /// The result is published before removal, so a caller arriving in between
    /// still joins and receives the same outcome.
    pub(crate) fn complete(&self, request: &Arc<PendingRequest>, outcome: LookupOutcome) -> usize {
        let delivered = request.settle(outcome).unwrap_or(0);
        self.inner
            .in_flight
            .remove_if(request.key(), |_, current| Arc::ptr_eq(current, request));
        delivered
    }

    /// Settle every registered request with `error`. Returns how many there were.
    pub(crate) fn fail_in_flight(&self, error: FolioError) -> usize {
        let stranded: Vec<_> = self
            .inner
            .in_flight
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for request in &stranded {
            self.complete(request, Err(error.clone()));
        }
        stranded.len()
    }

    /// Requests admitted but not yet picked up by the worker
    pub fn len(&self) -> usize {
        self.inner.capacity - self.inner.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Requests queued or being fetched
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

/// The single consumer of a `CoalescingQueue`. Not clonable.
pub struct QueueConsumer {
    rx: mpsc::Receiver<Arc<PendingRequest>>,
    queue: CoalescingQueue,
}

impl QueueConsumer {
    /// Take the oldest queued request, waiting if there is none.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn next(&mut self) -> Option<Arc<PendingRequest>> {
        self.rx.recv().await
    }

    pub fn queue(&self) -> &CoalescingQueue {
        &self.queue
    }

    /// Stop admissions and fail every request still waiting.
    /// Returns how many requests were failed.
    pub fn close(&mut self) -> usize {
        self.rx.close();
        let mut failed = 0;
        while let Ok(request) = self.rx.try_recv() {
            self.queue.complete(
                &request,
                Err(FolioError::Internal(
                    "lookup service shutting down".to_string(),
                )),
            );
            failed += 1;
        }
        failed
    }
}

impl Drop for QueueConsumer {
    /// Runs on any worker exit, including a panic: nothing left in the
    /// registry may wait for a worker that no longer exists.
    fn drop(&mut self) {
        self.rx.close();
        let failed = self
            .queue
            .fail_in_flight(FolioError::Internal("lookup worker stopped".to_string()));
        if failed > 0 {
            warn!(failed_requests = failed, "Failed lookups stranded by worker exit");
        }
    }
}
