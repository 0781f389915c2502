//! A single in-flight lookup and the callers waiting on it.

use crate::error::FolioError;
use crate::services::catalog::BookDetails;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// What every waiter of a request receives. The metadata is shared read-only.
pub type LookupOutcome = Result<Arc<BookDetails>, FolioError>;

/// How the caller got attached to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Created the request; responsible for the cache write-through
    Primary,
    /// Joined a request another caller created
    Follower,
}

#[derive(Default)]
struct Waiters {
    primary: Option<oneshot::Sender<LookupOutcome>>,
    followers: Vec<oneshot::Sender<LookupOutcome>>,
}

/// One unit of upstream work for one identifier.
///
/// The result is settled exactly once. Settling notifies the primary caller
/// first and then every follower in registration order, all with the same
/// value. Followers that join after settlement get the stored value directly.
pub struct PendingRequest {
    key: String,
    admitted_at: Instant,
    result: OnceLock<LookupOutcome>,
    waiters: Mutex<Waiters>,
}

impl PendingRequest {
    /// Create a request together with the primary caller's handle.
    pub(crate) fn new(key: &str) -> (Arc<Self>, LookupHandle) {
        let (tx, rx) = oneshot::channel();
        let request = Arc::new(Self {
            key: key.to_string(),
            admitted_at: Instant::now(),
            result: OnceLock::new(),
            waiters: Mutex::new(Waiters {
                primary: Some(tx),
                followers: Vec::new(),
            }),
        });
        (request, LookupHandle::new(rx, Role::Primary))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Time since admission
    pub fn age(&self) -> Duration {
        self.admitted_at.elapsed()
    }

    pub fn is_settled(&self) -> bool {
        self.result.get().is_some()
    }

    pub fn result(&self) -> Option<&LookupOutcome> {
        self.result.get()
    }

    pub fn follower_count(&self) -> usize {
        self.lock_waiters().followers.len()
    }

    /// Register a follower and return its handle.
    pub(crate) fn follow(&self) -> LookupHandle {
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.lock_waiters();
        // Checked under the waiters lock: `settle` publishes the result before
        // draining, so a follower is either drained or sees the result here.
        match self.result.get() {
            Some(outcome) => {
                let _ = tx.send(outcome.clone());
            }
            None => waiters.followers.push(tx),
        }
        LookupHandle::new(rx, Role::Follower)
    }

    /// Store the outcome and notify every waiter. Returns how many waiters
    /// were still listening, or `None` if the request was already settled.
    pub(crate) fn settle(&self, outcome: LookupOutcome) -> Option<usize> {
        let mut waiters = self.lock_waiters();
        if self.result.set(outcome).is_err() {
            return None;
        }
        let outcome = self.result.get()?;

        let primary = waiters.primary.take();
        let followers = std::mem::take(&mut waiters.followers);
        drop(waiters);

        // A waiter whose caller went away simply misses the notification.
        let delivered = primary
            .into_iter()
            .chain(followers)
            .map(|tx| tx.send(outcome.clone()).is_ok())
            .filter(|sent| *sent)
            .count();
        Some(delivered)
    }

    fn lock_waiters(&self) -> MutexGuard<'_, Waiters> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("key", &self.key)
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// A caller's claim on the eventual outcome of a `PendingRequest`.
#[derive(Debug)]
pub struct LookupHandle {
    rx: oneshot::Receiver<LookupOutcome>,
    role: Role,
}

impl LookupHandle {
    fn new(rx: oneshot::Receiver<LookupOutcome>, role: Role) -> Self {
        Self { rx, role }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Wait until the request settles.
    pub async fn wait(self) -> LookupOutcome {
        self.rx.await.unwrap_or_else(|_| {
            Err(FolioError::Internal(
                "lookup request dropped before completion".to_string(),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(name: &str) -> Arc<BookDetails> {
        Arc::new(BookDetails {
            name: Some(name.to_string()),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_settle_fans_out_identical_value() {
        let (request, primary) = PendingRequest::new("K1");
        let f1 = request.follow();
        let f2 = request.follow();
        assert_eq!(request.follower_count(), 2);
        assert_eq!(primary.role(), Role::Primary);
        assert_eq!(f1.role(), Role::Follower);

        assert_eq!(request.settle(Ok(details("T"))), Some(3));

        let a = primary.wait().await.unwrap();
        let b = f1.wait().await.unwrap();
        let c = f2.wait().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&b, &c));
    }

    #[tokio::test]
    async fn test_settles_exactly_once() {
        let (request, primary) = PendingRequest::new("K2");
        let err = FolioError::Upstream("connection reset".to_string());

        assert_eq!(request.settle(Err(err.clone())), Some(1));
        assert_eq!(request.settle(Ok(details("late"))), None);

        assert_eq!(primary.wait().await.unwrap_err(), err);
        assert!(matches!(request.result(), Some(Err(FolioError::Upstream(_)))));
    }

    #[tokio::test]
    async fn test_follow_after_settle_gets_stored_result() {
        let (request, _primary) = PendingRequest::new("K1");
        request.settle(Ok(details("T")));

        let late = request.follow();
        assert_eq!(late.wait().await.unwrap().name.as_deref(), Some("T"));
        assert_eq!(request.follower_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_waiter_does_not_block_others() {
        let (request, primary) = PendingRequest::new("K1");
        let follower = request.follow();
        drop(primary);

        assert_eq!(request.settle(Ok(details("T"))), Some(1));
        assert!(follower.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_unsettled_drop_reports_internal_error() {
        let (request, primary) = PendingRequest::new("K1");
        drop(request);
        assert!(matches!(primary.wait().await, Err(FolioError::Internal(_))));
    }
}
