//! Background writer that keeps the remote store caught up with the local record.
//!
//! Only the newest full record is ever pending: enqueueing replaces whatever
//! was waiting, so a burst of mutations coalesces into one write.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use lms_core::model::{ProgressRecord, UserId};

use crate::config::RetryPolicy;
use crate::remote::ProgressStore;

/// Where the remote copy stands relative to the local record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStatus {
    /// Nothing has been queued in this session.
    #[default]
    Idle,
    /// A write is in flight.
    Syncing,
    /// Changes are waiting: the last write failed, or the server copy has not
    /// been merged yet.
    Pending,
    /// The newest record was acknowledged.
    Synced,
}

#[derive(Debug, Clone)]
struct PushJob {
    generation: u64,
    user: UserId,
    record: ProgressRecord,
}

pub(crate) struct PushQueue {
    jobs: watch::Sender<Option<PushJob>>,
    status: Arc<watch::Sender<SyncStatus>>,
    nudge: Arc<Notify>,
    generation: Arc<AtomicU64>,
    acked: Arc<AtomicU64>,
    worker: JoinHandle<()>,
}

impl PushQueue {
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub(crate) fn spawn(store: Arc<dyn ProgressStore>, retry: RetryPolicy) -> Self {
        let (jobs, jobs_rx) = watch::channel(None);
        let status = Arc::new(watch::Sender::new(SyncStatus::Idle));
        let nudge = Arc::new(Notify::new());
        let generation = Arc::new(AtomicU64::new(0));
        let acked = Arc::new(AtomicU64::new(0));

        let worker = tokio::spawn(run(
            jobs_rx,
            Worker {
                status: Arc::clone(&status),
                nudge: Arc::clone(&nudge),
                generation: Arc::clone(&generation),
                acked: Arc::clone(&acked),
                store,
                retry,
            },
        ));

        Self {
            jobs,
            status,
            nudge,
            generation,
            acked,
            worker,
        }
    }

    pub(crate) fn enqueue(&self, user: UserId, record: ProgressRecord) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(user = %user, generation, "progress push queued");
        self.jobs.send_replace(Some(PushJob {
            generation,
            user,
            record,
        }));
    }

    /// Count a change that cannot be pushed yet. Waiters stay blocked and the
    /// status reads `Pending` until a later push or [`PushQueue::settle`].
    pub(crate) fn defer(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(generation, "progress push deferred");
        self.status.send_replace(SyncStatus::Pending);
    }

    /// The server already holds the local record; nothing deferred needs sending.
    pub(crate) fn settle(&self) {
        let generation = self.generation.load(Ordering::SeqCst);
        let previous = self.acked.fetch_max(generation, Ordering::SeqCst);
        if previous < generation {
            self.status.send_replace(SyncStatus::Synced);
        }
    }

    /// Cut a pending backoff short.
    pub(crate) fn nudge(&self) {
        self.nudge.notify_waiters();
    }

    /// Forget any unsent record, typically because the user changed.
    pub(crate) fn cancel(&self) {
        self.jobs.send_replace(None);
        self.acked
            .fetch_max(self.generation.load(Ordering::SeqCst), Ordering::SeqCst);
        self.status.send_replace(SyncStatus::Idle);
    }

    pub(crate) fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    pub(crate) fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Wait until everything queued before this call has been acknowledged.
    pub(crate) async fn wait_synced(&self, timeout: Duration) -> bool {
        let mut status = self.status.subscribe();
        let target = self.generation.load(Ordering::SeqCst);
        let acked = &self.acked;
        let reached = async {
            while acked.load(Ordering::SeqCst) < target {
                if status.changed().await.is_err() {
                    break;
                }
            }
        };
        tokio::time::timeout(timeout, reached).await.is_ok()
            && self.acked.load(Ordering::SeqCst) >= target
    }
}

impl Drop for PushQueue {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

struct Worker {
    status: Arc<watch::Sender<SyncStatus>>,
    nudge: Arc<Notify>,
    generation: Arc<AtomicU64>,
    acked: Arc<AtomicU64>,
    store: Arc<dyn ProgressStore>,
    retry: RetryPolicy,
}

async fn run(mut jobs: watch::Receiver<Option<PushJob>>, worker: Worker) {
    let Worker {
        status,
        nudge,
        generation,
        acked,
        store,
        retry,
    } = worker;
    let mut attempt: u32 = 0;
    loop {
        let job = jobs.borrow_and_update().clone();
        let Some(job) = job.filter(|job| job.generation > acked.load(Ordering::SeqCst)) else {
            if jobs.changed().await.is_err() {
                return;
            }
            continue;
        };

        status.send_replace(SyncStatus::Syncing);
        match store.save_progress(&job.user, &job.record).await {
            Ok(()) => {
                attempt = 0;
                acked.fetch_max(job.generation, Ordering::SeqCst);
                debug!(user = %job.user, generation = job.generation, "progress push acknowledged");
                // A newer job or a deferred change keeps the status where it is.
                if job.generation >= generation.load(Ordering::SeqCst) {
                    status.send_replace(SyncStatus::Synced);
                }
            }
            Err(err) => {
                let delay = retry.delay(attempt);
                attempt = attempt.saturating_add(1);
                warn!(
                    user = %job.user,
                    error = %err,
                    retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "progress push failed; keeping local state"
                );
                status.send_replace(SyncStatus::Pending);
                tokio::select! {
                    changed = jobs.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                    () = nudge.notified() => attempt = 0,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::remote::InMemoryProgressStore;
    use async_trait::async_trait;
    use lms_core::model::ExerciseId;
    use std::sync::atomic::AtomicUsize;

    /// Fails the first `failures` saves, then delegates.
    struct FlakyStore {
        failures: AtomicUsize,
        inner: InMemoryProgressStore,
    }

    #[async_trait]
    impl ProgressStore for FlakyStore {
        async fn fetch_progress(
            &self,
            user: &UserId,
        ) -> Result<Option<ProgressRecord>, TransportError> {
            self.inner.fetch_progress(user).await
        }

        async fn save_progress(
            &self,
            user: &UserId,
            record: &ProgressRecord,
        ) -> Result<(), TransportError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(TransportError::Timeout);
            }
            self.inner.save_progress(user, record).await
        }
    }

    fn user() -> UserId {
        UserId::parse("alice").unwrap()
    }

    fn record(ids: &[&str]) -> ProgressRecord {
        ProgressRecord::new(ids.iter().map(|id| ExerciseId::parse(*id).unwrap()), None, None)
    }

    #[tokio::test]
    async fn nothing_queued_is_already_synced() {
        let queue = PushQueue::spawn(Arc::new(InMemoryProgressStore::new()), RetryPolicy::immediate());
        assert_eq!(queue.status(), SyncStatus::Idle);
        assert!(queue.wait_synced(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn latest_record_reaches_the_store() {
        let store = InMemoryProgressStore::new();
        let queue = PushQueue::spawn(Arc::new(store.clone()), RetryPolicy::immediate());
        queue.enqueue(user(), record(&["e1"]));
        queue.enqueue(user(), record(&["e1", "e2"]));

        assert!(queue.wait_synced(Duration::from_secs(2)).await);
        assert_eq!(store.get(&user()), Some(record(&["e1", "e2"])));
        assert_eq!(queue.status(), SyncStatus::Synced);
    }

    #[tokio::test]
    async fn failed_pushes_are_retried() {
        let inner = InMemoryProgressStore::new();
        let store = FlakyStore {
            failures: AtomicUsize::new(2),
            inner: inner.clone(),
        };
        let queue = PushQueue::spawn(Arc::new(store), RetryPolicy::immediate());
        queue.enqueue(user(), record(&["e1"]));

        assert!(queue.wait_synced(Duration::from_secs(2)).await);
        assert_eq!(inner.get(&user()), Some(record(&["e1"])));
    }

    #[tokio::test]
    async fn cancel_releases_waiters_and_drops_the_job() {
        let inner = InMemoryProgressStore::new();
        let store = FlakyStore {
            failures: AtomicUsize::new(usize::MAX),
            inner: inner.clone(),
        };
        let queue = PushQueue::spawn(Arc::new(store), RetryPolicy::immediate());
        queue.enqueue(user(), record(&["e1"]));
        assert!(!queue.wait_synced(Duration::from_millis(30)).await);

        queue.cancel();
        assert!(queue.wait_synced(Duration::from_millis(10)).await);
        assert_eq!(queue.status(), SyncStatus::Idle);
        assert_eq!(inner.get(&user()), None);
    }

    #[tokio::test]
    async fn deferred_change_blocks_waiters_until_settled() {
        let queue = PushQueue::spawn(Arc::new(InMemoryProgressStore::new()), RetryPolicy::immediate());
        queue.defer();
        assert_eq!(queue.status(), SyncStatus::Pending);
        assert!(!queue.wait_synced(Duration::from_millis(20)).await);

        queue.settle();
        assert_eq!(queue.status(), SyncStatus::Synced);
        assert!(queue.wait_synced(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn push_after_deferral_acknowledges_both() {
        let store = InMemoryProgressStore::new();
        let queue = PushQueue::spawn(Arc::new(store.clone()), RetryPolicy::immediate());
        queue.defer();
        queue.defer();
        queue.enqueue(user(), record(&["e1", "e2"]));

        assert!(queue.wait_synced(Duration::from_secs(2)).await);
        assert_eq!(queue.status(), SyncStatus::Synced);
        assert_eq!(store.get(&user()), Some(record(&["e1", "e2"])));
    }
}
