use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use lms_core::model::{CurriculumVersion, ExerciseId, ProgressEvent, ProgressRecord, TieBreak, UserId};
use lms_core::{Catalog, Clock};
use storage::LocalCache;

use crate::config::RetryPolicy;
use crate::error::ProgressError;
use crate::live::{ChannelEvent, LiveEvents};
use crate::progress::push::{PushQueue, SyncStatus};
use crate::remote::ProgressStore;
use crate::view::{ProgressView, project};

/// Owns the authoritative progress record for the signed-in user.
///
/// The local cache and the remote store only ever supply candidates; every
/// candidate is folded in with [`ProgressRecord::merge`]. Cheap to clone;
/// clones share one session.
#[derive(Clone)]
pub struct ProgressReconciler {
    inner: Arc<Inner>,
}

struct Inner {
    clock: Clock,
    cache: LocalCache,
    remote: Arc<dyn ProgressStore>,
    retry: RetryPolicy,
    state: Mutex<State>,
    push: PushQueue,
    /// Bumped whenever the record or catalog visible to a view changes.
    revision: watch::Sender<u64>,
}

#[derive(Default)]
struct State {
    session: Option<Session>,
    catalog: Option<Arc<Catalog>>,
    /// Bumped on every `initialize`/`clear`; background fetches from an older epoch are ignored.
    epoch: u64,
}

struct Session {
    user: UserId,
    version: CurriculumVersion,
    record: ProgressRecord,
    /// The server copy has not been folded in yet. Pushing now would replace it
    /// with a record that never saw it.
    remote_pending: bool,
    /// A background fetch is under way for this session.
    fetching: bool,
}

/// Handle for a live event subscription; dropping it stops consumption.
#[derive(Debug)]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl ProgressReconciler {
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime; the push worker is spawned here.
    #[must_use]
    pub fn new(
        clock: Clock,
        cache: LocalCache,
        remote: Arc<dyn ProgressStore>,
        retry: RetryPolicy,
    ) -> Self {
        let push = PushQueue::spawn(Arc::clone(&remote), retry.clone());
        Self {
            inner: Arc::new(Inner {
                clock,
                cache,
                remote,
                retry,
                state: Mutex::new(State::default()),
                push,
                revision: watch::Sender::new(0),
            }),
        }
    }

    // ─── SESSION ───────────────────────────────────────────────────────────────

    /// Start (or restart) a session for `user` on `version` and reconcile the
    /// cached and server records.
    ///
    /// Never fails: an unreadable cache starts empty and an unreachable server
    /// leaves the session on the cached record with a background retry.
    pub async fn initialize(&self, user: UserId, version: CurriculumVersion) -> ProgressRecord {
        let local = self.inner.cache.load_progress(&user);
        let epoch = {
            let mut state = self.inner.lock();
            state.epoch += 1;

            let mut seed = local;
            match state.session.take() {
                Some(previous) if previous.user == user => {
                    seed.merge(&previous.record, TieBreak::Existing);
                }
                Some(previous) => {
                    debug!(from = %previous.user, to = %user, "switching user");
                    self.inner.push.cancel();
                }
                None => {}
            }
            if state
                .catalog
                .as_ref()
                .is_some_and(|catalog| catalog.version() != version)
            {
                debug!(%version, "dropping catalog of another version");
                state.catalog = None;
            }
            state.session = Some(Session {
                user: user.clone(),
                version,
                record: seed,
                remote_pending: true,
                fetching: false,
            });
            state.epoch
        };
        self.inner.bump();

        match self.inner.remote.fetch_progress(&user).await {
            Ok(remote) => self.inner.absorb_remote(epoch, &user, remote),
            Err(err) => {
                warn!(user = %user, error = %err, "remote progress unavailable; using local copy");
                self.inner.persist_current(epoch);
                let mut state = self.inner.lock();
                if state.epoch == epoch {
                    if let Some(session) = state.session.as_mut() {
                        self.inner.push.defer();
                        self.inner.ensure_fetch(epoch, session, true);
                    }
                }
            }
        }
        self.record()
    }

    /// End the session. Unsent pushes are dropped; the cache is left as is.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.epoch += 1;
        if let Some(session) = state.session.take() {
            info!(user = %session.user, "progress session cleared");
        }
        state.catalog = None;
        self.inner.push.cancel();
        self.inner.bump();
    }

    /// Install the catalog for the session's version.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::VersionMismatch` if a session is active on a
    /// different version.
    pub fn install_catalog(&self, catalog: Catalog) -> Result<(), ProgressError> {
        let mut state = self.inner.lock();
        let session_version = state.session.as_ref().map(|session| session.version);
        if let Some(session) = session_version.filter(|version| *version != catalog.version()) {
            return Err(ProgressError::VersionMismatch {
                session,
                catalog: catalog.version(),
            });
        }
        state.catalog = Some(Arc::new(catalog));
        self.inner.bump();
        Ok(())
    }

    // ─── MUTATIONS ─────────────────────────────────────────────────────────────

    /// Record a completion. Returns whether the record changed.
    ///
    /// Marking an already completed exercise changes nothing but still prompts
    /// a retry of any pending push.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError` if there is no session, no catalog, or the id is
    /// not in the catalog. Nothing is written in that case.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime while the server copy is still
    /// unmerged, since a fetch is started then.
    pub fn mark_complete(&self, id: &ExerciseId) -> Result<bool, ProgressError> {
        let now = self.inner.clock.now();
        self.inner
            .mutate(id, |record| record.mark_completed(id.clone(), now))
    }

    /// Point the record at `id`. Completion is not required.
    ///
    /// # Errors
    ///
    /// Same as [`ProgressReconciler::mark_complete`].
    pub fn set_current_exercise(&self, id: &ExerciseId) -> Result<bool, ProgressError> {
        let now = self.inner.clock.now();
        self.inner.mutate(id, |record| record.set_current(id.clone(), now))
    }

    /// Fold in an event from the live channel. Events for other users, and
    /// events arriving with no session, are ignored.
    pub fn apply_remote_event(&self, event: &ProgressEvent) -> bool {
        let mut state = self.inner.lock();
        let epoch = state.epoch;
        let Some(session) = state.session.as_mut() else {
            return false;
        };
        if !event.concerns(&session.user) {
            return false;
        }
        if !session.record.apply_event(event) {
            return false;
        }
        debug!(user = %session.user, "remote event applied");
        self.inner.cache.save_progress(&session.user, &session.record);
        self.inner.schedule_push(epoch, session);
        self.inner.bump();
        true
    }

    /// Consume the channel's event stream until it ends or the handle is dropped.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn subscribe(&self, mut events: LiveEvents) -> Subscription {
        let reconciler = self.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    ChannelEvent::Remote(event) => {
                        reconciler.apply_remote_event(&event);
                    }
                    ChannelEvent::Reconnected => reconciler.resume_sync().await,
                }
            }
            debug!("live event stream ended");
        });
        Subscription { task }
    }

    /// Catch up after a reconnect: fetch the server copy again (covering the
    /// initial fetch if it never landed and any events missed while offline)
    /// and cut short any push waiting on backoff.
    pub async fn resume_sync(&self) {
        let active = {
            let state = self.inner.lock();
            state
                .session
                .as_ref()
                .map(|session| (state.epoch, session.user.clone()))
        };
        if let Some((epoch, user)) = active {
            match self.inner.remote.fetch_progress(&user).await {
                Ok(remote) => self.inner.absorb_remote(epoch, &user, remote),
                Err(err) => debug!(user = %user, error = %err, "resume fetch failed"),
            }
        }
        self.inner.push.nudge();
    }

    // ─── QUERIES ───────────────────────────────────────────────────────────────

    /// Snapshot of the current record; empty when no session is active.
    #[must_use]
    pub fn record(&self) -> ProgressRecord {
        self.inner
            .lock()
            .session
            .as_ref()
            .map(|session| session.record.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn user(&self) -> Option<UserId> {
        self.inner
            .lock()
            .session
            .as_ref()
            .map(|session| session.user.clone())
    }

    #[must_use]
    pub fn version(&self) -> Option<CurriculumVersion> {
        self.inner.lock().session.as_ref().map(|session| session.version)
    }

    #[must_use]
    pub fn catalog(&self) -> Option<Arc<Catalog>> {
        self.inner.lock().catalog.clone()
    }

    /// Rounded share of the active catalog that is completed, `0..=100`.
    #[must_use]
    pub fn percent_complete(&self) -> u8 {
        let state = self.inner.lock();
        match (&state.catalog, &state.session) {
            (Some(catalog), Some(session)) => catalog.percent_complete(&session.record),
            _ => 0,
        }
    }

    /// Render the current state, or `None` until a session and catalog exist.
    #[must_use]
    pub fn view(&self) -> Option<ProgressView> {
        let state = self.inner.lock();
        let session = state.session.as_ref()?;
        let catalog = state.catalog.as_ref()?;
        Some(project(
            &session.user,
            catalog,
            &session.record,
            self.inner.push.status(),
        ))
    }

    /// Changes whenever [`ProgressReconciler::view`] would render differently,
    /// sync status aside.
    #[must_use]
    pub fn watch_changes(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    #[must_use]
    pub fn sync_status(&self) -> SyncStatus {
        self.inner.push.status()
    }

    #[must_use]
    pub fn watch_sync(&self) -> watch::Receiver<SyncStatus> {
        self.inner.push.watch_status()
    }

    /// Wait until the latest mutation has been acknowledged by the server.
    /// Returns `false` on timeout.
    pub async fn wait_synced(&self, timeout: Duration) -> bool {
        self.inner.push.wait_synced(timeout).await
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    fn mutate(
        self: &Arc<Self>,
        id: &ExerciseId,
        apply: impl FnOnce(&mut ProgressRecord) -> bool,
    ) -> Result<bool, ProgressError> {
        let mut guard = self.lock();
        let epoch = guard.epoch;
        let state = &mut *guard;
        let session = state.session.as_mut().ok_or(ProgressError::NoSession)?;
        let catalog = state.catalog.as_ref().ok_or(ProgressError::CatalogNotLoaded)?;
        if !catalog.contains(id) {
            return Err(ProgressError::UnknownExercise(id.clone()));
        }

        if !apply(&mut session.record) {
            if session.remote_pending {
                self.ensure_fetch(epoch, session, false);
            } else {
                self.push.nudge();
            }
            return Ok(false);
        }
        self.cache.save_progress(&session.user, &session.record);
        self.schedule_push(epoch, session);
        self.bump();
        Ok(true)
    }

    /// Send a changed record to the server, or hold it while the server copy
    /// is still unmerged and make sure a fetch is on its way.
    fn schedule_push(self: &Arc<Self>, epoch: u64, session: &mut Session) {
        if session.remote_pending {
            debug!(user = %session.user, "push deferred until the server copy is merged");
            self.push.defer();
            self.ensure_fetch(epoch, session, false);
        } else {
            self.push.enqueue(session.user.clone(), session.record.clone());
        }
    }

    /// Fold the server's candidate into the session started at `epoch`.
    fn absorb_remote(&self, epoch: u64, user: &UserId, remote: Option<ProgressRecord>) {
        let mut state = self.lock();
        if state.epoch != epoch {
            debug!(user = %user, "discarding stale progress fetch");
            return;
        }
        let Some(session) = state.session.as_mut().filter(|s| &s.user == user) else {
            return;
        };
        if remote.is_none() {
            debug!(user = %user, "no remote progress yet");
        }
        let remote = remote.unwrap_or_default();
        if session.record.merge(&remote, TieBreak::Incoming) {
            self.bump();
        }
        session.remote_pending = false;
        self.cache.save_progress(&session.user, &session.record);
        if session.record == remote {
            self.push.settle();
        } else {
            self.push.enqueue(session.user.clone(), session.record.clone());
        }
        info!(
            user = %session.user,
            completed = session.record.completed().len(),
            "progress reconciled"
        );
    }

    fn persist_current(&self, epoch: u64) {
        let state = self.lock();
        if state.epoch != epoch {
            return;
        }
        if let Some(session) = &state.session {
            self.cache.save_progress(&session.user, &session.record);
        }
    }

    /// Whether the session started at `epoch` still waits for the server copy.
    fn wants_remote(&self, epoch: u64) -> bool {
        let state = self.lock();
        state.epoch == epoch && state.session.as_ref().is_some_and(|s| s.remote_pending)
    }

    /// Clear the running-fetch mark; returns whether the server copy is still missing.
    fn fetch_finished(&self, epoch: u64) -> bool {
        let mut state = self.lock();
        if state.epoch != epoch {
            return false;
        }
        state.session.as_mut().is_some_and(|session| {
            session.fetching = false;
            session.remote_pending
        })
    }

    /// Start a background fetch with bounded retries unless one is running.
    /// `after_failure` waits out the first backoff step before trying.
    fn ensure_fetch(self: &Arc<Self>, epoch: u64, session: &mut Session, after_failure: bool) {
        if session.fetching {
            return;
        }
        session.fetching = true;
        let user = session.user.clone();
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            for attempt in 0..inner.retry.max_attempts {
                if after_failure || attempt > 0 {
                    tokio::time::sleep(inner.retry.delay(attempt)).await;
                }
                if !inner.wants_remote(epoch) {
                    break;
                }
                match inner.remote.fetch_progress(&user).await {
                    Ok(remote) => {
                        inner.absorb_remote(epoch, &user, remote);
                        break;
                    }
                    Err(err) => debug!(user = %user, attempt, error = %err, "progress fetch retry failed"),
                }
            }
            if inner.fetch_finished(epoch) {
                warn!(user = %user, "giving up on progress fetch until the next change or reconnect");
            }
        });
    }
}
