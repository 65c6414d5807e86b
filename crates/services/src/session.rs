use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use lms_core::Clock;
use lms_core::model::{CurriculumVersion, Exercise, ExerciseId, ProgressEvent, UserId};
use storage::{FileStore, LocalCache};

use crate::catalog_service::CatalogService;
use crate::config::{ClientConfig, RetryPolicy};
use crate::error::SessionError;
use crate::http::HttpApi;
use crate::identity::IdentityService;
use crate::live::{ChannelState, LiveChannel, LiveTransport, TcpTransport};
use crate::progress::{ProgressReconciler, Subscription};
use crate::remote::{ExerciseSource, ProgressStore};
use crate::view::ProgressView;

/// Everything a [`LearningSession`] is assembled from.
pub struct SessionParts {
    pub clock: Clock,
    pub cache: LocalCache,
    pub progress_store: Arc<dyn ProgressStore>,
    pub exercises: Arc<dyn ExerciseSource>,
    /// `None` runs without live updates.
    pub live: Option<Arc<dyn LiveTransport>>,
    pub retry: RetryPolicy,
    pub version: CurriculumVersion,
}

struct LiveLinkup {
    channel: LiveChannel,
    _subscription: Subscription,
}

/// App-facing entry point: identity, catalog, progress and the live channel
/// wired together for one device.
pub struct LearningSession {
    clock: Clock,
    identity: IdentityService,
    catalogs: CatalogService,
    progress: ProgressReconciler,
    transport: Option<Arc<dyn LiveTransport>>,
    retry: RetryPolicy,
    version: CurriculumVersion,
    live: Option<LiveLinkup>,
}

impl LearningSession {
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn new(parts: SessionParts) -> Self {
        let progress = ProgressReconciler::new(
            parts.clock.clone(),
            parts.cache.clone(),
            parts.progress_store,
            parts.retry.clone(),
        );
        Self {
            clock: parts.clock,
            identity: IdentityService::new(parts.cache),
            catalogs: CatalogService::new(parts.exercises),
            progress,
            transport: parts.live,
            retry: parts.retry,
            version: parts.version,
            live: None,
        }
    }

    /// Build a session backed by the file cache, the HTTP API and, if an
    /// address is configured, the TCP live channel.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the cache directory cannot be opened or the
    /// HTTP client cannot be built.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn from_config(config: &ClientConfig) -> Result<Self, SessionError> {
        let store = FileStore::open(&config.cache_dir)?;
        let api = Arc::new(HttpApi::new(&config.api_base_url, config.http_timeout)?);
        let live = config.live_addr.as_ref().map(|addr| {
            Arc::new(TcpTransport::new(addr.clone(), config.http_timeout)) as Arc<dyn LiveTransport>
        });
        Ok(Self::new(SessionParts {
            clock: Clock::system(),
            cache: LocalCache::new(Arc::new(store)),
            progress_store: Arc::clone(&api) as Arc<dyn ProgressStore>,
            exercises: api,
            live,
            retry: config.retry.clone(),
            version: config.version,
        }))
    }

    // ─── IDENTITY ──────────────────────────────────────────────────────────────

    /// Resume as the remembered user, if any.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Catalog` if the catalog cannot be loaded. The
    /// progress session is started regardless.
    pub async fn start(&mut self) -> Result<Option<ProgressView>, SessionError> {
        match self.identity.current() {
            Some(user) => self.activate(user).await.map(Some),
            None => Ok(None),
        }
    }

    /// # Errors
    ///
    /// Returns `SessionError::Identity` for invalid input and
    /// `SessionError::Catalog` if the catalog cannot be loaded.
    pub async fn login(&mut self, input: &str) -> Result<ProgressView, SessionError> {
        let user = self.identity.login(input)?;
        self.activate(user).await
    }

    /// Sign out, close the live channel and drop the in-memory session.
    pub async fn logout(&mut self) -> Option<UserId> {
        self.disconnect().await;
        self.progress.clear();
        self.identity.logout()
    }

    #[must_use]
    pub fn user(&self) -> Option<UserId> {
        self.progress.user().or_else(|| self.identity.current())
    }

    // ─── CURRICULUM ────────────────────────────────────────────────────────────

    #[must_use]
    pub fn version(&self) -> CurriculumVersion {
        self.version
    }

    /// Switch curriculum version and reconcile again for the signed-in user.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Catalog` if the new catalog cannot be loaded.
    pub async fn select_version(
        &mut self,
        version: CurriculumVersion,
    ) -> Result<Option<ProgressView>, SessionError> {
        self.version = version;
        match self.progress.user() {
            Some(user) => self.activate(user).await.map(Some),
            None => Ok(None),
        }
    }

    /// Full content of one exercise of the active version.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Id` for a malformed id and `SessionError::Catalog`
    /// if the exercise does not exist or cannot be fetched.
    pub async fn exercise(&self, raw_id: &str) -> Result<Exercise, SessionError> {
        let id = ExerciseId::parse(raw_id)?;
        Ok(self.catalogs.exercise(self.version, &id).await?)
    }

    // ─── PROGRESS ──────────────────────────────────────────────────────────────

    /// Mark an exercise complete and tell other sessions about it.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Id` for a malformed id and `SessionError::Progress`
    /// if the exercise is not in the active catalog.
    pub fn mark_complete(&self, raw_id: &str) -> Result<bool, SessionError> {
        let id = ExerciseId::parse(raw_id)?;
        let changed = self.progress.mark_complete(&id)?;
        if changed {
            self.announce(ProgressEvent::ExerciseCompleted {
                user_id: self.progress.user(),
                exercise_id: id,
                at: self.clock.now(),
            });
        }
        Ok(changed)
    }

    /// # Errors
    ///
    /// Same as [`LearningSession::mark_complete`].
    pub fn set_current(&self, raw_id: &str) -> Result<bool, SessionError> {
        let id = ExerciseId::parse(raw_id)?;
        let changed = self.progress.set_current_exercise(&id)?;
        if changed {
            let record = self.progress.record();
            if let Some(at) = record.last_accessed() {
                self.announce(ProgressEvent::ProgressUpdated {
                    user_id: self.progress.user(),
                    completed: record.completed().iter().cloned().collect(),
                    current_exercise: record.current_exercise().cloned(),
                    last_accessed: at,
                });
            }
        }
        Ok(changed)
    }

    #[must_use]
    pub fn view(&self) -> Option<ProgressView> {
        self.progress.view()
    }

    #[must_use]
    pub fn progress(&self) -> &ProgressReconciler {
        &self.progress
    }

    #[must_use]
    pub fn live_state(&self) -> Option<ChannelState> {
        self.live.as_ref().map(|live| live.channel.state())
    }

    /// Wait up to `timeout` for outstanding pushes, then close the live channel.
    /// Returns whether everything was acknowledged.
    pub async fn shutdown(&mut self, timeout: Duration) -> bool {
        let synced = self.progress.wait_synced(timeout).await;
        if !synced {
            warn!("closing with progress not yet acknowledged; it stays cached locally");
        }
        self.disconnect().await;
        synced
    }

    // ─── INTERNALS ─────────────────────────────────────────────────────────────

    async fn activate(&mut self, user: UserId) -> Result<ProgressView, SessionError> {
        if self.progress.user().is_some_and(|current| current != user) {
            self.disconnect().await;
        }
        self.progress.initialize(user.clone(), self.version).await;
        let catalog = self.catalogs.load(self.version).await?;
        self.progress.install_catalog(catalog)?;
        self.connect();
        info!(user = %user, version = %self.version, "session ready");
        self.progress.view().ok_or(SessionError::NotSignedIn)
    }

    fn connect(&mut self) {
        if self.live.is_some() {
            return;
        }
        let Some(transport) = &self.transport else {
            return;
        };
        let (channel, events) = LiveChannel::spawn(Arc::clone(transport), self.retry.clone());
        let subscription = self.progress.subscribe(events);
        self.live = Some(LiveLinkup {
            channel,
            _subscription: subscription,
        });
    }

    async fn disconnect(&mut self) {
        if let Some(live) = self.live.take() {
            live.channel.shutdown().await;
        }
    }

    fn announce(&self, event: ProgressEvent) {
        let Some(live) = &self.live else {
            return;
        };
        if let Err(err) = live.channel.announce(event) {
            warn!(error = %err, "live announcement dropped");
        }
    }
}
