//! Server-side seams: the progress store and the exercise source.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use lms_core::model::{CurriculumVersion, Exercise, ExerciseId, ProgressRecord, UserId};

use crate::error::TransportError;

/// Durable per-user progress on the server.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Fetch the stored record. `Ok(None)` means the server has nothing for this user yet.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the request fails or the reply cannot be decoded.
    async fn fetch_progress(&self, user: &UserId) -> Result<Option<ProgressRecord>, TransportError>;

    /// Replace the stored record. Only an acknowledged write returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the request fails or the server does not acknowledge it.
    async fn save_progress(&self, user: &UserId, record: &ProgressRecord) -> Result<(), TransportError>;
}

/// Read-only source of exercise lists.
#[async_trait]
pub trait ExerciseSource: Send + Sync {
    /// `Ok(None)` means the version is unknown to the server.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the request fails or the reply cannot be decoded.
    async fn fetch_exercises(
        &self,
        version: CurriculumVersion,
    ) -> Result<Option<Vec<Exercise>>, TransportError>;

    /// `Ok(None)` means no such exercise in that version.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the request fails or the reply cannot be decoded.
    async fn fetch_exercise(
        &self,
        version: CurriculumVersion,
        id: &ExerciseId,
    ) -> Result<Option<Exercise>, TransportError>;
}

// ─── IN-MEMORY ─────────────────────────────────────────────────────────────────

/// Progress store kept in process memory, for tests and offline runs.
///
/// Clones share the same records.
#[derive(Clone, Default)]
pub struct InMemoryProgressStore {
    records: Arc<Mutex<HashMap<UserId, ProgressRecord>>>,
}

impl InMemoryProgressStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed (or overwrite) the record for `user`.
    pub fn insert(&self, user: UserId, record: ProgressRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user, record);
    }

    #[must_use]
    pub fn get(&self, user: &UserId) -> Option<ProgressRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user)
            .cloned()
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn fetch_progress(&self, user: &UserId) -> Result<Option<ProgressRecord>, TransportError> {
        Ok(self.get(user))
    }

    async fn save_progress(&self, user: &UserId, record: &ProgressRecord) -> Result<(), TransportError> {
        self.insert(user.clone(), record.clone());
        Ok(())
    }
}

/// Exercise lists kept in process memory.
#[derive(Clone, Default)]
pub struct InMemoryExerciseSource {
    versions: Arc<Mutex<HashMap<CurriculumVersion, Vec<Exercise>>>>,
}

impl InMemoryExerciseSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_version(self, version: CurriculumVersion, exercises: Vec<Exercise>) -> Self {
        self.versions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(version, exercises);
        self
    }
}

#[async_trait]
impl ExerciseSource for InMemoryExerciseSource {
    async fn fetch_exercises(
        &self,
        version: CurriculumVersion,
    ) -> Result<Option<Vec<Exercise>>, TransportError> {
        Ok(self
            .versions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&version)
            .cloned())
    }

    async fn fetch_exercise(
        &self,
        version: CurriculumVersion,
        id: &ExerciseId,
    ) -> Result<Option<Exercise>, TransportError> {
        Ok(self
            .versions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&version)
            .and_then(|list| list.iter().find(|exercise| exercise.id() == id).cloned()))
    }
}
