use std::sync::Arc;

use lms_core::model::{ProgressRecord, UserId};
use tracing::{debug, warn};

use crate::snapshot;
use crate::store::{InMemoryStore, KeyValueStore};

/// Key holding the signed-in user id.
pub const IDENTITY_KEY: &str = "tkx-user-id";

/// Prefix of the per-user progress snapshot key.
pub const PROGRESS_KEY_PREFIX: &str = "tkx-progress";

#[must_use]
pub fn progress_key(user: &UserId) -> String {
    format!("{PROGRESS_KEY_PREFIX}:{user}")
}

/// Fail-soft facade over a [`KeyValueStore`].
///
/// Every backend error is logged and swallowed here: reads degrade to
/// "absent", writes degrade to "not saved". Nothing past this type sees a
/// `StorageError`.
#[derive(Clone)]
pub struct LocalCache {
    store: Arc<dyn KeyValueStore>,
}

impl LocalCache {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStore::new()))
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value,
            Err(err) => {
                warn!(key, error = %err, "local cache read failed");
                None
            }
        }
    }

    /// Returns whether the value was persisted.
    pub fn set(&self, key: &str, value: &str) -> bool {
        match self.store.set(key, value) {
            Ok(()) => true,
            Err(err) => {
                warn!(key, error = %err, "local cache write failed");
                false
            }
        }
    }

    pub fn remove(&self, key: &str) {
        if let Err(err) = self.store.remove(key) {
            warn!(key, error = %err, "local cache remove failed");
        }
    }

    // ─── Identity ──────────────────────────────────────────────────────────────

    /// The remembered user, if one is stored and still valid.
    #[must_use]
    pub fn load_identity(&self) -> Option<UserId> {
        let raw = self.get(IDENTITY_KEY)?;
        match UserId::parse(raw) {
            Ok(user) => Some(user),
            Err(err) => {
                warn!(error = %err, "discarding invalid cached identity");
                None
            }
        }
    }

    pub fn save_identity(&self, user: &UserId) -> bool {
        self.set(IDENTITY_KEY, user.as_str())
    }

    pub fn clear_identity(&self) {
        self.remove(IDENTITY_KEY);
    }

    // ─── Progress ──────────────────────────────────────────────────────────────

    /// The cached record for `user`, or an empty record when absent or unreadable.
    #[must_use]
    pub fn load_progress(&self, user: &UserId) -> ProgressRecord {
        let Some(raw) = self.get(&progress_key(user)) else {
            debug!(user = %user, "no cached progress");
            return ProgressRecord::default();
        };
        match snapshot::decode(user, &raw) {
            Ok(record) => record,
            Err(err) => {
                warn!(user = %user, error = %err, "cached progress unreadable; starting empty");
                ProgressRecord::default()
            }
        }
    }

    /// Returns whether the snapshot was persisted.
    pub fn save_progress(&self, user: &UserId, record: &ProgressRecord) -> bool {
        match snapshot::encode(user, record) {
            Ok(raw) => self.set(&progress_key(user), &raw),
            Err(err) => {
                warn!(user = %user, error = %err, "progress snapshot encode failed");
                false
            }
        }
    }

    pub fn clear_progress(&self, user: &UserId) {
        self.remove(&progress_key(user));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StorageError;
    use lms_core::model::ExerciseId;
    use lms_core::time::fixed_now;

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Unavailable("quota exceeded".into()))
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("quota exceeded".into()))
        }

        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("quota exceeded".into()))
        }
    }

    fn user(raw: &str) -> UserId {
        UserId::parse(raw).unwrap()
    }

    #[test]
    fn progress_round_trips_through_cache() {
        let cache = LocalCache::in_memory();
        let record = ProgressRecord::new(
            [ExerciseId::parse("exercise-1").unwrap()],
            Some(ExerciseId::parse("exercise-2").unwrap()),
            Some(fixed_now()),
        );
        assert!(cache.save_progress(&user("alice"), &record));
        assert_eq!(cache.load_progress(&user("alice")), record);
        assert!(cache.load_progress(&user("bob")).is_empty());
    }

    #[test]
    fn corrupt_progress_falls_back_to_empty() {
        let cache = LocalCache::in_memory();
        cache.set(&progress_key(&user("alice")), "{not json");
        assert!(cache.load_progress(&user("alice")).is_empty());
    }

    #[test]
    fn broken_backend_never_escapes() {
        let cache = LocalCache::new(Arc::new(BrokenStore));
        assert_eq!(cache.get("anything"), None);
        assert!(!cache.set("anything", "value"));
        cache.remove("anything");
        assert!(cache.load_identity().is_none());
        assert!(cache.load_progress(&user("alice")).is_empty());
        assert!(!cache.save_progress(&user("alice"), &ProgressRecord::default()));
    }

    #[test]
    fn identity_is_validated_on_load() {
        let cache = LocalCache::in_memory();
        cache.set(IDENTITY_KEY, "x");
        assert!(cache.load_identity().is_none());

        cache.save_identity(&user("testuser"));
        assert_eq!(cache.load_identity(), Some(user("testuser")));

        cache.clear_identity();
        assert!(cache.load_identity().is_none());
    }

    #[test]
    fn progress_keys_are_per_user() {
        assert_eq!(progress_key(&user("alice")), "tkx-progress:alice");
    }
}
