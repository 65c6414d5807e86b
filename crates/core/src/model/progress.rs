use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::event::ProgressEvent;
use crate::model::ids::ExerciseId;

/// Which side wins the pointer when two candidates carry the same `last_accessed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreak {
    /// Keep the record being merged into.
    Existing,
    /// Take the candidate being merged in.
    Incoming,
}

/// Per-user completion state.
///
/// `completed` only ever grows through merges, so merging is commutative for
/// the completed set. `current_exercise` and `last_accessed` follow the later
/// timestamp, which assumes a user's own devices do not write within the same
/// instant.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    completed: BTreeSet<ExerciseId>,
    #[serde(default)]
    current_exercise: Option<ExerciseId>,
    #[serde(default)]
    last_accessed: Option<DateTime<Utc>>,
}

impl ProgressRecord {
    #[must_use]
    pub fn new(
        completed: impl IntoIterator<Item = ExerciseId>,
        current_exercise: Option<ExerciseId>,
        last_accessed: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            completed: completed.into_iter().collect(),
            current_exercise,
            last_accessed,
        }
    }

    #[must_use]
    pub fn completed(&self) -> &BTreeSet<ExerciseId> {
        &self.completed
    }

    #[must_use]
    pub fn is_completed(&self, id: &ExerciseId) -> bool {
        self.completed.contains(id)
    }

    #[must_use]
    pub fn current_exercise(&self) -> Option<&ExerciseId> {
        self.current_exercise.as_ref()
    }

    #[must_use]
    pub fn last_accessed(&self) -> Option<DateTime<Utc>> {
        self.last_accessed
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty() && self.current_exercise.is_none() && self.last_accessed.is_none()
    }

    /// Moves `last_accessed` forward to `at`; never moves it backwards.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        if self.last_accessed.is_none_or(|prev| prev < at) {
            self.last_accessed = Some(at);
        }
    }

    /// Records a completion. Returns `false` (and changes nothing) if it was
    /// already completed.
    pub fn mark_completed(&mut self, id: ExerciseId, at: DateTime<Utc>) -> bool {
        if self.completed.contains(&id) {
            return false;
        }
        self.completed.insert(id);
        self.touch(at);
        true
    }

    /// Points the record at `id`. Returns `false` if it already pointed there.
    pub fn set_current(&mut self, id: ExerciseId, at: DateTime<Utc>) -> bool {
        if self.current_exercise.as_ref() == Some(&id) {
            return false;
        }
        self.current_exercise = Some(id);
        self.touch(at);
        true
    }

    /// Folds `candidate` into this record and reports whether anything changed.
    ///
    /// Completions are unioned. The pointer and timestamp come from whichever
    /// side was accessed later; `tie` decides equal timestamps.
    pub fn merge(&mut self, candidate: &ProgressRecord, tie: TieBreak) -> bool {
        let before = self.completed.len();
        self.completed.extend(candidate.completed.iter().cloned());
        let mut changed = self.completed.len() != before;

        let take_pointer = match candidate.last_accessed.cmp(&self.last_accessed) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => tie == TieBreak::Incoming,
            std::cmp::Ordering::Less => false,
        };
        if take_pointer {
            changed |= self.current_exercise != candidate.current_exercise
                || self.last_accessed != candidate.last_accessed;
            self.current_exercise.clone_from(&candidate.current_exercise);
            self.last_accessed = candidate.last_accessed;
        }
        changed
    }

    /// Applies a live event with the same union rule as [`ProgressRecord::merge`].
    ///
    /// A completion announcement only adds to `completed` and advances the
    /// timestamp; it carries no pointer, so it never clears ours.
    pub fn apply_event(&mut self, event: &ProgressEvent) -> bool {
        match event {
            ProgressEvent::ExerciseCompleted { exercise_id, at, .. } => {
                let inserted = self.completed.insert(exercise_id.clone());
                let before = self.last_accessed;
                self.touch(*at);
                inserted || before != self.last_accessed
            }
            ProgressEvent::ProgressUpdated {
                completed,
                current_exercise,
                last_accessed,
                ..
            } => {
                let candidate = ProgressRecord::new(
                    completed.iter().cloned(),
                    current_exercise.clone(),
                    Some(*last_accessed),
                );
                self.merge(&candidate, TieBreak::Incoming)
            }
        }
    }

    /// Whether the record was touched within the last `days` days of `now`.
    #[must_use]
    pub fn accessed_within(&self, now: DateTime<Utc>, days: i64) -> bool {
        let Some(at) = self.last_accessed else {
            return false;
        };
        let elapsed = (now - at).abs();
        let whole_days = elapsed.num_days();
        let partial = elapsed > chrono::Duration::days(whole_days);
        whole_days + i64::from(partial) <= days
    }
}

/// Merges a cached candidate with a server candidate.
///
/// The server copy wins ties because it is the one shared across devices.
#[must_use]
pub fn reconcile(local: &ProgressRecord, remote: &ProgressRecord) -> ProgressRecord {
    let mut merged = local.clone();
    merged.merge(remote, TieBreak::Incoming);
    merged
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
