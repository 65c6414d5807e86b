use std::collections::HashMap;

use thiserror::Error;

use crate::model::{CurriculumVersion, Exercise, ExerciseId, ProgressRecord, Section};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("duplicate exercise id in catalog: {0}")]
    DuplicateId(ExerciseId),
}

/// Completion counts for one section of the active catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionCount {
    pub section: Section,
    pub completed: usize,
    pub total: usize,
}

/// The exercises of one curriculum version, in display order.
///
/// Display order is section tier first, then ascending `order`; exercises
/// with equal `order` keep the order the server listed them in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    version: CurriculumVersion,
    exercises: Vec<Exercise>,
    index: HashMap<ExerciseId, usize>,
}

impl Catalog {
    /// # Errors
    ///
    /// Returns `CatalogError::DuplicateId` if two exercises share an id.
    pub fn new(version: CurriculumVersion, mut exercises: Vec<Exercise>) -> Result<Self, CatalogError> {
        exercises.sort_by_key(|ex| (ex.section(), ex.order()));

        let mut index = HashMap::with_capacity(exercises.len());
        for (pos, ex) in exercises.iter().enumerate() {
            if index.insert(ex.id().clone(), pos).is_some() {
                return Err(CatalogError::DuplicateId(ex.id().clone()));
            }
        }

        Ok(Self {
            version,
            exercises,
            index,
        })
    }

    #[must_use]
    pub fn empty(version: CurriculumVersion) -> Self {
        Self {
            version,
            exercises: Vec::new(),
            index: HashMap::new(),
        }
    }

    #[must_use]
    pub fn version(&self) -> CurriculumVersion {
        self.version
    }

    #[must_use]
    pub fn exercises(&self) -> &[Exercise] {
        &self.exercises
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.exercises.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exercises.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &ExerciseId) -> bool {
        self.index.contains_key(id)
    }

    #[must_use]
    pub fn get(&self, id: &ExerciseId) -> Option<&Exercise> {
        self.index.get(id).map(|&pos| &self.exercises[pos])
    }

    pub fn in_section(&self, section: Section) -> impl Iterator<Item = &Exercise> {
        self.exercises.iter().filter(move |ex| ex.section() == section)
    }

    #[must_use]
    pub fn first(&self) -> Option<&Exercise> {
        self.exercises.first()
    }

    /// The exercise after `id` in display order, crossing into the next section.
    #[must_use]
    pub fn next_after(&self, id: &ExerciseId) -> Option<&Exercise> {
        let pos = *self.index.get(id)?;
        self.exercises.get(pos + 1)
    }

    /// Number of this catalog's exercises the record has completed.
    ///
    /// Completions for ids outside the catalog are ignored.
    #[must_use]
    pub fn completed_count(&self, record: &ProgressRecord) -> usize {
        record
            .completed()
            .iter()
            .filter(|id| self.contains(id))
            .count()
    }

    /// Rounded completion percentage in `0..=100`; `0` for an empty catalog.
    #[must_use]
    pub fn percent_complete(&self, record: &ProgressRecord) -> u8 {
        let total = self.exercises.len();
        if total == 0 {
            return 0;
        }
        let done = self.completed_count(record);
        let percent = (done * 100 + total / 2) / total;
        u8::try_from(percent.min(100)).unwrap_or(100)
    }

    /// Per-section completion counts, one entry per tier that has exercises.
    #[must_use]
    pub fn section_counts(&self, record: &ProgressRecord) -> Vec<SectionCount> {
        Section::ALL
            .into_iter()
            .filter_map(|section| {
                let (total, completed) = self.in_section(section).fold((0, 0), |(t, c), ex| {
                    (t + 1, c + usize::from(record.is_completed(ex.id())))
                });
                (total > 0).then_some(SectionCount {
                    section,
                    completed,
                    total,
                })
            })
            .collect()
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
