//! Read-only projection of the catalog and progress record for display.

use chrono::{DateTime, Utc};

use lms_core::Catalog;
use lms_core::model::{CurriculumVersion, Exercise, ExerciseId, ProgressRecord, Section, UserId};

use crate::progress::SyncStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExerciseItem {
    pub id: ExerciseId,
    pub title: String,
    pub order: i64,
    pub completed: bool,
    pub current: bool,
    /// `N-M` minutes, when the exercise states one.
    pub time_estimate: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionView {
    pub section: Section,
    pub completed: usize,
    pub total: usize,
    pub exercises: Vec<ExerciseItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressView {
    pub user: UserId,
    pub version: CurriculumVersion,
    pub percent: u8,
    pub completed: usize,
    pub total: usize,
    pub sections: Vec<SectionView>,
    pub current: Option<ExerciseId>,
    /// Where to continue: after the current exercise, else the first one not done.
    pub next: Option<ExerciseId>,
    pub last_accessed: Option<DateTime<Utc>>,
    pub sync: SyncStatus,
}

#[must_use]
pub fn project(
    user: &UserId,
    catalog: &Catalog,
    record: &ProgressRecord,
    sync: SyncStatus,
) -> ProgressView {
    let current = record.current_exercise().cloned();
    let item = |exercise: &Exercise| ExerciseItem {
        id: exercise.id().clone(),
        title: exercise.title().to_string(),
        order: exercise.order(),
        completed: record.is_completed(exercise.id()),
        current: current.as_ref() == Some(exercise.id()),
        time_estimate: exercise.time_estimate().map(str::to_string),
    };

    let sections = catalog
        .section_counts(record)
        .into_iter()
        .map(|counts| SectionView {
            section: counts.section,
            completed: counts.completed,
            total: counts.total,
            exercises: catalog.in_section(counts.section).map(item).collect(),
        })
        .collect();

    let next = match &current {
        Some(id) if catalog.contains(id) => catalog.next_after(id),
        _ => catalog
            .exercises()
            .iter()
            .find(|exercise| !record.is_completed(exercise.id())),
    }
    .map(|exercise| exercise.id().clone());

    ProgressView {
        user: user.clone(),
        version: catalog.version(),
        percent: catalog.percent_complete(record),
        completed: catalog.completed_count(record),
        total: catalog.len(),
        sections,
        current,
        next,
        last_accessed: record.last_accessed(),
        sync,
    }
}
