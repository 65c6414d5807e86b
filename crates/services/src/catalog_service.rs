use std::sync::Arc;

use tracing::debug;

use lms_core::Catalog;
use lms_core::model::{CurriculumVersion, Exercise, ExerciseId};

use crate::error::CatalogLoadError;
use crate::remote::ExerciseSource;

/// Loads exercise catalogs for a curriculum version.
#[derive(Clone)]
pub struct CatalogService {
    source: Arc<dyn ExerciseSource>,
}

impl CatalogService {
    #[must_use]
    pub fn new(source: Arc<dyn ExerciseSource>) -> Self {
        Self { source }
    }

    /// Fetch and order every exercise of `version`.
    ///
    /// # Errors
    ///
    /// Returns `CatalogLoadError::VersionNotFound` for an unknown version,
    /// `Invalid` if the list has duplicate ids, and `Transport` on network failure.
    pub async fn load(&self, version: CurriculumVersion) -> Result<Catalog, CatalogLoadError> {
        let exercises = self
            .source
            .fetch_exercises(version)
            .await?
            .ok_or(CatalogLoadError::VersionNotFound(version))?;
        let catalog = Catalog::new(version, exercises)?;
        debug!(%version, exercises = catalog.len(), "catalog loaded");
        Ok(catalog)
    }

    /// Fetch a single exercise with its full content.
    ///
    /// # Errors
    ///
    /// Returns `CatalogLoadError::ExerciseNotFound` if the server has no such
    /// exercise, and `Transport` on network failure.
    pub async fn exercise(
        &self,
        version: CurriculumVersion,
        id: &ExerciseId,
    ) -> Result<Exercise, CatalogLoadError> {
        self.source
            .fetch_exercise(version, id)
            .await?
            .ok_or_else(|| CatalogLoadError::ExerciseNotFound {
                version,
                id: id.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryExerciseSource;
    use lms_core::model::Section;

    fn exercise(id: &str, section: Section, order: i64) -> Exercise {
        Exercise::new(ExerciseId::parse(id).unwrap(), id, section, order, "", "").unwrap()
    }

    #[tokio::test]
    async fn load_orders_by_section_then_order() {
        let source = InMemoryExerciseSource::new().with_version(
            CurriculumVersion::Tk4,
            vec![
                exercise("b2", Section::Intermediate, 1),
                exercise("a2", Section::Beginner, 2),
                exercise("a1", Section::Beginner, 1),
            ],
        );
        let service = CatalogService::new(Arc::new(source));
        let catalog = service.load(CurriculumVersion::Tk4).await.unwrap();
        let ids: Vec<_> = catalog.exercises().iter().map(|e| e.id().as_str()).collect();
        assert_eq!(ids, ["a1", "a2", "b2"]);
    }

    #[tokio::test]
    async fn unknown_version_and_exercise_are_not_found() {
        let service = CatalogService::new(Arc::new(InMemoryExerciseSource::new()));
        assert!(matches!(
            service.load(CurriculumVersion::Tk4).await,
            Err(CatalogLoadError::VersionNotFound(CurriculumVersion::Tk4))
        ));
        assert!(matches!(
            service
                .exercise(CurriculumVersion::Tk4, &ExerciseId::parse("nope").unwrap())
                .await,
            Err(CatalogLoadError::ExerciseNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let source = InMemoryExerciseSource::new().with_version(
            CurriculumVersion::Tk4,
            vec![exercise("a", Section::Beginner, 1), exercise("a", Section::Advanced, 1)],
        );
        let service = CatalogService::new(Arc::new(source));
        assert!(matches!(
            service.load(CurriculumVersion::Tk4).await,
            Err(CatalogLoadError::Invalid(_))
        ));
    }
}
