use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::ExerciseId;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ExerciseError {
    #[error("exercise title cannot be empty")]
    EmptyTitle,

    #[error("unknown section: {0:?}")]
    UnknownSection(String),
}

//
// ─── SECTION ───────────────────────────────────────────────────────────────────
//

/// Difficulty tier used to group exercises for display and filtering.
///
/// Variant order is the display order of the tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl Section {
    pub const ALL: [Section; 4] = [
        Section::Beginner,
        Section::Intermediate,
        Section::Advanced,
        Section::Expert,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Section::Beginner => "beginner",
            Section::Intermediate => "intermediate",
            Section::Advanced => "advanced",
            Section::Expert => "expert",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Section {
    type Err = ExerciseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|section| section.as_str() == s)
            .ok_or_else(|| ExerciseError::UnknownSection(s.to_owned()))
    }
}

//
// ─── EXERCISE ──────────────────────────────────────────────────────────────────
//

static TIME_ESTIMATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Estimated Time.*?(\d+-\d+)").expect("time estimate pattern is valid")
});

/// One exercise of a curriculum version. Immutable once fetched.
///
/// Missing `section` and `order` fields decode to `beginner` and `0`, matching
/// what the catalog endpoint sends for unclassified exercises.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "ExerciseFields")]
pub struct Exercise {
    id: ExerciseId,
    title: String,
    section: Section,
    order: i64,
    content: String,
    raw_content: String,
}

/// Wire shape of an exercise; decoding goes through [`Exercise::new`].
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExerciseFields {
    id: ExerciseId,
    title: String,
    #[serde(default)]
    section: Section,
    #[serde(default)]
    order: i64,
    #[serde(default)]
    content: String,
    #[serde(default)]
    raw_content: String,
}

impl TryFrom<ExerciseFields> for Exercise {
    type Error = ExerciseError;

    fn try_from(fields: ExerciseFields) -> Result<Self, Self::Error> {
        Self::new(
            fields.id,
            fields.title,
            fields.section,
            fields.order,
            fields.content,
            fields.raw_content,
        )
    }
}

impl Exercise {
    /// # Errors
    ///
    /// Returns `ExerciseError::EmptyTitle` if the title is blank.
    pub fn new(
        id: ExerciseId,
        title: impl Into<String>,
        section: Section,
        order: i64,
        content: impl Into<String>,
        raw_content: impl Into<String>,
    ) -> Result<Self, ExerciseError> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(ExerciseError::EmptyTitle);
        }
        Ok(Self {
            id,
            title,
            section,
            order,
            content: content.into(),
            raw_content: raw_content.into(),
        })
    }

    #[must_use]
    pub fn id(&self) -> &ExerciseId {
        &self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn section(&self) -> Section {
        self.section
    }

    #[must_use]
    pub fn order(&self) -> i64 {
        self.order
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub fn raw_content(&self) -> &str {
        &self.raw_content
    }

    /// The `N-M` minute range from an `Estimated Time` line, if present.
    #[must_use]
    pub fn time_estimate(&self) -> Option<&str> {
        extract_time_estimate(&self.raw_content)
    }
}

/// Finds the first `N-M` range following `Estimated Time` on the same line.
#[must_use]
pub fn extract_time_estimate(raw: &str) -> Option<&str> {
    TIME_ESTIMATE
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> ExerciseId {
        ExerciseId::parse(raw).unwrap()
    }

    #[test]
    fn time_estimate_is_extracted() {
        assert_eq!(
            extract_time_estimate("Estimated Time: 15-20 min\n\nExercise content here."),
            Some("15-20")
        );
        assert_eq!(
            extract_time_estimate("Exercise content without time estimate."),
            None
        );
    }

    #[test]
    fn time_estimate_does_not_cross_lines() {
        assert_eq!(extract_time_estimate("Estimated Time: soon\n10-15"), None);
    }

    #[test]
    fn decoding_fills_section_and_order_defaults() {
        let ex: Exercise = serde_json::from_str(r#"{"id":"1","title":"Exercise 1"}"#).unwrap();
        assert_eq!(ex.section(), Section::Beginner);
        assert_eq!(ex.order(), 0);

        let ex: Exercise = serde_json::from_str(
            r#"{"id":"2","title":"Exercise 2","section":"intermediate","order":2,"extra":true}"#,
        )
        .unwrap();
        assert_eq!(ex.section(), Section::Intermediate);
        assert_eq!(ex.order(), 2);
    }

    #[test]
    fn decoding_requires_id_and_title() {
        assert!(serde_json::from_str::<Exercise>(r#"{"id":"1"}"#).is_err());
        assert!(serde_json::from_str::<Exercise>(r#"{"title":"x"}"#).is_err());
    }

    #[test]
    fn raw_content_uses_camel_case_on_the_wire() {
        let ex = Exercise::new(
            id("exercise-1"),
            "First Exercise",
            Section::Beginner,
            1,
            "body",
            "Estimated Time: 15-20 min\n\nbody",
        )
        .unwrap();
        let json = serde_json::to_value(&ex).unwrap();
        assert_eq!(json["rawContent"], "Estimated Time: 15-20 min\n\nbody");
        assert_eq!(ex.time_estimate(), Some("15-20"));
    }

    #[test]
    fn blank_title_is_rejected() {
        let err = Exercise::new(id("e"), "  ", Section::Expert, 0, "", "").unwrap_err();
        assert_eq!(err, ExerciseError::EmptyTitle);
    }

    #[test]
    fn decoding_rejects_blank_title() {
        let err = serde_json::from_str::<Exercise>(r#"{"id":"exercise-1","title":"   "}"#)
            .unwrap_err();
        assert!(err.to_string().contains("title cannot be empty"));
    }

    #[test]
    fn sections_sort_by_tier() {
        let mut tiers = vec![Section::Expert, Section::Beginner, Section::Advanced];
        tiers.sort();
        assert_eq!(tiers, vec![Section::Beginner, Section::Advanced, Section::Expert]);
        assert_eq!("advanced".parse::<Section>().unwrap(), Section::Advanced);
        assert!("master".parse::<Section>().is_err());
    }
}
