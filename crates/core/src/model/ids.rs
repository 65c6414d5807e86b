use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Shortest accepted user identifier.
pub const USER_ID_MIN_LEN: usize = 3;

/// Longest accepted user identifier.
pub const USER_ID_MAX_LEN: usize = 50;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

/// Rejection reasons for user, exercise, and version identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum IdError {
    #[error("{kind} cannot be empty")]
    Empty { kind: &'static str },

    #[error("user id must be between 3 and 50 characters, got {len}")]
    UserIdLength { len: usize },

    #[error("{kind} contains characters outside [a-zA-Z0-9-_]: {raw:?}")]
    InvalidCharacters { kind: &'static str, raw: String },

    #[error("unsupported curriculum version: {raw:?}")]
    UnknownVersion { raw: String },
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn check_charset(kind: &'static str, raw: &str) -> Result<(), IdError> {
    if raw.is_empty() {
        return Err(IdError::Empty { kind });
    }
    if !raw.chars().all(is_id_char) {
        return Err(IdError::InvalidCharacters {
            kind,
            raw: raw.to_owned(),
        });
    }
    Ok(())
}

//
// ─── USER ID ───────────────────────────────────────────────────────────────────
//

/// Validated user identity used as the partition key for progress.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Validates an identifier exactly as given.
    ///
    /// # Errors
    ///
    /// Returns `IdError` when the length is outside 3..=50 or a character falls
    /// outside `[a-zA-Z0-9-_]`.
    pub fn parse(raw: impl Into<String>) -> Result<Self, IdError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(IdError::Empty { kind: "user id" });
        }
        let len = raw.chars().count();
        if !(USER_ID_MIN_LEN..=USER_ID_MAX_LEN).contains(&len) {
            return Err(IdError::UserIdLength { len });
        }
        check_charset("user id", &raw)?;
        Ok(Self(raw))
    }

    /// Normalizes login input and then validates it.
    ///
    /// Normalization only trims surrounding whitespace and removes `<` and `>`.
    /// It is not an escaping step; the charset check is what rejects anything else.
    ///
    /// # Errors
    ///
    /// Returns `IdError` if the normalized input is not a valid user id.
    pub fn from_login_input(input: &str) -> Result<Self, IdError> {
        Self::parse(sanitize_login_input(input))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Trims whitespace and strips angle brackets from raw login input.
#[must_use]
pub fn sanitize_login_input(input: &str) -> String {
    input.trim().replace(['<', '>'], "")
}

//
// ─── EXERCISE ID ───────────────────────────────────────────────────────────────
//

/// Opaque exercise identifier, unique within a curriculum version.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExerciseId(String);

impl ExerciseId {
    /// # Errors
    ///
    /// Returns `IdError` if the id is empty or has characters outside `[a-zA-Z0-9-_]`.
    pub fn parse(raw: impl Into<String>) -> Result<Self, IdError> {
        let raw = raw.into();
        check_charset("exercise id", &raw)?;
        Ok(Self(raw))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

//
// ─── CURRICULUM VERSION ────────────────────────────────────────────────────────
//

/// The enumerated set of curriculum versions the server accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CurriculumVersion {
    #[default]
    Tk4,
}

impl CurriculumVersion {
    pub const ALL: [CurriculumVersion; 1] = [CurriculumVersion::Tk4];

    /// Path segment and wire tag for this version.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CurriculumVersion::Tk4 => "tk4",
        }
    }
}

// ─── Conversions ───────────────────────────────────────────────────────────────

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Debug for ExerciseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExerciseId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ExerciseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for CurriculumVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl FromStr for ExerciseId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl FromStr for CurriculumVersion {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| IdError::UnknownVersion { raw: s.to_owned() })
    }
}

impl TryFrom<String> for UserId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<String> for ExerciseId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<String> for CurriculumVersion {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

impl From<ExerciseId> for String {
    fn from(value: ExerciseId) -> Self {
        value.0
    }
}

impl From<CurriculumVersion> for String {
    fn from(value: CurriculumVersion) -> Self {
        value.as_str().to_owned()
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_accepts_valid_formats() {
        assert!(UserId::parse("testuser").is_ok());
        assert!(UserId::parse("user-123").is_ok());
        assert!(UserId::parse("a_b").is_ok());
        assert!(UserId::parse("a".repeat(50)).is_ok());
    }

    #[test]
    fn user_id_rejects_bad_lengths() {
        assert_eq!(
            UserId::parse("ab").unwrap_err(),
            IdError::UserIdLength { len: 2 }
        );
        assert_eq!(
            UserId::parse("a".repeat(51)).unwrap_err(),
            IdError::UserIdLength { len: 51 }
        );
        assert!(matches!(
            UserId::parse("").unwrap_err(),
            IdError::Empty { .. }
        ));
    }

    #[test]
    fn user_id_rejects_markup() {
        let err = UserId::parse("user<123>").unwrap_err();
        assert!(matches!(err, IdError::InvalidCharacters { .. }));
    }

    #[test]
    fn login_sanitizing_trims_and_strips_brackets_only() {
        assert_eq!(sanitize_login_input("  test user  "), "test user");
        assert_eq!(
            sanitize_login_input("<script>alert(\"xss\")</script>"),
            "scriptalert(\"xss\")/script"
        );
        assert_eq!(sanitize_login_input(""), "");
    }

    #[test]
    fn login_input_is_normalized_before_validation() {
        let id = UserId::from_login_input("  <alice>  ").unwrap();
        assert_eq!(id.as_str(), "alice");

        // Sanitizing does not make an id valid; spaces still fail the charset.
        assert!(UserId::from_login_input(" test user ").is_err());
    }

    #[test]
    fn exercise_id_validation() {
        assert!(ExerciseId::parse("exercise-1").is_ok());
        assert!(ExerciseId::parse("").is_err());
        assert!(ExerciseId::parse("exercise<1>").is_err());
        assert!(ExerciseId::parse("../etc").is_err());
    }

    #[test]
    fn version_parses_only_known_tags() {
        assert_eq!("tk4".parse::<CurriculumVersion>().unwrap(), CurriculumVersion::Tk4);
        assert!("tk3".parse::<CurriculumVersion>().is_err());
        assert!("".parse::<CurriculumVersion>().is_err());
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = ExerciseId::parse("exercise-1").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"exercise-1\"");

        let bad: Result<ExerciseId, _> = serde_json::from_str("\"a b\"");
        assert!(bad.is_err());
    }
}
