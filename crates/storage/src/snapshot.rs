//! Schema-tagged encoding of a progress record for the local cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use lms_core::model::{ExerciseId, ProgressRecord, UserId};

/// Schema tag written by this client.
pub const SNAPSHOT_SCHEMA: u32 = 1;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SnapshotError {
    #[error("malformed snapshot: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unsupported snapshot schema {0}")]
    UnsupportedSchema(u32),

    #[error("snapshot belongs to {found}, expected {expected}")]
    ForeignUser { expected: UserId, found: UserId },
}

/// On-disk shape. Unknown fields are ignored so newer writers stay readable.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgressSnapshot {
    schema: u32,
    user_id: UserId,
    completed: Vec<ExerciseId>,
    #[serde(default)]
    current_exercise: Option<ExerciseId>,
    #[serde(default)]
    last_accessed: Option<DateTime<Utc>>,
}

/// Serialize `record` for `user`.
///
/// # Errors
///
/// Returns `SnapshotError::Malformed` if serialization fails.
pub fn encode(user: &UserId, record: &ProgressRecord) -> Result<String, SnapshotError> {
    let snapshot = ProgressSnapshot {
        schema: SNAPSHOT_SCHEMA,
        user_id: user.clone(),
        completed: record.completed().iter().cloned().collect(),
        current_exercise: record.current_exercise().cloned(),
        last_accessed: record.last_accessed(),
    };
    Ok(serde_json::to_string(&snapshot)?)
}

/// Decode a snapshot written for `user`.
///
/// Any schema at or above [`SNAPSHOT_SCHEMA`] is accepted as long as the
/// required fields are present.
///
/// # Errors
///
/// Returns `SnapshotError` for missing fields, schema 0, or another user's snapshot.
pub fn decode(user: &UserId, raw: &str) -> Result<ProgressRecord, SnapshotError> {
    let snapshot: ProgressSnapshot = serde_json::from_str(raw)?;
    if snapshot.schema < SNAPSHOT_SCHEMA {
        return Err(SnapshotError::UnsupportedSchema(snapshot.schema));
    }
    if &snapshot.user_id != user {
        return Err(SnapshotError::ForeignUser {
            expected: user.clone(),
            found: snapshot.user_id,
        });
    }
    Ok(ProgressRecord::new(
        snapshot.completed,
        snapshot.current_exercise,
        snapshot.last_accessed,
    ))
}
