use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::{ExerciseId, UserId};

/// A progress-affecting event carried by the live channel.
///
/// `user_id` of `None` marks a broadcast (for example an instructor pushing a
/// completion to every session); otherwise the event only concerns that user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ProgressEvent {
    #[serde(rename_all = "camelCase")]
    ExerciseCompleted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
        exercise_id: ExerciseId,
        at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    ProgressUpdated {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
        completed: Vec<ExerciseId>,
        #[serde(default)]
        current_exercise: Option<ExerciseId>,
        last_accessed: DateTime<Utc>,
    },
}

impl ProgressEvent {
    #[must_use]
    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            ProgressEvent::ExerciseCompleted { user_id, .. }
            | ProgressEvent::ProgressUpdated { user_id, .. } => user_id.as_ref(),
        }
    }

    /// Whether a session signed in as `user` should apply this event.
    #[must_use]
    pub fn concerns(&self, user: &UserId) -> bool {
        self.user_id().is_none_or(|target| target == user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn completion_wire_format_is_tagged() {
        let event = ProgressEvent::ExerciseCompleted {
            user_id: Some(UserId::parse("alice").unwrap()),
            exercise_id: ExerciseId::parse("exercise-1").unwrap(),
            at: fixed_now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "exercise-completed");
        assert_eq!(json["userId"], "alice");
        assert_eq!(json["exerciseId"], "exercise-1");

        let back: ProgressEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn broadcasts_concern_everyone() {
        let raw = r#"{"type":"progress-updated","completed":["e1"],"lastAccessed":"2023-11-14T22:13:20Z"}"#;
        let event: ProgressEvent = serde_json::from_str(raw).unwrap();
        assert!(event.concerns(&UserId::parse("anyone").unwrap()));
    }

    #[test]
    fn targeted_events_concern_only_their_user() {
        let event = ProgressEvent::ExerciseCompleted {
            user_id: Some(UserId::parse("alice").unwrap()),
            exercise_id: ExerciseId::parse("e1").unwrap(),
            at: fixed_now(),
        };
        assert!(event.concerns(&UserId::parse("alice").unwrap()));
        assert!(!event.concerns(&UserId::parse("bob").unwrap()));
    }
}
