mod event;
mod exercise;
mod ids;
mod progress;

pub use event::ProgressEvent;
pub use exercise::{Exercise, ExerciseError, Section, extract_time_estimate};
pub use ids::{
    CurriculumVersion, ExerciseId, IdError, USER_ID_MAX_LEN, USER_ID_MIN_LEN, UserId,
    sanitize_login_input,
};
pub use progress::{ProgressRecord, TieBreak, reconcile};
