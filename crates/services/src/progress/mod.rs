mod push;
mod reconciler;

pub use push::SyncStatus;
pub use reconciler::{ProgressReconciler, Subscription};
