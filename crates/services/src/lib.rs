#![forbid(unsafe_code)]

pub mod catalog_service;
pub mod config;
pub mod error;
pub mod http;
pub mod identity;
pub mod live;
pub mod progress;
pub mod remote;
pub mod session;
pub mod view;

pub use lms_core::Clock;

pub use catalog_service::CatalogService;
pub use config::{ClientConfig, RetryPolicy};
pub use error::{
    CatalogLoadError, ConfigError, IdentityError, ProgressError, SessionError, TransportError,
};
pub use http::HttpApi;
pub use identity::IdentityService;
pub use live::{ChannelEvent, ChannelState, LiveChannel, LiveEvents, LiveTransport, LoopbackHub, TcpTransport};
pub use progress::{ProgressReconciler, Subscription, SyncStatus};
pub use remote::{ExerciseSource, InMemoryExerciseSource, InMemoryProgressStore, ProgressStore};
pub use session::{LearningSession, SessionParts};
pub use view::{ExerciseItem, ProgressView, SectionView, project};
