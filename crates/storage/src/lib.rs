#![forbid(unsafe_code)]

pub mod cache;
pub mod file;
pub mod snapshot;
pub mod store;

pub use cache::{IDENTITY_KEY, LocalCache, PROGRESS_KEY_PREFIX, progress_key};
pub use file::FileStore;
pub use store::{InMemoryStore, KeyValueStore, StorageError};
