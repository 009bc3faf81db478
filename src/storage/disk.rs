//! Backing-file access.

pub mod persisted_stream;

pub use persisted_stream::PersistedStream;
