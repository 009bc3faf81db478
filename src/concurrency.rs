//! Concurrency control.
//!
//! Page-level shared/exclusive locking over a fixed set of lock stripes.

pub mod lock;

pub use lock::{LockGuard, LockManager, LockMode};
