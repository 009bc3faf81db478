//! Transactions.
//!
//! A transaction owns its page locks and a private log buffer. Commit makes
//! the buffered records durable through the log manager and then releases
//! the locks; dropping or aborting releases the locks without undoing page
//! changes.

pub mod handle;
pub mod id;
pub mod state;

pub use handle::{Transaction, TransactionError};
pub use id::{TransactionId, TransactionIdGenerator};
pub use state::TransactionState;
