//! Write-ahead log.
//!
//! Transactions buffer their records privately and hand them to the
//! [`LogManager`] as one contiguous batch on commit. The log is append-only;
//! reading it back is supported for diagnostics, replay is not.

pub mod manager;
pub mod record;

pub use manager::{LogManager, WalConfig};
pub use record::{LogPayload, LogRecord, Lsn};
