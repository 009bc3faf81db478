//! Transaction ID generation.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A unique identifier for a transaction, also used as the lock owner id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

impl TransactionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Txn{}", self.0)
    }
}

/// Hands out strictly increasing ids starting at 1.
#[derive(Debug)]
pub struct TransactionIdGenerator {
    next_id: AtomicU64,
}

impl TransactionIdGenerator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> TransactionId {
        TransactionId::new(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Last id handed out, 0 if none.
    pub fn current(&self) -> TransactionId {
        TransactionId::new(self.next_id.load(Ordering::SeqCst).saturating_sub(1))
    }
}

impl Default for TransactionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
