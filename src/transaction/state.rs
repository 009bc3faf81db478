//! Transaction lifecycle states.

use serde::{Deserialize, Serialize};

/// `Active -> Committed` or `Active -> Aborted`; both end states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed)
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Committed => write!(f, "Committed"),
            Self::Aborted => write!(f, "Aborted"),
        }
    }
}
