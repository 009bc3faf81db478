//! Storage layer error types.

use thiserror::Error;

use crate::storage::page::{PageId, PageType};
use crate::transaction::TransactionError;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Not enough space: requires {required} bytes but only {available} available")]
    NotEnoughSpace { required: usize, available: usize },

    #[error("Page type mismatch: expected {expected:?}, found tag {found}")]
    PageTypeMismatch { expected: PageType, found: u32 },

    #[error("Misaligned page: position {position} is not on a {page_size} byte boundary")]
    Misaligned { position: u64, page_size: u32 },

    #[error("Page corrupted: {0}")]
    PageCorrupted(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid page id: {0}")]
    InvalidPageId(PageId),

    #[error("Page not found: {0}")]
    PageNotFound(PageId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

impl StorageError {
    /// Capacity errors are recoverable by retrying against another page.
    pub fn is_capacity(&self) -> bool {
        matches!(self, StorageError::NotEnoughSpace { .. })
    }

    /// Corruption errors are fatal for the page they were raised on.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            StorageError::PageTypeMismatch { .. }
                | StorageError::Misaligned { .. }
                | StorageError::PageCorrupted(_)
        )
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
