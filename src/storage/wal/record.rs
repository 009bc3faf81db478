//! Log record types and their binary encoding.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{PageId, PageType};

/// Log Sequence Number. Monotonically increasing across the whole log; 0 is
/// never assigned to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Lsn(pub u64);

impl Lsn {
    pub const INVALID: Lsn = Lsn(0);

    pub fn next(&self) -> Self {
        Lsn(self.0 + 1)
    }

    pub fn is_invalid(&self) -> bool {
        self.0 == 0
    }
}

impl Default for Lsn {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LSN({})", self.0)
    }
}

/// What a record describes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogPayload {
    Begin {
        name: String,
    },
    /// A page was allocated and linked after `prev_page_id`.
    PageAllocate {
        page_id: PageId,
        page_type: PageType,
        prev_page_id: PageId,
    },
    /// `page_id.next` now points at `next_page_id`.
    PageLink {
        page_id: PageId,
        next_page_id: PageId,
    },
    /// Raw row image written into a mixed page slot.
    RowInsert {
        page_id: PageId,
        slot: u32,
        row: Vec<u8>,
    },
    StringInsert {
        page_id: PageId,
        offset: u32,
        value: Vec<u8>,
    },
    Commit,
    Abort,
}

impl LogPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            LogPayload::Begin { .. } => "begin",
            LogPayload::PageAllocate { .. } => "page-allocate",
            LogPayload::PageLink { .. } => "page-link",
            LogPayload::RowInsert { .. } => "row-insert",
            LogPayload::StringInsert { .. } => "string-insert",
            LogPayload::Commit => "commit",
            LogPayload::Abort => "abort",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub lsn: Lsn,
    /// Previous record of the same transaction, invalid for the first one.
    pub prev_lsn: Lsn,
    pub transaction_id: u64,
    pub payload: LogPayload,
}

impl LogRecord {
    pub fn new(lsn: Lsn, prev_lsn: Lsn, transaction_id: u64, payload: LogPayload) -> Self {
        LogRecord {
            lsn,
            prev_lsn,
            transaction_id,
            payload,
        }
    }

    pub fn serialize(&self) -> StorageResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    pub fn deserialize(data: &[u8]) -> StorageResult<Self> {
        bincode::deserialize(data).map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} txn={} prev={} {}",
            self.lsn,
            self.transaction_id,
            self.prev_lsn,
            self.payload.kind()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lsn() {
        let lsn = Lsn::default();
        assert!(lsn.is_invalid());

        let next = lsn.next();
        assert_eq!(next, Lsn(1));
        assert!(!next.is_invalid());
        assert!(lsn < next);
        assert_eq!(next.to_string(), "LSN(1)");
    }

    #[test]
    fn test_record_serialization() -> StorageResult<()> {
        let records = vec![
            LogRecord::new(Lsn(1), Lsn::INVALID, 7, LogPayload::Begin { name: "load".into() }),
            LogRecord::new(
                Lsn(2),
                Lsn(1),
                7,
                LogPayload::PageAllocate {
                    page_id: PageId(4),
                    page_type: PageType::Mixed,
                    prev_page_id: PageId(3),
                },
            ),
            LogRecord::new(
                Lsn(3),
                Lsn(2),
                7,
                LogPayload::RowInsert {
                    page_id: PageId(4),
                    slot: 0,
                    row: vec![1, 2, 3],
                },
            ),
            LogRecord::new(Lsn(4), Lsn(3), 7, LogPayload::Commit),
        ];

        for record in records {
            let bytes = record.serialize()?;
            assert_eq!(LogRecord::deserialize(&bytes)?, record);
        }
        Ok(())
    }

    #[test]
    fn test_garbage_is_serialization_error() {
        let result = LogRecord::deserialize(&[0xff; 3]);
        assert!(matches!(result, Err(StorageError::Serialization(_))));
    }

    #[test]
    fn test_display() {
        let record = LogRecord::new(Lsn(5), Lsn(4), 2, LogPayload::Abort);
        assert_eq!(record.to_string(), "LSN(5) txn=2 prev=LSN(4) abort");
    }
}
