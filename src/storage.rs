//! Storage layer.
//!
//! - **PersistedStream**: the backing file, read and written in whole pages
//! - **Page**: typed fixed-size pages (scalar, string, mixed rows)
//! - **BufferPoolManager**: cache of live pages with watermark eviction
//! - **LogManager**: append-only write-ahead log used by transactions

pub mod buffer;
pub mod disk;
pub mod error;
pub mod page;
pub mod wal;

pub use buffer::{BufferPoolManager, EvictionPolicy, FifoEvictionPolicy, PageGuard};
pub use disk::PersistedStream;
pub use error::{StorageError, StorageResult};
pub use page::{
    ColumnInfo, ColumnType, ItemPage, MixedPage, Page, PageId, PagePointerOffsetPair, PageType,
    RowHolder, StringPage,
};
pub use wal::{LogManager, WalConfig};
