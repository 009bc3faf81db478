//! Storage configuration.
//!
//! Every component that needs tunables receives a [`StorageConfig`] at
//! construction; there is no process-wide state.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::HEADER_SIZE;

/// Smallest page size accepted by [`StorageConfig::validate`].
pub const MIN_PAGE_SIZE: u32 = 64;

/// Largest page size accepted; string offsets inside a page must fit `u16`.
pub const MAX_PAGE_SIZE: u32 = 65536;

/// Default number of lock stripes (prime, to spread page ids evenly).
pub const DEFAULT_LOCK_STRIPES: usize = 769;

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Size of every page in the store, in bytes.
    pub page_size: u32,
    /// Occupancy the buffer pool evicts down to.
    pub eviction_low: usize,
    /// Occupancy above which an eviction pass starts.
    pub eviction_high: usize,
    /// Number of reader/writer locks page ids hash onto.
    pub lock_stripes: usize,
    /// Size of a freshly created backing file, in bytes.
    pub initial_file_size: u64,
    /// Number of pages the backing file grows by when allocation runs past its end.
    pub file_growth_pages: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            page_size: 4096,
            eviction_low: 64,
            eviction_high: 256,
            lock_stripes: DEFAULT_LOCK_STRIPES,
            initial_file_size: 1024 * 1024,
            file_growth_pages: 64,
        }
    }
}

impl StorageConfig {
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_eviction(mut self, low: usize, high: usize) -> Self {
        self.eviction_low = low;
        self.eviction_high = high;
        self
    }

    pub fn with_lock_stripes(mut self, stripes: usize) -> Self {
        self.lock_stripes = stripes;
        self
    }

    pub fn validate(&self) -> StorageResult<()> {
        if !self.page_size.is_power_of_two()
            || self.page_size < MIN_PAGE_SIZE
            || self.page_size > MAX_PAGE_SIZE
        {
            return Err(StorageError::InvalidArgument(format!(
                "page size {} must be a power of two in {}..={}",
                self.page_size, MIN_PAGE_SIZE, MAX_PAGE_SIZE
            )));
        }
        debug_assert!(self.page_size as usize > HEADER_SIZE);

        if self.eviction_high == 0 || self.eviction_low > self.eviction_high {
            return Err(StorageError::InvalidArgument(format!(
                "eviction watermarks low={} high={} are invalid",
                self.eviction_low, self.eviction_high
            )));
        }

        if self.lock_stripes == 0 {
            return Err(StorageError::InvalidArgument(
                "lock stripe count must be positive".to_string(),
            ));
        }

        if self.initial_file_size % self.page_size as u64 != 0 {
            return Err(StorageError::InvalidArgument(format!(
                "initial file size {} is not a multiple of the page size {}",
                self.initial_file_size, self.page_size
            )));
        }

        if self.file_growth_pages == 0 {
            return Err(StorageError::InvalidArgument(
                "file growth increment must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Byte position of a page inside the backing file.
    pub fn page_offset(&self, page_id: u64) -> u64 {
        page_id * self.page_size as u64
    }
}
