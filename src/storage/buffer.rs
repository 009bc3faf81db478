//! Buffer pool: the cache of live pages.
//!
//! Pages are held in frames keyed by page id. A frame is pinned while a
//! [`PageGuard`] for it exists and is only dropped from the cache when it is
//! unpinned and its stripe is not exclusively locked. Misses, allocation,
//! eviction and flushing all go through the backing file under one async
//! mutex, so a page is never read back while its evicted image is still
//! being written.

pub mod eviction;
pub mod fifo;

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, info};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use eviction::EvictionPolicy;
pub use fifo::FifoEvictionPolicy;

use crate::concurrency::lock::LockManager;
use crate::config::StorageConfig;
use crate::storage::disk::PersistedStream;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{ColumnInfo, Page, PageId, PageType};

struct Frame {
    page: RwLock<Page>,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
}

impl Frame {
    fn new(page: Page, dirty: bool) -> Self {
        Self {
            page: RwLock::new(page),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(dirty),
        }
    }
}

#[derive(Clone)]
pub struct BufferPoolManager {
    inner: Arc<BufferPoolInner>,
}

struct BufferPoolInner {
    config: StorageConfig,
    page_table: DashMap<PageId, Arc<Frame>>,
    policy: Mutex<Box<dyn EvictionPolicy>>,
    stream: tokio::sync::Mutex<PersistedStream>,
    lock_manager: Arc<LockManager>,
    next_page_id: AtomicU64,
}

impl BufferPoolManager {
    pub fn new(
        stream: PersistedStream,
        policy: Box<dyn EvictionPolicy>,
        lock_manager: Arc<LockManager>,
        config: StorageConfig,
    ) -> StorageResult<Self> {
        config.validate()?;
        if stream.page_size() != config.page_size {
            return Err(StorageError::InvalidArgument(format!(
                "file uses {} byte pages but the pool is configured for {}",
                stream.page_size(),
                config.page_size
            )));
        }

        // Page ids are never reused: an existing file resumes after its last page.
        let next_page_id = if stream.is_initialized() {
            (stream.current_file_size() / config.page_size as u64).max(PageId::FIRST_DATA.0)
        } else {
            PageId::FIRST_DATA.0
        };

        Ok(Self {
            inner: Arc::new(BufferPoolInner {
                config,
                page_table: DashMap::new(),
                policy: Mutex::new(policy),
                stream: tokio::sync::Mutex::new(stream),
                lock_manager,
                next_page_id: AtomicU64::new(next_page_id),
            }),
        })
    }

    /// Opens (or with `create_new`, recreates) the store at `path` with a
    /// FIFO policy and a lock manager built from `config`.
    pub async fn open(path: impl AsRef<Path>, config: StorageConfig, create_new: bool) -> StorageResult<Self> {
        config.validate()?;
        let stream = PersistedStream::open(
            path,
            config.initial_file_size,
            create_new,
            config.page_size,
        )
        .await?;
        let policy = Box::new(FifoEvictionPolicy::new(config.eviction_low, config.eviction_high));
        let lock_manager = Arc::new(LockManager::from_config(&config));
        Self::new(stream, policy, lock_manager, config)
    }

    pub fn config(&self) -> &StorageConfig {
        &self.inner.config
    }

    pub fn page_size(&self) -> u32 {
        self.inner.config.page_size
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.inner.lock_manager
    }

    /// Number of pages currently cached.
    pub fn cached_pages(&self) -> usize {
        self.inner.page_table.len()
    }

    /// Id the next allocation will receive.
    pub fn next_page_id(&self) -> PageId {
        PageId(self.inner.next_page_id.load(Ordering::SeqCst))
    }

    pub async fn file_size(&self) -> u64 {
        self.inner.stream.lock().await.current_file_size()
    }

    pub async fn is_initialized(&self) -> bool {
        self.inner.stream.lock().await.is_initialized()
    }

    pub async fn mark_initialized(&self) {
        self.inner.stream.lock().await.mark_initialized();
    }

    /// Returns the page with `page_id`, loading it from the file on a miss.
    pub async fn get_page(
        &self,
        page_id: PageId,
        page_type: PageType,
        schema: &[ColumnInfo],
    ) -> StorageResult<PageGuard> {
        if page_id.is_null() {
            return Err(StorageError::InvalidPageId(page_id));
        }

        if let Some(guard) = self.pin_cached(page_id) {
            Self::check_cached(&guard, page_type, schema)?;
            return Ok(guard);
        }

        let mut stream = self.inner.stream.lock().await;
        // Another task may have loaded it while we waited for the file.
        if let Some(guard) = self.pin_cached(page_id) {
            Self::check_cached(&guard, page_type, schema)?;
            return Ok(guard);
        }

        if page_id != PageId::BOOT && page_id >= self.next_page_id() {
            return Err(StorageError::PageNotFound(page_id));
        }

        debug!("Buffer pool miss for {}", page_id);
        let position = self.inner.config.page_offset(page_id.0);
        let page = stream.seek_and_read(position, page_type, schema).await?;
        if page.page_id() != page_id {
            return Err(StorageError::PageCorrupted(format!(
                "slot of {} holds {}",
                page_id,
                page.page_id()
            )));
        }

        let guard = self.insert_frame(page_id, Frame::new(page, false));
        self.evict_if_needed(&mut stream).await?;
        Ok(guard)
    }

    /// Creates an empty page with the next page id, growing the file when the
    /// id falls past its end.
    pub async fn allocate_page(
        &self,
        page_type: PageType,
        schema: &[ColumnInfo],
        prev_page_id: PageId,
        next_page_id: PageId,
    ) -> StorageResult<PageGuard> {
        let mut stream = self.inner.stream.lock().await;
        let page_id = PageId(self.inner.next_page_id.load(Ordering::SeqCst));
        let page = Page::new(
            page_type,
            self.page_size(),
            page_id,
            prev_page_id,
            next_page_id,
            schema,
        )?;

        self.ensure_file_holds(&mut stream, page_id).await?;
        self.inner.next_page_id.store(page_id.0 + 1, Ordering::SeqCst);
        debug!("Allocated {} as {:?}", page_id, page_type);

        let guard = self.insert_frame(page_id, Frame::new(page, true));
        self.evict_if_needed(&mut stream).await?;
        Ok(guard)
    }

    /// Creates the reserved boot page of a fresh file.
    pub async fn allocate_boot_page(
        &self,
        page_type: PageType,
        schema: &[ColumnInfo],
    ) -> StorageResult<PageGuard> {
        let mut stream = self.inner.stream.lock().await;
        if stream.is_initialized() || self.inner.page_table.contains_key(&PageId::BOOT) {
            return Err(StorageError::InvalidArgument(
                "boot page already exists".to_string(),
            ));
        }

        let page = Page::new(
            page_type,
            self.page_size(),
            PageId::BOOT,
            PageId::NULL,
            PageId::NULL,
            schema,
        )?;
        self.ensure_file_holds(&mut stream, PageId::BOOT).await?;
        info!("Allocated boot page as {:?}", page_type);

        let guard = self.insert_frame(PageId::BOOT, Frame::new(page, true));
        self.evict_if_needed(&mut stream).await?;
        Ok(guard)
    }

    /// Writes the page to the file if it is cached and dirty.
    pub async fn flush_page(&self, page_id: PageId) -> StorageResult<()> {
        let frame = match self.inner.page_table.get(&page_id) {
            Some(entry) => Arc::clone(entry.value()),
            None => return Ok(()),
        };
        let mut stream = self.inner.stream.lock().await;
        self.write_back(&mut stream, page_id, &frame).await
    }

    /// Writes every dirty cached page and syncs the file.
    pub async fn flush_all(&self) -> StorageResult<()> {
        let frames: Vec<(PageId, Arc<Frame>)> = self
            .inner
            .page_table
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();

        let mut stream = self.inner.stream.lock().await;
        for (page_id, frame) in &frames {
            self.write_back(&mut stream, *page_id, frame).await?;
        }
        stream.sync().await?;
        debug!("Flushed {} cached pages", frames.len());
        Ok(())
    }

    fn pin_cached(&self, page_id: PageId) -> Option<PageGuard> {
        // Pinning under the map entry keeps eviction from removing the frame
        // between lookup and pin.
        let entry = self.inner.page_table.get(&page_id)?;
        entry.pin_count.fetch_add(1, Ordering::SeqCst);
        let frame = Arc::clone(entry.value());
        drop(entry);

        self.inner.policy.lock().on_page_accessed(page_id);
        Some(PageGuard { page_id, frame })
    }

    fn check_cached(guard: &PageGuard, page_type: PageType, schema: &[ColumnInfo]) -> StorageResult<()> {
        let page = guard.read();
        if page.page_type() != page_type {
            return Err(StorageError::PageTypeMismatch {
                expected: page_type,
                found: page.page_type() as u32,
            });
        }
        if let Page::Mixed(mixed) = &*page {
            if mixed.schema() != schema {
                return Err(StorageError::InvalidArgument(format!(
                    "{} was created with a different schema",
                    guard.page_id()
                )));
            }
        }
        Ok(())
    }

    fn insert_frame(&self, page_id: PageId, frame: Frame) -> PageGuard {
        frame.pin_count.store(1, Ordering::SeqCst);
        let frame = Arc::new(frame);
        self.inner.page_table.insert(page_id, Arc::clone(&frame));
        self.inner.policy.lock().on_page_accessed(page_id);
        PageGuard { page_id, frame }
    }

    async fn ensure_file_holds(&self, stream: &mut PersistedStream, page_id: PageId) -> StorageResult<()> {
        let page_size = self.page_size() as u64;
        let needed = self.inner.config.page_offset(page_id.0) + page_size;
        let current = stream.current_file_size();
        if needed > current {
            let grown = current + self.inner.config.file_growth_pages.max(1) * page_size;
            info!("Growing {:?} to {} bytes", stream.file_name(), grown.max(needed));
            stream.grow(grown.max(needed)).await?;
        }
        Ok(())
    }

    /// Runs an eviction pass when the policy asks for one. Must be called
    /// with the file mutex held.
    async fn evict_if_needed(&self, stream: &mut PersistedStream) -> StorageResult<()> {
        let victims = {
            let mut policy = self.inner.policy.lock();
            let count = policy.victims_needed();
            if count == 0 {
                return Ok(());
            }
            let page_table = &self.inner.page_table;
            let lock_manager = &self.inner.lock_manager;
            policy.select_victims(count, &|page_id| {
                let unpinned = page_table
                    .get(&page_id)
                    .map(|frame| frame.pin_count.load(Ordering::SeqCst) == 0)
                    .unwrap_or(true);
                unpinned && !lock_manager.is_exclusively_locked(page_id)
            })
        };

        let mut evicted = 0;
        for page_id in victims {
            let removed = self
                .inner
                .page_table
                .remove_if(&page_id, |_, frame| frame.pin_count.load(Ordering::SeqCst) == 0);

            match removed {
                Some((_, frame)) => {
                    self.write_back(stream, page_id, &frame).await?;
                    evicted += 1;
                }
                None if self.inner.page_table.contains_key(&page_id) => {
                    // Pinned since selection; keep tracking it.
                    self.inner.policy.lock().on_page_accessed(page_id);
                }
                None => {}
            }
        }

        if evicted > 0 {
            debug!(
                "Evicted {} pages, {} remain cached",
                evicted,
                self.inner.page_table.len()
            );
        }
        Ok(())
    }

    async fn write_back(&self, stream: &mut PersistedStream, page_id: PageId, frame: &Frame) -> StorageResult<()> {
        if !frame.is_dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let image = frame.page.read().to_bytes();
        let position = self.inner.config.page_offset(page_id.0);
        if let Err(e) = stream.write_image(position, &image).await {
            frame.is_dirty.store(true, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }
}

/// A pinned page. Mutating through [`PageGuard::write`] marks it dirty.
///
/// The read and write guards are synchronous locks on the in-memory page and
/// must not be held across an `.await`.
pub struct PageGuard {
    page_id: PageId,
    frame: Arc<Frame>,
}

impl PageGuard {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.frame.page.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Page> {
        self.frame.is_dirty.store(true, Ordering::SeqCst);
        self.frame.page.write()
    }

    pub fn is_dirty(&self) -> bool {
        self.frame.is_dirty.load(Ordering::SeqCst)
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        self.frame.pin_count.fetch_sub(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for PageGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard")
            .field("page_id", &self.page_id)
            .field("pin_count", &self.frame.pin_count.load(Ordering::SeqCst))
            .finish()
    }
}
