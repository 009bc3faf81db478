use log::debug;
use parking_lot::Mutex;

use crate::concurrency::lock::LockMode;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::string_page::LENGTH_PREFIX;
use crate::storage::page::{PageId, PagePointerOffsetPair, PageType, HEADER_SIZE};
use crate::storage::wal::LogPayload;
use crate::transaction::Transaction;

/// Out-of-line storage for variable length values.
///
/// A chain of string pages. Each value is addressed by the page it landed in
/// and its byte offset there, which is what string columns store inline.
pub struct StringHeap {
    pool: BufferPoolManager,
    head: PageId,
    tail_hint: Mutex<PageId>,
}

impl StringHeap {
    pub fn new(pool: BufferPoolManager, head: PageId) -> Self {
        Self {
            pool,
            head,
            tail_hint: Mutex::new(head),
        }
    }

    pub async fn create(pool: BufferPoolManager, tran: &Transaction) -> StorageResult<Self> {
        let head = pool
            .allocate_page(PageType::String, &[], PageId::NULL, PageId::NULL)
            .await?
            .page_id();
        tran.acquire_lock(head, LockMode::Exclusive).await?;
        tran.log(LogPayload::PageAllocate {
            page_id: head,
            page_type: PageType::String,
            prev_page_id: PageId::NULL,
        });
        Ok(Self::new(pool, head))
    }

    pub fn head(&self) -> PageId {
        self.head
    }

    /// Appends `value` and returns where it can be fetched from.
    pub async fn add(&self, value: &[u8], tran: &Transaction) -> StorageResult<PagePointerOffsetPair> {
        let capacity = self.pool.page_size() as usize - HEADER_SIZE;
        if value.len() + LENGTH_PREFIX > capacity {
            return Err(StorageError::NotEnoughSpace {
                required: value.len() + LENGTH_PREFIX,
                available: capacity,
            });
        }

        let mut page_id = *self.tail_hint.lock();
        loop {
            let mut lock = tran.acquire_scoped_lock(page_id, LockMode::Exclusive).await?;
            let guard = self.pool.get_page(page_id, PageType::String, &[]).await?;

            let (next, fits) = {
                let page = guard.read();
                (page.next_page_id(), page.as_string()?.can_fit_item(value))
            };
            if !next.is_null() {
                page_id = next;
                continue;
            }

            let (target, offset) = if fits {
                let offset = guard.write().as_string_mut()?.merge_with_offset_fetch(value)?;
                (page_id, offset)
            } else {
                // Hold the tail before locking its successor, which may share
                // the tail's stripe.
                if let Some(lock) = lock.take() {
                    tran.retain_lock(lock);
                }
                let successor = self
                    .pool
                    .allocate_page(PageType::String, &[], page_id, PageId::NULL)
                    .await?;
                let new_id = successor.page_id();
                tran.acquire_lock(new_id, LockMode::Exclusive).await?;

                let offset = successor.write().as_string_mut()?.merge_with_offset_fetch(value)?;
                guard.write().set_next_page_id(new_id);

                tran.log(LogPayload::PageAllocate {
                    page_id: new_id,
                    page_type: PageType::String,
                    prev_page_id: page_id,
                });
                tran.log(LogPayload::PageLink {
                    page_id,
                    next_page_id: new_id,
                });
                debug!("{} extended string heap {} with {}", tran.id(), self.head, new_id);
                (new_id, offset)
            };

            if let Some(lock) = lock {
                tran.retain_lock(lock);
            }
            tran.log(LogPayload::StringInsert {
                page_id: target,
                offset,
                value: value.to_vec(),
            });
            *self.tail_hint.lock() = target;

            let offset = u16::try_from(offset).map_err(|_| {
                StorageError::InvalidArgument(format!("offset {} does not fit a pointer", offset))
            })?;
            return Ok(PagePointerOffsetPair::new(target, offset));
        }
    }

    /// Reads the value `pointer` refers to under a shared lock.
    pub async fn fetch(&self, pointer: PagePointerOffsetPair, tran: &Transaction) -> StorageResult<Vec<u8>> {
        let _lock = tran
            .acquire_scoped_lock(pointer.page_id, LockMode::Shared)
            .await?;
        let guard = self
            .pool
            .get_page(pointer.page_id, PageType::String, &[])
            .await?;
        let page = guard.read();
        let value = page.as_string()?.fetch_with_offset(pointer.offset as u32)?;
        Ok(value.to_vec())
    }
}
