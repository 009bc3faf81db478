use std::collections::{HashSet, VecDeque};

use log::debug;
use parking_lot::Mutex;

use crate::concurrency::lock::LockMode;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{ColumnInfo, PageId, PageType, RowHolder};
use crate::storage::wal::LogPayload;
use crate::transaction::Transaction;

/// A chain of mixed pages holding the rows of one logical object.
///
/// Pages are linked through their prev/next header fields. Rows are only
/// appended: a full page is never split, a successor is allocated instead.
pub struct PageCollection {
    pool: BufferPoolManager,
    schema: Vec<ColumnInfo>,
    head: PageId,
    /// Last page seen at the end of the chain. Pages are never unlinked, so
    /// a stale hint only costs a few extra hops.
    tail_hint: Mutex<PageId>,
}

impl PageCollection {
    /// Opens the collection whose first page is `head`.
    pub fn new(pool: BufferPoolManager, schema: &[ColumnInfo], head: PageId) -> Self {
        Self {
            pool,
            schema: schema.to_vec(),
            head,
            tail_hint: Mutex::new(head),
        }
    }

    /// Allocates an empty head page. The transaction keeps it exclusively
    /// locked until it finishes.
    pub async fn create(
        pool: BufferPoolManager,
        schema: &[ColumnInfo],
        tran: &Transaction,
    ) -> StorageResult<Self> {
        let head = pool
            .allocate_page(PageType::Mixed, schema, PageId::NULL, PageId::NULL)
            .await?
            .page_id();
        tran.acquire_lock(head, LockMode::Exclusive).await?;
        tran.log(LogPayload::PageAllocate {
            page_id: head,
            page_type: PageType::Mixed,
            prev_page_id: PageId::NULL,
        });
        debug!("{} created collection at {}", tran.id(), head);
        Ok(Self::new(pool, schema, head))
    }

    pub fn head(&self) -> PageId {
        self.head
    }

    pub fn schema(&self) -> &[ColumnInfo] {
        &self.schema
    }

    /// Appends `row` to the last page of the chain, extending the chain when
    /// that page is full. Returns the page and slot the row landed in.
    ///
    /// Every page modified keeps its exclusive lock until `tran` finishes.
    pub async fn add(&self, row: &RowHolder, tran: &Transaction) -> StorageResult<(PageId, usize)> {
        if row.schema() != self.schema.as_slice() {
            return Err(StorageError::InvalidArgument(
                "row schema does not match the collection".to_string(),
            ));
        }

        let mut page_id = *self.tail_hint.lock();
        loop {
            let lock = tran.acquire_scoped_lock(page_id, LockMode::Exclusive).await?;
            let guard = self.pool.get_page(page_id, PageType::Mixed, &self.schema).await?;

            let next = guard.read().next_page_id();
            if !next.is_null() {
                page_id = next;
                continue;
            }

            let slot = guard.write().as_mixed_mut()?.insert_row(row)?;
            if let Some(slot) = slot {
                if let Some(lock) = lock {
                    tran.retain_lock(lock);
                }
                self.log_insert(tran, page_id, slot, row);
                *self.tail_hint.lock() = page_id;
                return Ok((page_id, slot));
            }

            // The tail is full: chain a fresh page after it. The tail lock
            // joins the transaction first so a successor on the same stripe
            // is already covered.
            if let Some(lock) = lock {
                tran.retain_lock(lock);
            }
            let successor = self
                .pool
                .allocate_page(PageType::Mixed, &self.schema, page_id, PageId::NULL)
                .await?;
            let new_id = successor.page_id();
            tran.acquire_lock(new_id, LockMode::Exclusive).await?;

            let slot = successor
                .write()
                .as_mixed_mut()?
                .insert_row(row)?
                .ok_or_else(|| StorageError::NotEnoughSpace {
                    required: row.row_size(),
                    available: 0,
                })?;
            guard.write().set_next_page_id(new_id);

            tran.log(LogPayload::PageAllocate {
                page_id: new_id,
                page_type: PageType::Mixed,
                prev_page_id: page_id,
            });
            tran.log(LogPayload::PageLink {
                page_id,
                next_page_id: new_id,
            });
            self.log_insert(tran, new_id, slot, row);
            debug!("{} extended collection {} with {}", tran.id(), self.head, new_id);

            *self.tail_hint.lock() = new_id;
            return Ok((new_id, slot));
        }
    }

    /// Walks the chain from the head. Each page is share-locked only while
    /// its rows are copied out.
    pub fn iterate<'a>(&'a self, tran: &'a Transaction) -> RowCursor<'a> {
        RowCursor {
            collection: self,
            tran,
            next_page: self.head,
            visited: HashSet::new(),
            rows: VecDeque::new(),
        }
    }

    pub async fn is_empty(&self, tran: &Transaction) -> StorageResult<bool> {
        Ok(self.iterate(tran).next().await?.is_none())
    }

    /// Largest `selector` value over all rows, or `start_min` when no row
    /// exceeds it.
    pub async fn max<T, F>(&self, selector: F, start_min: T, tran: &Transaction) -> StorageResult<T>
    where
        T: PartialOrd,
        F: Fn(&RowHolder) -> StorageResult<T>,
    {
        let mut max = start_min;
        let mut cursor = self.iterate(tran);
        while let Some(row) = cursor.next().await? {
            let value = selector(&row)?;
            if value > max {
                max = value;
            }
        }
        Ok(max)
    }

    fn log_insert(&self, tran: &Transaction, page_id: PageId, slot: usize, row: &RowHolder) {
        tran.log(LogPayload::RowInsert {
            page_id,
            slot: slot as u32,
            row: row.as_bytes().to_vec(),
        });
    }
}

/// Lazy row sequence over a [`PageCollection`], in chain then slot order.
pub struct RowCursor<'a> {
    collection: &'a PageCollection,
    tran: &'a Transaction,
    next_page: PageId,
    visited: HashSet<PageId>,
    rows: VecDeque<RowHolder>,
}

impl RowCursor<'_> {
    pub async fn next(&mut self) -> StorageResult<Option<RowHolder>> {
        loop {
            if let Some(row) = self.rows.pop_front() {
                return Ok(Some(row));
            }
            if self.next_page.is_null() {
                return Ok(None);
            }
            self.load_page().await?;
        }
    }

    /// Drains the remaining rows.
    pub async fn try_collect(mut self) -> StorageResult<Vec<RowHolder>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    async fn load_page(&mut self) -> StorageResult<()> {
        let page_id = self.next_page;
        if !self.visited.insert(page_id) {
            return Err(StorageError::PageCorrupted(format!(
                "page chain of {} loops back to {}",
                self.collection.head, page_id
            )));
        }

        let _lock = self
            .tran
            .acquire_scoped_lock(page_id, LockMode::Shared)
            .await?;
        let guard = self
            .collection
            .pool
            .get_page(page_id, PageType::Mixed, &self.collection.schema)
            .await?;

        let page = guard.read();
        self.rows.extend(page.as_mixed()?.iterate());
        self.next_page = page.next_page_id();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::storage::page::ColumnType;
    use crate::storage::wal::LogManager;
    use anyhow::Result;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};
    use tokio::time::timeout;

    // 21 byte stride: bool + int + long + page pointer.
    fn schema() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo::new(ColumnType::Bool),
            ColumnInfo::new(ColumnType::Int),
            ColumnInfo::new(ColumnType::Long),
            ColumnInfo::new(ColumnType::PagePointer),
        ]
    }

    fn row(n: i32) -> Result<RowHolder> {
        let mut row = RowHolder::new(&schema());
        row.set_field(0, n % 2 == 0)?;
        row.set_field(1, n)?;
        row.set_field(2, n as i64 * 1000)?;
        row.set_field(3, PageId(n as u64))?;
        Ok(row)
    }

    async fn setup(page_size: u32) -> Result<(BufferPoolManager, Arc<LogManager>, TempDir)> {
        let dir = tempdir()?;
        let config = StorageConfig::default().with_page_size(page_size);
        let pool = BufferPoolManager::open(dir.path().join("test.db"), config, true).await?;
        Ok((pool, Arc::new(LogManager::in_memory()), dir))
    }

    #[tokio::test]
    async fn test_add_and_iterate() -> Result<()> {
        let (pool, log, _dir) = setup(4096).await?;
        let tran = log.create_transaction(&pool, "fill");
        let collection = PageCollection::create(pool.clone(), &schema(), &tran).await?;

        assert!(collection.is_empty(&tran).await?);
        for n in 0..10 {
            collection.add(&row(n)?, &tran).await?;
        }

        let rows = collection.iterate(&tran).try_collect().await?;
        assert_eq!(rows.len(), 10);
        for (n, stored) in rows.iter().enumerate() {
            assert_eq!(stored, &row(n as i32)?);
        }
        tran.commit().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_add_extends_chain_when_full() -> Result<()> {
        // 256 byte pages hold 10 rows of this schema.
        let (pool, log, _dir) = setup(256).await?;
        let tran = log.create_transaction(&pool, "chain");
        let collection = PageCollection::create(pool.clone(), &schema(), &tran).await?;

        let mut pages = Vec::new();
        for n in 0..25 {
            let (page_id, _) = collection.add(&row(n)?, &tran).await?;
            if pages.last() != Some(&page_id) {
                pages.push(page_id);
            }
        }
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0], collection.head());

        let second = pool.get_page(pages[1], PageType::Mixed, &schema()).await?;
        assert_eq!(second.read().prev_page_id(), pages[0]);
        assert_eq!(second.read().next_page_id(), pages[2]);
        drop(second);

        let rows = collection.iterate(&tran).try_collect().await?;
        let values: Vec<i32> = rows
            .iter()
            .map(|r| r.get_field::<i32>(1))
            .collect::<StorageResult<_>>()?;
        assert_eq!(values, (0..25).collect::<Vec<_>>());
        tran.commit().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_extend_chain_with_shared_stripe() -> Result<()> {
        let dir = tempdir()?;
        let config = StorageConfig::default()
            .with_page_size(256)
            .with_lock_stripes(1);
        let pool = BufferPoolManager::open(dir.path().join("test.db"), config, true).await?;
        let log = Arc::new(LogManager::in_memory());

        let head = {
            let tran = log.create_transaction(&pool, "fill");
            let collection = PageCollection::create(pool.clone(), &schema(), &tran).await?;
            for n in 0..10 {
                collection.add(&row(n)?, &tran).await?;
            }
            tran.commit().await?;
            collection.head()
        };

        // Every page maps to the single stripe, so the successor shares it
        // with the full tail.
        let collection = PageCollection::new(pool.clone(), &schema(), head);
        let tran = log.create_transaction(&pool, "extend");
        let (page_id, slot) = timeout(Duration::from_secs(3), collection.add(&row(10)?, &tran)).await??;
        assert_ne!(page_id, head);
        assert_eq!(slot, 0);
        tran.commit().await?;

        let tran = log.create_transaction(&pool, "read");
        let rows = collection.iterate(&tran).try_collect().await?;
        assert_eq!(rows.len(), 11);
        Ok(())
    }

    #[tokio::test]
    async fn test_max() -> Result<()> {
        let (pool, log, _dir) = setup(4096).await?;
        let tran = log.create_transaction(&pool, "max");
        let collection = PageCollection::create(pool.clone(), &schema(), &tran).await?;

        let empty = collection.max(|r| r.get_field::<i32>(1), 0, &tran).await?;
        assert_eq!(empty, 0);

        for n in [4, 17, 9] {
            collection.add(&row(n)?, &tran).await?;
        }
        let max = collection.max(|r| r.get_field::<i32>(1), 0, &tran).await?;
        assert_eq!(max, 17);
        let floor = collection.max(|r| r.get_field::<i32>(1), 100, &tran).await?;
        assert_eq!(floor, 100);
        Ok(())
    }

    #[tokio::test]
    async fn test_add_logs_and_holds_locks() -> Result<()> {
        let (pool, log, _dir) = setup(4096).await?;
        let tran = log.create_transaction(&pool, "log");
        let collection = PageCollection::create(pool.clone(), &schema(), &tran).await?;
        collection.add(&row(1)?, &tran).await?;

        assert_eq!(
            tran.held_locks(),
            vec![(collection.head(), LockMode::Exclusive)]
        );
        // begin, page-allocate, row-insert
        assert_eq!(tran.pending_log_records(), 3);

        tran.commit().await?;
        assert!(!pool.lock_manager().is_exclusively_locked(collection.head()));
        Ok(())
    }

    #[tokio::test]
    async fn test_rejects_foreign_schema() -> Result<()> {
        let (pool, log, _dir) = setup(4096).await?;
        let tran = log.create_transaction(&pool, "schema");
        let collection = PageCollection::create(pool.clone(), &schema(), &tran).await?;

        let foreign = RowHolder::new(&[ColumnInfo::new(ColumnType::Double)]);
        assert!(matches!(
            collection.add(&foreign, &tran).await,
            Err(StorageError::InvalidArgument(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_reopen_by_head() -> Result<()> {
        let (pool, log, _dir) = setup(4096).await?;
        let head = {
            let tran = log.create_transaction(&pool, "write");
            let collection = PageCollection::create(pool.clone(), &schema(), &tran).await?;
            collection.add(&row(7)?, &tran).await?;
            tran.commit().await?;
            collection.head()
        };

        let tran = log.create_transaction(&pool, "read");
        let collection = PageCollection::new(pool.clone(), &schema(), head);
        let rows = collection.iterate(&tran).try_collect().await?;
        assert_eq!(rows, vec![row(7)?]);
        assert!(tran.held_locks().is_empty());
        Ok(())
    }
}
