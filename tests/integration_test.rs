use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use pagecore::access::PageCollection;
use pagecore::catalog::{CatalogError, ColumnDefinition, MetadataManager};
use pagecore::concurrency::lock::LockMode;
use pagecore::storage::buffer::BufferPoolManager;
use pagecore::storage::page::string_page::StringPage;
use pagecore::storage::page::{ColumnInfo, ColumnType, ItemPage, PageId, RowHolder};
use pagecore::storage::page::rowset::RowsetHolder;
use pagecore::storage::wal::{LogManager, LogPayload, WalConfig};
use pagecore::storage::StorageError;
use pagecore::transaction::TransactionState;
use pagecore::StorageConfig;
use tempfile::{tempdir, TempDir};
use tokio::time::timeout;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// bool + int + long + page pointer: a 21 byte row.
fn schema() -> Vec<ColumnInfo> {
    vec![
        ColumnInfo::new(ColumnType::Bool),
        ColumnInfo::new(ColumnType::Int),
        ColumnInfo::new(ColumnType::Long),
        ColumnInfo::new(ColumnType::PagePointer),
    ]
}

fn row(worker: i32, payload: i64) -> Result<RowHolder> {
    let mut row = RowHolder::new(&schema());
    row.set_field(0, worker % 2 == 0)?;
    row.set_field(1, worker)?;
    row.set_field(2, payload)?;
    row.set_field(3, PageId(worker as u64))?;
    Ok(row)
}

async fn open_store(config: StorageConfig) -> Result<(BufferPoolManager, Arc<LogManager>, TempDir)> {
    init_logging();
    let dir = tempdir()?;
    let pool = BufferPoolManager::open(dir.path().join("test.db"), config, true).await?;
    Ok((pool, Arc::new(LogManager::in_memory()), dir))
}

#[test]
fn test_mixed_rowset_holds_exactly_one_hundred_rows() -> Result<()> {
    let schema = schema();
    let mut holder = RowsetHolder::new(&schema, vec![0u8; 2120], true)?;
    assert_eq!(holder.row_size(), 21);
    assert_eq!(holder.max_row_count(), 100);

    for n in 0..100 {
        assert!(holder.insert_row(&row(n, n as i64)?)?.is_some());
    }
    assert_eq!(holder.free_space_for_items(), 0);
    assert_eq!(holder.insert_row(&row(100, 100)?)?, None);

    for n in 0..100 {
        assert_eq!(holder.get_row(n as usize)?, row(n, n as i64)?);
    }
    Ok(())
}

#[test]
fn test_string_offset_addressing() -> Result<()> {
    let mut page = StringPage::new(4096, PageId(2), PageId::NULL, PageId::NULL)?;
    page.merge_with_offset_fetch(b"padding")?;

    let value = b"the quick brown fox".to_vec();
    let offset = page.merge_with_offset_fetch(&value)?;
    assert_eq!(page.fetch_with_offset(offset)?, value.as_slice());

    let mut bytes = bytes::BytesMut::new();
    page.persist(&mut bytes);
    let restored = StringPage::from_bytes(&bytes)?;
    assert_eq!(restored.fetch_with_offset(offset)?, value.as_slice());

    assert!(restored.fetch_with_offset(offset - 1).unwrap_err().is_corruption());
    assert!(restored.fetch_with_offset(offset + 1).unwrap_err().is_corruption());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_workers_append_to_one_collection() -> Result<()> {
    let (pool, log, _dir) = open_store(StorageConfig::default().with_page_size(1024)).await?;

    let head = {
        let tran = log.create_transaction(&pool, "create");
        let collection = PageCollection::create(pool.clone(), &schema(), &tran).await?;
        tran.commit().await?;
        collection.head()
    };
    let collection = Arc::new(PageCollection::new(pool.clone(), &schema(), head));

    let mut handles = Vec::new();
    for worker in 0..100 {
        let pool = pool.clone();
        let log = Arc::clone(&log);
        let collection = Arc::clone(&collection);
        handles.push(tokio::spawn(async move {
            let payload: i64 = rand::random();
            let tran = log.create_transaction(&pool, &format!("worker-{}", worker));
            collection.add(&row(worker, payload)?, &tran).await?;
            tran.commit().await?;
            anyhow::Ok((worker, payload))
        }));
    }

    let mut expected = HashMap::new();
    for handle in handles {
        let (worker, payload) = handle.await??;
        expected.insert(worker, payload);
    }

    let tran = log.create_transaction(&pool, "verify");
    let rows = collection.iterate(&tran).try_collect().await?;
    assert_eq!(rows.len(), 100);

    let mut seen = HashMap::new();
    for stored in rows {
        let worker: i32 = stored.get_field(1)?;
        let payload: i64 = stored.get_field(2)?;
        assert_eq!(stored, row(worker, payload)?);
        assert!(seen.insert(worker, payload).is_none(), "worker {} duplicated", worker);
    }
    assert_eq!(seen, expected);
    tran.commit().await?;
    Ok(())
}

#[tokio::test]
async fn test_uncommitted_rows_are_invisible_to_others() -> Result<()> {
    let (pool, log, _dir) = open_store(StorageConfig::default()).await?;

    let head = {
        let tran = log.create_transaction(&pool, "create");
        let collection = PageCollection::create(pool.clone(), &schema(), &tran).await?;
        tran.commit().await?;
        collection.head()
    };
    let collection = PageCollection::new(pool.clone(), &schema(), head);

    let writer = log.create_transaction(&pool, "writer");
    collection.add(&row(1, 10)?, &writer).await?;

    let reader = log.create_transaction(&pool, "reader");
    let blocked = timeout(
        Duration::from_millis(100),
        collection.iterate(&reader).try_collect(),
    )
    .await;
    assert!(blocked.is_err(), "reader saw the page while it was exclusively held");

    writer.commit().await?;
    let rows = collection.iterate(&reader).try_collect().await?;
    assert_eq!(rows, vec![row(1, 10)?]);
    Ok(())
}

#[tokio::test]
async fn test_dropped_transaction_releases_locks_without_undo() -> Result<()> {
    let (pool, log, _dir) = open_store(StorageConfig::default()).await?;

    let tran = log.create_transaction(&pool, "create");
    let collection = PageCollection::create(pool.clone(), &schema(), &tran).await?;
    collection.add(&row(3, 30)?, &tran).await?;
    assert!(pool.lock_manager().is_exclusively_locked(collection.head()));
    drop(tran);

    assert!(!pool.lock_manager().is_exclusively_locked(collection.head()));
    let reader = log.create_transaction(&pool, "reader");
    let rows = timeout(
        Duration::from_secs(1),
        collection.iterate(&reader).try_collect(),
    )
    .await??;
    assert_eq!(rows, vec![row(3, 30)?]);

    // Nothing from the dropped transaction reached the log.
    assert_eq!(log.memory_contents().await, Some(Vec::new()));
    Ok(())
}

#[tokio::test]
async fn test_commit_writes_log_file() -> Result<()> {
    let (pool, _, dir) = open_store(StorageConfig::default()).await?;
    let log_path = dir.path().join("test.log");
    let log = Arc::new(LogManager::new(WalConfig::file(&log_path)).await?);

    let tran = log.create_transaction(&pool, "logged");
    let collection = PageCollection::create(pool.clone(), &schema(), &tran).await?;
    collection.add(&row(5, 50)?, &tran).await?;
    tran.commit().await?;
    assert_eq!(tran.state(), TransactionState::Committed);

    let records = LogManager::read_log_file(&log_path).await?;
    let kinds: Vec<&str> = records.iter().map(|r| r.payload.kind()).collect();
    assert_eq!(kinds, vec!["begin", "page-allocate", "row-insert", "commit"]);
    assert!(records.iter().all(|r| r.transaction_id == tran.id().value()));
    assert!(matches!(
        &records[2].payload,
        LogPayload::RowInsert { page_id, slot: 0, .. } if *page_id == collection.head()
    ));
    Ok(())
}

#[tokio::test]
async fn test_failed_log_flush_is_not_a_commit() -> Result<()> {
    let (pool, log, _dir) = open_store(StorageConfig::default()).await?;

    let tran = log.create_transaction(&pool, "doomed");
    let collection = PageCollection::create(pool.clone(), &schema(), &tran).await?;
    collection.add(&row(1, 1)?, &tran).await?;

    log.fail_flushes(true);
    let result = tran.commit().await;
    assert!(matches!(result, Err(StorageError::Transaction(_))));
    assert_eq!(tran.state(), TransactionState::Aborted);
    assert!(tran.held_locks().is_empty());
    assert!(tran.acquire_lock(collection.head(), LockMode::Shared).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_evicted_pages_survive_reopen() -> Result<()> {
    init_logging();
    let dir = tempdir()?;
    let path = dir.path().join("test.db");
    let config = StorageConfig::default()
        .with_page_size(256)
        .with_eviction(2, 4);
    let log = Arc::new(LogManager::in_memory());

    let head = {
        let pool = BufferPoolManager::open(&path, config.clone(), true).await?;
        let tran = log.create_transaction(&pool, "create");
        let collection = PageCollection::create(pool.clone(), &schema(), &tran).await?;
        tran.commit().await?;

        // Committed pages are unlocked and become eviction candidates.
        for n in 0..200 {
            let tran = log.create_transaction(&pool, "fill");
            collection.add(&row(n, n as i64 * 7)?, &tran).await?;
            tran.commit().await?;
        }

        let tran = log.create_transaction(&pool, "scan");
        let rows = collection.iterate(&tran).try_collect().await?;
        assert_eq!(rows.len(), 200);
        assert!(pool.cached_pages() <= 5);
        pool.flush_all().await?;
        collection.head()
    };

    let pool = BufferPoolManager::open(&path, config, false).await?;
    let tran = log.create_transaction(&pool, "reopen");
    let collection = PageCollection::new(pool.clone(), &schema(), head);
    let rows = collection.iterate(&tran).try_collect().await?;
    assert_eq!(rows.len(), 200);
    for (n, stored) in rows.iter().enumerate() {
        assert_eq!(stored, &row(n as i32, n as i64 * 7)?);
    }
    Ok(())
}

#[tokio::test]
async fn test_catalog_rejects_duplicate_table() -> Result<()> {
    let (pool, log, _dir) = open_store(StorageConfig::default()).await?;
    let catalog = MetadataManager::open(pool.clone(), &log).await?;
    let columns = vec![
        ColumnDefinition::new("id", ColumnType::Int),
        ColumnDefinition::string("name", 40),
    ];

    let tran = log.create_transaction(&pool, "first");
    catalog.create_table("accounts", &columns, &tran).await?;
    tran.commit().await?;

    let tran = log.create_transaction(&pool, "second");
    let before = catalog.tables().count(&tran).await?;
    assert!(matches!(
        catalog.create_table("accounts", &columns, &tran).await,
        Err(CatalogError::NameExists(_))
    ));
    assert_eq!(catalog.tables().count(&tran).await?, before);
    assert!(catalog.tables().exists("accounts", &tran).await?);
    tran.commit().await?;
    Ok(())
}
