//! Metadata catalog.
//!
//! The boot page holds the master collection: one row per system object
//! pointing at its root page. Bootstrapping a fresh file creates the string
//! heap, `sys.tables` and `sys.columns` and records them there; reopening
//! reads the roots back.

pub mod columns;
pub mod tables;

use std::fmt;
use std::sync::Arc;

use log::info;
use thiserror::Error;

use crate::access::{PageCollection, StringHeap};
use crate::concurrency::lock::LockMode;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::error::StorageError;
use crate::storage::page::{ColumnInfo, ColumnType, PageId, PageType, RowHolder};
use crate::storage::wal::LogManager;
use crate::transaction::Transaction;

pub use columns::{ColumnDefinition, ColumnManager, DEFAULT_STRING_LENGTH};
pub use tables::{TableInfo, TableManager};

/// Longest table or column name, in bytes.
pub const MAX_NAME_LENGTH: u16 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub u32);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Table{}", self.0)
    }
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Name already exists: {0}")]
    NameExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Kinds of rows in the master collection.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SystemObject {
    Strings = 1,
    Tables = 2,
    Columns = 3,
}

fn master_schema() -> Vec<ColumnInfo> {
    vec![
        ColumnInfo::new(ColumnType::Int),
        ColumnInfo::new(ColumnType::PagePointer),
    ]
}

pub struct MetadataManager {
    pool: BufferPoolManager,
    strings: Arc<StringHeap>,
    tables: TableManager,
    columns: ColumnManager,
}

impl MetadataManager {
    /// Bootstraps the catalog of a fresh file, or loads it from the boot page.
    pub async fn open(pool: BufferPoolManager, log_manager: &Arc<LogManager>) -> CatalogResult<Self> {
        let tran = log_manager.create_transaction(&pool, "catalog");
        let roots = if pool.is_initialized().await {
            Self::load(&pool, &tran).await?
        } else {
            Self::bootstrap(&pool, &tran).await?
        };
        tran.commit().await?;

        let strings = Arc::new(StringHeap::new(pool.clone(), roots.strings));
        Ok(Self {
            tables: TableManager::new(pool.clone(), roots.tables, Arc::clone(&strings)),
            columns: ColumnManager::new(pool.clone(), roots.columns, Arc::clone(&strings)),
            strings,
            pool,
        })
    }

    pub fn tables(&self) -> &TableManager {
        &self.tables
    }

    pub fn columns(&self) -> &ColumnManager {
        &self.columns
    }

    pub fn strings(&self) -> &Arc<StringHeap> {
        &self.strings
    }

    pub async fn create_table(
        &self,
        name: &str,
        columns: &[ColumnDefinition],
        tran: &Transaction,
    ) -> CatalogResult<TableInfo> {
        self.tables
            .create_object(name, columns, &self.columns, tran)
            .await
    }

    /// The row collection and column list of the table called `name`.
    pub async fn open_table(
        &self,
        name: &str,
        tran: &Transaction,
    ) -> CatalogResult<(TableInfo, Vec<ColumnDefinition>, PageCollection)> {
        let table = self.tables.get_by_name(name, tran).await?;
        let columns = self.columns.columns_of(table.id, tran).await?;
        let schema: Vec<ColumnInfo> = columns.iter().map(|c| c.info).collect();
        let collection = PageCollection::new(self.pool.clone(), &schema, table.root);
        Ok((table, columns, collection))
    }

    /// Writes every cached page back to the file.
    pub async fn flush(&self) -> CatalogResult<()> {
        self.pool.flush_all().await?;
        Ok(())
    }

    async fn bootstrap(pool: &BufferPoolManager, tran: &Transaction) -> CatalogResult<Roots> {
        pool.allocate_boot_page(PageType::Mixed, &master_schema())
            .await?;
        tran.acquire_lock(PageId::BOOT, LockMode::Exclusive).await?;

        let strings = StringHeap::create(pool.clone(), tran).await?;
        let tables = PageCollection::create(pool.clone(), &tables::schema(), tran).await?;
        let columns = PageCollection::create(pool.clone(), &columns::schema(), tran).await?;
        let roots = Roots {
            strings: strings.head(),
            tables: tables.head(),
            columns: columns.head(),
        };

        let master = PageCollection::new(pool.clone(), &master_schema(), PageId::BOOT);
        for (kind, root) in [
            (SystemObject::Strings, roots.strings),
            (SystemObject::Tables, roots.tables),
            (SystemObject::Columns, roots.columns),
        ] {
            let mut row = RowHolder::new(&master_schema());
            row.set_field(0, kind as i32)?;
            row.set_field(1, root)?;
            master.add(&row, tran).await?;
        }

        pool.mark_initialized().await;
        pool.flush_all().await?;
        info!(
            "Bootstrapped catalog (strings {}, tables {}, columns {})",
            roots.strings, roots.tables, roots.columns
        );
        Ok(roots)
    }

    async fn load(pool: &BufferPoolManager, tran: &Transaction) -> CatalogResult<Roots> {
        let master = PageCollection::new(pool.clone(), &master_schema(), PageId::BOOT);
        let mut strings = None;
        let mut tables = None;
        let mut columns = None;

        let mut cursor = master.iterate(tran);
        while let Some(row) = cursor.next().await? {
            let root: PageId = row.get_field(1)?;
            match row.get_field::<i32>(0)? {
                kind if kind == SystemObject::Strings as i32 => strings = Some(root),
                kind if kind == SystemObject::Tables as i32 => tables = Some(root),
                kind if kind == SystemObject::Columns as i32 => columns = Some(root),
                kind => {
                    return Err(CatalogError::InvalidDefinition(format!(
                        "unknown system object kind {} on the boot page",
                        kind
                    )))
                }
            }
        }

        match (strings, tables, columns) {
            (Some(strings), Some(tables), Some(columns)) => {
                info!("Loaded catalog (tables {}, columns {})", tables, columns);
                Ok(Roots {
                    strings,
                    tables,
                    columns,
                })
            }
            _ => Err(CatalogError::NotFound(
                "system object roots on the boot page".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Roots {
    strings: PageId,
    tables: PageId,
    columns: PageId,
}
