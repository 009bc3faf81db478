//! `sys.tables`: one row per table with its id, name and root page.

use std::sync::Arc;

use dashmap::DashMap;
use log::info;

use crate::access::{PageCollection, StringHeap};
use crate::concurrency::lock::LockMode;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::row::column_offsets;
use crate::storage::page::{ColumnInfo, ColumnType, PageId, RowHolder};
use crate::transaction::Transaction;

use super::columns::{ColumnDefinition, ColumnManager};
use super::{CatalogError, CatalogResult, TableId, MAX_NAME_LENGTH};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub id: TableId,
    pub name: String,
    /// Head page of the table's row collection.
    pub root: PageId,
}

const ID: usize = 0;
const NAME: usize = 1;
const ROOT: usize = 2;

pub(crate) fn schema() -> Vec<ColumnInfo> {
    vec![
        ColumnInfo::new(ColumnType::Int),
        ColumnInfo::with_size(ColumnType::String, MAX_NAME_LENGTH),
        ColumnInfo::new(ColumnType::PagePointer),
    ]
}

pub struct TableManager {
    pool: BufferPoolManager,
    collection: PageCollection,
    strings: Arc<StringHeap>,
    /// Tables already resolved by name.
    by_name: DashMap<String, TableInfo>,
}

impl TableManager {
    pub(crate) fn new(pool: BufferPoolManager, root: PageId, strings: Arc<StringHeap>) -> Self {
        Self {
            collection: PageCollection::new(pool.clone(), &schema(), root),
            pool,
            strings,
            by_name: DashMap::new(),
        }
    }

    pub fn root(&self) -> PageId {
        self.collection.head()
    }

    pub async fn exists(&self, name: &str, tran: &Transaction) -> CatalogResult<bool> {
        match self.get_by_name(name, tran).await {
            Ok(_) => Ok(true),
            Err(CatalogError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Registers a new table and allocates its row collection.
    ///
    /// Creators are serialized on the catalog's head page, which stays
    /// exclusively locked until `tran` finishes.
    pub async fn create_object(
        &self,
        name: &str,
        columns: &[ColumnDefinition],
        column_manager: &ColumnManager,
        tran: &Transaction,
    ) -> CatalogResult<TableInfo> {
        let schema = Self::validate(name, columns)?;

        tran.acquire_lock(self.collection.head(), LockMode::Exclusive)
            .await?;
        if self.exists(name, tran).await? {
            return Err(CatalogError::NameExists(name.to_string()));
        }

        let id = self
            .collection
            .max(|row| row.get_field::<i32>(ID), 0, tran)
            .await?
            + 1;
        let id = TableId(id as u32);
        let table = PageCollection::create(self.pool.clone(), &schema, tran).await?;
        let name_pointer = self.strings.add(name.as_bytes(), tran).await?;

        let mut row = RowHolder::new(self.collection.schema());
        row.set_field(ID, id.0 as i32)?;
        row.set_field(NAME, name_pointer)?;
        row.set_field(ROOT, table.head())?;
        self.collection.add(&row, tran).await?;
        column_manager.add_columns(id, columns, tran).await?;

        info!("{} created table '{}' as {} at {}", tran.id(), name, id, table.head());
        Ok(TableInfo {
            id,
            name: name.to_string(),
            root: table.head(),
        })
    }

    /// Every table in creation order.
    pub async fn iterate(&self, tran: &Transaction) -> CatalogResult<Vec<TableInfo>> {
        let mut tables = Vec::new();
        let mut cursor = self.collection.iterate(tran);
        while let Some(row) = cursor.next().await? {
            tables.push(self.decode(&row, tran).await?);
        }
        Ok(tables)
    }

    pub async fn get_by_id(&self, id: TableId, tran: &Transaction) -> CatalogResult<TableInfo> {
        let mut cursor = self.collection.iterate(tran);
        while let Some(row) = cursor.next().await? {
            if row.get_field::<i32>(ID)? == id.0 as i32 {
                return self.decode(&row, tran).await;
            }
        }
        Err(CatalogError::NotFound(id.to_string()))
    }

    pub async fn get_by_name(&self, name: &str, tran: &Transaction) -> CatalogResult<TableInfo> {
        if let Some(table) = self.by_name.get(name) {
            return Ok(table.clone());
        }

        let mut cursor = self.collection.iterate(tran);
        while let Some(row) = cursor.next().await? {
            let table = self.decode(&row, tran).await?;
            if table.name == name {
                self.by_name.insert(table.name.clone(), table.clone());
                return Ok(table);
            }
        }
        Err(CatalogError::NotFound(name.to_string()))
    }

    /// Number of rows in `sys.tables`.
    pub async fn count(&self, tran: &Transaction) -> CatalogResult<usize> {
        Ok(self.collection.iterate(tran).try_collect().await?.len())
    }

    fn validate(name: &str, columns: &[ColumnDefinition]) -> CatalogResult<Vec<ColumnInfo>> {
        if name.is_empty() || name.len() > MAX_NAME_LENGTH as usize {
            return Err(CatalogError::InvalidDefinition(format!(
                "table name must be 1 to {} bytes",
                MAX_NAME_LENGTH
            )));
        }
        if columns.is_empty() {
            return Err(CatalogError::InvalidDefinition(format!(
                "table '{}' has no columns",
                name
            )));
        }
        for (i, column) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == column.name) {
                return Err(CatalogError::InvalidDefinition(format!(
                    "duplicate column '{}'",
                    column.name
                )));
            }
        }

        let schema: Vec<ColumnInfo> = columns.iter().map(|c| c.info).collect();
        column_offsets(&schema).map_err(|e| CatalogError::InvalidDefinition(e.to_string()))?;
        Ok(schema)
    }

    async fn decode(&self, row: &RowHolder, tran: &Transaction) -> CatalogResult<TableInfo> {
        let name = self.strings.fetch(row.get_field(NAME)?, tran).await?;
        Ok(TableInfo {
            id: TableId(row.get_field::<i32>(ID)? as u32),
            name: String::from_utf8(name)
                .map_err(|e| CatalogError::InvalidDefinition(e.to_string()))?,
            root: row.get_field(ROOT)?,
        })
    }
}
