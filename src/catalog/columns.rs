//! `sys.columns`: one row per column of every table.

use std::sync::Arc;

use crate::access::{PageCollection, StringHeap};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::{ColumnInfo, ColumnType, PageId, RowHolder};
use crate::transaction::Transaction;

use super::{CatalogError, CatalogResult, TableId, MAX_NAME_LENGTH};

/// Declared length of a string column parsed without one.
pub const DEFAULT_STRING_LENGTH: u16 = 255;

/// A named column of a user table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub info: ColumnInfo,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            info: ColumnInfo::new(column_type),
        }
    }

    /// A string column holding at most `max_length` bytes.
    pub fn string(name: impl Into<String>, max_length: u16) -> Self {
        Self {
            name: name.into(),
            info: ColumnInfo::with_size(ColumnType::String, max_length),
        }
    }

    /// Parses `name:type`, e.g. `id:int`, or `name:string:LEN` for a
    /// string of at most `LEN` bytes. A string without a length gets
    /// [`DEFAULT_STRING_LENGTH`].
    pub fn parse(spec: &str) -> CatalogResult<Self> {
        let invalid = || {
            CatalogError::InvalidDefinition(format!("expected NAME:TYPE[:LEN], got '{}'", spec))
        };
        let mut parts = spec.split(':');
        let (name, type_name) = match (parts.next(), parts.next()) {
            (Some(name), Some(type_name)) if !name.is_empty() => (name, type_name),
            _ => return Err(invalid()),
        };
        let length = parts.next();
        if parts.next().is_some() {
            return Err(invalid());
        }

        let column_type = type_name
            .parse::<ColumnType>()
            .map_err(|e| CatalogError::InvalidDefinition(e.to_string()))?;
        match (column_type, length) {
            (ColumnType::String, None) => Ok(Self::string(name, DEFAULT_STRING_LENGTH)),
            (ColumnType::String, Some(length)) => match length.parse::<u16>() {
                Ok(length) if length > 0 => Ok(Self::string(name, length)),
                _ => Err(CatalogError::InvalidDefinition(format!(
                    "invalid string length '{}' for column '{}'",
                    length, name
                ))),
            },
            (column_type, None) => Ok(Self::new(name, column_type)),
            (_, Some(_)) => Err(CatalogError::InvalidDefinition(format!(
                "only string columns take a length: '{}'",
                spec
            ))),
        }
    }
}

// table_id, name, type, declared_size, position
const TABLE_ID: usize = 0;
const NAME: usize = 1;
const TYPE: usize = 2;
const DECLARED_SIZE: usize = 3;
const POSITION: usize = 4;

pub(crate) fn schema() -> Vec<ColumnInfo> {
    vec![
        ColumnInfo::new(ColumnType::Int),
        ColumnInfo::with_size(ColumnType::String, MAX_NAME_LENGTH),
        ColumnInfo::new(ColumnType::Int),
        ColumnInfo::new(ColumnType::Int),
        ColumnInfo::new(ColumnType::Int),
    ]
}

pub struct ColumnManager {
    collection: PageCollection,
    strings: Arc<StringHeap>,
}

impl ColumnManager {
    pub(crate) fn new(pool: BufferPoolManager, root: PageId, strings: Arc<StringHeap>) -> Self {
        Self {
            collection: PageCollection::new(pool, &schema(), root),
            strings,
        }
    }

    pub fn root(&self) -> PageId {
        self.collection.head()
    }

    pub(crate) async fn add_columns(
        &self,
        table_id: TableId,
        columns: &[ColumnDefinition],
        tran: &Transaction,
    ) -> CatalogResult<()> {
        for (position, column) in columns.iter().enumerate() {
            let name = self.strings.add(column.name.as_bytes(), tran).await?;

            let mut row = RowHolder::new(&schema());
            row.set_field(TABLE_ID, table_id.0 as i32)?;
            row.set_field(NAME, name)?;
            row.set_field(TYPE, column.info.column_type as u8 as i32)?;
            row.set_field(DECLARED_SIZE, column.info.declared_size as i32)?;
            row.set_field(POSITION, position as i32)?;
            self.collection.add(&row, tran).await?;
        }
        Ok(())
    }

    /// Columns of `table_id` in declaration order.
    pub async fn columns_of(&self, table_id: TableId, tran: &Transaction) -> CatalogResult<Vec<ColumnDefinition>> {
        let mut found = Vec::new();
        let mut cursor = self.collection.iterate(tran);
        while let Some(row) = cursor.next().await? {
            if row.get_field::<i32>(TABLE_ID)? != table_id.0 as i32 {
                continue;
            }

            let name = self.strings.fetch(row.get_field(NAME)?, tran).await?;
            let name = String::from_utf8(name)
                .map_err(|e| CatalogError::InvalidDefinition(e.to_string()))?;
            let column_type = ColumnType::from_u8(row.get_field::<i32>(TYPE)? as u8)?;
            let declared_size = row.get_field::<i32>(DECLARED_SIZE)? as u16;
            let position = row.get_field::<i32>(POSITION)?;

            found.push((
                position,
                ColumnDefinition {
                    name,
                    info: ColumnInfo::with_size(column_type, declared_size),
                },
            ));
        }

        found.sort_by_key(|(position, _)| *position);
        Ok(found.into_iter().map(|(_, column)| column).collect())
    }
}
