//! Column schema, fixed-width field codecs and the in-memory row carrier.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;

/// Inline width of a [`PagePointerOffsetPair`]: page id (8) + offset (2).
pub const POINTER_PAIR_SIZE: usize = 10;

/// Column types supported in fixed-stride rows.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Bool = 1,
    Int = 2,
    Long = 3,
    Double = 4,
    /// Id of another page.
    PagePointer = 5,
    /// Variable-length bytes stored on a string heap, referenced inline.
    String = 6,
}

impl ColumnType {
    pub fn from_u8(value: u8) -> StorageResult<Self> {
        match value {
            1 => Ok(ColumnType::Bool),
            2 => Ok(ColumnType::Int),
            3 => Ok(ColumnType::Long),
            4 => Ok(ColumnType::Double),
            5 => Ok(ColumnType::PagePointer),
            6 => Ok(ColumnType::String),
            _ => Err(StorageError::InvalidArgument(format!(
                "unknown column type: {}",
                value
            ))),
        }
    }

    /// Number of bytes the column occupies inside a row.
    pub fn inline_size(self) -> usize {
        match self {
            ColumnType::Bool => 1,
            ColumnType::Int => 4,
            ColumnType::Long | ColumnType::Double | ColumnType::PagePointer => 8,
            ColumnType::String => POINTER_PAIR_SIZE,
        }
    }
}

impl std::str::FromStr for ColumnType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bool" => Ok(ColumnType::Bool),
            "int" => Ok(ColumnType::Int),
            "long" => Ok(ColumnType::Long),
            "double" => Ok(ColumnType::Double),
            "pointer" | "pagepointer" => Ok(ColumnType::PagePointer),
            "string" => Ok(ColumnType::String),
            _ => Err(StorageError::InvalidArgument(format!(
                "unknown column type: {}",
                s
            ))),
        }
    }
}

/// Column definition: a type plus a declared size.
///
/// For `String` columns the declared size bounds the heap payload; the inline
/// footprint is always a pointer pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub column_type: ColumnType,
    pub declared_size: u16,
}

impl ColumnInfo {
    pub fn new(column_type: ColumnType) -> Self {
        Self {
            column_type,
            declared_size: column_type.inline_size() as u16,
        }
    }

    pub fn with_size(column_type: ColumnType, declared_size: u16) -> Self {
        Self {
            column_type,
            declared_size,
        }
    }

    pub fn inline_size(&self) -> usize {
        self.column_type.inline_size()
    }
}

/// Sum of the inline sizes of all columns.
pub fn row_size(schema: &[ColumnInfo]) -> usize {
    schema.iter().map(ColumnInfo::inline_size).sum()
}

/// Byte offset of every column within a row.
///
/// Offsets are persisted as one byte each, so the last column must start
/// below 256.
pub fn column_offsets(schema: &[ColumnInfo]) -> StorageResult<Vec<u8>> {
    if schema.is_empty() {
        return Err(StorageError::InvalidArgument(
            "schema must contain at least one column".to_string(),
        ));
    }

    let mut offsets = Vec::with_capacity(schema.len());
    let mut position = 0usize;
    for column in schema {
        let offset = u8::try_from(position).map_err(|_| {
            StorageError::InvalidArgument(format!(
                "column offset {} does not fit the one byte offset table",
                position
            ))
        })?;
        offsets.push(offset);
        position += column.inline_size();
    }

    Ok(offsets)
}

/// Identifies a record inside a heap page. Equality is by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PagePointerOffsetPair {
    pub page_id: PageId,
    pub offset: u16,
}

impl PagePointerOffsetPair {
    pub fn new(page_id: PageId, offset: u16) -> Self {
        Self { page_id, offset }
    }
}

/// A value with a fixed little-endian encoding inside a row.
pub trait FixedField: Copy {
    /// Column types this value may be read from or written to.
    const COLUMN_TYPES: &'static [ColumnType];

    fn read(bytes: &[u8]) -> Self;
    fn write(self, bytes: &mut [u8]);
}

impl FixedField for bool {
    const COLUMN_TYPES: &'static [ColumnType] = &[ColumnType::Bool];

    fn read(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    fn write(self, bytes: &mut [u8]) {
        bytes[0] = self as u8;
    }
}

impl FixedField for i32 {
    const COLUMN_TYPES: &'static [ColumnType] = &[ColumnType::Int];

    fn read(bytes: &[u8]) -> Self {
        LittleEndian::read_i32(bytes)
    }

    fn write(self, bytes: &mut [u8]) {
        LittleEndian::write_i32(bytes, self);
    }
}

impl FixedField for i64 {
    const COLUMN_TYPES: &'static [ColumnType] = &[ColumnType::Long, ColumnType::PagePointer];

    fn read(bytes: &[u8]) -> Self {
        LittleEndian::read_i64(bytes)
    }

    fn write(self, bytes: &mut [u8]) {
        LittleEndian::write_i64(bytes, self);
    }
}

impl FixedField for f64 {
    const COLUMN_TYPES: &'static [ColumnType] = &[ColumnType::Double];

    fn read(bytes: &[u8]) -> Self {
        LittleEndian::read_f64(bytes)
    }

    fn write(self, bytes: &mut [u8]) {
        LittleEndian::write_f64(bytes, self);
    }
}

impl FixedField for PageId {
    const COLUMN_TYPES: &'static [ColumnType] = &[ColumnType::PagePointer];

    fn read(bytes: &[u8]) -> Self {
        PageId(LittleEndian::read_u64(bytes))
    }

    fn write(self, bytes: &mut [u8]) {
        LittleEndian::write_u64(bytes, self.0);
    }
}

impl FixedField for PagePointerOffsetPair {
    const COLUMN_TYPES: &'static [ColumnType] = &[ColumnType::String];

    fn read(bytes: &[u8]) -> Self {
        PagePointerOffsetPair {
            page_id: PageId(LittleEndian::read_u64(&bytes[0..8])),
            offset: LittleEndian::read_u16(&bytes[8..10]),
        }
    }

    fn write(self, bytes: &mut [u8]) {
        LittleEndian::write_u64(&mut bytes[0..8], self.page_id.0);
        LittleEndian::write_u16(&mut bytes[8..10], self.offset);
    }
}

/// Checks that `T` may be stored in `column` and returns the column's width.
pub(crate) fn check_field_type<T: FixedField>(column: &ColumnInfo) -> StorageResult<usize> {
    if T::COLUMN_TYPES.contains(&column.column_type) {
        Ok(column.inline_size())
    } else {
        Err(StorageError::InvalidArgument(format!(
            "column of type {:?} cannot hold a {}",
            column.column_type,
            std::any::type_name::<T>()
        )))
    }
}

/// One row of column values laid out exactly as in a mixed page slot.
#[derive(Debug, Clone, PartialEq)]
pub struct RowHolder {
    schema: Vec<ColumnInfo>,
    offsets: Vec<usize>,
    data: Vec<u8>,
}

impl RowHolder {
    pub fn new(schema: &[ColumnInfo]) -> Self {
        let mut offsets = Vec::with_capacity(schema.len());
        let mut position = 0;
        for column in schema {
            offsets.push(position);
            position += column.inline_size();
        }

        Self {
            schema: schema.to_vec(),
            offsets,
            data: vec![0u8; position],
        }
    }

    pub fn from_bytes(schema: &[ColumnInfo], bytes: &[u8]) -> StorageResult<Self> {
        let mut row = Self::new(schema);
        if bytes.len() != row.data.len() {
            return Err(StorageError::InvalidArgument(format!(
                "row of {} bytes does not match schema stride {}",
                bytes.len(),
                row.data.len()
            )));
        }
        row.data.copy_from_slice(bytes);
        Ok(row)
    }

    pub fn schema(&self) -> &[ColumnInfo] {
        &self.schema
    }

    pub fn row_size(&self) -> usize {
        self.data.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn get_field<T: FixedField>(&self, column: usize) -> StorageResult<T> {
        let (start, width) = self.field_range::<T>(column)?;
        Ok(T::read(&self.data[start..start + width]))
    }

    pub fn set_field<T: FixedField>(&mut self, column: usize, value: T) -> StorageResult<()> {
        let (start, width) = self.field_range::<T>(column)?;
        value.write(&mut self.data[start..start + width]);
        Ok(())
    }

    fn field_range<T: FixedField>(&self, column: usize) -> StorageResult<(usize, usize)> {
        let info = self.schema.get(column).ok_or_else(|| {
            StorageError::InvalidArgument(format!(
                "column {} out of range ({} columns)",
                column,
                self.schema.len()
            ))
        })?;
        let width = check_field_type::<T>(info)?;
        Ok((self.offsets[column], width))
    }
}
