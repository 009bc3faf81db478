//! Slotted fixed-stride row storage.
//!
//! Layout of the storage buffer:
//!
//! ```text
//! | presence bitmap | column offset table | row 0 | row 1 | ... |
//! ```
//!
//! The bitmap holds one bit per slot, the offset table one byte per column.
//! Every row has the same stride, so a `(slot, column)` pair maps to a byte
//! position in O(1). All access goes through bounds-checked accessors.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::row::{
    check_field_type, column_offsets, row_size, ColumnInfo, FixedField, RowHolder,
};

pub struct RowsetHolder {
    storage: Vec<u8>,
    schema: Vec<ColumnInfo>,
    column_offsets: Vec<u8>,
    row_size: usize,
    bitmap_bytes: usize,
    data_start: usize,
    max_row_count: usize,
    row_count: usize,
}

impl RowsetHolder {
    /// Builds a holder over `storage`.
    ///
    /// With `init` the bitmap is cleared and the offset table written; without
    /// it the existing bytes are trusted after checking the offset table.
    pub fn new(schema: &[ColumnInfo], storage: Vec<u8>, init: bool) -> StorageResult<Self> {
        let offsets = column_offsets(schema)?;
        let row_size = row_size(schema);

        let bitmap_bytes = storage.len().div_ceil(row_size * 8);
        let data_start = bitmap_bytes + offsets.len();
        if data_start + row_size > storage.len() {
            return Err(StorageError::NotEnoughSpace {
                required: data_start + row_size,
                available: storage.len(),
            });
        }
        let max_row_count = (storage.len() - data_start) / row_size;

        let mut holder = Self {
            storage,
            schema: schema.to_vec(),
            column_offsets: offsets,
            row_size,
            bitmap_bytes,
            data_start,
            max_row_count,
            row_count: 0,
        };

        if init {
            holder.storage[..bitmap_bytes].fill(0);
            holder.storage[bitmap_bytes..data_start].copy_from_slice(&holder.column_offsets);
        } else {
            if holder.storage[bitmap_bytes..data_start] != holder.column_offsets[..] {
                return Err(StorageError::PageCorrupted(
                    "column offset table does not match schema".to_string(),
                ));
            }
            holder.row_count = holder.count_present()?;
        }

        Ok(holder)
    }

    pub fn schema(&self) -> &[ColumnInfo] {
        &self.schema
    }

    pub fn row_size(&self) -> usize {
        self.row_size
    }

    pub fn max_row_count(&self) -> usize {
        self.max_row_count
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn free_space_for_items(&self) -> usize {
        self.max_row_count - self.row_count
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.storage
    }

    pub fn is_present(&self, slot: usize) -> bool {
        slot < self.max_row_count && self.storage[slot / 8] & (1 << (slot % 8)) != 0
    }

    pub fn get_field<T: FixedField>(&self, slot: usize, column: usize) -> StorageResult<T> {
        self.check_present(slot)?;
        let (start, width) = self.field_range::<T>(slot, column)?;
        Ok(T::read(&self.storage[start..start + width]))
    }

    /// Writes one field; an absent slot becomes present.
    pub fn set_field<T: FixedField>(
        &mut self,
        slot: usize,
        column: usize,
        value: T,
    ) -> StorageResult<()> {
        self.check_slot(slot)?;
        let (start, width) = self.field_range::<T>(slot, column)?;
        value.write(&mut self.storage[start..start + width]);
        self.mark_present(slot);
        Ok(())
    }

    pub fn get_row(&self, slot: usize) -> StorageResult<RowHolder> {
        self.check_present(slot)?;
        RowHolder::from_bytes(&self.schema, self.row_bytes(slot))
    }

    pub fn set_row(&mut self, slot: usize, row: &RowHolder) -> StorageResult<()> {
        self.check_slot(slot)?;
        self.check_schema(row)?;
        let start = self.row_start(slot);
        self.storage[start..start + self.row_size].copy_from_slice(row.as_bytes());
        self.mark_present(slot);
        Ok(())
    }

    /// Stores `row` in the first free slot. `None` means the holder is full.
    pub fn insert_row(&mut self, row: &RowHolder) -> StorageResult<Option<usize>> {
        self.check_schema(row)?;
        match self.find_free_slot() {
            Some(slot) => {
                self.set_row(slot, row)?;
                Ok(Some(slot))
            }
            None => Ok(None),
        }
    }

    /// Clears the slot's presence bit; the bytes stay until overwritten.
    pub fn delete_row(&mut self, slot: usize) -> StorageResult<()> {
        self.check_present(slot)?;
        self.storage[slot / 8] &= !(1 << (slot % 8));
        self.row_count -= 1;
        Ok(())
    }

    /// Drops every row.
    pub fn clear(&mut self) {
        self.storage[..self.bitmap_bytes].fill(0);
        self.row_count = 0;
    }

    /// Present rows in slot order. Each call rescans the bitmap from slot 0.
    pub fn iterate(&self) -> impl Iterator<Item = RowHolder> + '_ {
        (0..self.max_row_count)
            .filter(move |&slot| self.is_present(slot))
            .filter_map(move |slot| RowHolder::from_bytes(&self.schema, self.row_bytes(slot)).ok())
    }

    fn row_start(&self, slot: usize) -> usize {
        self.data_start + slot * self.row_size
    }

    fn row_bytes(&self, slot: usize) -> &[u8] {
        let start = self.row_start(slot);
        &self.storage[start..start + self.row_size]
    }

    fn field_range<T: FixedField>(&self, slot: usize, column: usize) -> StorageResult<(usize, usize)> {
        let info = self.schema.get(column).ok_or_else(|| {
            StorageError::InvalidArgument(format!(
                "column {} out of range ({} columns)",
                column,
                self.schema.len()
            ))
        })?;
        let width = check_field_type::<T>(info)?;
        Ok((self.row_start(slot) + self.column_offsets[column] as usize, width))
    }

    fn check_slot(&self, slot: usize) -> StorageResult<()> {
        if slot >= self.max_row_count {
            return Err(StorageError::InvalidArgument(format!(
                "slot {} out of range (max {})",
                slot, self.max_row_count
            )));
        }
        Ok(())
    }

    fn check_present(&self, slot: usize) -> StorageResult<()> {
        self.check_slot(slot)?;
        if !self.is_present(slot) {
            return Err(StorageError::InvalidArgument(format!(
                "slot {} holds no row",
                slot
            )));
        }
        Ok(())
    }

    pub(crate) fn check_schema(&self, row: &RowHolder) -> StorageResult<()> {
        if row.schema() != self.schema.as_slice() {
            return Err(StorageError::InvalidArgument(
                "row schema does not match rowset schema".to_string(),
            ));
        }
        Ok(())
    }

    fn mark_present(&mut self, slot: usize) {
        if !self.is_present(slot) {
            self.storage[slot / 8] |= 1 << (slot % 8);
            self.row_count += 1;
        }
    }

    fn find_free_slot(&self) -> Option<usize> {
        for (index, byte) in self.storage[..self.bitmap_bytes].iter().enumerate() {
            if *byte == u8::MAX {
                continue;
            }
            let slot = index * 8 + byte.trailing_ones() as usize;
            return (slot < self.max_row_count).then_some(slot);
        }
        None
    }

    fn count_present(&self) -> StorageResult<usize> {
        let mut count = 0;
        for slot in 0..self.bitmap_bytes * 8 {
            if self.storage[slot / 8] & (1 << (slot % 8)) != 0 {
                if slot >= self.max_row_count {
                    return Err(StorageError::PageCorrupted(format!(
                        "presence bit set for slot {} beyond capacity {}",
                        slot, self.max_row_count
                    )));
                }
                count += 1;
            }
        }
        Ok(count)
    }
}
