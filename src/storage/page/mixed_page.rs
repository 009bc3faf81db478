//! Pages of fixed-stride structured rows backed by a [`RowsetHolder`].

use bytes::{BufMut, BytesMut};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::row::{ColumnInfo, FixedField, RowHolder};
use crate::storage::page::rowset::RowsetHolder;
use crate::storage::page::{ItemPage, PageHeader, PageId, PageType, HEADER_SIZE};

pub struct MixedPage {
    header: PageHeader,
    rowset: RowsetHolder,
}

impl std::fmt::Debug for MixedPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixedPage")
            .field("header", &self.header)
            .field("max_row_count", &self.rowset.max_row_count())
            .finish()
    }
}

impl MixedPage {
    pub fn new(
        page_size: u32,
        page_id: PageId,
        prev_page_id: PageId,
        next_page_id: PageId,
        schema: &[ColumnInfo],
    ) -> StorageResult<Self> {
        let header = PageHeader::new(PageType::Mixed, page_size, page_id, prev_page_id, next_page_id)?;
        let rowset = RowsetHolder::new(schema, vec![0u8; header.body_capacity()], true)?;
        Ok(Self { header, rowset })
    }

    pub fn from_bytes(bytes: &[u8], schema: &[ColumnInfo]) -> StorageResult<Self> {
        let header = PageHeader::decode(bytes, PageType::Mixed)?;
        let rowset = RowsetHolder::new(schema, bytes[HEADER_SIZE..].to_vec(), false)?;

        if rowset.row_count() != header.row_count as usize {
            return Err(StorageError::PageCorrupted(format!(
                "{} header claims {} rows but bitmap holds {}",
                header.page_id,
                header.row_count,
                rowset.row_count()
            )));
        }

        Ok(Self { header, rowset })
    }

    pub fn schema(&self) -> &[ColumnInfo] {
        self.rowset.schema()
    }

    pub fn max_row_count(&self) -> usize {
        self.rowset.max_row_count()
    }

    pub fn free_space_for_items(&self) -> usize {
        self.rowset.free_space_for_items()
    }

    /// First-fit insert. `None` means the page is full.
    pub fn insert_row(&mut self, row: &RowHolder) -> StorageResult<Option<usize>> {
        let slot = self.rowset.insert_row(row)?;
        self.sync_row_count();
        Ok(slot)
    }

    pub fn set_row(&mut self, slot: usize, row: &RowHolder) -> StorageResult<()> {
        self.rowset.set_row(slot, row)?;
        self.sync_row_count();
        Ok(())
    }

    pub fn get_row(&self, slot: usize) -> StorageResult<RowHolder> {
        self.rowset.get_row(slot)
    }

    pub fn delete_row(&mut self, slot: usize) -> StorageResult<()> {
        self.rowset.delete_row(slot)?;
        self.sync_row_count();
        Ok(())
    }

    pub fn get_field<T: FixedField>(&self, slot: usize, column: usize) -> StorageResult<T> {
        self.rowset.get_field(slot, column)
    }

    pub fn set_field<T: FixedField>(&mut self, slot: usize, column: usize, value: T) -> StorageResult<()> {
        self.rowset.set_field(slot, column, value)?;
        self.sync_row_count();
        Ok(())
    }

    pub fn iterate(&self) -> impl Iterator<Item = RowHolder> + '_ {
        self.rowset.iterate()
    }

    fn sync_row_count(&mut self) {
        self.header.row_count = self.rowset.row_count() as u32;
    }

    /// Rejects a batch before any of it is written.
    fn check_rows(&self, rows: &[RowHolder]) -> StorageResult<()> {
        rows.iter().try_for_each(|row| self.rowset.check_schema(row))
    }

    fn check_capacity(&self, rows: usize, free: usize) -> StorageResult<()> {
        if rows > free {
            let row_size = self.rowset.row_size();
            return Err(StorageError::NotEnoughSpace {
                required: rows * row_size,
                available: free * row_size,
            });
        }
        Ok(())
    }
}

impl ItemPage for MixedPage {
    type Item = RowHolder;

    fn header(&self) -> &PageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut PageHeader {
        &mut self.header
    }

    fn size_needed(&self, items: &[RowHolder]) -> usize {
        items.len() * self.rowset.row_size()
    }

    fn can_fit(&self, items: &[RowHolder]) -> bool {
        items.len() <= self.rowset.free_space_for_items()
    }

    fn merge(&mut self, items: &[RowHolder]) -> StorageResult<()> {
        self.check_rows(items)?;
        self.check_capacity(items.len(), self.rowset.free_space_for_items())?;
        for item in items {
            self.rowset.insert_row(item)?;
        }
        self.sync_row_count();
        Ok(())
    }

    fn store(&mut self, items: &[RowHolder]) -> StorageResult<()> {
        self.check_rows(items)?;
        self.check_capacity(items.len(), self.rowset.max_row_count())?;
        self.rowset.clear();
        for (slot, item) in items.iter().enumerate() {
            self.rowset.set_row(slot, item)?;
        }
        self.sync_row_count();
        Ok(())
    }

    fn fetch(&self) -> Vec<RowHolder> {
        self.rowset.iterate().collect()
    }

    fn persist_body(&self, sink: &mut BytesMut) {
        sink.put_slice(self.rowset.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::row::{ColumnType, PagePointerOffsetPair};

    const PAGE_SIZE: u32 = 4096;

    /// Bool + Int + Long + PagePointer: a 21-byte stride.
    fn schema() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo::new(ColumnType::Bool),
            ColumnInfo::new(ColumnType::Int),
            ColumnInfo::new(ColumnType::Long),
            ColumnInfo::new(ColumnType::PagePointer),
        ]
    }

    fn make_row(schema: &[ColumnInfo], n: i32) -> StorageResult<RowHolder> {
        let mut row = RowHolder::new(schema);
        row.set_field(0, n % 2 == 0)?;
        row.set_field(1, n)?;
        row.set_field(2, n as i64 * 1000)?;
        row.set_field(3, PageId(n as u64))?;
        Ok(row)
    }

    #[test]
    fn test_fill_until_full() -> StorageResult<()> {
        let schema = schema();
        let mut page = MixedPage::new(PAGE_SIZE, PageId(2), PageId::NULL, PageId::NULL, &schema)?;
        assert!(page.iterate().next().is_none());

        let max = page.max_row_count();
        let bitmap = (PAGE_SIZE as usize - HEADER_SIZE).div_ceil(21 * 8);
        assert_eq!(max, (PAGE_SIZE as usize - HEADER_SIZE - bitmap - schema.len()) / 21);

        for n in 0..max as i32 {
            let before = page.free_space_for_items();
            assert_eq!(page.insert_row(&make_row(&schema, n)?)?, Some(n as usize));
            assert_eq!(page.free_space_for_items(), before - 1);
        }

        assert_eq!(page.free_space_for_items(), 0);
        assert_eq!(page.insert_row(&make_row(&schema, -1)?)?, None);
        assert_eq!(page.header().row_count as usize, max);

        for n in 0..max as i32 {
            assert_eq!(page.get_row(n as usize)?, make_row(&schema, n)?);
        }
        Ok(())
    }

    #[test]
    fn test_delete_reuses_first_free_slot() -> StorageResult<()> {
        let schema = schema();
        let mut page = MixedPage::new(PAGE_SIZE, PageId(2), PageId::NULL, PageId::NULL, &schema)?;
        for n in 0..5 {
            page.insert_row(&make_row(&schema, n)?)?;
        }

        page.delete_row(1)?;
        page.delete_row(3)?;
        assert_eq!(page.header().row_count, 3);
        let live: Vec<i32> = page
            .iterate()
            .map(|row| row.get_field::<i32>(1))
            .collect::<StorageResult<_>>()?;
        assert_eq!(live, vec![0, 2, 4]);

        assert_eq!(page.insert_row(&make_row(&schema, 10)?)?, Some(1));
        assert!(page.get_row(3).is_err());
        Ok(())
    }

    #[test]
    fn test_persist_and_reconstruct() -> StorageResult<()> {
        let schema = vec![
            ColumnInfo::new(ColumnType::Int),
            ColumnInfo::with_size(ColumnType::String, 20),
            ColumnInfo::new(ColumnType::Double),
        ];
        let mut page = MixedPage::new(PAGE_SIZE, PageId(5), PageId(4), PageId(6), &schema)?;
        for n in 0..20 {
            let mut row = RowHolder::new(&schema);
            row.set_field(0, n)?;
            row.set_field(1, PagePointerOffsetPair::new(PageId(9), 36 + n as u16))?;
            row.set_field(2, n as f64 / 4.0)?;
            page.insert_row(&row)?;
        }
        page.delete_row(7)?;

        let mut sink = BytesMut::new();
        page.persist(&mut sink);
        assert_eq!(sink.len(), PAGE_SIZE as usize);

        let restored = MixedPage::from_bytes(&sink, &schema)?;
        assert_eq!(restored.header(), page.header());
        assert_eq!(restored.fetch(), page.fetch());
        assert_eq!(restored.free_space_for_items(), page.free_space_for_items());
        assert_eq!(
            restored.get_field::<PagePointerOffsetPair>(3, 1)?,
            PagePointerOffsetPair::new(PageId(9), 39)
        );
        Ok(())
    }

    #[test]
    fn test_header_row_count_must_match_bitmap() -> StorageResult<()> {
        let schema = schema();
        let mut page = MixedPage::new(PAGE_SIZE, PageId(2), PageId::NULL, PageId::NULL, &schema)?;
        page.insert_row(&make_row(&schema, 1)?)?;
        page.header_mut().row_count = 2;

        let mut sink = BytesMut::new();
        page.persist(&mut sink);
        assert!(matches!(
            MixedPage::from_bytes(&sink, &schema),
            Err(StorageError::PageCorrupted(_))
        ));
        Ok(())
    }

    #[test]
    fn test_merge_respects_capacity() -> StorageResult<()> {
        let schema = schema();
        let mut page = MixedPage::new(256, PageId(2), PageId::NULL, PageId::NULL, &schema)?;
        let max = page.max_row_count();
        let rows: Vec<RowHolder> = (0..max as i32 + 1)
            .map(|n| make_row(&schema, n))
            .collect::<StorageResult<_>>()?;

        assert!(!page.can_fit(&rows));
        assert!(page.merge(&rows).unwrap_err().is_capacity());
        assert_eq!(page.header().row_count, 0);

        page.merge(&rows[..max])?;
        assert_eq!(page.fetch().len(), max);

        page.store(&rows[..2])?;
        assert_eq!(page.fetch(), rows[..2].to_vec());
        assert_eq!(page.size_needed(&rows[..2]), 42);
        Ok(())
    }

    #[test]
    fn test_foreign_rows_leave_page_untouched() -> StorageResult<()> {
        let schema = schema();
        let mut page = MixedPage::new(PAGE_SIZE, PageId(2), PageId::NULL, PageId::NULL, &schema)?;
        let rows = vec![make_row(&schema, 1)?, make_row(&schema, 2)?];
        page.merge(&rows)?;

        let mut foreign = RowHolder::new(&[ColumnInfo::new(ColumnType::Long)]);
        foreign.set_field(0, 7i64)?;

        assert!(page.store(&[foreign.clone()]).is_err());
        assert_eq!(page.fetch(), rows);

        let batch = vec![make_row(&schema, 3)?, foreign];
        assert!(page.merge(&batch).is_err());
        assert_eq!(page.fetch(), rows);
        assert_eq!(page.header().row_count, 2);
        Ok(())
    }
}
