//! Pages holding a packed array of one scalar type.

use std::fmt::Debug;

use bytes::{Buf, BufMut, BytesMut};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{ItemPage, PageHeader, PageId, PageType, HEADER_SIZE};

pub trait ScalarValue: Copy + PartialEq + Debug + Send + Sync + 'static {
    const PAGE_TYPE: PageType;
    const WIDTH: usize;

    fn put(self, sink: &mut BytesMut);
    fn get(buf: &mut &[u8]) -> Self;
}

impl ScalarValue for i32 {
    const PAGE_TYPE: PageType = PageType::Int;
    const WIDTH: usize = 4;

    fn put(self, sink: &mut BytesMut) {
        sink.put_i32_le(self);
    }

    fn get(buf: &mut &[u8]) -> Self {
        buf.get_i32_le()
    }
}

impl ScalarValue for i64 {
    const PAGE_TYPE: PageType = PageType::Long;
    const WIDTH: usize = 8;

    fn put(self, sink: &mut BytesMut) {
        sink.put_i64_le(self);
    }

    fn get(buf: &mut &[u8]) -> Self {
        buf.get_i64_le()
    }
}

impl ScalarValue for f64 {
    const PAGE_TYPE: PageType = PageType::Double;
    const WIDTH: usize = 8;

    fn put(self, sink: &mut BytesMut) {
        sink.put_f64_le(self);
    }

    fn get(buf: &mut &[u8]) -> Self {
        buf.get_f64_le()
    }
}

#[derive(Debug)]
pub struct ScalarPage<T: ScalarValue> {
    header: PageHeader,
    items: Vec<T>,
}

pub type IntPage = ScalarPage<i32>;
pub type LongPage = ScalarPage<i64>;
pub type DoublePage = ScalarPage<f64>;

impl<T: ScalarValue> ScalarPage<T> {
    pub fn new(
        page_size: u32,
        page_id: PageId,
        prev_page_id: PageId,
        next_page_id: PageId,
    ) -> StorageResult<Self> {
        let header = PageHeader::new(T::PAGE_TYPE, page_size, page_id, prev_page_id, next_page_id)?;
        Ok(Self {
            header,
            items: Vec::new(),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        let header = PageHeader::decode(bytes, T::PAGE_TYPE)?;
        let count = header.row_count as usize;
        if count * T::WIDTH > header.body_capacity() {
            return Err(StorageError::PageCorrupted(format!(
                "row count {} exceeds capacity of {}",
                count, header.page_id
            )));
        }

        let mut body = &bytes[HEADER_SIZE..];
        let items = (0..count).map(|_| T::get(&mut body)).collect();

        Ok(Self { header, items })
    }

    pub fn max_row_count(&self) -> usize {
        self.header.body_capacity() / T::WIDTH
    }

    fn check_capacity(&self, needed: usize) -> StorageResult<()> {
        let available = self.header.body_capacity();
        if needed > available {
            return Err(StorageError::NotEnoughSpace {
                required: needed,
                available,
            });
        }
        Ok(())
    }
}

impl<T: ScalarValue> ItemPage for ScalarPage<T> {
    type Item = T;

    fn header(&self) -> &PageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut PageHeader {
        &mut self.header
    }

    fn size_needed(&self, items: &[T]) -> usize {
        items.len() * T::WIDTH
    }

    fn can_fit(&self, items: &[T]) -> bool {
        self.size_needed(&self.items) + self.size_needed(items) <= self.header.body_capacity()
    }

    fn merge(&mut self, items: &[T]) -> StorageResult<()> {
        self.check_capacity(self.size_needed(&self.items) + self.size_needed(items))?;
        self.items.extend_from_slice(items);
        self.header.row_count = self.items.len() as u32;
        Ok(())
    }

    fn store(&mut self, items: &[T]) -> StorageResult<()> {
        self.check_capacity(self.size_needed(items))?;
        self.items = items.to_vec();
        self.header.row_count = self.items.len() as u32;
        Ok(())
    }

    fn fetch(&self) -> Vec<T> {
        self.items.clone()
    }

    fn persist_body(&self, sink: &mut BytesMut) {
        for item in &self.items {
            item.put(sink);
        }
    }
}
