//! Variable-length byte strings addressed by their offset inside the page.
//!
//! Body layout: repeated `[length: i16][length bytes]`.

use bytes::{Buf, BufMut, BytesMut};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{ItemPage, PageHeader, PageId, PageType, HEADER_SIZE};

/// Bytes of the length prefix stored before every item.
pub const LENGTH_PREFIX: usize = std::mem::size_of::<i16>();

#[derive(Debug)]
pub struct StringPage {
    header: PageHeader,
    items: Vec<Vec<u8>>,
    /// Page offset of each item, parallel to `items`.
    offsets: Vec<u32>,
    used: usize,
}

impl StringPage {
    pub fn new(
        page_size: u32,
        page_id: PageId,
        prev_page_id: PageId,
        next_page_id: PageId,
    ) -> StorageResult<Self> {
        let header = PageHeader::new(PageType::String, page_size, page_id, prev_page_id, next_page_id)?;
        if header.body_capacity() < LENGTH_PREFIX + 1 {
            return Err(StorageError::InvalidArgument(
                "page too small to hold a single string".to_string(),
            ));
        }

        Ok(Self {
            header,
            items: Vec::new(),
            offsets: Vec::new(),
            used: 0,
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        let header = PageHeader::decode(bytes, PageType::String)?;
        let max_items = header.body_capacity() / LENGTH_PREFIX;
        if header.row_count as usize > max_items {
            return Err(StorageError::PageCorrupted(format!(
                "{} claims {} strings, at most {} fit",
                header.page_id, header.row_count, max_items
            )));
        }
        let mut page = Self {
            header,
            items: Vec::with_capacity(header.row_count as usize),
            offsets: Vec::with_capacity(header.row_count as usize),
            used: 0,
        };

        let mut body = &bytes[HEADER_SIZE..];
        for _ in 0..header.row_count {
            if body.remaining() < LENGTH_PREFIX {
                return Err(StorageError::PageCorrupted(format!(
                    "truncated length prefix on {}",
                    header.page_id
                )));
            }
            let length = body.get_i16_le();
            if length < 0 || body.remaining() < length as usize {
                return Err(StorageError::PageCorrupted(format!(
                    "invalid item length {} on {}",
                    length, header.page_id
                )));
            }
            let item = body[..length as usize].to_vec();
            body.advance(length as usize);
            page.push(item);
        }

        Ok(page)
    }

    /// Appends `item` and returns the page offset its record starts at.
    pub fn merge_with_offset_fetch(&mut self, item: &[u8]) -> StorageResult<u32> {
        Self::check_item(item)?;
        self.check_capacity(self.used + Self::item_size(item))?;
        let offset = self.push(item.to_vec());
        self.header.row_count = self.items.len() as u32;
        Ok(offset)
    }

    /// Returns the item whose record starts exactly at `offset`.
    pub fn fetch_with_offset(&self, offset: u32) -> StorageResult<&[u8]> {
        if (offset as usize) < HEADER_SIZE || offset >= self.header.page_size {
            return Err(StorageError::InvalidArgument(format!(
                "offset {} outside the body of {}",
                offset, self.header.page_id
            )));
        }

        match self.offsets.binary_search(&offset) {
            Ok(index) => Ok(&self.items[index]),
            Err(_) => Err(StorageError::PageCorrupted(format!(
                "no item starts at offset {} on {}",
                offset, self.header.page_id
            ))),
        }
    }

    pub fn can_fit_item(&self, item: &[u8]) -> bool {
        Self::check_item(item).is_ok()
            && self.used + Self::item_size(item) <= self.header.body_capacity()
    }

    /// Bytes still free in the body.
    pub fn free_space(&self) -> usize {
        self.header.body_capacity() - self.used
    }

    fn item_size(item: &[u8]) -> usize {
        item.len() + LENGTH_PREFIX
    }

    fn check_item(item: &[u8]) -> StorageResult<()> {
        if item.len() > i16::MAX as usize {
            return Err(StorageError::InvalidArgument(format!(
                "string of {} bytes exceeds the maximum item length",
                item.len()
            )));
        }
        Ok(())
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

    fn push(&mut self, item: Vec<u8>) -> u32 {
        let offset = (HEADER_SIZE + self.used) as u32;
        self.used += Self::item_size(&item);
        self.offsets.push(offset);
        self.items.push(item);
        offset
    }
}

impl ItemPage for StringPage {
    type Item = Vec<u8>;

    fn header(&self) -> &PageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut PageHeader {
        &mut self.header
    }

    fn size_needed(&self, items: &[Vec<u8>]) -> usize {
        items.iter().map(|item| Self::item_size(item)).sum()
    }

    fn can_fit(&self, items: &[Vec<u8>]) -> bool {
        items.iter().all(|item| Self::check_item(item).is_ok())
            && self.used + self.size_needed(items) <= self.header.body_capacity()
    }

    fn merge(&mut self, items: &[Vec<u8>]) -> StorageResult<()> {
        for item in items {
            Self::check_item(item)?;
        }
        self.check_capacity(self.used + self.size_needed(items))?;
        for item in items {
            self.push(item.clone());
        }
        self.header.row_count = self.items.len() as u32;
        Ok(())
    }

    fn store(&mut self, items: &[Vec<u8>]) -> StorageResult<()> {
        for item in items {
            Self::check_item(item)?;
        }
        self.check_capacity(self.size_needed(items))?;
        self.items.clear();
        self.offsets.clear();
        self.used = 0;
        for item in items {
            self.push(item.clone());
        }
        self.header.row_count = self.items.len() as u32;
        Ok(())
    }

    fn fetch(&self) -> Vec<Vec<u8>> {
        self.items.clone()
    }

    fn persist_body(&self, sink: &mut BytesMut) {
        for item in &self.items {
            sink.put_i16_le(item.len() as i16);
            sink.put_slice(item);
        }
    }
}
