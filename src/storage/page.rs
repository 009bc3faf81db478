//! Typed page formats.
//!
//! Every page starts with the same little-endian header:
//!
//! ```text
//! [page_id: u64][page_size: u32][page_type: u32][row_count: u32][prev: u64][next: u64]
//! ```
//!
//! followed by a type-specific body. A persisted page is always exactly
//! `page_size` bytes.

pub mod mixed_page;
pub mod row;
pub mod rowset;
pub mod scalar_page;
pub mod string_page;

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::storage::error::{StorageError, StorageResult};

pub use mixed_page::MixedPage;
pub use row::{ColumnInfo, ColumnType, PagePointerOffsetPair, RowHolder};
pub use rowset::RowsetHolder;
pub use scalar_page::{DoublePage, IntPage, LongPage, ScalarPage};
pub use string_page::StringPage;

/// Size of the common page header in bytes.
pub const HEADER_SIZE: usize = 8 + 4 + 4 + 4 + 8 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId(pub u64);

impl PageId {
    /// Sentinel for "no page" in prev/next links.
    pub const NULL: PageId = PageId(0);
    /// Reserved page holding the catalog roots.
    pub const BOOT: PageId = PageId(1);
    /// First id handed out by regular allocation.
    pub const FIRST_DATA: PageId = PageId(2);

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Page{}", self.0)
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageType {
    Int = 1,
    Long = 2,
    Double = 3,
    String = 4,
    Mixed = 5,
}

impl PageType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(PageType::Int),
            2 => Some(PageType::Long),
            3 => Some(PageType::Double),
            4 => Some(PageType::String),
            5 => Some(PageType::Mixed),
            _ => None,
        }
    }
}

impl std::str::FromStr for PageType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "int" => Ok(PageType::Int),
            "long" => Ok(PageType::Long),
            "double" => Ok(PageType::Double),
            "string" => Ok(PageType::String),
            "mixed" => Ok(PageType::Mixed),
            _ => Err(StorageError::InvalidArgument(format!(
                "unknown page type: {}",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub page_id: PageId,
    pub page_size: u32,
    pub page_type: PageType,
    pub row_count: u32,
    pub prev_page_id: PageId,
    pub next_page_id: PageId,
}

impl PageHeader {
    pub fn new(
        page_type: PageType,
        page_size: u32,
        page_id: PageId,
        prev_page_id: PageId,
        next_page_id: PageId,
    ) -> StorageResult<Self> {
        if (page_size as usize) <= HEADER_SIZE || !page_size.is_power_of_two() {
            return Err(StorageError::InvalidArgument(format!(
                "page size {} is not a power of two larger than the header",
                page_size
            )));
        }

        Ok(Self {
            page_id,
            page_size,
            page_type,
            row_count: 0,
            prev_page_id,
            next_page_id,
        })
    }

    /// Bytes available after the header.
    pub fn body_capacity(&self) -> usize {
        self.page_size as usize - HEADER_SIZE
    }

    pub fn encode(&self, sink: &mut BytesMut) {
        sink.put_u64_le(self.page_id.0);
        sink.put_u32_le(self.page_size);
        sink.put_u32_le(self.page_type as u32);
        sink.put_u32_le(self.row_count);
        sink.put_u64_le(self.prev_page_id.0);
        sink.put_u64_le(self.next_page_id.0);
    }

    /// Reads a header from the start of `bytes`, which must hold the whole page.
    pub fn decode(bytes: &[u8], expected: PageType) -> StorageResult<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(StorageError::PageCorrupted(format!(
                "{} bytes cannot hold a page header",
                bytes.len()
            )));
        }

        let mut buf = bytes;
        let page_id = PageId(buf.get_u64_le());
        let page_size = buf.get_u32_le();
        let tag = buf.get_u32_le();

        let page_type = match PageType::from_u32(tag) {
            Some(page_type) if page_type == expected => page_type,
            _ => {
                return Err(StorageError::PageTypeMismatch {
                    expected,
                    found: tag,
                })
            }
        };

        if !page_size.is_power_of_two() || bytes.len() != page_size as usize {
            return Err(StorageError::Misaligned {
                position: bytes.len() as u64,
                page_size,
            });
        }

        let row_count = buf.get_u32_le();
        let prev_page_id = PageId(buf.get_u64_le());
        let next_page_id = PageId(buf.get_u64_le());

        Ok(Self {
            page_id,
            page_size,
            page_type,
            row_count,
            prev_page_id,
            next_page_id,
        })
    }
}

/// Operations shared by every page variant over its item type.
pub trait ItemPage {
    type Item;

    fn header(&self) -> &PageHeader;
    fn header_mut(&mut self) -> &mut PageHeader;

    /// Body bytes `items` would occupy on their own.
    fn size_needed(&self, items: &[Self::Item]) -> usize;

    /// Whether `items` fit next to the current contents.
    fn can_fit(&self, items: &[Self::Item]) -> bool;

    /// Appends `items`, failing with `NotEnoughSpace` when they do not fit.
    fn merge(&mut self, items: &[Self::Item]) -> StorageResult<()>;

    /// Replaces the contents with `items`, same capacity rule as `merge`.
    fn store(&mut self, items: &[Self::Item]) -> StorageResult<()>;

    fn fetch(&self) -> Vec<Self::Item>;

    /// Writes the body right after the header.
    fn persist_body(&self, sink: &mut BytesMut);

    /// Writes the full page image, exactly `page_size` bytes.
    fn persist(&self, sink: &mut BytesMut) {
        let start = sink.len();
        let page_size = self.header().page_size as usize;
        self.header().encode(sink);
        self.persist_body(sink);
        let written = sink.len() - start;
        debug_assert!(written <= page_size);
        sink.put_bytes(0, page_size - written);
    }
}

/// A page of any type, as held by the buffer pool.
#[derive(Debug)]
pub enum Page {
    Int(IntPage),
    Long(LongPage),
    Double(DoublePage),
    String(StringPage),
    Mixed(MixedPage),
}

macro_rules! dispatch {
    ($page:expr, $inner:ident => $body:expr) => {
        match $page {
            Page::Int($inner) => $body,
            Page::Long($inner) => $body,
            Page::Double($inner) => $body,
            Page::String($inner) => $body,
            Page::Mixed($inner) => $body,
        }
    };
}

impl Page {
    /// Creates an empty page. `schema` is only used by mixed pages.
    pub fn new(
        page_type: PageType,
        page_size: u32,
        page_id: PageId,
        prev_page_id: PageId,
        next_page_id: PageId,
        schema: &[ColumnInfo],
    ) -> StorageResult<Self> {
        Ok(match page_type {
            PageType::Int => Page::Int(IntPage::new(page_size, page_id, prev_page_id, next_page_id)?),
            PageType::Long => {
                Page::Long(LongPage::new(page_size, page_id, prev_page_id, next_page_id)?)
            }
            PageType::Double => {
                Page::Double(DoublePage::new(page_size, page_id, prev_page_id, next_page_id)?)
            }
            PageType::String => {
                Page::String(StringPage::new(page_size, page_id, prev_page_id, next_page_id)?)
            }
            PageType::Mixed => Page::Mixed(MixedPage::new(
                page_size,
                page_id,
                prev_page_id,
                next_page_id,
                schema,
            )?),
        })
    }

    /// Reconstructs a page from its persisted image.
    pub fn from_bytes(bytes: &[u8], page_type: PageType, schema: &[ColumnInfo]) -> StorageResult<Self> {
        Ok(match page_type {
            PageType::Int => Page::Int(IntPage::from_bytes(bytes)?),
            PageType::Long => Page::Long(LongPage::from_bytes(bytes)?),
            PageType::Double => Page::Double(DoublePage::from_bytes(bytes)?),
            PageType::String => Page::String(StringPage::from_bytes(bytes)?),
            PageType::Mixed => Page::Mixed(MixedPage::from_bytes(bytes, schema)?),
        })
    }

    pub fn header(&self) -> &PageHeader {
        dispatch!(self, page => page.header())
    }

    pub fn header_mut(&mut self) -> &mut PageHeader {
        dispatch!(self, page => page.header_mut())
    }

    pub fn page_id(&self) -> PageId {
        self.header().page_id
    }

    pub fn page_type(&self) -> PageType {
        self.header().page_type
    }

    pub fn row_count(&self) -> u32 {
        self.header().row_count
    }

    pub fn prev_page_id(&self) -> PageId {
        self.header().prev_page_id
    }

    pub fn next_page_id(&self) -> PageId {
        self.header().next_page_id
    }

    pub fn set_prev_page_id(&mut self, page_id: PageId) {
        self.header_mut().prev_page_id = page_id;
    }

    pub fn set_next_page_id(&mut self, page_id: PageId) {
        self.header_mut().next_page_id = page_id;
    }

    pub fn persist(&self, sink: &mut BytesMut) {
        dispatch!(self, page => page.persist(sink))
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut sink = BytesMut::with_capacity(self.header().page_size as usize);
        self.persist(&mut sink);
        sink
    }

    pub fn as_mixed(&self) -> StorageResult<&MixedPage> {
        match self {
            Page::Mixed(page) => Ok(page),
            other => Err(other.type_error(PageType::Mixed)),
        }
    }

    pub fn as_mixed_mut(&mut self) -> StorageResult<&mut MixedPage> {
        match self {
            Page::Mixed(page) => Ok(page),
            other => Err(other.type_error(PageType::Mixed)),
        }
    }

    pub fn as_string(&self) -> StorageResult<&StringPage> {
        match self {
            Page::String(page) => Ok(page),
            other => Err(other.type_error(PageType::String)),
        }
    }

    pub fn as_string_mut(&mut self) -> StorageResult<&mut StringPage> {
        match self {
            Page::String(page) => Ok(page),
            other => Err(other.type_error(PageType::String)),
        }
    }

    fn type_error(&self, expected: PageType) -> StorageError {
        StorageError::PageTypeMismatch {
            expected,
            found: self.page_type() as u32,
        }
    }
}
