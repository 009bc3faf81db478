//! Access layer: logical objects built from page chains.
//!
//! - **PageCollection**: rows of one table across linked mixed pages
//! - **StringHeap**: variable length values across linked string pages,
//!   referenced from rows by page pointer and offset

pub mod page_collection;
pub mod string_heap;

pub use page_collection::{PageCollection, RowCursor};
pub use string_heap::StringHeap;
