use std::fmt::Debug;

use crate::storage::page::PageId;

pub trait EvictionPolicy: Send + Sync + Debug {
    /// Record that a page was loaded into or served from the cache.
    fn on_page_accessed(&mut self, page_id: PageId);

    /// How many pages an eviction pass should drop right now.
    fn victims_needed(&self) -> usize;

    /// Choose up to `count` pages to flush and drop. Pages for which
    /// `can_evict` returns false are never selected and stay tracked.
    fn select_victims(&mut self, count: usize, can_evict: &dyn Fn(PageId) -> bool) -> Vec<PageId>;

    /// Number of tracked pages.
    fn size(&self) -> usize;
}
