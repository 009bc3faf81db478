use std::collections::{HashSet, VecDeque};

use super::eviction::EvictionPolicy;
use crate::storage::page::PageId;

/// First-in first-out eviction with low/high watermarks.
///
/// Once more than `high` pages are tracked, a pass evicts the oldest
/// evictable pages until `low` remain.
#[derive(Debug)]
pub struct FifoEvictionPolicy {
    /// Oldest arrival at the front.
    queue: VecDeque<PageId>,
    members: HashSet<PageId>,
    low: usize,
    high: usize,
}

impl FifoEvictionPolicy {
    pub fn new(low: usize, high: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            members: HashSet::new(),
            low: low.min(high),
            high,
        }
    }
}

impl EvictionPolicy for FifoEvictionPolicy {
    fn on_page_accessed(&mut self, page_id: PageId) {
        // Arrival order only; repeated access does not move a page.
        if self.members.insert(page_id) {
            self.queue.push_back(page_id);
        }
    }

    fn victims_needed(&self) -> usize {
        if self.queue.len() > self.high {
            self.queue.len() - self.low
        } else {
            0
        }
    }

    fn select_victims(&mut self, count: usize, can_evict: &dyn Fn(PageId) -> bool) -> Vec<PageId> {
        let mut victims = Vec::with_capacity(count);
        let mut kept = VecDeque::with_capacity(self.queue.len());

        while let Some(page_id) = self.queue.pop_front() {
            if victims.len() < count && can_evict(page_id) {
                self.members.remove(&page_id);
                victims.push(page_id);
            } else {
                kept.push_back(page_id);
            }
        }

        self.queue = kept;
        victims
    }

    fn size(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[u64]) -> Vec<PageId> {
        raw.iter().map(|&id| PageId(id)).collect()
    }

    #[test]
    fn test_fifo_order() {
        let mut policy = FifoEvictionPolicy::new(1, 3);
        for id in 2..6 {
            policy.on_page_accessed(PageId(id));
        }
        assert_eq!(policy.size(), 4);
        assert_eq!(policy.victims_needed(), 3);

        let victims = policy.select_victims(3, &|_| true);
        assert_eq!(victims, ids(&[2, 3, 4]));
        assert_eq!(policy.size(), 1);
        assert_eq!(policy.victims_needed(), 0);
    }

    #[test]
    fn test_below_high_watermark() {
        let mut policy = FifoEvictionPolicy::new(2, 4);
        for id in 2..6 {
            policy.on_page_accessed(PageId(id));
        }
        assert_eq!(policy.victims_needed(), 0);

        policy.on_page_accessed(PageId(6));
        assert_eq!(policy.victims_needed(), 3);
    }

    #[test]
    fn test_repeated_access_keeps_arrival_order() {
        let mut policy = FifoEvictionPolicy::new(0, 1);
        policy.on_page_accessed(PageId(2));
        policy.on_page_accessed(PageId(3));
        policy.on_page_accessed(PageId(2));
        assert_eq!(policy.size(), 2);

        assert_eq!(policy.select_victims(1, &|_| true), ids(&[2]));
    }

    #[test]
    fn test_skips_pages_that_cannot_be_evicted() {
        let mut policy = FifoEvictionPolicy::new(0, 0);
        for id in 2..6 {
            policy.on_page_accessed(PageId(id));
        }

        let victims = policy.select_victims(4, &|id| id != PageId(3) && id != PageId(5));
        assert_eq!(victims, ids(&[2, 4]));

        // Skipped pages keep their place at the front.
        policy.on_page_accessed(PageId(9));
        assert_eq!(policy.select_victims(1, &|_| true), ids(&[3]));
        assert_eq!(policy.size(), 2);
    }
}
