//! Striped page locks.
//!
//! A fixed array of asynchronous reader/writer locks; page ids are mapped to
//! a stripe by `page_id % stripe_count`. Distinct pages may share a stripe,
//! which only adds serialization. Acquisition suspends the calling task and
//! returns a [`LockGuard`] that releases exactly that acquisition on drop.
//! The locks are not reentrant: an owner asking again for an exclusive
//! stripe it already holds waits on itself.

use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::config::StorageConfig;
use crate::storage::page::PageId;

/// Lock modes supported by the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockMode {
    /// Shared lock for read operations.
    Shared,
    /// Exclusive lock for write operations.
    Exclusive,
}

impl LockMode {
    /// Checks if this lock mode is compatible with another.
    pub fn is_compatible_with(&self, other: &LockMode) -> bool {
        matches!((self, other), (LockMode::Shared, LockMode::Shared))
    }

    /// Whether holding `self` already grants `other`.
    pub fn covers(&self, other: LockMode) -> bool {
        *self >= other
    }
}

/// Who currently holds a stripe, kept for diagnostics and eviction checks.
#[derive(Debug, Default)]
struct Holders {
    exclusive: Option<u64>,
    shared: usize,
}

#[derive(Debug)]
struct LockStripe {
    id: usize,
    lock: Arc<RwLock<()>>,
    holders: Mutex<Holders>,
}

enum HeldLock {
    Shared(#[allow(dead_code)] OwnedRwLockReadGuard<()>),
    Exclusive(#[allow(dead_code)] OwnedRwLockWriteGuard<()>),
}

/// Releases its stripe when dropped.
pub struct LockGuard {
    stripe: Arc<LockStripe>,
    page_id: PageId,
    mode: LockMode,
    owner: u64,
    held: Option<HeldLock>,
}

impl LockGuard {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn owner(&self) -> u64 {
        self.owner
    }

    pub fn stripe(&self) -> usize {
        self.stripe.id
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("page_id", &self.page_id)
            .field("mode", &self.mode)
            .field("owner", &self.owner)
            .field("stripe", &self.stripe.id)
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Release the primitive first so the holder record never claims less
        // than is actually held.
        drop(self.held.take());

        let mut holders = self.stripe.holders.lock();
        match self.mode {
            LockMode::Shared => holders.shared = holders.shared.saturating_sub(1),
            LockMode::Exclusive => holders.exclusive = None,
        }
    }
}

pub struct LockManager {
    stripes: Vec<Arc<LockStripe>>,
}

impl LockManager {
    pub fn new(stripe_count: usize) -> Self {
        let stripes = (0..stripe_count.max(1))
            .map(|id| {
                Arc::new(LockStripe {
                    id,
                    lock: Arc::new(RwLock::new(())),
                    holders: Mutex::new(Holders::default()),
                })
            })
            .collect();

        Self { stripes }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.lock_stripes)
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    pub fn lock_id_for_page(&self, page_id: PageId) -> usize {
        (page_id.0 % self.stripes.len() as u64) as usize
    }

    /// Waits until `mode` is grantable on the page's stripe.
    pub async fn acquire_lock(&self, mode: LockMode, page_id: PageId, owner: u64) -> LockGuard {
        let stripe = Arc::clone(&self.stripes[self.lock_id_for_page(page_id)]);

        let held = match mode {
            LockMode::Shared => {
                let guard = match Arc::clone(&stripe.lock).try_read_owned() {
                    Ok(guard) => guard,
                    Err(_) => {
                        debug!(
                            "Owner {} waiting for shared lock on {} (stripe {})",
                            owner, page_id, stripe.id
                        );
                        Arc::clone(&stripe.lock).read_owned().await
                    }
                };
                stripe.holders.lock().shared += 1;
                HeldLock::Shared(guard)
            }
            LockMode::Exclusive => {
                let guard = match Arc::clone(&stripe.lock).try_write_owned() {
                    Ok(guard) => guard,
                    Err(_) => {
                        debug!(
                            "Owner {} waiting for exclusive lock on {} (stripe {})",
                            owner, page_id, stripe.id
                        );
                        Arc::clone(&stripe.lock).write_owned().await
                    }
                };
                stripe.holders.lock().exclusive = Some(owner);
                HeldLock::Exclusive(guard)
            }
        };

        LockGuard {
            stripe,
            page_id,
            mode,
            owner,
            held: Some(held),
        }
    }

    /// Whether some owner holds the page's stripe in exclusive mode.
    pub fn is_exclusively_locked(&self, page_id: PageId) -> bool {
        self.exclusive_owner(page_id).is_some()
    }

    pub fn exclusive_owner(&self, page_id: PageId) -> Option<u64> {
        self.stripes[self.lock_id_for_page(page_id)].holders.lock().exclusive
    }

    pub fn shared_holders(&self, page_id: PageId) -> usize {
        self.stripes[self.lock_id_for_page(page_id)].holders.lock().shared
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::from_config(&StorageConfig::default())
    }
}
