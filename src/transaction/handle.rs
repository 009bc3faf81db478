//! The transaction handle.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;
use thiserror::Error;

use super::id::TransactionId;
use super::state::TransactionState;
use crate::concurrency::lock::{LockGuard, LockManager, LockMode};
use crate::storage::error::StorageResult;
use crate::storage::page::PageId;
use crate::storage::wal::{LogManager, LogPayload, LogRecord, Lsn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransactionError {
    #[error("Transaction {id} is not active (state: {state})")]
    NotActive {
        id: TransactionId,
        state: TransactionState,
    },

    #[error("Transaction {id} could not make its log durable: {reason}")]
    Durability { id: TransactionId, reason: String },

    #[error("Transaction {id} holds a shared lock on the stripe of {page_id} and cannot upgrade it")]
    LockUpgrade { id: TransactionId, page_id: PageId },
}

struct TransactionInner {
    state: TransactionState,
    /// Set once commit or abort has started.
    finishing: bool,
    /// Long-lived locks keyed by stripe, released on commit or drop.
    locks: HashMap<usize, LockGuard>,
    log: Vec<LogRecord>,
    last_lsn: Lsn,
}

/// A unit of work holding page locks until it commits or is dropped.
///
/// Locks are tracked per stripe: asking again for a mode already covered by
/// a held stripe is a no-op, asking for exclusive on a stripe held shared is
/// a [`TransactionError::LockUpgrade`].
pub struct Transaction {
    id: TransactionId,
    name: String,
    log_manager: Arc<LogManager>,
    lock_manager: Arc<LockManager>,
    inner: Mutex<TransactionInner>,
}

impl Transaction {
    pub(crate) fn new(
        id: TransactionId,
        name: &str,
        log_manager: Arc<LogManager>,
        lock_manager: Arc<LockManager>,
    ) -> Self {
        let transaction = Transaction {
            id,
            name: name.to_string(),
            log_manager,
            lock_manager,
            inner: Mutex::new(TransactionInner {
                state: TransactionState::Active,
                finishing: false,
                locks: HashMap::new(),
                log: Vec::new(),
                last_lsn: Lsn::INVALID,
            }),
        };
        transaction.log(LogPayload::Begin {
            name: name.to_string(),
        });
        debug!("{} '{}' started", id, name);
        transaction
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TransactionState {
        self.inner.lock().state
    }

    /// Pages whose stripes this transaction holds, with the mode held.
    pub fn held_locks(&self) -> Vec<(PageId, LockMode)> {
        let inner = self.inner.lock();
        let mut held: Vec<_> = inner
            .locks
            .values()
            .map(|guard| (guard.page_id(), guard.mode()))
            .collect();
        held.sort();
        held
    }

    /// Records buffered but not yet handed to the log manager.
    pub fn pending_log_records(&self) -> usize {
        self.inner.lock().log.len()
    }

    /// Acquires `mode` on `page_id` and keeps it until commit or drop.
    pub async fn acquire_lock(&self, page_id: PageId, mode: LockMode) -> StorageResult<()> {
        if let Some(guard) = self.acquire_scoped_lock(page_id, mode).await? {
            self.retain_lock(guard);
        }
        Ok(())
    }

    /// Acquires `mode` on `page_id` for the caller's scope only.
    ///
    /// Returns `None` when the transaction already holds the stripe in a mode
    /// that covers the request.
    pub async fn acquire_scoped_lock(
        &self,
        page_id: PageId,
        mode: LockMode,
    ) -> StorageResult<Option<LockGuard>> {
        let stripe = self.lock_manager.lock_id_for_page(page_id);
        {
            let inner = self.inner.lock();
            self.check_active(&inner)?;
            if let Some(held) = inner.locks.get(&stripe) {
                if held.mode().covers(mode) {
                    return Ok(None);
                }
                return Err(TransactionError::LockUpgrade {
                    id: self.id,
                    page_id,
                }
                .into());
            }
        }

        let guard = self
            .lock_manager
            .acquire_lock(mode, page_id, self.id.value())
            .await;
        Ok(Some(guard))
    }

    /// Moves a scoped lock into the transaction's long-lived set.
    pub fn retain_lock(&self, guard: LockGuard) {
        let mut inner = self.inner.lock();
        inner.locks.entry(guard.stripe()).or_insert(guard);
    }

    /// Appends a record to the private log buffer.
    pub fn log(&self, payload: LogPayload) -> Lsn {
        let lsn = self.log_manager.next_lsn();
        let mut inner = self.inner.lock();
        let record = LogRecord::new(lsn, inner.last_lsn, self.id.value(), payload);
        inner.last_lsn = lsn;
        inner.log.push(record);
        lsn
    }

    /// Makes the log durable, releases every lock and ends `Committed`.
    ///
    /// When the log cannot be flushed the transaction ends `Aborted` and a
    /// [`TransactionError::Durability`] is returned.
    pub async fn commit(&self) -> StorageResult<()> {
        let records = {
            let mut inner = self.inner.lock();
            self.check_active(&inner)?;
            inner.finishing = true;
            drop(inner);

            self.log(LogPayload::Commit);
            let mut inner = self.inner.lock();
            std::mem::take(&mut inner.log)
        };

        match self.log_manager.flush(&records).await {
            Ok(lsn) => {
                let released = self.finish(TransactionState::Committed);
                info!("{} committed at {} ({} locks released)", self.id, lsn, released);
                Ok(())
            }
            Err(e) => {
                self.finish(TransactionState::Aborted);
                warn!("{} aborted, log flush failed: {}", self.id, e);
                Err(TransactionError::Durability {
                    id: self.id,
                    reason: e.to_string(),
                }
                .into())
            }
        }
    }

    /// Logs an abort marker, releases every lock and ends `Aborted`.
    /// Page changes already made are not undone.
    pub async fn abort(&self) -> StorageResult<()> {
        let records = {
            let mut inner = self.inner.lock();
            self.check_active(&inner)?;
            inner.finishing = true;
            drop(inner);

            self.log(LogPayload::Abort);
            let mut inner = self.inner.lock();
            std::mem::take(&mut inner.log)
        };

        if let Err(e) = self.log_manager.flush(&records).await {
            warn!("{} could not log its abort: {}", self.id, e);
        }
        let released = self.finish(TransactionState::Aborted);
        info!("{} aborted ({} locks released)", self.id, released);
        Ok(())
    }

    fn check_active(&self, inner: &TransactionInner) -> Result<(), TransactionError> {
        if !inner.state.is_active() || inner.finishing {
            return Err(TransactionError::NotActive {
                id: self.id,
                state: inner.state,
            });
        }
        Ok(())
    }

    /// Moves to `state` and drops every held lock outside the state mutex.
    fn finish(&self, state: TransactionState) -> usize {
        let locks = {
            let mut inner = self.inner.lock();
            inner.state = state;
            inner.log.clear();
            std::mem::take(&mut inner.locks)
        };
        let count = locks.len();
        drop(locks);
        count
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.state.is_active() {
            inner.state = TransactionState::Aborted;
            inner.locks.clear();
            debug!("{} '{}' dropped while active, locks released", self.id, self.name);
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
