//! Log manager: LSN assignment, transaction creation and durable appends.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Buf, BufMut};
use log::{debug, info};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::record::{LogRecord, Lsn};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::error::{StorageError, StorageResult};
use crate::transaction::{Transaction, TransactionIdGenerator};

/// Size of the little-endian length prefix in front of every record.
const RECORD_PREFIX: usize = 4;

#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Log file; `None` keeps the log in memory.
    pub path: Option<PathBuf>,
    /// Whether to fsync the log on every commit.
    pub sync_on_commit: bool,
}

impl Default for WalConfig {
    fn default() -> Self {
        WalConfig {
            path: None,
            sync_on_commit: true,
        }
    }
}

impl WalConfig {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        WalConfig {
            path: Some(path.into()),
            ..Default::default()
        }
    }
}

enum LogSink {
    File(File),
    Memory(Vec<u8>),
}

pub struct LogManager {
    config: WalConfig,
    current_lsn: AtomicU64,
    /// Highest LSN known to be durable.
    flushed_lsn: AtomicU64,
    sink: Mutex<LogSink>,
    id_generator: TransactionIdGenerator,
    /// Set only through [`LogManager::fail_flushes`].
    fail_flushes: AtomicBool,
}

impl LogManager {
    /// Opens the configured sink, appending to an existing log file.
    pub async fn new(config: WalConfig) -> StorageResult<Self> {
        let sink = match &config.path {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await?;
                info!("Opened log {:?}", path);
                LogSink::File(file)
            }
            None => LogSink::Memory(Vec::new()),
        };

        Ok(Self::with_sink(config, sink))
    }

    pub fn in_memory() -> Self {
        Self::with_sink(WalConfig::default(), LogSink::Memory(Vec::new()))
    }

    fn with_sink(config: WalConfig, sink: LogSink) -> Self {
        LogManager {
            config,
            current_lsn: AtomicU64::new(0),
            flushed_lsn: AtomicU64::new(0),
            sink: Mutex::new(sink),
            id_generator: TransactionIdGenerator::new(),
            fail_flushes: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &WalConfig {
        &self.config
    }

    /// Starts a transaction whose locks are taken through `pool`'s lock manager.
    pub fn create_transaction(self: &Arc<Self>, pool: &BufferPoolManager, name: &str) -> Transaction {
        let id = self.id_generator.next();
        Transaction::new(
            id,
            name,
            Arc::clone(self),
            Arc::clone(pool.lock_manager()),
        )
    }

    pub fn next_lsn(&self) -> Lsn {
        Lsn(self.current_lsn.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn current_lsn(&self) -> Lsn {
        Lsn(self.current_lsn.load(Ordering::SeqCst))
    }

    pub fn flushed_lsn(&self) -> Lsn {
        Lsn(self.flushed_lsn.load(Ordering::SeqCst))
    }

    /// Appends `records` as one contiguous run and makes them durable.
    /// Returns the highest LSN written.
    pub async fn flush(&self, records: &[LogRecord]) -> StorageResult<Lsn> {
        let mut batch = Vec::new();
        for record in records {
            let bytes = record.serialize()?;
            batch.put_u32_le(bytes.len() as u32);
            batch.extend_from_slice(&bytes);
        }

        let mut sink = self.sink.lock().await;
        if self.fail_flushes.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other("log device unavailable")));
        }

        match &mut *sink {
            LogSink::File(file) => {
                file.write_all(&batch).await?;
                file.flush().await?;
                if self.config.sync_on_commit {
                    file.sync_data().await?;
                }
            }
            LogSink::Memory(buffer) => buffer.extend_from_slice(&batch),
        }

        let last = records.iter().map(|r| r.lsn).max().unwrap_or_default();
        self.flushed_lsn.fetch_max(last.0, Ordering::SeqCst);
        debug!("Flushed {} log records up to {}", records.len(), last);
        Ok(last)
    }

    /// Bytes written so far when the log lives in memory.
    pub async fn memory_contents(&self) -> Option<Vec<u8>> {
        match &*self.sink.lock().await {
            LogSink::Memory(buffer) => Some(buffer.clone()),
            LogSink::File(_) => None,
        }
    }

    /// Fault injection for tests: makes every following flush fail, as a
    /// broken log device would. Not meant for production callers.
    #[doc(hidden)]
    pub fn fail_flushes(&self, fail: bool) {
        self.fail_flushes.store(fail, Ordering::SeqCst);
    }

    /// Decodes a sequence of length-prefixed records.
    pub fn read_records(mut bytes: &[u8]) -> StorageResult<Vec<LogRecord>> {
        let mut records = Vec::new();
        while bytes.has_remaining() {
            if bytes.remaining() < RECORD_PREFIX {
                return Err(StorageError::Serialization(
                    "truncated record length".to_string(),
                ));
            }
            let size = bytes.get_u32_le() as usize;
            if bytes.remaining() < size {
                return Err(StorageError::Serialization(format!(
                    "record of {} bytes truncated to {}",
                    size,
                    bytes.remaining()
                )));
            }
            records.push(LogRecord::deserialize(&bytes[..size])?);
            bytes.advance(size);
        }
        Ok(records)
    }

    pub async fn read_log_file(path: &Path) -> StorageResult<Vec<LogRecord>> {
        let bytes = tokio::fs::read(path).await?;
        Self::read_records(&bytes)
    }
}
