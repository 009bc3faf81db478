use std::path::{Path, PathBuf};

use log::{debug, info};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{ColumnInfo, Page, PageType};

/// The backing file of a store: whole pages at `page_size` aligned positions.
///
/// Not safe for overlapping writes to the same page; callers serialize
/// through the page's exclusive lock and the buffer pool.
pub struct PersistedStream {
    file: File,
    path: PathBuf,
    page_size: u32,
    file_size: u64,
    initialized: bool,
}

impl PersistedStream {
    /// Opens `path`. An existing file is reused (and reported as initialized)
    /// unless `create_new` is set, in which case it is replaced by a fresh file
    /// of `start_size` bytes.
    pub async fn open(
        path: impl AsRef<Path>,
        start_size: u64,
        create_new: bool,
        page_size: u32,
    ) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let exists = tokio::fs::try_exists(&path).await?;

        let (file, initialized) = if exists && !create_new {
            let file = OpenOptions::new().read(true).write(true).open(&path).await?;
            (file, true)
        } else {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)
                .await?;
            file.set_len(start_size).await?;
            (file, false)
        };

        let file_size = file.metadata().await?.len();
        if file_size % page_size as u64 != 0 {
            return Err(StorageError::Misaligned {
                position: file_size,
                page_size,
            });
        }

        info!(
            "Opened {:?} ({} bytes, initialized={})",
            path, file_size, initialized
        );

        Ok(Self {
            file,
            path,
            page_size,
            file_size,
            initialized,
        })
    }

    pub fn file_name(&self) -> &Path {
        &self.path
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn current_file_size(&self) -> u64 {
        self.file_size
    }

    /// Whether the file already existed when it was opened, or has been
    /// marked since.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    pub async fn grow(&mut self, new_size: u64) -> StorageResult<()> {
        if new_size < self.file_size {
            return Err(StorageError::InvalidArgument(format!(
                "cannot grow {} byte file to {} bytes",
                self.file_size, new_size
            )));
        }
        self.resize(new_size).await
    }

    pub async fn shrink(&mut self, new_size: u64) -> StorageResult<()> {
        if new_size > self.file_size {
            return Err(StorageError::InvalidArgument(format!(
                "cannot shrink {} byte file to {} bytes",
                self.file_size, new_size
            )));
        }
        self.resize(new_size).await
    }

    /// Writes the page image at `position` and flushes it.
    pub async fn seek_and_write(&mut self, position: u64, page: &Page) -> StorageResult<()> {
        self.check_position(position)?;
        if page.header().page_size != self.page_size {
            return Err(StorageError::InvalidArgument(format!(
                "{} has size {} but the file holds {} byte pages",
                page.page_id(),
                page.header().page_size,
                self.page_size
            )));
        }

        self.write_image(position, &page.to_bytes()).await
    }

    /// Writes an already serialized page image at `position`.
    pub async fn write_image(&mut self, position: u64, bytes: &[u8]) -> StorageResult<()> {
        self.check_position(position)?;
        if bytes.len() != self.page_size as usize {
            return Err(StorageError::InvalidArgument(format!(
                "page image of {} bytes in a file of {} byte pages",
                bytes.len(),
                self.page_size
            )));
        }

        self.file.seek(SeekFrom::Start(position)).await?;
        self.file.write_all(bytes).await?;
        self.file.flush().await?;

        let end = position + bytes.len() as u64;
        if end > self.file_size {
            self.file_size = end;
        }
        Ok(())
    }

    /// Reads and reconstructs the page stored at `position`.
    pub async fn seek_and_read(
        &mut self,
        position: u64,
        page_type: PageType,
        schema: &[ColumnInfo],
    ) -> StorageResult<Page> {
        self.check_position(position)?;
        if position + self.page_size as u64 > self.file_size {
            return Err(StorageError::InvalidArgument(format!(
                "position {} is past the end of the {} byte file",
                position, self.file_size
            )));
        }

        let mut buf = vec![0u8; self.page_size as usize];
        self.file.seek(SeekFrom::Start(position)).await?;
        self.file.read_exact(&mut buf).await?;

        Page::from_bytes(&buf, page_type, schema)
    }

    /// Flushes file contents and metadata to stable storage.
    pub async fn sync(&mut self) -> StorageResult<()> {
        self.file.sync_all().await?;
        Ok(())
    }

    async fn resize(&mut self, new_size: u64) -> StorageResult<()> {
        if new_size % self.page_size as u64 != 0 {
            return Err(StorageError::Misaligned {
                position: new_size,
                page_size: self.page_size,
            });
        }
        self.file.set_len(new_size).await?;
        debug!(
            "Resized {:?} from {} to {} bytes",
            self.path, self.file_size, new_size
        );
        self.file_size = new_size;
        Ok(())
    }

    fn check_position(&self, position: u64) -> StorageResult<()> {
        if position % self.page_size as u64 != 0 {
            return Err(StorageError::Misaligned {
                position,
                page_size: self.page_size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::{ItemPage, PageId};
    use anyhow::Result;
    use tempfile::tempdir;

    const PAGE_SIZE: u32 = 4096;

    #[tokio::test]
    async fn test_create_and_reopen() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.db");

        {
            let stream = PersistedStream::open(&path, 16 * PAGE_SIZE as u64, true, PAGE_SIZE).await?;
            assert!(!stream.is_initialized());
            assert_eq!(stream.current_file_size(), 16 * PAGE_SIZE as u64);
            assert_eq!(stream.file_name(), path.as_path());
        }

        let stream = PersistedStream::open(&path, 0, false, PAGE_SIZE).await?;
        assert!(stream.is_initialized());
        assert_eq!(stream.current_file_size(), 16 * PAGE_SIZE as u64);
        Ok(())
    }

    #[tokio::test]
    async fn test_create_new_replaces_existing() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.db");

        PersistedStream::open(&path, 8 * PAGE_SIZE as u64, true, PAGE_SIZE).await?;
        let stream = PersistedStream::open(&path, 2 * PAGE_SIZE as u64, true, PAGE_SIZE).await?;
        assert!(!stream.is_initialized());
        assert_eq!(stream.current_file_size(), 2 * PAGE_SIZE as u64);
        Ok(())
    }

    #[tokio::test]
    async fn test_write_and_read_page() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.db");
        let mut stream = PersistedStream::open(&path, 4 * PAGE_SIZE as u64, true, PAGE_SIZE).await?;

        let mut page = Page::new(PageType::Long, PAGE_SIZE, PageId(2), PageId::NULL, PageId(3), &[])?;
        if let Page::Long(inner) = &mut page {
            inner.merge(&[7, 8, 9])?;
        }

        stream.seek_and_write(2 * PAGE_SIZE as u64, &page).await?;
        let restored = stream
            .seek_and_read(2 * PAGE_SIZE as u64, PageType::Long, &[])
            .await?;

        assert_eq!(restored.header(), page.header());
        match restored {
            Page::Long(inner) => assert_eq!(inner.fetch(), vec![7, 8, 9]),
            other => panic!("unexpected page {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_read_with_wrong_type_is_corruption() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.db");
        let mut stream = PersistedStream::open(&path, 4 * PAGE_SIZE as u64, true, PAGE_SIZE).await?;

        let page = Page::new(PageType::Int, PAGE_SIZE, PageId(1), PageId::NULL, PageId::NULL, &[])?;
        stream.seek_and_write(PAGE_SIZE as u64, &page).await?;

        let err = stream
            .seek_and_read(PAGE_SIZE as u64, PageType::String, &[])
            .await
            .unwrap_err();
        assert!(err.is_corruption());
        Ok(())
    }

    #[tokio::test]
    async fn test_misaligned_positions() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.db");
        let mut stream = PersistedStream::open(&path, 4 * PAGE_SIZE as u64, true, PAGE_SIZE).await?;

        let page = Page::new(PageType::Int, PAGE_SIZE, PageId(1), PageId::NULL, PageId::NULL, &[])?;
        assert!(matches!(
            stream.seek_and_write(100, &page).await,
            Err(StorageError::Misaligned { position: 100, .. })
        ));
        assert!(matches!(
            stream.seek_and_read(PAGE_SIZE as u64 + 1, PageType::Int, &[]).await,
            Err(StorageError::Misaligned { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_read_past_end() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.db");
        let mut stream = PersistedStream::open(&path, 2 * PAGE_SIZE as u64, true, PAGE_SIZE).await?;

        let result = stream.seek_and_read(8 * PAGE_SIZE as u64, PageType::Int, &[]).await;
        assert!(matches!(result, Err(StorageError::InvalidArgument(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_grow_and_shrink() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.db");
        let mut stream = PersistedStream::open(&path, 4 * PAGE_SIZE as u64, true, PAGE_SIZE).await?;

        stream.grow(8 * PAGE_SIZE as u64).await?;
        assert_eq!(stream.current_file_size(), 8 * PAGE_SIZE as u64);
        assert!(stream.grow(2 * PAGE_SIZE as u64).await.is_err());

        stream.shrink(3 * PAGE_SIZE as u64).await?;
        assert_eq!(stream.current_file_size(), 3 * PAGE_SIZE as u64);
        assert!(stream.shrink(5 * PAGE_SIZE as u64).await.is_err());
        assert!(stream.grow(5 * PAGE_SIZE as u64 + 1).await.is_err());

        assert_eq!(tokio::fs::metadata(&path).await?.len(), 3 * PAGE_SIZE as u64);
        Ok(())
    }

    #[tokio::test]
    async fn test_mark_initialized() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.db");
        let mut stream = PersistedStream::open(&path, PAGE_SIZE as u64, true, PAGE_SIZE).await?;

        assert!(!stream.is_initialized());
        stream.mark_initialized();
        assert!(stream.is_initialized());
        Ok(())
    }
}
