use crate::services::upload_service::types::UploadError;
use crate::utils::validation::resolve_destination;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use uuid::Uuid;

/// Suffix of the hidden files a sink writes to before it commits.
pub const STAGING_SUFFIX: &str = ".part";

/// Append-only destination for one file.
///
/// Nothing is visible under the destination name until `commit` returns.
/// Dropping a sink without committing discards whatever was written.
#[async_trait]
pub trait StorageSink: Send {
    async fn write(&mut self, chunk: &[u8]) -> Result<(), UploadError>;

    /// Flush, sync, and publish the file. Returns its final path.
    async fn commit(self: Box<Self>) -> Result<PathBuf, UploadError>;
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn open(
        &self,
        destination_root: &Path,
        filename: &str,
    ) -> Result<Box<dyn StorageSink>, UploadError>;

    async fn remove(&self, destination: &Path) -> Result<(), UploadError>;
}

/// Local filesystem storage.
#[derive(Debug, Default, Clone)]
pub struct LocalStorage;

impl LocalStorage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    async fn open(
        &self,
        destination_root: &Path,
        filename: &str,
    ) -> Result<Box<dyn StorageSink>, UploadError> {
        let destination = resolve_destination(destination_root, filename)?;
        let staging_path =
            destination_root.join(format!(".{}{}", Uuid::new_v4(), STAGING_SUFFIX));

        let file = File::create(&staging_path)
            .await
            .map_err(|e| UploadError::io_write(&destination, e))?;

        tracing::debug!(
            "Staging {} at {}",
            destination.display(),
            staging_path.display()
        );

        Ok(Box::new(LocalFileSink {
            writer: BufWriter::new(file),
            staging_path,
            destination,
            committed: false,
        }))
    }

    async fn remove(&self, destination: &Path) -> Result<(), UploadError> {
        match tokio::fs::remove_file(destination).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(UploadError::io_write(destination, e)),
        }
    }
}

pub struct LocalFileSink {
    writer: BufWriter<File>,
    staging_path: PathBuf,
    destination: PathBuf,
    committed: bool,
}

#[async_trait]
impl StorageSink for LocalFileSink {
    async fn write(&mut self, chunk: &[u8]) -> Result<(), UploadError> {
        self.writer
            .write_all(chunk)
            .await
            .map_err(|e| UploadError::io_write(&self.destination, e))
    }

    async fn commit(mut self: Box<Self>) -> Result<PathBuf, UploadError> {
        self.writer
            .flush()
            .await
            .map_err(|e| UploadError::io_write(&self.destination, e))?;
        self.writer
            .get_ref()
            .sync_all()
            .await
            .map_err(|e| UploadError::io_write(&self.destination, e))?;

        std::fs::rename(&self.staging_path, &self.destination)
            .map_err(|e| UploadError::io_write(&self.destination, e))?;
        self.committed = true;

        Ok(self.destination.clone())
    }
}

impl Drop for LocalFileSink {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match std::fs::remove_file(&self.staging_path) {
            Ok(()) => tracing::info!(
                "Discarded partial upload for {}",
                self.destination.display()
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "Failed to remove staging file {}: {}",
                self.staging_path.display(),
                e
            ),
        }
    }
}
