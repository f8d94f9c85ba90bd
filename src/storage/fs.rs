//! Local file-system blob storage
//!
//! Blobs live under a root directory and are addressed by `file://` URLs.
//! Every write is staged in a hidden sibling file and renamed into place. The
//! staged file is removed when the write fails or is abandoned.

use crate::storage::traits::{BlobStorage, ByteStream, StorageError, StorageResult};
use async_trait::async_trait;
use futures::StreamExt;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use url::Url;

/// Blob storage rooted at a local directory
#[derive(Debug, Clone)]
pub struct FileSystemStorage {
    root: PathBuf,
}

impl FileSystemStorage {
    /// Opens (and creates if needed) a storage root
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        std::fs::create_dir_all(root.as_ref())?;
        let root = root.as_ref().canonicalize()?;
        Ok(Self { root })
    }

    /// Root directory of this storage
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn to_path(&self, location: &Url) -> StorageResult<PathBuf> {
        let path = location
            .to_file_path()
            .map_err(|_| StorageError::InvalidLocation(location.to_string()))?;
        if !path.starts_with(&self.root) {
            return Err(StorageError::InvalidLocation(format!(
                "{} is outside {}",
                location,
                self.root.display()
            )));
        }
        Ok(path)
    }

    /// Creates the staging file next to `path`; it is deleted on drop
    async fn stage(path: &Path) -> StorageResult<NamedTempFile> {
        let parent = path
            .parent()
            .ok_or_else(|| StorageError::InvalidLocation(path.display().to_string()))?;
        tokio::fs::create_dir_all(parent).await?;
        let mut builder = tempfile::Builder::new();
        builder.prefix(".").suffix(".partial");
        // Published blobs are world-readable, like a plain create
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            builder.permissions(std::fs::Permissions::from_mode(0o644));
        }
        Ok(builder.tempfile_in(parent)?)
    }

    async fn write_staged(staged: &NamedTempFile, mut content: ByteStream) -> StorageResult<()> {
        let mut file = tokio::fs::File::from_std(staged.reopen()?);
        while let Some(chunk) = content.next().await {
            let chunk = chunk.map_err(StorageError::Source)?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }

    fn commit(staged: NamedTempFile, path: &Path) -> StorageResult<()> {
        staged.persist(path).map_err(|e| StorageError::Io(e.error))?;
        Ok(())
    }
}

#[async_trait]
impl BlobStorage for FileSystemStorage {
    fn resolve(&self, path: &str) -> StorageResult<Url> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidLocation(path.to_string()));
        }
        Url::from_file_path(self.root.join(relative))
            .map_err(|_| StorageError::InvalidLocation(path.to_string()))
    }

    async fn open_read(&self, location: &Url) -> StorageResult<ByteStream> {
        let path = self.to_path(location)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(ReaderStream::new(file).boxed()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(location.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_stream(&self, location: &Url, content: ByteStream) -> StorageResult<()> {
        let path = self.to_path(location)?;
        let staged = Self::stage(&path).await?;
        Self::write_staged(&staged, content).await?;
        Self::commit(staged, &path)?;

        tracing::trace!("Wrote {}", path.display());
        Ok(())
    }

    async fn copy(&self, source: &Url, destination: &Url) -> StorageResult<()> {
        let source_path = self.to_path(source)?;
        let destination_path = self.to_path(destination)?;
        let staged = Self::stage(&destination_path).await?;

        match tokio::fs::copy(&source_path, staged.path()).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(source.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
        Self::commit(staged, &destination_path)
    }

    async fn delete(&self, location: &Url) -> StorageResult<()> {
        let path = self.to_path(location)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, location: &Url) -> StorageResult<bool> {
        let path = self.to_path(location)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
