//! `Blob`: the external capability for reading and writing transfer
//! payload bytes, kept separate from [`crate::keystore::KeyStore`] since
//! chunk I/O and key I/O have different durability and access patterns.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::error::{Error, Result};

/// Random-access read/write handle to one transfer's byte stream.
///
/// The receive side writes chunks by index (out of order) and `finalize()`
/// performs the atomic rename from `.partial` to its permanent name, per
/// spec §6's persistent state layout.
#[async_trait]
pub trait Blob: Send + Sync {
    async fn write_at(&self, offset: u64, data: &[u8]) -> Result<()>;
    async fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>>;
    async fn len(&self) -> Result<u64>;
    async fn finalize(&self, final_name: &str) -> Result<()>;
}

/// Filesystem-backed blob. Writes go to `<root>/<name>.partial`; `finalize`
/// renames it to `<root>/<name>`.
pub struct FileBlob {
    partial_path: PathBuf,
    final_dir: PathBuf,
}

impl FileBlob {
    pub async fn create(root: impl Into<PathBuf>, name: &str) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        let partial_path = root.join(format!("{name}.partial"));
        Ok(Self {
            partial_path,
            final_dir: root,
        })
    }

    pub async fn open_existing(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let final_dir = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::Blob("blob path has no parent directory".into()))?;
        Ok(Self {
            partial_path: path,
            final_dir,
        })
    }
}

#[async_trait]
impl Blob for FileBlob {
    async fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&self.partial_path)
            .await
            .map_err(|e| Error::Blob(e.to_string()))?;
        file.seek(std::io::SeekFrom::Start(offset)).await.map_err(|e| Error::Blob(e.to_string()))?;
        file.write_all(data).await.map_err(|e| Error::Blob(e.to_string()))?;
        Ok(())
    }

    async fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut file = OpenOptions::new()
            .read(true)
            .open(&self.partial_path)
            .await
            .map_err(|e| Error::Blob(e.to_string()))?;
        file.seek(std::io::SeekFrom::Start(offset)).await.map_err(|e| Error::Blob(e.to_string()))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).await.map_err(|e| Error::Blob(e.to_string()))?;
        Ok(buf)
    }

    async fn len(&self) -> Result<u64> {
        let meta = tokio::fs::metadata(&self.partial_path).await.map_err(|e| Error::Blob(e.to_string()))?;
        Ok(meta.len())
    }

    async fn finalize(&self, final_name: &str) -> Result<()> {
        let final_path = self.final_dir.join(final_name);
        tokio::fs::rename(&self.partial_path, &final_path)
            .await
            .map_err(|e| Error::Blob(e.to_string()))
    }
}

/// In-memory blob for tests: a sparse-enough `Vec<u8>` grown on demand.
#[derive(Default)]
pub struct MemoryBlob {
    data: RwLock<Vec<u8>>,
    finalized_as: RwLock<Option<String>>,
}

impl MemoryBlob {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

#[async_trait]
impl Blob for MemoryBlob {
    async fn write_at(&self, offset: u64, chunk: &[u8]) -> Result<()> {
        let mut data = self.data.write();
        let end = offset as usize + chunk.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[offset as usize..end].copy_from_slice(chunk);
        Ok(())
    }

    async fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let data = self.data.read();
        let start = offset as usize;
        let end = start + len;
        if end > data.len() {
            return Err(Error::Blob("read past end of blob".into()));
        }
        Ok(data[start..end].to_vec())
    }

    async fn len(&self) -> Result<u64> {
        Ok(self.data.read().len() as u64)
    }

    async fn finalize(&self, final_name: &str) -> Result<()> {
        *self.finalized_as.write() = Some(final_name.to_string());
        Ok(())
    }
}

/// Opens blob handles for incoming and outgoing transfers.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn create_incoming(&self, file_id: &str) -> Result<Arc<dyn Blob>>;
    async fn open_outgoing(&self, path: &Path) -> Result<Arc<dyn Blob>>;
}

pub struct FileBlobStore {
    incoming_root: PathBuf,
}

impl FileBlobStore {
    pub fn new(incoming_root: impl Into<PathBuf>) -> Self {
        Self {
            incoming_root: incoming_root.into(),
        }
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn create_incoming(&self, file_id: &str) -> Result<Arc<dyn Blob>> {
        let blob = FileBlob::create(self.incoming_root.clone(), file_id).await?;
        Ok(Arc::new(blob))
    }

    async fn open_outgoing(&self, path: &Path) -> Result<Arc<dyn Blob>> {
        let blob = FileBlob::open_existing(path).await?;
        Ok(Arc::new(blob))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_blob_supports_out_of_order_writes() {
        let blob = MemoryBlob::new();
        blob.write_at(480, b"second").await.unwrap();
        blob.write_at(0, b"first!!!").await.unwrap();
        assert_eq!(blob.read_at(0, 8).await.unwrap(), b"first!!!");
        assert_eq!(blob.read_at(480, 6).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn file_blob_finalize_renames() {
        let dir = tempfile::tempdir().unwrap();
        let blob = FileBlob::create(dir.path(), "abc").await.unwrap();
        blob.write_at(0, b"hello").await.unwrap();
        blob.finalize("abc.bin").await.unwrap();
        assert!(dir.path().join("abc.bin").exists());
        assert!(!dir.path().join("abc.partial").exists());
    }
}
