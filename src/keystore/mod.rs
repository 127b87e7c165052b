//! `KeyStore`: the external capability an integrator provides for durable
//! key material. The engine never decides how keys are persisted — it only
//! calls `load`/`save`/`delete`/`list` against whatever the host gives it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::RwLock;

use crate::error::{Error, Result};

/// Storage contract for key material, implemented by the host application.
///
/// Implementations are free to back this with the filesystem, a platform
/// keychain, or an HSM; the engine treats keys as opaque named byte blobs.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn load(&self, key_id: &str) -> Result<Option<Vec<u8>>>;
    async fn save(&self, key_id: &str, key_material: &[u8]) -> Result<()>;
    async fn delete(&self, key_id: &str) -> Result<()>;
    async fn list(&self) -> Result<Vec<String>>;
}

/// Filesystem-backed `KeyStore` for native deployments.
///
/// Each key is written as its own file under `root`, with owner-only
/// permissions on Unix. No at-rest encryption is applied here — the
/// specification leaves that to the host, which typically has access to a
/// platform-level secret store.
pub struct FileKeyStore {
    root: PathBuf,
}

impl FileKeyStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(Error::Io)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            std::fs::set_permissions(&root, perms).map_err(Error::Io)?;
        }
        Ok(Self { root })
    }

    fn path_for(&self, key_id: &str) -> Result<PathBuf> {
        if key_id.is_empty() || key_id.contains(['/', '\\', '\0']) {
            return Err(Error::KeyStore(format!("invalid key id: {key_id}")));
        }
        Ok(self.root.join(key_id))
    }
}

#[async_trait]
impl KeyStore for FileKeyStore {
    async fn load(&self, key_id: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key_id)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn save(&self, key_id: &str, key_material: &[u8]) -> Result<()> {
        let path = self.path_for(key_id)?;
        std::fs::write(&path, key_material).map_err(Error::Io)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&path, perms).map_err(Error::Io)?;
        }
        Ok(())
    }

    async fn delete(&self, key_id: &str) -> Result<()> {
        let path = self.path_for(key_id)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root).map_err(Error::Io)? {
            let entry = entry.map_err(Error::Io)?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }
}

/// In-memory `KeyStore`, primarily for tests.
#[derive(Default)]
pub struct MemoryKeyStore {
    inner: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn load(&self, key_id: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.read().get(key_id).cloned())
    }

    async fn save(&self, key_id: &str, key_material: &[u8]) -> Result<()> {
        self.inner
            .write()
            .insert(key_id.to_string(), key_material.to_vec());
        Ok(())
    }

    async fn delete(&self, key_id: &str) -> Result<()> {
        self.inner.write().remove(key_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.inner.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemoryKeyStore::new();
        store.save("identity", b"secret").await.unwrap();
        assert_eq!(store.load("identity").await.unwrap(), Some(b"secret".to_vec()));
        assert_eq!(store.list().await.unwrap(), vec!["identity".to_string()]);
        store.delete("identity").await.unwrap();
        assert_eq!(store.load("identity").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new(dir.path()).unwrap();
        store.save("id", b"material").await.unwrap();
        assert_eq!(store.load("id").await.unwrap(), Some(b"material".to_vec()));
        assert!(store.list().await.unwrap().contains(&"id".to_string()));
        store.delete("id").await.unwrap();
        assert_eq!(store.load("id").await.unwrap(), None);
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new(dir.path()).unwrap();
        assert!(store.save("../evil", b"x").await.is_err());
    }
}
