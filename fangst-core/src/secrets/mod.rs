//! Opaque secret storage for key material.
//!
//! The CA private key never touches disk in plaintext outside a
//! [`SecretStore`] backend. The interface is a minimal put/get/delete over
//! byte blobs; callers own serialization (PEM in practice) and backends own
//! at-rest protection.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum SecretError {
    #[error("secret '{0}' not found")]
    NotFound(String),
    #[error("invalid secret key id '{0}'")]
    InvalidKeyId(String),
    #[error("refusing to use symlinked secret path: {0}")]
    SymlinkRefused(PathBuf),
    #[error("secret store unavailable: {0}")]
    Unavailable(String),
    #[error("secret store i/o failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Backend-agnostic secret storage.
pub trait SecretStore: Send + Sync {
    fn put(&self, key_id: &str, secret: &[u8]) -> Result<(), SecretError>;
    fn get(&self, key_id: &str) -> Result<Vec<u8>, SecretError>;
    fn delete(&self, key_id: &str) -> Result<(), SecretError>;

    /// Round-trips a throwaway secret to prove the backend is usable.
    /// Components holding key material call this before startup completes
    /// so an unreachable backend fails fast instead of at first use.
    fn probe(&self) -> Result<(), SecretError> {
        let key_id = "fangst-store-probe";
        self.put(key_id, b"probe")?;
        let read = self.get(key_id)?;
        self.delete(key_id)?;
        if read != b"probe" {
            return Err(SecretError::Unavailable(
                "probe secret read back corrupted".into(),
            ));
        }
        Ok(())
    }
}

fn validate_key_id(key_id: &str) -> Result<(), SecretError> {
    let ok = !key_id.is_empty()
        && key_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if ok {
        Ok(())
    } else {
        Err(SecretError::InvalidKeyId(key_id.to_string()))
    }
}

/// Stores each secret as `<dir>/<key_id>.secret`, mode 0o600, refusing to
/// write through symlinks.
pub struct FileSecretStore {
    dir: PathBuf,
}

impl FileSecretStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SecretError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| SecretError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    fn secret_path(&self, key_id: &str) -> Result<PathBuf, SecretError> {
        validate_key_id(key_id)?;
        Ok(self.dir.join(format!("{key_id}.secret")))
    }

    fn ensure_not_symlink(path: &Path) -> Result<(), SecretError> {
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_symlink() => {
                Err(SecretError::SymlinkRefused(path.to_path_buf()))
            }
            _ => Ok(()),
        }
    }
}

impl SecretStore for FileSecretStore {
    fn put(&self, key_id: &str, secret: &[u8]) -> Result<(), SecretError> {
        let path = self.secret_path(key_id)?;
        Self::ensure_not_symlink(&path)?;
        let io = |source| SecretError::Io {
            path: path.clone(),
            source,
        };
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&path).map_err(io)?;
        file.write_all(secret).map_err(io)?;
        file.sync_all().map_err(io)?;
        debug!(key_id, path = %path.display(), "Secret stored");
        Ok(())
    }

    fn get(&self, key_id: &str) -> Result<Vec<u8>, SecretError> {
        let path = self.secret_path(key_id)?;
        Self::ensure_not_symlink(&path)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                Err(SecretError::NotFound(key_id.to_string()))
            }
            Err(source) => Err(SecretError::Io { path, source }),
        }
    }

    fn delete(&self, key_id: &str) -> Result<(), SecretError> {
        let path = self.secret_path(key_id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                Err(SecretError::NotFound(key_id.to_string()))
            }
            Err(source) => Err(SecretError::Io { path, source }),
        }
    }
}

/// In-memory backend for tests and ephemeral runs.
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemorySecretStore {
    fn put(&self, key_id: &str, secret: &[u8]) -> Result<(), SecretError> {
        validate_key_id(key_id)?;
        self.secrets
            .lock()
            .insert(key_id.to_string(), secret.to_vec());
        Ok(())
    }

    fn get(&self, key_id: &str) -> Result<Vec<u8>, SecretError> {
        validate_key_id(key_id)?;
        self.secrets
            .lock()
            .get(key_id)
            .cloned()
            .ok_or_else(|| SecretError::NotFound(key_id.to_string()))
    }

    fn delete(&self, key_id: &str) -> Result<(), SecretError> {
        validate_key_id(key_id)?;
        self.secrets
            .lock()
            .remove(key_id)
            .map(|_| ())
            .ok_or_else(|| SecretError::NotFound(key_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_roundtrip_and_probe() {
        let store = MemorySecretStore::new();
        store.probe().unwrap();
        store.put("ca-key", b"pem bytes").unwrap();
        assert_eq!(store.get("ca-key").unwrap(), b"pem bytes");
        store.delete("ca-key").unwrap();
        assert!(matches!(
            store.get("ca-key"),
            Err(SecretError::NotFound(_))
        ));
    }

    #[test]
    fn file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::new(dir.path()).unwrap();
        store.probe().unwrap();
        store.put("ca-key", b"secret").unwrap();
        assert_eq!(store.get("ca-key").unwrap(), b"secret");
        store.delete("ca-key").unwrap();
        assert!(matches!(store.get("ca-key"), Err(SecretError::NotFound(_))));
    }

    #[cfg(unix)]
    #[test]
    fn file_store_sets_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::new(dir.path()).unwrap();
        store.put("ca-key", b"secret").unwrap();
        let mode = std::fs::metadata(dir.path().join("ca-key.secret"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn file_store_refuses_symlinked_path() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        std::fs::write(&target, b"x").unwrap();
        let store = FileSecretStore::new(dir.path()).unwrap();
        std::os::unix::fs::symlink(&target, dir.path().join("ca-key.secret")).unwrap();
        assert!(matches!(
            store.put("ca-key", b"secret"),
            Err(SecretError::SymlinkRefused(_))
        ));
    }

    #[test]
    fn rejects_path_traversal_key_ids() {
        let store = MemorySecretStore::new();
        assert!(matches!(
            store.put("../escape", b"x"),
            Err(SecretError::InvalidKeyId(_))
        ));
        assert!(matches!(store.put("", b"x"), Err(SecretError::InvalidKeyId(_))));
    }
}
