use std::{
    io::Write,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use log::debug;
use tokio::fs;

use super::{Cache, validate_key};
use crate::error::CacheError;

/// Stores every cache entry as one file inside a directory
#[derive(Debug, Clone)]
pub struct DirCache {
    root: PathBuf,
}

impl DirCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, CacheError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

/// Private keys and account credentials must only be readable by the owner
fn is_secret(key: &str) -> bool {
    key.ends_with(".key") || key.ends_with(".account.json")
}

/// Write `data` to a uniquely named temp file next to `path`, then move it into place, so
/// readers never see a partial entry and concurrent writers never share a temp file
fn write_atomic(root: &Path, path: &Path, data: &[u8], secret: bool) -> std::io::Result<()> {
    let mut temp = tempfile::Builder::new().prefix(".tmp-").tempfile_in(root)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = if secret { 0o600 } else { 0o644 };
        std::fs::set_permissions(temp.path(), std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = secret;

    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl Cache for DirCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.path_for(key)?;

        match fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(CacheError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        let path = self.path_for(key)?;
        let io_err = |source| CacheError::Io {
            key: key.to_string(),
            source,
        };

        fs::create_dir_all(&self.root).await.map_err(io_err)?;

        let root = self.root.clone();
        let data = value.to_vec();
        let secret = is_secret(key);
        tokio::task::spawn_blocking(move || write_atomic(&root, &path, &data, secret))
            .await
            .map_err(|e| io_err(std::io::Error::other(e)))?
            .map_err(io_err)?;

        #[cfg(windows)]
        {
            if secret {
                log::warn!("Private key permissions not restricted on Windows for cache entry `{key}`");
            }
        }

        debug!("Stored cache entry `{key}` ({} bytes)", value.len());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let path = self.path_for(key)?;

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CacheError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }
}
