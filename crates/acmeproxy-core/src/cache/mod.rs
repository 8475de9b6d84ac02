// Key/value storage used to persist certificates, keys and lock sentinels

pub mod dir;
pub mod memory;

use async_trait::async_trait;

use crate::error::CacheError;

pub use dir::DirCache;
pub use memory::MemoryCache;

#[async_trait]
pub trait Cache: Send + Sync {
    /// Read the value stored under `key`, `None` if it does not exist
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store `value` under `key`, replacing any previous value
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), CacheError>;

    /// Remove `key`; removing a missing key is not an error
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Validate that a cache key can't escape the storage root
pub fn validate_key(key: &str) -> Result<(), CacheError> {
    if key.contains("..") || key.contains('/') || key.contains('\\') || key.contains('\0') {
        return Err(CacheError::InvalidKey {
            key: key.to_string(),
            message: "contains path traversal characters".to_string(),
        });
    }

    if key.trim().is_empty() {
        return Err(CacheError::InvalidKey {
            key: key.to_string(),
            message: "empty or whitespace-only".to_string(),
        });
    }

    Ok(())
}
