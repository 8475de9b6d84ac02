use std::time::Duration;

use acmeproxy::cache::{Cache, DirCache, MemoryCache, validate_key};
use acmeproxy::error::CacheError;
use tempfile::TempDir;

#[test]
fn test_validate_key() {
    assert!(validate_key("example.com.ecdsa.cer").is_ok());
    assert!(validate_key("example.com.lock").is_ok());
    assert!(validate_key("../etc/passwd").is_err());
    assert!(validate_key("certs/example.com").is_err());
    assert!(validate_key("certs\\example.com").is_err());
    assert!(validate_key("").is_err());
    assert!(validate_key("   ").is_err());
}

#[tokio::test]
async fn test_dir_cache_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let cache = DirCache::new(temp_dir.path().join("certificates"));

    assert_eq!(cache.get("example.com.ecdsa.cer").await.unwrap(), None);

    cache.put("example.com.ecdsa.cer", b"chain").await.unwrap();
    assert_eq!(
        cache.get("example.com.ecdsa.cer").await.unwrap(),
        Some(b"chain".to_vec())
    );

    cache.put("example.com.ecdsa.cer", b"renewed").await.unwrap();
    assert_eq!(
        cache.get("example.com.ecdsa.cer").await.unwrap(),
        Some(b"renewed".to_vec())
    );

    cache.delete("example.com.ecdsa.cer").await.unwrap();
    assert_eq!(cache.get("example.com.ecdsa.cer").await.unwrap(), None);
}

#[tokio::test]
async fn test_dir_cache_delete_missing_key() {
    let temp_dir = TempDir::new().unwrap();
    let cache = DirCache::new(temp_dir.path());
    assert!(cache.delete("missing.lock").await.is_ok());
}

#[tokio::test]
async fn test_dir_cache_rejects_traversal() {
    let temp_dir = TempDir::new().unwrap();
    let cache = DirCache::new(temp_dir.path());

    let err = cache.put("../escape.key", b"secret").await.unwrap_err();
    assert!(matches!(err, CacheError::InvalidKey { .. }));
    assert!(!temp_dir.path().parent().unwrap().join("escape.key").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_dir_cache_keys_are_private() {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = TempDir::new().unwrap();
    let cache = DirCache::new(temp_dir.path());
    let mode = |name: &str| {
        std::fs::metadata(temp_dir.path().join(name))
            .unwrap()
            .permissions()
            .mode()
            & 0o777
    };

    cache.put("example.com.ecdsa.key", b"key").await.unwrap();
    cache.put("ca.test.account.json", b"{}").await.unwrap();
    cache.put("example.com.ecdsa.cer", b"chain").await.unwrap();

    assert_eq!(mode("example.com.ecdsa.key"), 0o600);
    assert_eq!(mode("ca.test.account.json"), 0o600);
    assert_eq!(mode("example.com.ecdsa.cer"), 0o644);
}

#[tokio::test]
async fn test_dir_cache_concurrent_writers_of_one_key() {
    let temp_dir = TempDir::new().unwrap();
    let cache = DirCache::new(temp_dir.path());

    let values: Vec<Vec<u8>> = (0..16u8).map(|i| vec![i; 64 * 1024]).collect();
    let mut writers = Vec::new();
    for value in values.clone() {
        let cache = cache.clone();
        writers.push(tokio::spawn(async move {
            cache.put("example.com.ecdsa.cer", &value).await
        }));
    }
    for writer in writers {
        writer.await.unwrap().unwrap();
    }

    let stored = cache.get("example.com.ecdsa.cer").await.unwrap().unwrap();
    assert!(values.contains(&stored), "the entry is one complete write");

    let entries: Vec<_> = std::fs::read_dir(temp_dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(entries, vec![std::ffi::OsString::from("example.com.ecdsa.cer")]);
}

#[tokio::test]
async fn test_memory_cache_round_trip() {
    let cache = MemoryCache::new();
    assert!(cache.is_empty());

    cache.put("a.lock", b"").await.unwrap();
    assert_eq!(cache.get("a.lock").await.unwrap(), Some(Vec::new()));
    assert_eq!(cache.len(), 1);

    cache.delete("a.lock").await.unwrap();
    assert!(cache.get("a.lock").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_memory_cache_recent_reads_survive_eviction() {
    let cache = MemoryCache::with_idle_eviction(Duration::from_secs(60), Duration::from_secs(10));
    cache.put("hot", b"1").await.unwrap();
    cache.put("cold", b"2").await.unwrap();

    for _ in 0..8 {
        tokio::time::sleep(Duration::from_secs(10)).await;
        cache.get("hot").await.unwrap();
    }

    assert!(cache.get("hot").await.unwrap().is_some());
    assert!(cache.get("cold").await.unwrap().is_none());
}
