// Content-addressed disk cache for expensive lookups.
//
// Entries are keyed by a SHA-256 digest of `(key, version, args)` and
// carry a write timestamp. Staleness is checked at read time only; there
// is no background sweep. Any unreadable or corrupt entry degrades to a
// miss, never to an error.

use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::warn;

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    /// Unix seconds at write time.
    timestamp: u64,
    value: Value,
}

#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DiskCache { dir: dir.into() }
    }

    /// Fetch a cached value. `ttl_minutes = None` means entries never
    /// expire once present.
    pub fn get(
        &self,
        key: &str,
        version: &str,
        args: &[Value],
        ttl_minutes: Option<u64>,
    ) -> Option<Value> {
        let path = self.entry_path(key, version, args);
        let content = fs::read_to_string(&path).ok()?;
        let entry: CacheEntry = serde_json::from_str(&content).ok()?;
        if let Some(ttl) = ttl_minutes {
            let age_secs = unix_now().saturating_sub(entry.timestamp);
            if age_secs > ttl * 60 {
                return None;
            }
        }
        Some(entry.value)
    }

    pub fn set(&self, key: &str, version: &str, args: &[Value], value: Value) {
        if let Err(e) = fs::create_dir_all(&self.dir) {
            warn!("failed to create cache directory {}: {}", self.dir.display(), e);
            return;
        }
        let entry = CacheEntry {
            timestamp: unix_now(),
            value,
        };
        let path = self.entry_path(key, version, args);
        match serde_json::to_string(&entry) {
            Ok(json) => {
                if let Err(e) = fs::write(&path, json) {
                    warn!("failed to write cache entry {}: {}", path.display(), e);
                }
            }
            Err(e) => warn!("failed to serialize cache entry: {}", e),
        }
    }

    fn entry_path(&self, key: &str, version: &str, args: &[Value]) -> PathBuf {
        self.dir.join(format!("{}.json", cache_key(key, version, args)))
    }

    #[cfg(test)]
    pub(crate) fn entry_file(&self, key: &str, version: &str, args: &[Value]) -> PathBuf {
        self.entry_path(key, version, args)
    }
}

/// Deterministic digest over the tuple serialization, so the same logical
/// lookup always lands on the same file name.
fn cache_key(key: &str, version: &str, args: &[Value]) -> String {
    let material = serde_json::to_string(&(key, version, args)).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(material.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn round_trip() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::new(dir.path());
        let args = vec![json!("mouse")];
        cache.set("find_dandisets", "1", &args, json!([{"id": "000003"}]));
        assert_eq!(
            cache.get("find_dandisets", "1", &args, Some(60)),
            Some(json!([{"id": "000003"}]))
        );
        // different args miss
        assert_eq!(
            cache.get("find_dandisets", "1", &[json!("rat")], Some(60)),
            None
        );
    }

    #[test]
    fn expiry_law() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::new(dir.path());
        let args = vec![json!("q")];
        cache.set("search", "1", &args, json!(42));

        // Rewind the stored timestamp by 59 then 61 minutes.
        let file = cache.entry_file("search", "1", &args);
        for (minutes, expect_hit) in [(59u64, true), (61, false)] {
            let entry = CacheEntry {
                timestamp: unix_now() - minutes * 60,
                value: json!(42),
            };
            fs::write(&file, serde_json::to_string(&entry).unwrap()).unwrap();
            let got = cache.get("search", "1", &args, Some(60));
            assert_eq!(got.is_some(), expect_hit, "age {} minutes", minutes);
        }
    }

    #[test]
    fn no_ttl_never_expires() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::new(dir.path());
        let file = cache.entry_file("k", "1", &[]);
        fs::create_dir_all(dir.path()).unwrap();
        let entry = CacheEntry {
            timestamp: 0,
            value: json!("old"),
        };
        fs::write(&file, serde_json::to_string(&entry).unwrap()).unwrap();
        assert_eq!(cache.get("k", "1", &[], None), Some(json!("old")));
    }

    #[test]
    fn corrupt_entry_is_a_miss() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::new(dir.path());
        let args = vec![json!(1)];
        cache.set("k", "1", &args, json!(true));
        fs::write(cache.entry_file("k", "1", &args), "{not json").unwrap();
        assert_eq!(cache.get("k", "1", &args, None), None);
    }

    #[test]
    fn absent_entry_is_a_miss() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::new(dir.path());
        assert_eq!(cache.get("nope", "1", &[], Some(5)), None);
    }
}
