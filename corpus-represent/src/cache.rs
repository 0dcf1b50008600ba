//! Content-addressed OCR/transcript disk cache with TTL-then-LRU-by-mtime
//! eviction (spec.md §4.6's cache policy), kept as its own testable unit
//! per SPEC_FULL's supplemented-features note.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

/// Shared eviction policy for both the OCR and transcript caches.
#[derive(Debug, Clone, Copy)]
pub struct CachePolicyConfig {
    pub max_bytes: u64,
    pub ttl: Duration,
    /// Run the prune pass every N writes; `0` means every write.
    pub prune_every: u64,
}

impl Default for CachePolicyConfig {
    fn default() -> Self {
        Self { max_bytes: 512 * 1024 * 1024, ttl: Duration::from_secs(30 * 24 * 3600), prune_every: 1 }
    }
}

/// Content-addressed cache directory with periodic eviction. One instance
/// covers one sub-directory (`cache/ocr` or `cache/transcribe`).
pub struct ContentCache {
    dir: PathBuf,
    policy: CachePolicyConfig,
    writes_since_prune: AtomicU64,
}

impl ContentCache {
    pub fn new(dir: impl Into<PathBuf>, policy: CachePolicyConfig) -> Self {
        Self { dir: dir.into(), policy, writes_since_prune: AtomicU64::new(0) }
    }

    fn path_for(&self, content_hash: &str, ext: &str) -> PathBuf {
        self.dir.join(format!("{content_hash}.{ext}"))
    }

    /// Returns the cached content for `content_hash`, if present.
    pub fn get(&self, content_hash: &str, ext: &str) -> Option<String> {
        fs::read_to_string(self.path_for(content_hash, ext)).ok()
    }

    /// Writes `content` under `content_hash`, then runs the prune policy
    /// every `prune_every` writes (content-addressed writes are
    /// idempotent, so concurrent writers producing the same file race
    /// harmlessly). Prune failures are logged, never propagated.
    pub fn put(&self, content_hash: &str, ext: &str, content: &str) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(content_hash, ext);
        fs::write(&path, content)?;

        let count = self.writes_since_prune.fetch_add(1, Ordering::Relaxed) + 1;
        let due = self.policy.prune_every == 0 || count % self.policy.prune_every.max(1) == 0;
        if due {
            if let Err(e) = self.prune() {
                tracing::warn!(dir = %self.dir.display(), error = %e, "cache prune failed");
            }
        }
        Ok(path)
    }

    /// TTL eviction first, then LRU-by-mtime eviction to stay under
    /// `max_bytes`. Stat-failed entries are removed; `ENOENT` races from
    /// concurrent deletes are tolerated.
    pub fn prune(&self) -> io::Result<()> {
        let now = SystemTime::now();
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        let mut alive: Vec<(PathBuf, u64, SystemTime)> = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            let path = entry.path();
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(_) => {
                    // Stat-failed entry: remove it.
                    let _ = fs::remove_file(&path);
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }
            let mtime = metadata.modified().unwrap_or(now);
            let age = now.duration_since(mtime).unwrap_or(Duration::ZERO);
            if age > self.policy.ttl {
                remove_tolerating_enoent(&path)?;
                continue;
            }
            alive.push((path, metadata.len(), mtime));
        }

        let mut total: u64 = alive.iter().map(|(_, len, _)| *len).sum();
        if total <= self.policy.max_bytes {
            return Ok(());
        }

        // Oldest mtime first (LRU-by-mtime, resolved as the Open Question
        // in DESIGN.md).
        alive.sort_by_key(|(_, _, mtime)| *mtime);
        for (path, len, _) in alive {
            if total <= self.policy.max_bytes {
                break;
            }
            remove_tolerating_enoent(&path)?;
            total = total.saturating_sub(len);
        }
        Ok(())
    }
}

fn remove_tolerating_enoent(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ContentCache::new(dir.path(), CachePolicyConfig::default());
        cache.put("abc123", "md", "page one\fpage two").unwrap();
        assert_eq!(cache.get("abc123", "md").unwrap(), "page one\fpage two");
        assert!(cache.get("missing", "md").is_none());
    }

    #[test]
    fn ttl_evicts_stale_entries() {
        let dir = tempfile::tempdir().unwrap();
        let policy = CachePolicyConfig { max_bytes: u64::MAX, ttl: Duration::from_secs(0), prune_every: 1 };
        let cache = ContentCache::new(dir.path(), policy);
        cache.put("stale", "txt", "old content").unwrap();
        std::thread::sleep(Duration::from_millis(10));
        cache.prune().unwrap();
        assert!(cache.get("stale", "txt").is_none());
    }

    #[test]
    fn size_cap_evicts_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let policy = CachePolicyConfig { max_bytes: 15, ttl: Duration::from_secs(3600), prune_every: 1 };
        let cache = ContentCache::new(dir.path(), policy);
        cache.put("first", "txt", "0123456789").unwrap();
        std::thread::sleep(Duration::from_millis(10));
        cache.put("second", "txt", "0123456789").unwrap();

        assert!(cache.get("first", "txt").is_none());
        assert!(cache.get("second", "txt").is_some());
    }
}
