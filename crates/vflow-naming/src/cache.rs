//! Resolution cache: full name → [`MountEntry`], with a TTL and a
//! DFS-style flush (spec §4.8 "Resolution cache").

use std::time::{Duration, Instant};

use dashmap::DashMap;
use vflow_core::mount::{CacheEntry, MountEntry};

pub struct ResolutionCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl ResolutionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, name: &str) -> Option<MountEntry> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(name) {
            if !entry.is_expired(now) {
                return Some(entry.entry.clone());
            }
        }
        None
    }

    pub fn put(&self, name: &str, entry: MountEntry) {
        self.entries.insert(
            name.to_string(),
            CacheEntry {
                entry,
                expiry: Instant::now() + self.ttl,
            },
        );
    }

    /// Flushes the most specific cached entry covering `name` (spec
    /// §4.8 `FlushCacheEntry`): walks from `name` up through its
    /// slash-separated parents and removes the first cached entry it
    /// finds, rather than assuming `name` itself was the cache key.
    pub fn flush(&self, name: &str) {
        let mut candidate = name;
        loop {
            if self.entries.remove(candidate).is_some() {
                return;
            }
            match candidate.rsplit_once('/') {
                Some((parent, _)) if !parent.is_empty() => candidate = parent,
                _ => return,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> MountEntry {
        MountEntry {
            name: name.to_string(),
            servers: Vec::new(),
            serves_mount_table: false,
        }
    }

    #[test]
    fn expired_entry_is_not_returned() {
        let cache = ResolutionCache::new(Duration::from_millis(0));
        cache.put("a/b", entry("a/b"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("a/b").is_none());
    }

    #[test]
    fn flush_walks_up_to_the_nearest_cached_ancestor() {
        let cache = ResolutionCache::new(Duration::from_secs(60));
        cache.put("a", entry("a"));
        assert!(cache.get("a/b/c").is_none());
        cache.flush("a/b/c");
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn flush_of_unknown_name_is_a_no_op() {
        let cache = ResolutionCache::new(Duration::from_secs(60));
        cache.flush("nothing/here");
        assert!(cache.is_empty());
    }
}
