//! Children cache (C6).
//!
//! A modification-time-keyed LRU cache of immediate-children listings,
//! keyed by parent file path. A process-wide singleton would make tests
//! nondeterministic (spec §9 "global singleton → injected dependency"),
//! so this is owned by whatever runtime context the caller constructs
//! (see [`crate::handlers::Engine`]) and passed in explicitly.
//!
//! Storage failures must never fail the enclosing read: every public
//! method here either returns a usable value or silently treats the
//! cache as empty, per spec §4.6/§9.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use lru::LruCache;
use parking_lot::Mutex;

use crate::path::ChildEntry;

const DEFAULT_MAX_ENTRIES: usize = 1000;
/// Stat-based freshness checks tolerate up to this much mtime drift
/// (spec §4.6: "1 ms tolerance").
const MTIME_TOLERANCE_MS: u128 = 1;

#[derive(Clone)]
struct CachedEntry {
    children: Vec<ChildEntry>,
    parent_mtime: SystemTime,
    /// mtime observed for each child file at cache time, by path, so a
    /// child edited out-of-band (not just the parent directory) still
    /// invalidates the entry.
    children_mtimes: Vec<(PathBuf, SystemTime)>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Modification-time-keyed LRU children cache. Cheap to clone-share via
/// `Arc` since the lock covers both the map and the LRU order.
pub struct ChildrenCache {
    inner: Mutex<LruCache<PathBuf, CachedEntry>>,
    stats: Mutex<CacheStats>,
}

impl ChildrenCache {
    pub fn new(max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries.max(1)).unwrap();
        Self {
            inner: Mutex::new(LruCache::new(cap)),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    /// Returns the freshly-scanned children for `parent_path`, either from
    /// cache (if every tracked mtime still matches) or by invoking
    /// `scan` and repopulating the entry.
    pub fn get_or_scan(
        &self,
        parent_path: &Path,
        scan: impl FnOnce() -> Vec<ChildEntry>,
    ) -> Vec<ChildEntry> {
        if let Some(children) = self.try_get_fresh(parent_path) {
            self.bump_stat(|s| s.hits += 1);
            return children;
        }
        self.bump_stat(|s| s.misses += 1);

        let children = scan();
        self.populate(parent_path, &children);
        children
    }

    fn try_get_fresh(&self, parent_path: &Path) -> Option<Vec<ChildEntry>> {
        let mut guard = self.inner.lock();
        let entry = guard.get(parent_path)?;

        let parent_mtime = mtime_of(parent_path)?;
        if !mtimes_match(entry.parent_mtime, parent_mtime) {
            guard.pop(parent_path);
            return None;
        }
        for (child_path, expected_mtime) in &entry.children_mtimes {
            match mtime_of(child_path) {
                Some(actual) if mtimes_match(*expected_mtime, actual) => {}
                _ => {
                    guard.pop(parent_path);
                    return None;
                }
            }
        }
        Some(entry.children.clone())
    }

    fn populate(&self, parent_path: &Path, children: &[ChildEntry]) {
        let Some(parent_mtime) = mtime_of(parent_path) else {
            return;
        };
        let children_mtimes = children
            .iter()
            .filter_map(|c| mtime_of(&c.file_path).map(|m| (c.file_path.clone(), m)))
            .collect();

        let mut guard = self.inner.lock();
        let before_len = guard.len();
        let evicted_cap = guard.cap().get() == before_len && !guard.contains(parent_path);
        guard.put(
            parent_path.to_path_buf(),
            CachedEntry {
                children: children.to_vec(),
                parent_mtime,
                children_mtimes,
            },
        );
        if evicted_cap {
            self.bump_stat(|s| s.evictions += 1);
        }
    }

    /// Invalidates the cached listing for `parent_path`. Must be called
    /// by every mutating write to a parent or any of its children.
    pub fn invalidate(&self, parent_path: &Path) {
        self.inner.lock().pop(parent_path);
    }

    pub fn stats(&self) -> CacheStats {
        *self.stats.lock()
    }

    fn bump_stat(&self, f: impl FnOnce(&mut CacheStats)) {
        f(&mut self.stats.lock());
    }
}

impl Default for ChildrenCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

fn mtime_of(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).ok()?.modified().ok()
}

fn mtimes_match(a: SystemTime, b: SystemTime) -> bool {
    let diff = match a.duration_since(b) {
        Ok(d) => d,
        Err(e) => e.duration(),
    };
    diff.as_millis() <= MTIME_TOLERANCE_MS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Kind;
    use chrono::Local;
    use std::fs;

    fn entry(path: PathBuf) -> ChildEntry {
        ChildEntry {
            id: "x".to_string(),
            title: "X".to_string(),
            status: "open".to_string(),
            kind: Kind::Task,
            created: Local::now(),
            file_path: path,
        }
    }

    #[test]
    fn repopulates_on_miss_and_hits_on_second_call() {
        let tmp = tempfile::tempdir().unwrap();
        let parent = tmp.path().join("feature.md");
        fs::write(&parent, "x").unwrap();

        let cache = ChildrenCache::new(10);
        let calls = std::cell::Cell::new(0);
        let scan = || {
            calls.set(calls.get() + 1);
            vec![entry(tmp.path().join("T-x.md"))]
        };

        let first = cache.get_or_scan(&parent, scan);
        assert_eq!(first.len(), 1);
        let second = cache.get_or_scan(&parent, scan);
        assert_eq!(second.len(), 1);
        assert_eq!(calls.get(), 1, "second call should hit cache, not rescan");
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn invalidate_forces_rescan() {
        let tmp = tempfile::tempdir().unwrap();
        let parent = tmp.path().join("feature.md");
        fs::write(&parent, "x").unwrap();

        let cache = ChildrenCache::new(10);
        cache.get_or_scan(&parent, || vec![]);
        cache.invalidate(&parent);
        cache.get_or_scan(&parent, || vec![]);
        assert_eq!(cache.stats().misses, 2);
    }

    #[test]
    fn stale_parent_mtime_invalidates_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let parent = tmp.path().join("feature.md");
        fs::write(&parent, "x").unwrap();

        let cache = ChildrenCache::new(10);
        cache.get_or_scan(&parent, || vec![]);

        std::thread::sleep(std::time::Duration::from_millis(10));
        fs::write(&parent, "changed").unwrap();

        cache.get_or_scan(&parent, || vec![]);
        assert_eq!(cache.stats().misses, 2);
    }
}
