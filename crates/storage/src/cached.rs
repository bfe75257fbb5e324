//! Cached directory metadata.
//!
//! Backends whose listing is expensive implement [`CachedStorage`]
//! (whole-tree `info_all`) or [`DirCachedStorage`] (per-directory
//! `info_dir`); the provided methods answer `getattr`/`readdir` from a
//! cache with a short TTL. Mutating operations must call `clear_cache`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::base::{Attr, Result, StorageError};

pub const CACHE_TTL: Duration = Duration::from_secs(3);

#[derive(Default)]
struct CacheState {
    getattr: HashMap<PathBuf, Attr>,
    readdir: HashMap<PathBuf, Vec<String>>,
    expiry: Option<Instant>,
}

/// Whole-tree metadata cache with a TTL.
pub struct DirCache {
    state: Mutex<CacheState>,
    ttl: Duration,
}

impl Default for DirCache {
    fn default() -> Self {
        DirCache {
            state: Mutex::new(CacheState::default()),
            ttl: CACHE_TTL,
        }
    }
}

impl DirCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        DirCache {
            state: Mutex::new(CacheState::default()),
            ttl,
        }
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.getattr.clear();
        state.readdir.clear();
        state.expiry = None;
    }

    fn refresh_from(&self, info: Vec<(PathBuf, Attr)>) {
        let mut state = self.state.lock();
        state.getattr.clear();
        state.readdir.clear();
        // Every file implies its parent chain of directories.
        state.getattr.insert(PathBuf::new(), Attr::dir(0));
        state.readdir.insert(PathBuf::new(), vec![]);
        for (path, attr) in info {
            let mut dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
            let mut child = path.clone();
            loop {
                let name = child
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let listing = state.readdir.entry(dir.clone()).or_default();
                if !listing.contains(&name) {
                    listing.push(name);
                }
                state.getattr.entry(dir.clone()).or_insert(Attr::dir(0));
                if dir.as_os_str().is_empty() {
                    break;
                }
                child = dir.clone();
                dir = dir.parent().map(Path::to_path_buf).unwrap_or_default();
            }
            state.getattr.insert(path, attr);
        }
        state.expiry = Some(Instant::now() + self.ttl);
    }

    fn expired(&self) -> bool {
        match self.state.lock().expiry {
            Some(expiry) => expiry < Instant::now(),
            None => true,
        }
    }
}

/// Mixin for backends that can enumerate their whole tree at once.
pub trait CachedStorage {
    /// Retrieve `(path, attr)` for every file in the storage. Directories
    /// are inferred from file paths.
    fn info_all(&self) -> Result<Vec<(PathBuf, Attr)>>;

    /// The cache this backend owns.
    fn cache(&self) -> &DirCache;

    fn update_cache(&self) -> Result<()> {
        if self.cache().expired() {
            let info = self.info_all()?;
            self.cache().refresh_from(info);
        }
        Ok(())
    }

    fn cached_getattr(&self, path: &Path) -> Result<Attr> {
        self.update_cache()?;
        self.cache()
            .state
            .lock()
            .getattr
            .get(path)
            .copied()
            .ok_or_else(|| StorageError::NotFound(path.to_path_buf()))
    }

    fn cached_readdir(&self, path: &Path) -> Result<Vec<String>> {
        self.update_cache()?;
        let state = self.cache().state.lock();
        if let Some(names) = state.readdir.get(path) {
            let mut names = names.clone();
            names.sort();
            return Ok(names);
        }
        if state.getattr.contains_key(path) {
            return Err(StorageError::NotADirectory(path.to_path_buf()));
        }
        Err(StorageError::NotFound(path.to_path_buf()))
    }
}

#[derive(Default)]
struct DirCacheState {
    getattr: HashMap<PathBuf, Attr>,
    readdir: HashMap<PathBuf, Vec<String>>,
    expiry: HashMap<PathBuf, Instant>,
}

/// Per-directory metadata cache with a TTL.
pub struct PerDirCache {
    state: Mutex<DirCacheState>,
    ttl: Duration,
}

impl Default for PerDirCache {
    fn default() -> Self {
        PerDirCache {
            state: Mutex::new(DirCacheState::default()),
            ttl: CACHE_TTL,
        }
    }
}

impl PerDirCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.getattr.clear();
        state.readdir.clear();
        state.expiry.clear();
    }
}

/// Mixin for backends that list one directory at a time.
pub trait DirCachedStorage {
    /// `(name, attr)` for every entry directly inside `path`.
    fn info_dir(&self, path: &Path) -> Result<Vec<(String, Attr)>>;

    fn dir_cache(&self) -> &PerDirCache;

    fn update_dir(&self, path: &Path) -> Result<()> {
        let fresh = {
            let state = self.dir_cache().state.lock();
            state
                .expiry
                .get(path)
                .map(|expiry| *expiry >= Instant::now())
                .unwrap_or(false)
        };
        if fresh {
            return Ok(());
        }

        let listing = self.info_dir(path);
        let mut state = self.dir_cache().state.lock();
        // Drop previous knowledge of this directory before re-filling.
        if let Some(names) = state.readdir.remove(path) {
            for name in names {
                state.getattr.remove(&path.join(name));
            }
        }
        match listing {
            Ok(entries) => {
                let mut names = Vec::with_capacity(entries.len());
                for (name, attr) in entries {
                    state.getattr.insert(path.join(&name), attr);
                    names.push(name);
                }
                state.readdir.insert(path.to_path_buf(), names);
            }
            Err(err) => {
                tracing::debug!("info_dir({}) failed: {err}", path.display());
            }
        }
        state
            .expiry
            .insert(path.to_path_buf(), Instant::now() + self.dir_cache().ttl);
        Ok(())
    }

    fn cached_getattr(&self, path: &Path) -> Result<Attr> {
        // The root's own attributes are not retrievable through a parent.
        if path.as_os_str().is_empty() || path == Path::new(".") {
            return Ok(Attr::dir(0));
        }
        let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
        self.update_dir(&parent)?;
        self.dir_cache()
            .state
            .lock()
            .getattr
            .get(path)
            .copied()
            .ok_or_else(|| StorageError::NotFound(path.to_path_buf()))
    }

    fn cached_readdir(&self, path: &Path) -> Result<Vec<String>> {
        self.update_dir(path)?;
        let state = self.dir_cache().state.lock();
        match state.readdir.get(path) {
            Some(names) => {
                let mut names = names.clone();
                names.sort();
                Ok(names)
            }
            None => Err(StorageError::NotFound(path.to_path_buf())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeTree {
        cache: DirCache,
        calls: Mutex<usize>,
    }

    impl CachedStorage for FakeTree {
        fn info_all(&self) -> Result<Vec<(PathBuf, Attr)>> {
            *self.calls.lock() += 1;
            Ok(vec![
                ("docs/a.txt".into(), Attr::file(1, 0)),
                ("docs/deep/b.txt".into(), Attr::file(2, 0)),
                ("top.txt".into(), Attr::file(3, 0)),
            ])
        }

        fn cache(&self) -> &DirCache {
            &self.cache
        }
    }

    #[test]
    fn test_cached_listing_and_inferred_dirs() {
        let tree = FakeTree {
            cache: DirCache::new(),
            calls: Mutex::new(0),
        };

        assert_eq!(tree.cached_readdir(Path::new("")).unwrap(), ["docs", "top.txt"]);
        assert_eq!(
            tree.cached_readdir(Path::new("docs")).unwrap(),
            ["a.txt", "deep"]
        );
        assert!(tree.cached_getattr(Path::new("docs/deep")).unwrap().is_dir());
        assert_eq!(
            tree.cached_getattr(Path::new("docs/a.txt")).unwrap().size,
            1
        );
        // All of it from a single info_all refresh.
        assert_eq!(*tree.calls.lock(), 1);

        assert!(matches!(
            tree.cached_getattr(Path::new("missing")).unwrap_err(),
            StorageError::NotFound(_)
        ));
    }

    #[test]
    fn test_clear_cache_forces_refresh() {
        let tree = FakeTree {
            cache: DirCache::new(),
            calls: Mutex::new(0),
        };
        tree.cached_readdir(Path::new("")).unwrap();
        tree.cache().clear();
        tree.cached_readdir(Path::new("")).unwrap();
        assert_eq!(*tree.calls.lock(), 2);
    }
}
