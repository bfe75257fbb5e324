//! The storage backend contract.
//!
//! Every backend exposes the same POSIX-shaped interface over purely
//! relative paths; the registry maps a manifest `type` tag to a
//! constructor. Reference-holding backends (delegate, the proxies)
//! receive their inner backend pre-constructed through [`BackendInit`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_yaml::{Mapping, Value};

use common::object::Link;

use crate::watch::Watcher;

/// Error taxonomy shared by every backend and mixin.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(PathBuf),
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("is a directory: {0}")]
    IsADirectory(PathBuf),
    #[error("already exists: {0}")]
    Exists(PathBuf),
    #[error("storage is read-only")]
    ReadOnly,
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
    #[error("backend initialization failed: {0}")]
    BackendInit(String),
    #[error("content hash mismatch on {0}")]
    HashMismatch(PathBuf),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    /// Map an `std::io::Error` into the taxonomy, keeping the path.
    pub fn from_io(path: &Path, err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => StorageError::NotFound(path.to_path_buf()),
            ErrorKind::AlreadyExists => StorageError::Exists(path.to_path_buf()),
            ErrorKind::PermissionDenied => {
                StorageError::PermissionDenied(path.display().to_string())
            }
            _ => StorageError::Io {
                path: path.to_path_buf(),
                source: err,
            },
        }
    }

    /// Recoverable during path traversal: the resolver skips and tries
    /// the next candidate.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StorageError::NotFound(_)
                | StorageError::NotADirectory(_)
                | StorageError::PermissionDenied(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// File attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attr {
    /// Type and permission bits, POSIX-style.
    pub mode: u32,
    pub size: u64,
    /// Modification time, seconds since the epoch.
    pub timestamp: i64,
}

impl Attr {
    pub fn file(size: u64, timestamp: i64) -> Self {
        Attr {
            mode: libc::S_IFREG as u32 | 0o644,
            size,
            timestamp,
        }
    }

    pub fn file_ro(size: u64, timestamp: i64) -> Self {
        Attr {
            mode: libc::S_IFREG as u32 | 0o444,
            size,
            timestamp,
        }
    }

    pub fn dir(timestamp: i64) -> Self {
        Attr {
            mode: libc::S_IFDIR as u32 | 0o755,
            size: 0,
            timestamp,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFDIR as u32
    }
}

/// Open mode for `open`/`create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub append: bool,
}

impl OpenFlags {
    pub fn read_only() -> Self {
        OpenFlags {
            read: true,
            ..Default::default()
        }
    }

    pub fn write_only() -> Self {
        OpenFlags {
            write: true,
            ..Default::default()
        }
    }

    pub fn read_write() -> Self {
        OpenFlags {
            read: true,
            write: true,
            append: false,
        }
    }
}

/// An open file handle.
///
/// Methods take `&mut self`: operations on one handle are strictly
/// ordered. `release` must flush dirty buffers; dropping without release
/// discards pending writes.
pub trait File: Send {
    fn read(&mut self, length: usize, offset: u64) -> Result<Vec<u8>>;

    fn write(&mut self, _data: &[u8], _offset: u64) -> Result<usize> {
        Err(StorageError::ReadOnly)
    }

    fn fgetattr(&mut self) -> Result<Attr>;

    fn ftruncate(&mut self, _length: u64) -> Result<()> {
        Err(StorageError::ReadOnly)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn release(&mut self) -> Result<()>;
}

impl std::fmt::Debug for dyn File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn File")
    }
}

/// A subcontainer exposed by a storage.
#[derive(Debug, Clone)]
pub enum Subcontainer {
    /// A file inside this storage holding a container manifest.
    Link { path: String, link: Link },
    /// Synthesized manifest fields (proxy backends).
    Fields { path: String, fields: Mapping },
}

/// Abstract storage implementation.
///
/// Paths passed to every operation are purely relative POSIX paths within
/// the storage; `""` or `.` names the root. Backends are shared behind an
/// `Arc` by the mount controller, so inherent state needs interior
/// mutability.
pub trait StorageBackend: Send + Sync {
    /// The manifest `type` tag this backend serves.
    fn backend_type(&self) -> &'static str;

    /// The parameter mapping this backend was constructed from.
    fn params(&self) -> &Mapping;

    fn read_only(&self) -> bool {
        self.params()
            .get("read-only")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    fn backend_id(&self) -> String {
        self.params()
            .get("backend-id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    /// One-time setup (connect, open database, start filesystem).
    fn mount(&self) -> Result<()> {
        Ok(())
    }

    fn unmount(&self) -> Result<()> {
        Ok(())
    }

    /// Drop cached directory information, if any.
    fn clear_cache(&self) {}

    /* File operations */

    fn open(&self, path: &Path, flags: OpenFlags) -> Result<Box<dyn File>>;

    fn create(&self, path: &Path, flags: OpenFlags, mode: u32) -> Result<Box<dyn File>>;

    /* Directory operations */

    fn getattr(&self, path: &Path) -> Result<Attr>;

    /// Names only, no attributes.
    fn readdir(&self, path: &Path) -> Result<Vec<String>>;

    fn mkdir(&self, _path: &Path, _mode: u32) -> Result<()> {
        Err(StorageError::ReadOnly)
    }

    fn rmdir(&self, _path: &Path) -> Result<()> {
        Err(StorageError::ReadOnly)
    }

    fn unlink(&self, _path: &Path) -> Result<()> {
        Err(StorageError::ReadOnly)
    }

    fn truncate(&self, _path: &Path, _length: u64) -> Result<()> {
        Err(StorageError::ReadOnly)
    }

    /// Backend-native atomic rename; no delete-then-rename fallback.
    fn rename(&self, _from: &Path, _to: &Path) -> Result<()> {
        Err(StorageError::Unsupported("rename"))
    }

    fn utimens(&self, _path: &Path, _timestamp: i64) -> Result<()> {
        Ok(())
    }

    fn chmod(&self, _path: &Path, _mode: u32) -> Result<()> {
        Err(StorageError::Unsupported("chmod"))
    }

    fn chown(&self, _path: &Path, _uid: u32, _gid: u32) -> Result<()> {
        Err(StorageError::Unsupported("chown"))
    }

    /* Cache and sync support */

    /// A token that changes whenever the file content may have changed
    /// (mtime in milliseconds, or a content hash). `None` when the
    /// backend cannot detect changes.
    fn get_file_token(&self, _path: &Path) -> Result<Option<u64>> {
        Ok(None)
    }

    /// Stable SHA-256 content hash, hex-encoded, for conflict detection.
    fn get_hash(&self, path: &Path) -> Result<String> {
        use sha2::{Digest, Sha256};
        let mut file = self.open(path, OpenFlags::read_only())?;
        let mut hasher = Sha256::new();
        let mut offset = 0u64;
        loop {
            let chunk = file.read(1 << 20, offset)?;
            if chunk.is_empty() {
                break;
            }
            offset += chunk.len() as u64;
            hasher.update(&chunk);
        }
        file.release()?;
        Ok(hex::encode(hasher.finalize()))
    }

    /// An exclusive write handle that atomically replaces the file on
    /// release, but only if its content still hashes to `expected_hash`.
    fn open_for_safe_replace(
        &self,
        _path: &Path,
        _flags: OpenFlags,
        _expected_hash: &str,
    ) -> Result<Box<dyn File>> {
        Err(StorageError::Unsupported("open_for_safe_replace"))
    }

    /* Subcontainers */

    /// Enumerate subcontainer manifests this storage exposes. `query` is
    /// the container path being looked up, or `None` for all.
    fn get_children(&self, _query: Option<&str>) -> Result<Vec<Subcontainer>> {
        Ok(vec![])
    }

    /* Watching */

    /// How to watch this storage for changes, if at all.
    ///
    /// The default honors an explicit `watcher-interval` parameter with
    /// the polling watcher; backends with a native event source override
    /// this.
    fn watcher(&self) -> Option<Watcher> {
        self.params()
            .get("watcher-interval")
            .and_then(Value::as_u64)
            .map(|secs| Watcher::Polling {
                interval: std::time::Duration::from_secs(secs),
            })
    }

    /// The reserved read-only control file `manifest.yaml`: the params of
    /// this storage, for debugging through the mounted tree.
    fn control_manifest(&self) -> Vec<u8> {
        serde_yaml::to_string(self.params())
            .unwrap_or_default()
            .into_bytes()
    }
}

/// Walk a backend, yielding `(relative_path, attr)` for every entry below
/// `dir` (directories excluded from the yield, like the proxies expect).
pub fn walk_files(backend: &dyn StorageBackend, dir: &Path) -> Result<Vec<(PathBuf, Attr)>> {
    let mut out = Vec::new();
    walk_files_into(backend, dir, &mut out)?;
    Ok(out)
}

fn walk_files_into(
    backend: &dyn StorageBackend,
    dir: &Path,
    out: &mut Vec<(PathBuf, Attr)>,
) -> Result<()> {
    for name in backend.readdir(dir)? {
        let path = dir.join(&name);
        let attr = backend.getattr(&path)?;
        if attr.is_dir() {
            walk_files_into(backend, &path, out)?;
        } else {
            out.push((path, attr));
        }
    }
    Ok(())
}

/// Everything a backend constructor receives.
pub struct BackendInit {
    pub params: Mapping,
    /// The live backend of the reference container, for delegating and
    /// proxy backends (`params.storage` in manifest terms).
    pub inner: Option<Arc<dyn StorageBackend>>,
}

impl BackendInit {
    pub fn new(params: Mapping) -> Self {
        BackendInit {
            params,
            inner: None,
        }
    }

    pub fn with_inner(params: Mapping, inner: Arc<dyn StorageBackend>) -> Self {
        BackendInit {
            params,
            inner: Some(inner),
        }
    }

    /// The inner backend, or a `BackendInit` error naming the type.
    pub fn require_inner(&self, backend_type: &str) -> Result<Arc<dyn StorageBackend>> {
        self.inner.clone().ok_or_else(|| {
            StorageError::BackendInit(format!(
                "{backend_type} requires a resolved reference-container storage"
            ))
        })
    }

    pub fn str_param(&self, key: &str) -> Result<String> {
        self.params
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| StorageError::BackendInit(format!("missing parameter '{key}'")))
    }
}

type Constructor = Box<dyn Fn(BackendInit) -> Result<Arc<dyn StorageBackend>> + Send + Sync>;

/// Maps manifest `type` tags to backend constructors.
///
/// Initialized once per runtime with the compiled-in set; embedders can
/// register additional backends before the first mount.
pub struct BackendRegistry {
    constructors: HashMap<String, Constructor>,
}

impl BackendRegistry {
    pub fn empty() -> Self {
        BackendRegistry {
            constructors: HashMap::new(),
        }
    }

    /// The compiled-in backends.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        crate::backend::register_defaults(&mut registry);
        registry
    }

    pub fn register<F>(&mut self, type_tag: &str, constructor: F)
    where
        F: Fn(BackendInit) -> Result<Arc<dyn StorageBackend>> + Send + Sync + 'static,
    {
        self.constructors
            .insert(type_tag.to_string(), Box::new(constructor));
    }

    pub fn is_type_supported(&self, type_tag: &str) -> bool {
        self.constructors.contains_key(type_tag)
    }

    /// Construct a backend from manifest params; dispatches on `type`.
    pub fn construct(&self, init: BackendInit) -> Result<Arc<dyn StorageBackend>> {
        let type_tag = init
            .params
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| StorageError::BackendInit("missing 'type' parameter".into()))?;
        let constructor = self.constructors.get(&type_tag).ok_or_else(|| {
            StorageError::BackendInit(format!("unsupported storage type: {type_tag}"))
        })?;
        constructor(init)
    }
}
