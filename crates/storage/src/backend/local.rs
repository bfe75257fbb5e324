//! Local, file-based storage. The closest thing to `mount --bind`.

use std::fs;
use std::os::unix::fs::{FileExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_yaml::{Mapping, Value};

use common::object::ManifestPattern;

use crate::base::{
    Attr, BackendInit, File, OpenFlags, Result, StorageBackend, StorageError, Subcontainer,
};
use crate::subcontainers::children_links;
use crate::watch::{NotifyEventSource, Watcher};

pub const TYPE: &str = "local";

fn to_attr(metadata: &fs::Metadata) -> Attr {
    Attr {
        mode: metadata.permissions().mode(),
        size: metadata.len(),
        timestamp: metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0),
    }
}

/// An open file on disk.
pub struct LocalFile {
    file: fs::File,
    append: bool,
}

impl File for LocalFile {
    fn read(&mut self, length: usize, offset: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; length];
        let mut filled = 0;
        while filled < length {
            let n = self
                .file
                .read_at(&mut buf[filled..], offset + filled as u64)
                .map_err(|e| StorageError::from_io(Path::new(""), e))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }

    fn write(&mut self, data: &[u8], offset: u64) -> Result<usize> {
        let offset = if self.append {
            self.file
                .metadata()
                .map_err(|e| StorageError::from_io(Path::new(""), e))?
                .len()
        } else {
            offset
        };
        self.file
            .write_all_at(data, offset)
            .map_err(|e| StorageError::from_io(Path::new(""), e))?;
        Ok(data.len())
    }

    fn fgetattr(&mut self) -> Result<Attr> {
        let metadata = self
            .file
            .metadata()
            .map_err(|e| StorageError::from_io(Path::new(""), e))?;
        Ok(to_attr(&metadata))
    }

    fn ftruncate(&mut self, length: u64) -> Result<()> {
        self.file
            .set_len(length)
            .map_err(|e| StorageError::from_io(Path::new(""), e))
    }

    fn flush(&mut self) -> Result<()> {
        self.file
            .sync_data()
            .map_err(|e| StorageError::from_io(Path::new(""), e))
    }

    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Exclusive write handle that swaps the target atomically on release,
/// but only while the target still hashes to the expected value.
struct SafeReplaceFile {
    backend_root: PathBuf,
    relative: PathBuf,
    expected_hash: String,
    buf: Vec<u8>,
}

impl File for SafeReplaceFile {
    fn read(&mut self, length: usize, offset: u64) -> Result<Vec<u8>> {
        let start = (offset as usize).min(self.buf.len());
        let end = start.saturating_add(length).min(self.buf.len());
        Ok(self.buf[start..end].to_vec())
    }

    fn write(&mut self, data: &[u8], offset: u64) -> Result<usize> {
        let offset = offset as usize;
        if self.buf.len() < offset + data.len() {
            self.buf.resize(offset + data.len(), 0);
        }
        self.buf[offset..offset + data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    fn fgetattr(&mut self) -> Result<Attr> {
        Ok(Attr::file(self.buf.len() as u64, 0))
    }

    fn ftruncate(&mut self, length: u64) -> Result<()> {
        self.buf.truncate(length as usize);
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        use sha2::{Digest, Sha256};
        let target = self.backend_root.join(&self.relative);

        let current = fs::read(&target).map_err(|e| StorageError::from_io(&self.relative, e))?;
        let current_hash = hex::encode(Sha256::digest(&current));
        if current_hash != self.expected_hash {
            return Err(StorageError::HashMismatch(self.relative.clone()));
        }

        let tmp = target.with_extension("wl-replace.tmp");
        fs::write(&tmp, &self.buf).map_err(|e| StorageError::from_io(&self.relative, e))?;
        fs::rename(&tmp, &target).map_err(|e| StorageError::from_io(&self.relative, e))?;
        Ok(())
    }
}

/// Local storage backend rooted at the `location` parameter.
pub struct LocalBackend {
    params: Mapping,
    root: PathBuf,
    manifest_pattern: Option<ManifestPattern>,
}

impl LocalBackend {
    pub fn new(init: BackendInit) -> Result<Self> {
        let location = init.str_param("location")?;
        let root = PathBuf::from(location);
        let manifest_pattern = match init.params.get("manifest-pattern") {
            Some(Value::Mapping(m)) => Some(
                ManifestPattern::from_fields(m)
                    .map_err(|e| StorageError::BackendInit(e.to_string()))?,
            ),
            _ => None,
        };
        Ok(LocalBackend {
            params: init.params,
            root,
            manifest_pattern,
        })
    }

    /// Resolve a storage-relative path to a path on disk, refusing
    /// traversal outside the root.
    fn path(&self, relative: &Path) -> Result<PathBuf> {
        for component in relative.components() {
            match component {
                std::path::Component::Normal(_) | std::path::Component::CurDir => {}
                _ => {
                    return Err(StorageError::PermissionDenied(format!(
                        "path escapes storage root: {}",
                        relative.display()
                    )))
                }
            }
        }
        Ok(self.root.join(relative))
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only() {
            return Err(StorageError::ReadOnly);
        }
        Ok(())
    }
}

impl StorageBackend for LocalBackend {
    fn backend_type(&self) -> &'static str {
        TYPE
    }

    fn params(&self) -> &Mapping {
        &self.params
    }

    fn mount(&self) -> Result<()> {
        if !self.root.is_dir() {
            tracing::warn!("local storage root does not exist: {}", self.root.display());
        }
        Ok(())
    }

    fn open(&self, path: &Path, flags: OpenFlags) -> Result<Box<dyn File>> {
        if (flags.write || flags.append) && self.read_only() {
            return Err(StorageError::ReadOnly);
        }
        let real = self.path(path)?;
        let file = fs::OpenOptions::new()
            .read(flags.read || !flags.write)
            .write(flags.write)
            .append(flags.append)
            .open(&real)
            .map_err(|e| StorageError::from_io(path, e))?;
        Ok(Box::new(LocalFile {
            file,
            append: flags.append,
        }))
    }

    fn create(&self, path: &Path, _flags: OpenFlags, mode: u32) -> Result<Box<dyn File>> {
        self.check_writable()?;
        let real = self.path(path)?;
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&real)
            .map_err(|e| StorageError::from_io(path, e))?;
        let mut permissions = file
            .metadata()
            .map_err(|e| StorageError::from_io(path, e))?
            .permissions();
        permissions.set_mode(mode);
        let _ = file.set_permissions(permissions);
        Ok(Box::new(LocalFile {
            file,
            append: false,
        }))
    }

    fn getattr(&self, path: &Path) -> Result<Attr> {
        let metadata =
            fs::symlink_metadata(self.path(path)?).map_err(|e| StorageError::from_io(path, e))?;
        Ok(to_attr(&metadata))
    }

    fn readdir(&self, path: &Path) -> Result<Vec<String>> {
        let real = self.path(path)?;
        if real.is_file() {
            return Err(StorageError::NotADirectory(path.to_path_buf()));
        }
        let entries = fs::read_dir(&real).map_err(|e| StorageError::from_io(path, e))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::from_io(path, e))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    fn mkdir(&self, path: &Path, _mode: u32) -> Result<()> {
        self.check_writable()?;
        fs::create_dir(self.path(path)?).map_err(|e| StorageError::from_io(path, e))
    }

    fn rmdir(&self, path: &Path) -> Result<()> {
        self.check_writable()?;
        fs::remove_dir(self.path(path)?).map_err(|e| StorageError::from_io(path, e))
    }

    fn unlink(&self, path: &Path) -> Result<()> {
        self.check_writable()?;
        fs::remove_file(self.path(path)?).map_err(|e| StorageError::from_io(path, e))
    }

    fn truncate(&self, path: &Path, length: u64) -> Result<()> {
        self.check_writable()?;
        let file = fs::OpenOptions::new()
            .write(true)
            .open(self.path(path)?)
            .map_err(|e| StorageError::from_io(path, e))?;
        file.set_len(length)
            .map_err(|e| StorageError::from_io(path, e))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        self.check_writable()?;
        fs::rename(self.path(from)?, self.path(to)?).map_err(|e| StorageError::from_io(from, e))
    }

    fn utimens(&self, path: &Path, timestamp: i64) -> Result<()> {
        self.check_writable()?;
        let file = fs::OpenOptions::new()
            .write(true)
            .open(self.path(path)?)
            .map_err(|e| StorageError::from_io(path, e))?;
        let time = UNIX_EPOCH + std::time::Duration::from_secs(timestamp.max(0) as u64);
        file.set_modified(time)
            .map_err(|e| StorageError::from_io(path, e))
    }

    fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        self.check_writable()?;
        fs::set_permissions(self.path(path)?, fs::Permissions::from_mode(mode))
            .map_err(|e| StorageError::from_io(path, e))
    }

    fn get_file_token(&self, path: &Path) -> Result<Option<u64>> {
        let metadata = match fs::metadata(self.path(path)?) {
            Ok(metadata) => metadata,
            Err(_) => return Ok(None),
        };
        let mtime = match metadata.modified().ok().and_then(|t| t.duration_since(UNIX_EPOCH).ok()) {
            Some(duration) => duration,
            None => return Ok(None),
        };
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        // Two changes less than a millisecond apart can share an mtime;
        // refuse to hand out a token that may already be stale.
        if now.as_millis().abs_diff(mtime.as_millis()) < 1 {
            return Ok(None);
        }
        Ok(Some(mtime.as_millis() as u64))
    }

    fn open_for_safe_replace(
        &self,
        path: &Path,
        _flags: OpenFlags,
        expected_hash: &str,
    ) -> Result<Box<dyn File>> {
        self.check_writable()?;
        let current =
            fs::read(self.path(path)?).map_err(|e| StorageError::from_io(path, e))?;
        Ok(Box::new(SafeReplaceFile {
            backend_root: self.root.clone(),
            relative: path.to_path_buf(),
            expected_hash: expected_hash.to_string(),
            buf: current,
        }))
    }

    fn get_children(&self, query: Option<&str>) -> Result<Vec<Subcontainer>> {
        let pattern = self
            .manifest_pattern
            .clone()
            .unwrap_or_else(ManifestPattern::default_glob);
        children_links(self, &pattern, query)
    }

    fn watcher(&self) -> Option<Watcher> {
        // An explicit watcher-interval wins; otherwise the platform
        // notifier covers local trees.
        if let Some(secs) = self.params.get("watcher-interval").and_then(Value::as_u64) {
            return Some(Watcher::Polling {
                interval: std::time::Duration::from_secs(secs),
            });
        }
        match NotifyEventSource::new(&self.root) {
            Ok(source) => Some(Watcher::Native(Box::new(source))),
            Err(err) => {
                tracing::warn!("native watcher unavailable: {err}");
                None
            }
        }
    }
}
