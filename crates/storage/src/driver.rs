//! Direct backend manipulation outside a mounted tree.
//!
//! [`StorageDriver`] owns the mount/unmount bracket around a backend and
//! provides the whole-file conveniences used by the resolver, link
//! resolution and the sync daemon.

use std::path::Path;
use std::sync::Arc;

use crate::base::{OpenFlags, Result, StorageBackend, StorageError};

pub struct StorageDriver {
    backend: Arc<dyn StorageBackend>,
    mounted: bool,
}

impl StorageDriver {
    /// Mount the backend; unmounts on drop.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Result<Self> {
        backend.mount()?;
        Ok(StorageDriver {
            backend,
            mounted: true,
        })
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        let mut file = self.backend.open(path, OpenFlags::read_only())?;
        let attr = file.fgetattr()?;
        let data = file.read(attr.size as usize, 0)?;
        file.release()?;
        Ok(data)
    }

    pub fn write_file(&self, path: &Path, data: &[u8]) -> Result<()> {
        let exists = match self.backend.getattr(path) {
            Ok(_) => true,
            Err(StorageError::NotFound(_)) => false,
            Err(err) => return Err(err),
        };

        let mut file = if exists {
            let mut file = self.backend.open(path, OpenFlags::write_only())?;
            file.ftruncate(0)?;
            file
        } else {
            self.backend.create(path, OpenFlags::write_only(), 0o644)?
        };
        let result = file.write(data, 0);
        file.release()?;
        result.map(|_| ())
    }

    pub fn file_exists(&self, path: &Path) -> Result<bool> {
        match self.backend.getattr(path) {
            Ok(attr) => Ok(!attr.is_dir()),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub fn remove_file(&self, path: &Path) -> Result<()> {
        self.backend.unlink(path)
    }

    /// Create a directory and its missing parents. Does not cross into
    /// other containers.
    pub fn makedirs(&self, path: &Path, mode: u32) -> Result<()> {
        let mut ancestors: Vec<&Path> = path.ancestors().collect();
        ancestors.reverse();
        for ancestor in ancestors {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            match self.backend.getattr(ancestor) {
                Ok(attr) if attr.is_dir() => {}
                Ok(_) => return Err(StorageError::NotADirectory(ancestor.to_path_buf())),
                Err(StorageError::NotFound(_)) => self.backend.mkdir(ancestor, mode)?,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

impl Drop for StorageDriver {
    fn drop(&mut self) {
        if self.mounted {
            if let Err(err) = self.backend.unmount() {
                tracing::debug!("unmount on drop failed: {err}");
            }
        }
    }
}
