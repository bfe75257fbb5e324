//! Delegate proxy: exposes a subdirectory of another container's storage.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_yaml::{Mapping, Value};

use crate::base::{
    Attr, BackendInit, File, OpenFlags, Result, StorageBackend, StorageError, Subcontainer,
};

pub const TYPE: &str = "delegate";

/// The `reference-container` parameter names the inner container; the
/// runtime resolves it and passes the live backend in [`BackendInit`].
pub struct DelegateBackend {
    params: Mapping,
    inner: Arc<dyn StorageBackend>,
    subdirectory: PathBuf,
}

impl DelegateBackend {
    pub fn new(init: BackendInit) -> Result<Self> {
        let inner = init.require_inner(TYPE)?;
        let subdirectory = match init.params.get("subdirectory") {
            Some(Value::String(s)) => {
                if !s.starts_with('/') {
                    return Err(StorageError::BackendInit(
                        "subdirectory needs to be an absolute path".into(),
                    ));
                }
                PathBuf::from(s.trim_start_matches('/'))
            }
            None => PathBuf::new(),
            Some(_) => {
                return Err(StorageError::BackendInit(
                    "subdirectory is not a string".into(),
                ))
            }
        };
        Ok(DelegateBackend {
            params: init.params,
            inner,
            subdirectory,
        })
    }

    fn path(&self, path: &Path) -> Result<PathBuf> {
        if path
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(StorageError::PermissionDenied(format!(
                "'..' forbidden in path: {}",
                path.display()
            )));
        }
        Ok(self.subdirectory.join(path))
    }
}

impl StorageBackend for DelegateBackend {
    fn backend_type(&self) -> &'static str {
        TYPE
    }

    fn params(&self) -> &Mapping {
        &self.params
    }

    fn mount(&self) -> Result<()> {
        self.inner.mount()
    }

    fn unmount(&self) -> Result<()> {
        self.inner.unmount()
    }

    fn clear_cache(&self) {
        self.inner.clear_cache()
    }

    fn open(&self, path: &Path, flags: OpenFlags) -> Result<Box<dyn File>> {
        self.inner.open(&self.path(path)?, flags)
    }

    fn create(&self, path: &Path, flags: OpenFlags, mode: u32) -> Result<Box<dyn File>> {
        self.inner.create(&self.path(path)?, flags, mode)
    }

    fn getattr(&self, path: &Path) -> Result<Attr> {
        self.inner.getattr(&self.path(path)?)
    }

    fn readdir(&self, path: &Path) -> Result<Vec<String>> {
        self.inner.readdir(&self.path(path)?)
    }

    fn mkdir(&self, path: &Path, mode: u32) -> Result<()> {
        self.inner.mkdir(&self.path(path)?, mode)
    }

    fn rmdir(&self, path: &Path) -> Result<()> {
        self.inner.rmdir(&self.path(path)?)
    }

    fn unlink(&self, path: &Path) -> Result<()> {
        self.inner.unlink(&self.path(path)?)
    }

    fn truncate(&self, path: &Path, length: u64) -> Result<()> {
        self.inner.truncate(&self.path(path)?, length)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        self.inner.rename(&self.path(from)?, &self.path(to)?)
    }

    fn utimens(&self, path: &Path, timestamp: i64) -> Result<()> {
        self.inner.utimens(&self.path(path)?, timestamp)
    }

    fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        self.inner.chmod(&self.path(path)?, mode)
    }

    fn get_file_token(&self, path: &Path) -> Result<Option<u64>> {
        self.inner.get_file_token(&self.path(path)?)
    }

    fn get_hash(&self, path: &Path) -> Result<String> {
        self.inner.get_hash(&self.path(path)?)
    }

    fn open_for_safe_replace(
        &self,
        path: &Path,
        flags: OpenFlags,
        expected_hash: &str,
    ) -> Result<Box<dyn File>> {
        self.inner
            .open_for_safe_replace(&self.path(path)?, flags, expected_hash)
    }

    fn get_children(&self, _query: Option<&str>) -> Result<Vec<Subcontainer>> {
        Ok(vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::local::LocalBackend;

    fn delegate_over(root: &Path, subdirectory: &str) -> DelegateBackend {
        let mut local_params = Mapping::new();
        local_params.insert("type".into(), "local".into());
        local_params.insert("location".into(), root.display().to_string().into());
        let local = Arc::new(LocalBackend::new(BackendInit::new(local_params)).unwrap());

        let mut params = Mapping::new();
        params.insert("type".into(), TYPE.into());
        params.insert("reference-container".into(), "wildland:@default:/inner:".into());
        params.insert("subdirectory".into(), subdirectory.into());
        DelegateBackend::new(BackendInit::with_inner(params, local)).unwrap()
    }

    #[test]
    fn test_delegate_remaps_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub/inner")).unwrap();
        std::fs::write(dir.path().join("sub/inner/f.txt"), b"deep").unwrap();

        let delegate = delegate_over(dir.path(), "/sub");
        assert_eq!(delegate.readdir(Path::new("")).unwrap(), ["inner"]);
        let mut file = delegate
            .open(Path::new("inner/f.txt"), OpenFlags::read_only())
            .unwrap();
        assert_eq!(file.read(100, 0).unwrap(), b"deep");
    }

    #[test]
    fn test_delegate_rejects_parent_components() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        let delegate = delegate_over(dir.path(), "/sub");
        assert!(matches!(
            delegate.getattr(Path::new("../secret")).unwrap_err(),
            StorageError::PermissionDenied(_)
        ));
    }
}
