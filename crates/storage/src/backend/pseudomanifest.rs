//! Pseudomanifest storage: a synthetic read-only tree exposing a single
//! `.manifest.wildland.yaml` with the current container manifest text.
//! The mount controller pairs one of these with every mounted container.

use std::path::Path;
use std::sync::Arc;

use serde_yaml::Mapping;

use crate::base::{Attr, BackendInit, File, OpenFlags, Result, StorageBackend, StorageError};
use crate::generated::{
    generated_getattr, generated_open, generated_readdir, Entry, FuncDir, StaticEntry,
};

pub const TYPE: &str = "pseudomanifest";

pub const PSEUDOMANIFEST_FILE: &str = ".manifest.wildland.yaml";

pub struct PseudomanifestBackend {
    params: Mapping,
    root: Entry,
}

impl PseudomanifestBackend {
    pub fn new(init: BackendInit) -> Result<Self> {
        let text = init.str_param("manifest-text")?;
        let entry = Entry::File(Arc::new(StaticEntry::new(text.into_bytes(), 0)));
        let root = Entry::Dir(Arc::new(FuncDir::new(move || {
            Ok(vec![(PSEUDOMANIFEST_FILE.to_string(), entry.clone())])
        })));
        Ok(PseudomanifestBackend {
            params: init.params,
            root,
        })
    }
}

impl StorageBackend for PseudomanifestBackend {
    fn backend_type(&self) -> &'static str {
        TYPE
    }

    fn params(&self) -> &Mapping {
        &self.params
    }

    fn read_only(&self) -> bool {
        true
    }

    fn open(&self, path: &Path, _flags: OpenFlags) -> Result<Box<dyn File>> {
        generated_open(&self.root, path)
    }

    fn create(&self, _path: &Path, _flags: OpenFlags, _mode: u32) -> Result<Box<dyn File>> {
        Err(StorageError::ReadOnly)
    }

    fn getattr(&self, path: &Path) -> Result<Attr> {
        generated_getattr(&self.root, path)
    }

    fn readdir(&self, path: &Path) -> Result<Vec<String>> {
        generated_readdir(&self.root, path)
    }
}
