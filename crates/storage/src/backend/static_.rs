//! Static storage: a read-only tree defined inline in the storage
//! parameters. Heavily used by tests and tooling fixtures.

use std::path::Path;
use std::sync::Arc;

use serde_yaml::{Mapping, Value};

use crate::base::{Attr, BackendInit, File, OpenFlags, Result, StorageBackend, StorageError};
use crate::generated::{
    generated_getattr, generated_open, generated_readdir, Entry, FuncDir, StaticEntry,
};

pub const TYPE: &str = "static";

/// Build a generated tree from the `content` parameter: string values are
/// files, mappings are subdirectories.
fn build_tree(content: &Mapping) -> Result<Entry> {
    let mut entries: Vec<(String, Entry)> = Vec::new();
    for (key, value) in content {
        let name = key
            .as_str()
            .ok_or_else(|| StorageError::BackendInit("content keys must be strings".into()))?
            .to_string();
        let entry = match value {
            Value::String(text) => {
                Entry::File(Arc::new(StaticEntry::new(text.clone().into_bytes(), 0)))
            }
            Value::Mapping(sub) => build_tree(sub)?,
            _ => {
                return Err(StorageError::BackendInit(format!(
                    "content entry '{name}' is neither text nor a mapping"
                )))
            }
        };
        entries.push((name, entry));
    }
    entries.sort_by(|(a, _), (b, _)| a.cmp(b));
    Ok(Entry::Dir(Arc::new(FuncDir::new(move || {
        Ok(entries.clone())
    }))))
}

pub struct StaticBackend {
    params: Mapping,
    root: Entry,
}

impl StaticBackend {
    pub fn new(init: BackendInit) -> Result<Self> {
        let content = match init.params.get("content") {
            Some(Value::Mapping(m)) => m.clone(),
            Some(_) => {
                return Err(StorageError::BackendInit(
                    "'content' must be a mapping".into(),
                ))
            }
            None => Mapping::new(),
        };
        let root = build_tree(&content)?;
        Ok(StaticBackend {
            params: init.params,
            root,
        })
    }
}

impl StorageBackend for StaticBackend {
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
