//! Generated storage: lazy trees of directory and file entries built from
//! callbacks. Used for synthetic read-only filesystems (pseudomanifest
//! files, static parameter trees).

use std::path::Path;
use std::sync::Arc;

use crate::base::{Attr, File, Result, StorageError};

/// A node in a generated tree.
#[derive(Clone)]
pub enum Entry {
    Dir(Arc<dyn DirEntry>),
    File(Arc<dyn FileEntry>),
}

impl Entry {
    pub fn getattr(&self) -> Attr {
        match self {
            Entry::Dir(dir) => dir.getattr(),
            Entry::File(file) => file.getattr(),
        }
    }
}

/// A directory entry: can be listed.
pub trait DirEntry: Send + Sync {
    /// `(name, entry)` pairs of everything inside.
    fn get_entries(&self) -> Result<Vec<(String, Entry)>>;

    fn getattr(&self) -> Attr {
        Attr::dir(0)
    }

    /// Lookup by name; the default scans `get_entries`.
    fn get_entry(&self, name: &str) -> Result<Entry> {
        self.get_entries()?
            .into_iter()
            .find(|(entry_name, _)| entry_name == name)
            .map(|(_, entry)| entry)
            .ok_or_else(|| StorageError::NotFound(name.into()))
    }
}

/// A file entry: can be opened.
pub trait FileEntry: Send + Sync {
    fn getattr(&self) -> Attr;
    fn open(&self) -> Result<Box<dyn File>>;
}

/// Function-based directory.
pub struct FuncDir<F>
where
    F: Fn() -> Result<Vec<(String, Entry)>> + Send + Sync,
{
    entries: F,
    timestamp: i64,
}

impl<F> FuncDir<F>
where
    F: Fn() -> Result<Vec<(String, Entry)>> + Send + Sync,
{
    pub fn new(entries: F) -> Self {
        FuncDir {
            entries,
            timestamp: 0,
        }
    }
}

impl<F> DirEntry for FuncDir<F>
where
    F: Fn() -> Result<Vec<(String, Entry)>> + Send + Sync,
{
    fn get_entries(&self) -> Result<Vec<(String, Entry)>> {
        (self.entries)()
    }

    fn getattr(&self) -> Attr {
        Attr::dir(self.timestamp)
    }
}

/// A read-only file with fixed content.
pub struct StaticEntry {
    data: Vec<u8>,
    attr: Attr,
}

impl StaticEntry {
    pub fn new(data: Vec<u8>, timestamp: i64) -> Self {
        let attr = Attr::file_ro(data.len() as u64, timestamp);
        StaticEntry { data, attr }
    }
}

impl FileEntry for StaticEntry {
    fn getattr(&self) -> Attr {
        self.attr
    }

    fn open(&self) -> Result<Box<dyn File>> {
        Ok(Box::new(StaticFile {
            data: self.data.clone(),
            attr: self.attr,
        }))
    }
}

/// Open handle over fixed bytes.
pub struct StaticFile {
    data: Vec<u8>,
    attr: Attr,
}

impl StaticFile {
    pub fn new(data: Vec<u8>, attr: Attr) -> Self {
        StaticFile { data, attr }
    }
}

impl File for StaticFile {
    fn read(&mut self, length: usize, offset: u64) -> Result<Vec<u8>> {
        let start = (offset as usize).min(self.data.len());
        let end = start.saturating_add(length).min(self.data.len());
        Ok(self.data[start..end].to_vec())
    }

    fn fgetattr(&mut self) -> Result<Attr> {
        Ok(self.attr)
    }

    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Resolve a relative path within a generated tree.
pub fn find_entry(root: &Entry, path: &Path) -> Result<Entry> {
    let mut entry = root.clone();
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name == "." {
            continue;
        }
        entry = match entry {
            Entry::Dir(dir) => dir.get_entry(&name)?,
            Entry::File(_) => return Err(StorageError::NotFound(path.to_path_buf())),
        };
    }
    Ok(entry)
}

/// `readdir` over a generated tree.
pub fn generated_readdir(root: &Entry, path: &Path) -> Result<Vec<String>> {
    match find_entry(root, path)? {
        Entry::Dir(dir) => Ok(dir
            .get_entries()?
            .into_iter()
            .map(|(name, _)| name)
            .collect()),
        Entry::File(_) => Err(StorageError::NotADirectory(path.to_path_buf())),
    }
}

/// `getattr` over a generated tree.
pub fn generated_getattr(root: &Entry, path: &Path) -> Result<Attr> {
    Ok(find_entry(root, path)?.getattr())
}

/// `open` over a generated tree.
pub fn generated_open(root: &Entry, path: &Path) -> Result<Box<dyn File>> {
    match find_entry(root, path)? {
        Entry::File(file) => file.open(),
        Entry::Dir(_) => Err(StorageError::IsADirectory(path.to_path_buf())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> Entry {
        Entry::Dir(Arc::new(FuncDir::new(|| {
            Ok(vec![
                (
                    "readme.txt".to_string(),
                    Entry::File(Arc::new(StaticEntry::new(b"hello".to_vec(), 0))),
                ),
                (
                    "sub".to_string(),
                    Entry::Dir(Arc::new(FuncDir::new(|| {
                        Ok(vec![(
                            "inner.txt".to_string(),
                            Entry::File(Arc::new(StaticEntry::new(b"inner".to_vec(), 0))),
                        )])
                    }))),
                ),
            ])
        })))
    }

    #[test]
    fn test_generated_tree_walk() {
        let root = tree();
        assert_eq!(
            generated_readdir(&root, Path::new("")).unwrap(),
            ["readme.txt", "sub"]
        );
        assert!(generated_getattr(&root, Path::new("sub")).unwrap().is_dir());

        let mut file = generated_open(&root, Path::new("sub/inner.txt")).unwrap();
        assert_eq!(file.read(100, 0).unwrap(), b"inner");
    }

    #[test]
    fn test_generated_missing_entry() {
        let root = tree();
        assert!(matches!(
            generated_open(&root, Path::new("nope.txt")).unwrap_err(),
            StorageError::NotFound(_)
        ));
        assert!(matches!(
            generated_readdir(&root, Path::new("readme.txt")).unwrap_err(),
            StorageError::NotADirectory(_)
        ));
    }
}
