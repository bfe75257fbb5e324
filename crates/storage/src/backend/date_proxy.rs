//! Date proxy: re-organizes the files of an inner storage into
//! `/timeline/YYYY/MM/DD/` directories based on modification dates.
//!
//! A pure, read-only function of the inner backend's listing. Directory
//! timestamps are ignored and empty directories disappear.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_yaml::{Mapping, Value};
use uuid::Uuid;

use crate::base::{
    Attr, BackendInit, File, OpenFlags, Result, StorageBackend, StorageError, Subcontainer,
};
use crate::base::walk_files;
use crate::cached::{CachedStorage, DirCache};

pub const TYPE: &str = "date-proxy";

pub struct DateProxyBackend {
    params: Mapping,
    inner: Arc<dyn StorageBackend>,
    cache: DirCache,
}

impl DateProxyBackend {
    pub fn new(init: BackendInit) -> Result<Self> {
        let inner = init.require_inner(TYPE)?;
        Ok(DateProxyBackend {
            params: init.params,
            inner,
            cache: DirCache::new(),
        })
    }

    fn date_str(timestamp: i64) -> String {
        let date = Utc
            .timestamp_opt(timestamp, 0)
            .single()
            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().expect("epoch is valid"));
        date.format("%Y/%m/%d").to_string()
    }

    /// Split `2020/10/10/foo/bar.txt` into the date prefix and the inner
    /// path; requests without a full date prefix cannot name a file.
    fn split_path(path: &Path) -> (Option<String>, PathBuf) {
        let components: Vec<String> = path
            .iter()
            .map(|c| c.to_string_lossy().into_owned())
            .collect();
        if components.len() <= 3 {
            return (None, path.to_path_buf());
        }
        let date = components[..3].join("/");
        let rest: PathBuf = components[3..].iter().collect();
        (Some(date), rest)
    }

    fn namespace(&self) -> Uuid {
        self.backend_id()
            .parse()
            .unwrap_or(Uuid::NAMESPACE_URL)
    }

    /// Every date that has at least one file.
    fn dates(&self) -> Result<Vec<String>> {
        let mut dates: Vec<String> = walk_files(self.inner.as_ref(), Path::new(""))?
            .into_iter()
            .map(|(_, attr)| Self::date_str(attr.timestamp))
            .collect();
        dates.sort();
        dates.dedup();
        Ok(dates)
    }
}

impl CachedStorage for DateProxyBackend {
    fn info_all(&self) -> Result<Vec<(PathBuf, Attr)>> {
        Ok(walk_files(self.inner.as_ref(), Path::new(""))?
            .into_iter()
            .map(|(path, attr)| {
                let prefixed = Path::new(&Self::date_str(attr.timestamp)).join(path);
                (prefixed, attr)
            })
            .collect())
    }

    fn cache(&self) -> &DirCache {
        &self.cache
    }
}

impl StorageBackend for DateProxyBackend {
    fn backend_type(&self) -> &'static str {
        TYPE
    }

    fn params(&self) -> &Mapping {
        &self.params
    }

    fn read_only(&self) -> bool {
        true
    }

    fn mount(&self) -> Result<()> {
        self.inner.mount()
    }

    fn unmount(&self) -> Result<()> {
        self.inner.unmount()
    }

    fn clear_cache(&self) {
        self.cache.clear();
        self.inner.clear_cache();
    }

    fn open(&self, path: &Path, flags: OpenFlags) -> Result<Box<dyn File>> {
        let (date, inner_path) = Self::split_path(path);
        let date = date.ok_or_else(|| StorageError::NotFound(path.to_path_buf()))?;
        let attr = self.inner.getattr(&inner_path)?;
        if date != Self::date_str(attr.timestamp) {
            return Err(StorageError::NotFound(path.to_path_buf()));
        }
        self.inner.open(&inner_path, flags)
    }

    fn create(&self, _path: &Path, _flags: OpenFlags, _mode: u32) -> Result<Box<dyn File>> {
        Err(StorageError::ReadOnly)
    }

    fn getattr(&self, path: &Path) -> Result<Attr> {
        self.cached_getattr(path)
    }

    fn readdir(&self, path: &Path) -> Result<Vec<String>> {
        self.cached_readdir(path)
    }

    fn get_children(&self, _query: Option<&str>) -> Result<Vec<Subcontainer>> {
        let ns = self.namespace();
        let mut children = Vec::new();
        for date in self.dates()? {
            let ident = Uuid::new_v5(&ns, date.as_bytes());
            let timeline_path = format!("/timeline/{date}");

            let mut storage = Mapping::new();
            storage.insert("type".into(), "delegate".into());
            storage.insert(
                "reference-container".into(),
                "wildland:@default:@parent-container:".into(),
            );
            storage.insert("subdirectory".into(), format!("/{date}").into());
            storage.insert("backend-id".into(), ident.to_string().into());

            let mut backends = Mapping::new();
            backends.insert("storage".into(), Value::Sequence(vec![Value::Mapping(storage)]));

            let mut fields = Mapping::new();
            fields.insert("object".into(), "container".into());
            fields.insert(
                "paths".into(),
                Value::Sequence(vec![
                    format!("/.uuid/{ident}").into(),
                    timeline_path.clone().into(),
                ]),
            );
            fields.insert("backends".into(), Value::Mapping(backends));

            children.push(Subcontainer::Fields {
                path: timeline_path,
                fields,
            });
        }
        Ok(children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::local::LocalBackend;

    fn proxy_over(root: &Path) -> DateProxyBackend {
        let mut local_params = Mapping::new();
        local_params.insert("type".into(), "local".into());
        local_params.insert("location".into(), root.display().to_string().into());
        let local = Arc::new(LocalBackend::new(BackendInit::new(local_params)).unwrap());

        let mut params = Mapping::new();
        params.insert("type".into(), TYPE.into());
        params.insert(
            "backend-id".into(),
            "7a126e82-7c1c-4f2d-b09a-ae23a02d3f5a".into(),
        );
        params.insert("reference-container".into(), "wildland:@default:/data:".into());
        DateProxyBackend::new(BackendInit::with_inner(params, local)).unwrap()
    }

    fn set_mtime(path: &Path, timestamp: i64) {
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        let time = std::time::UNIX_EPOCH + std::time::Duration::from_secs(timestamp as u64);
        file.set_modified(time).unwrap();
    }

    // 2020-10-10T12:00:00Z
    const TS: i64 = 1602331200;

    #[test]
    fn test_timeline_listing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("photo.jpg"), b"img").unwrap();
        set_mtime(&dir.path().join("photo.jpg"), TS);

        let proxy = proxy_over(dir.path());
        assert_eq!(proxy.readdir(Path::new("")).unwrap(), ["2020"]);
        assert_eq!(proxy.readdir(Path::new("2020")).unwrap(), ["10"]);
        assert_eq!(
            proxy.readdir(Path::new("2020/10/10")).unwrap(),
            ["photo.jpg"]
        );
    }

    #[test]
    fn test_open_validates_date_prefix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("photo.jpg"), b"img").unwrap();
        set_mtime(&dir.path().join("photo.jpg"), TS);

        let proxy = proxy_over(dir.path());
        let mut file = proxy
            .open(Path::new("2020/10/10/photo.jpg"), OpenFlags::read_only())
            .unwrap();
        assert_eq!(file.read(100, 0).unwrap(), b"img");

        assert!(matches!(
            proxy
                .open(Path::new("1999/01/01/photo.jpg"), OpenFlags::read_only())
                .unwrap_err(),
            StorageError::NotFound(_)
        ));
    }

    #[test]
    fn test_children_one_per_date() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"b").unwrap();
        set_mtime(&dir.path().join("a.txt"), TS);
        set_mtime(&dir.path().join("b.txt"), TS);

        let proxy = proxy_over(dir.path());
        let children = proxy.get_children(None).unwrap();
        assert_eq!(children.len(), 1);
        match &children[0] {
            Subcontainer::Fields { path, fields } => {
                assert_eq!(path, "/timeline/2020/10/10");
                let paths = fields.get("paths").unwrap().as_sequence().unwrap();
                assert!(paths[0].as_str().unwrap().starts_with("/.uuid/"));
                assert_eq!(paths[1].as_str().unwrap(), "/timeline/2020/10/10");
            }
            other => panic!("expected fields, got {other:?}"),
        }
    }
}
