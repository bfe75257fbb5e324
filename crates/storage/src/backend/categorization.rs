//! Categorization proxy: exposes subcontainers based on category tags
//! embedded in directory names.
//!
//! A directory name `prefix@postfix` splits at the tag: segments before
//! the `@` (and everything accumulated above) become *closed* categories,
//! the postfix opens a new category that keeps growing downward.
//! Underscores join category segments and turn into slashes. The first
//! directory that holds files yields a subcontainer carrying one path per
//! accumulated category.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_yaml::{Mapping, Value};
use uuid::Uuid;

use crate::base::{
    Attr, BackendInit, File, OpenFlags, Result, StorageBackend, StorageError, Subcontainer,
};

pub const TYPE: &str = "categorization";

/// One discovered subcontainer: the directory it delegates to, its title
/// and its categories.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubcontainerMetaInfo {
    pub dir_path: PathBuf,
    pub title: String,
    pub categories: BTreeSet<String>,
}

pub struct CategorizationBackend {
    params: Mapping,
    inner: Arc<dyn StorageBackend>,
    with_unclassified: bool,
    unclassified_path: String,
}

impl CategorizationBackend {
    pub fn new(init: BackendInit) -> Result<Self> {
        let inner = init.require_inner(TYPE)?;
        let with_unclassified = init
            .params
            .get("with-unclassified-category")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let unclassified_path = init
            .params
            .get("unclassified-category-path")
            .and_then(Value::as_str)
            .unwrap_or("/unclassified")
            .to_string();
        Ok(CategorizationBackend {
            params: init.params,
            inner,
            with_unclassified,
            unclassified_path,
        })
    }

    fn namespace(&self) -> Uuid {
        self.backend_id().parse().unwrap_or(Uuid::NAMESPACE_URL)
    }

    fn collect(&self) -> Result<BTreeSet<SubcontainerMetaInfo>> {
        let mut results = BTreeSet::new();
        self.collect_recursive(Path::new(""), "", &BTreeSet::new(), false, true, &mut results)?;
        Ok(results)
    }

    /// Walk the tree accumulating categories.
    ///
    /// `open_category` grows while descending through untagged
    /// directories; a tag closes the accumulated prefix and re-opens with
    /// the postfix. `fresh_tag` is true when no untagged directory has
    /// been entered since the last tag, in which case a file-holding
    /// directory is itself the category and its title is `.`.
    #[allow(clippy::too_many_arguments)]
    fn collect_recursive(
        &self,
        dir_path: &Path,
        open_category: &str,
        closed_categories: &BTreeSet<String>,
        tag_found: bool,
        fresh_tag: bool,
        results: &mut BTreeSet<SubcontainerMetaInfo>,
    ) -> Result<()> {
        let mut dir_contains_files = false;

        for name in self.inner.readdir(dir_path)? {
            let path = dir_path.join(&name);
            let attr = self.inner.getattr(&path)?;
            if !attr.is_dir() {
                dir_contains_files = true;
                continue;
            }

            let (prefix, postfix) = category_info(&name);
            if !postfix.is_empty() {
                let closed = format!("{open_category}{prefix}");
                let mut new_closed = closed_categories.clone();
                if !closed.is_empty() {
                    new_closed.insert(closed);
                }
                self.collect_recursive(&path, &postfix, &new_closed, true, true, results)?;
            } else {
                let new_open = format!("{open_category}{prefix}");
                self.collect_recursive(
                    &path,
                    &new_open,
                    closed_categories,
                    tag_found,
                    false,
                    results,
                )?;
            }
        }

        if dir_contains_files {
            let mut closed = closed_categories.clone();
            let (title, categories) = if !tag_found && self.with_unclassified {
                (".".to_string(), BTreeSet::from([self.unclassified_path.clone()]))
            } else if fresh_tag && !open_category.is_empty() {
                // The tag directory itself holds the files: the whole
                // open category closes, the directory has no name of its
                // own.
                closed.insert(open_category.to_string());
                (".".to_string(), closed)
            } else {
                let (category_prefix, title) = match open_category.rfind('/') {
                    Some(0) => (open_category.to_string(), ".".to_string()),
                    Some(pos) => (
                        open_category[..pos].to_string(),
                        open_category[pos + 1..].to_string(),
                    ),
                    None => (format!("/{open_category}"), ".".to_string()),
                };
                if !category_prefix.is_empty() && category_prefix != "/" {
                    closed.insert(category_prefix);
                }
                (if title.is_empty() { ".".to_string() } else { title }, closed)
            };

            results.insert(SubcontainerMetaInfo {
                dir_path: dir_path.to_path_buf(),
                title,
                categories,
            });
        }
        Ok(())
    }
}

/// Split a directory name at its category tag.
///
/// Returns `(prefix, postfix)` as absolute category paths; no tag means
/// the whole name is the prefix. A name with several tags (or a trailing
/// bare `@`) has no tag at all.
pub fn category_info(dir_name: &str) -> (String, String) {
    let (prefix, postfix) = match dir_name.split_once('@') {
        Some(split) => split,
        None => (dir_name, ""),
    };

    if dir_name.ends_with('@') || postfix.contains('@') {
        tracing::debug!(
            "directory [{dir_name}] has multiple or empty category tags, \
             treating it as untagged"
        );
        return (format!("/{dir_name}"), String::new());
    }

    (category_path(prefix), category_path(postfix))
}

/// Convert an underscore-joined category name to a slash-joined path.
/// In a run of underscores only the first becomes a slash; the rest stay
/// part of the name.
pub fn category_path(segment: &str) -> String {
    if segment.is_empty() {
        return String::new();
    }
    if segment == "_" {
        return "/_".to_string();
    }

    let chars: Vec<char> = segment.chars().collect();
    let mut converted = String::new();
    let mut idx = 0;
    while idx < chars.len() {
        if chars[idx] == '_' {
            converted.push('/');
            idx += 1;
            while idx < chars.len() && chars[idx] == '_' {
                converted.push('_');
                idx += 1;
            }
        } else {
            converted.push(chars[idx]);
            idx += 1;
        }
    }

    let trimmed = converted.trim_matches('/');
    format!("/{trimmed}")
}

impl StorageBackend for CategorizationBackend {
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
        self.inner.clear_cache()
    }

    fn open(&self, path: &Path, flags: OpenFlags) -> Result<Box<dyn File>> {
        self.inner.open(path, flags)
    }

    fn create(&self, _path: &Path, _flags: OpenFlags, _mode: u32) -> Result<Box<dyn File>> {
        Err(StorageError::ReadOnly)
    }

    fn getattr(&self, path: &Path) -> Result<Attr> {
        self.inner.getattr(path)
    }

    fn readdir(&self, path: &Path) -> Result<Vec<String>> {
        self.inner.readdir(path)
    }

    fn get_children(&self, _query: Option<&str>) -> Result<Vec<Subcontainer>> {
        let ns = self.namespace();
        let mut children = Vec::new();
        for info in self.collect()? {
            let dirpath = info.dir_path.display().to_string();
            let ident = Uuid::new_v5(&ns, dirpath.as_bytes());
            let subcontainer_path = format!("/{dirpath}");

            let mut storage = Mapping::new();
            storage.insert("type".into(), "delegate".into());
            storage.insert(
                "reference-container".into(),
                "wildland:@default:@parent-container:".into(),
            );
            storage.insert("subdirectory".into(), subcontainer_path.clone().into());
            storage.insert("backend-id".into(), ident.to_string().into());

            let mut backends = Mapping::new();
            backends.insert("storage".into(), Value::Sequence(vec![Value::Mapping(storage)]));

            let mut fields = Mapping::new();
            fields.insert("object".into(), "container".into());
            fields.insert(
                "paths".into(),
                Value::Sequence(vec![format!("/.uuid/{ident}").into()]),
            );
            fields.insert("title".into(), info.title.clone().into());
            fields.insert(
                "categories".into(),
                Value::Sequence(
                    info.categories
                        .iter()
                        .cloned()
                        .map(Value::String)
                        .collect(),
                ),
            );
            fields.insert("backends".into(), Value::Mapping(backends));

            children.push(Subcontainer::Fields {
                path: subcontainer_path,
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

    #[test]
    fn test_category_info_table() {
        // (input, prefix, postfix)
        let cases = [
            ("aaa_bbb_ccc", "/aaa/bbb/ccc", ""),
            ("aaa_bbb_ccc@ddd_eee_fff", "/aaa/bbb/ccc", "/ddd/eee/fff"),
            ("@aaa_bbb_ccc_ddd_eee", "", "/aaa/bbb/ccc/ddd/eee"),
            ("aaa @@ bbb", "/aaa @@ bbb", ""),
            ("_aaa bbb_ccc @ddd_", "/aaa bbb/ccc ", "/ddd"),
            ("_", "/_", ""),
        ];
        for (input, prefix, postfix) in cases {
            assert_eq!(
                category_info(input),
                (prefix.to_string(), postfix.to_string()),
                "input: {input:?}"
            );
        }
    }

    #[test]
    fn test_category_info_more_shapes() {
        let cases = [
            ("aaa", "/aaa", ""),
            ("aaa bbb ccc ddd", "/aaa bbb ccc ddd", ""),
            ("aaa bbb_ccc ddd", "/aaa bbb/ccc ddd", ""),
            ("aaa bbb_ccc ddd_", "/aaa bbb/ccc ddd", ""),
            ("_aaa bbb_ccc ddd_", "/aaa bbb/ccc ddd", ""),
            ("aaa @", "/aaa @", ""),
            (" ", "/ ", ""),
            ("aaa_@bbb @ccc", "/aaa_@bbb @ccc", ""),
            ("aaa_bbb @ccc_ddd", "/aaa/bbb ", "/ccc/ddd"),
            ("aaa_bbb@ccc ddd", "/aaa/bbb", "/ccc ddd"),
            ("@aaa", "", "/aaa"),
            ("@aaa_bbb_ccc_ddd__eee", "", "/aaa/bbb/ccc/ddd/_eee"),
            ("@_____", "", "/____"),
        ];
        for (input, prefix, postfix) in cases {
            assert_eq!(
                category_info(input),
                (prefix.to_string(), postfix.to_string()),
                "input: {input:?}"
            );
        }
    }

    fn proxy_over(root: &Path) -> CategorizationBackend {
        let mut local_params = Mapping::new();
        local_params.insert("type".into(), "local".into());
        local_params.insert("location".into(), root.display().to_string().into());
        let local = Arc::new(LocalBackend::new(BackendInit::new(local_params)).unwrap());

        let mut params = Mapping::new();
        params.insert("type".into(), TYPE.into());
        params.insert(
            "backend-id".into(),
            "5d4cbf32-78f8-4a1c-b0a6-8a6de1a6d2a3".into(),
        );
        params.insert("reference-container".into(), "wildland:@default:/data:".into());
        CategorizationBackend::new(BackendInit::with_inner(params, local)).unwrap()
    }

    #[test]
    fn test_tagged_tree_yields_subcontainer() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("@authors/Alice/@titles_Book1")).unwrap();
        std::fs::write(dir.path().join("@authors/Alice/@titles_Book1/a.pdf"), b"x").unwrap();

        let proxy = proxy_over(dir.path());
        let collected = proxy.collect().unwrap();
        assert_eq!(collected.len(), 1);
        let info = collected.into_iter().next().unwrap();
        assert_eq!(info.title, ".");
        assert_eq!(
            info.categories,
            BTreeSet::from(["/authors/Alice".to_string(), "/titles/Book1".to_string()])
        );
        assert_eq!(info.dir_path, Path::new("@authors/Alice/@titles_Book1"));
    }

    #[test]
    fn test_untagged_tree_title_from_trailing_segment() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("books_fiction/dune")).unwrap();
        std::fs::write(dir.path().join("books_fiction/dune/text.txt"), b"x").unwrap();

        let proxy = proxy_over(dir.path());
        let collected = proxy.collect().unwrap();
        assert_eq!(collected.len(), 1);
        let info = collected.into_iter().next().unwrap();
        assert_eq!(info.title, "dune");
        assert_eq!(
            info.categories,
            BTreeSet::from(["/books/fiction".to_string()])
        );
    }

    #[test]
    fn test_unclassified_category() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("plain")).unwrap();
        std::fs::write(dir.path().join("plain/file.txt"), b"x").unwrap();

        let mut local_params = Mapping::new();
        local_params.insert("type".into(), "local".into());
        local_params.insert("location".into(), dir.path().display().to_string().into());
        let local = Arc::new(LocalBackend::new(BackendInit::new(local_params)).unwrap());

        let mut params = Mapping::new();
        params.insert("type".into(), TYPE.into());
        params.insert("backend-id".into(), "b1".into());
        params.insert("with-unclassified-category".into(), true.into());
        let proxy = CategorizationBackend::new(BackendInit::with_inner(params, local)).unwrap();

        let collected = proxy.collect().unwrap();
        let info = collected.into_iter().next().unwrap();
        assert_eq!(
            info.categories,
            BTreeSet::from(["/unclassified".to_string()])
        );
    }

    #[test]
    fn test_children_manifest_shape() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("@genre_scifi")).unwrap();
        std::fs::write(dir.path().join("@genre_scifi/a.txt"), b"x").unwrap();

        let proxy = proxy_over(dir.path());
        let children = proxy.get_children(None).unwrap();
        assert_eq!(children.len(), 1);
        match &children[0] {
            Subcontainer::Fields { path, fields } => {
                assert_eq!(path, "/@genre_scifi");
                assert_eq!(
                    fields.get("categories").unwrap().as_sequence().unwrap()[0]
                        .as_str()
                        .unwrap(),
                    "/genre/scifi"
                );
                let storage = fields.get("backends").unwrap().get("storage").unwrap()
                    .as_sequence().unwrap()[0]
                    .as_mapping()
                    .unwrap();
                assert_eq!(
                    storage.get("subdirectory").unwrap().as_str().unwrap(),
                    "/@genre_scifi"
                );
            }
            other => panic!("expected fields, got {other:?}"),
        }
    }
}
