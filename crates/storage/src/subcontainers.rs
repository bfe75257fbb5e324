//! File-based subcontainer discovery.
//!
//! A storage's `manifest-pattern` tells the resolver where container
//! manifests live inside it: either a glob template (`/manifests/{path}/
//! *.{object-type}.yaml`) or an explicit list of paths. Matching files
//! are returned as [`Link`]s into this storage.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde_yaml::Value;

use common::object::{Link, ManifestPattern, ObjectType};

use crate::base::{Result, StorageBackend, Subcontainer};

/// Substitute `{path}` with the queried container path (or the `.uuid`
/// wildcard when enumerating everything) and expand `{object-type}`.
/// Returns one absolute glob path per object type mentioned.
pub fn expand_glob(pattern_path: &str, query: Option<&str>) -> Vec<String> {
    let relative_query = match query {
        Some(query) => query.trim_start_matches('/').to_string(),
        // Enumerate via /.uuid/ paths to avoid loading each manifest
        // once per alias path.
        None => ".uuid/*".to_string(),
    };
    let substituted = pattern_path.replace("{path}", &relative_query);

    if substituted.contains("{object-type}") {
        ObjectType::all()
            .iter()
            .map(|object_type| substituted.replace("{object-type}", object_type.tag()))
            .collect()
    } else {
        vec![substituted]
    }
}

/// Find all files in `backend` matching the manifest pattern for `query`.
/// Paths are returned absolute (leading `/`), storage-relative.
pub fn find_manifest_files(
    backend: &dyn StorageBackend,
    pattern: &ManifestPattern,
    query: Option<&str>,
) -> Result<Vec<String>> {
    match pattern {
        ManifestPattern::List { paths } => {
            let mut found = Vec::new();
            for path in paths {
                let relative = Path::new(path.trim_start_matches('/'));
                match backend.getattr(relative) {
                    Ok(attr) if !attr.is_dir() => found.push(path.clone()),
                    Ok(_) => {}
                    Err(err) if err.is_recoverable() => {}
                    Err(err) => return Err(err),
                }
            }
            Ok(found)
        }
        ManifestPattern::Glob { path } => {
            let mut found = Vec::new();
            for glob_path in expand_glob(path, query) {
                let parts: Vec<String> = glob_path
                    .trim_start_matches('/')
                    .split('/')
                    .map(str::to_string)
                    .collect();
                glob_walk(backend, Path::new(""), &parts, &mut found)?;
            }
            Ok(found
                .into_iter()
                .map(|p| format!("/{}", p.display()))
                .collect())
        }
    }
}

fn glob_walk(
    backend: &dyn StorageBackend,
    prefix: &Path,
    parts: &[String],
    found: &mut Vec<PathBuf>,
) -> Result<()> {
    let (part, rest) = match parts.split_first() {
        Some(split) => split,
        None => return Ok(()),
    };

    if part.contains('*') {
        let names = match backend.readdir(prefix) {
            Ok(names) => names,
            Err(err) if err.is_recoverable() => return Ok(()),
            Err(err) => return Err(err),
        };
        let regex = glob_part_regex(part);
        for name in names {
            if !regex.is_match(&name) {
                continue;
            }
            let sub_prefix = prefix.join(&name);
            if rest.is_empty() {
                found.push(sub_prefix);
            } else {
                glob_walk(backend, &sub_prefix, rest, found)?;
            }
        }
    } else if !rest.is_empty() {
        glob_walk(backend, &prefix.join(part), rest, found)?;
    } else {
        // End of a literal path: keep it if the file is there.
        let full = prefix.join(part);
        match backend.getattr(&full) {
            Ok(_) => found.push(full),
            Err(err) if err.is_recoverable() => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

fn glob_part_regex(part: &str) -> Regex {
    let pattern = format!("^{}$", regex::escape(part).replace(r"\*", ".*"));
    Regex::new(&pattern).expect("escaped glob pattern is a valid regex")
}

/// `get_children` for file-backed storages: every matching manifest file
/// becomes a Link into this storage.
pub fn children_links(
    backend: &dyn StorageBackend,
    pattern: &ManifestPattern,
    query: Option<&str>,
) -> Result<Vec<Subcontainer>> {
    let owner = backend
        .params()
        .get("owner")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(find_manifest_files(backend, pattern, query)?
        .into_iter()
        .map(|path| Subcontainer::Link {
            link: Link::new(backend.params().clone(), path.clone(), &owner),
            path,
        })
        .collect())
}

/// The file pattern a mount watcher should observe for `query`, with the
/// `{path}` placeholder already substituted.
pub fn watch_pattern(pattern: &ManifestPattern, query: &str) -> Vec<String> {
    match pattern {
        ManifestPattern::Glob { path } => expand_glob(path, Some(query)),
        ManifestPattern::List { paths } => paths.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_glob_substitutions() {
        assert_eq!(
            expand_glob("/manifests/{path}/*.yaml", Some("/books/scifi")),
            ["/manifests/books/scifi/*.yaml"]
        );
        assert_eq!(
            expand_glob("/manifests/{path}/*.yaml", None),
            ["/manifests/.uuid/*/*.yaml"]
        );
    }

    #[test]
    fn test_expand_glob_object_types() {
        let expanded = expand_glob("/*.{object-type}.yaml", Some("/x"));
        assert!(expanded.contains(&"/*.container.yaml".to_string()));
        assert!(expanded.contains(&"/*.bridge.yaml".to_string()));
        assert_eq!(expanded.len(), 5);
    }

    #[test]
    fn test_glob_part_regex() {
        let regex = glob_part_regex("*.container.yaml");
        assert!(regex.is_match("foo.container.yaml"));
        assert!(!regex.is_match("foo.container.yaml.bak"));
        assert!(!regex.is_match("foo.bridge.yaml"));
    }
}
