use serde_yaml::{Mapping, Value};
use uuid::Uuid;

use crate::manifest::{Manifest, ManifestError};

use super::{str_field, str_list_field};

/// A logical bundle of content, mountable at several semantic paths and
/// backed by one or more interchangeable storages.
///
/// Invariant: the first path is always the synthetic `/.uuid/<uuid>` path.
#[derive(Debug, Clone)]
pub struct Container {
    owner: String,
    paths: Vec<String>,
    title: Option<String>,
    categories: Vec<String>,
    /// Storage references: URL strings or inline storage manifests.
    backends: Vec<Value>,
    access: Option<Vec<String>>,
    manifest: Option<Manifest>,
}

impl Container {
    pub fn from_manifest(manifest: Manifest) -> Result<Self, ManifestError> {
        let fields = manifest.fields();
        let owner = str_field(fields, "owner")?;
        let paths = str_list_field(fields, "paths")?;
        if paths.is_empty() {
            return Err(ManifestError::Malformed("container has no paths".into()));
        }
        let title = fields
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string);
        let categories = str_list_field(fields, "categories")?;
        let backends = match fields.get("backends").and_then(|b| b.get("storage")) {
            Some(Value::Sequence(seq)) => seq.clone(),
            Some(_) => {
                return Err(ManifestError::Malformed(
                    "backends.storage is not a list".into(),
                ))
            }
            None => vec![],
        };
        let access = manifest.access();

        Ok(Container {
            owner,
            paths,
            title,
            categories,
            backends,
            access,
            manifest: Some(manifest),
        })
    }

    /// A fresh local container. Generates the UUID path up front.
    pub fn new(
        owner: &str,
        paths: Vec<String>,
        title: Option<String>,
        categories: Vec<String>,
    ) -> Self {
        let uuid = Uuid::new_v4();
        let mut all_paths = vec![format!("/.uuid/{uuid}")];
        all_paths.extend(paths.into_iter().filter(|p| !is_uuid_path(p)));
        Container {
            owner: owner.to_string(),
            paths: all_paths,
            title,
            categories,
            backends: vec![],
            access: None,
            manifest: None,
        }
    }

    /* Getters */

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn access(&self) -> Option<&[String]> {
        self.access.as_deref()
    }

    /// Raw storage references (URLs or inline mappings), in manifest order.
    pub fn backend_refs(&self) -> &[Value] {
        &self.backends
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_ref()
    }

    /// The container UUID, extracted from the first path.
    pub fn uuid(&self) -> Result<Uuid, ManifestError> {
        self.paths
            .first()
            .and_then(|p| p.strip_prefix("/.uuid/"))
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| {
                ManifestError::Malformed(format!(
                    "container's first path is not a /.uuid/ path: {:?}",
                    self.paths.first()
                ))
            })
    }

    /// Extract the UUID from the first path, or generate one and prepend
    /// its synthetic path (for newly created containers).
    pub fn ensure_uuid(&mut self) -> Uuid {
        if let Ok(uuid) = self.uuid() {
            return uuid;
        }
        let uuid = Uuid::new_v4();
        self.paths.insert(0, format!("/.uuid/{uuid}"));
        uuid
    }

    pub fn uuid_path(&self) -> Result<String, ManifestError> {
        Ok(format!("/.uuid/{}", self.uuid()?))
    }

    /// Declared paths plus synthetic `/<category>/<title>` paths. A `.`
    /// title marks a container named by its category alone.
    pub fn expanded_paths(&self) -> Vec<String> {
        let mut expanded = self.paths.clone();
        if let Some(title) = &self.title {
            for category in &self.categories {
                let path = if title == "." {
                    category.clone()
                } else {
                    format!("{}/{}", category.trim_end_matches('/'), title)
                };
                if !expanded.contains(&path) {
                    expanded.push(path);
                }
            }
        }
        expanded
    }

    /* Mutation (paths and storages) */

    pub fn add_path(&mut self, path: String) {
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
    }

    pub fn remove_path(&mut self, path: &str) {
        // The synthetic UUID path stays.
        self.paths.retain(|p| p != path || is_uuid_path(p));
    }

    pub fn add_backend(&mut self, backend: Value) {
        self.backends.push(backend);
    }

    pub fn remove_backend(&mut self, backend_id: &str) {
        self.backends.retain(|b| {
            b.get("backend-id").and_then(Value::as_str) != Some(backend_id)
        });
    }

    pub fn set_backends(&mut self, backends: Vec<Value>) {
        self.backends = backends;
    }

    /// Duplicate the container: new UUID, same content. The caller is
    /// responsible for re-creating storages with fresh backend ids.
    pub fn duplicate(&self) -> Container {
        let uuid = Uuid::new_v4();
        let mut paths = vec![format!("/.uuid/{uuid}")];
        paths.extend(self.paths.iter().filter(|p| !is_uuid_path(p)).cloned());
        Container {
            owner: self.owner.clone(),
            paths,
            title: self.title.clone(),
            categories: self.categories.clone(),
            backends: self.backends.clone(),
            access: self.access.clone(),
            manifest: None,
        }
    }

    /// Serialize back into manifest body fields.
    pub fn to_fields(&self) -> Mapping {
        let mut fields = Mapping::new();
        fields.insert("object".into(), "container".into());
        fields.insert("owner".into(), self.owner.clone().into());
        fields.insert("version".into(), crate::manifest::WILDLAND_VERSION.into());
        fields.insert(
            "paths".into(),
            Value::Sequence(self.paths.iter().cloned().map(Value::String).collect()),
        );
        if let Some(title) = &self.title {
            fields.insert("title".into(), title.clone().into());
        }
        if !self.categories.is_empty() {
            fields.insert(
                "categories".into(),
                Value::Sequence(self.categories.iter().cloned().map(Value::String).collect()),
            );
        }
        let mut backends = Mapping::new();
        backends.insert("storage".into(), Value::Sequence(self.backends.clone()));
        fields.insert("backends".into(), Value::Mapping(backends));
        if let Some(access) = &self.access {
            let entries = access
                .iter()
                .map(|user| {
                    let mut entry = Mapping::new();
                    entry.insert("user".into(), user.clone().into());
                    Value::Mapping(entry)
                })
                .collect();
            fields.insert("access".into(), Value::Sequence(entries));
        }
        fields
    }

    pub fn to_manifest(&self) -> Result<Manifest, ManifestError> {
        Manifest::from_fields(self.to_fields())
    }
}

fn is_uuid_path(path: &str) -> bool {
    path.strip_prefix("/.uuid/")
        .map(|s| Uuid::parse_str(s).is_ok())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Container {
        Container::new(
            "0xaaa",
            vec!["/books/fiction".into()],
            Some("Dune".into()),
            vec!["/books/authors/Herbert".into(), "/genre/scifi".into()],
        )
    }

    #[test]
    fn test_first_path_is_uuid() {
        let container = sample();
        assert!(container.paths()[0].starts_with("/.uuid/"));
        container.uuid().unwrap();
    }

    #[test]
    fn test_expanded_paths_include_category_title() {
        let container = sample();
        let expanded = container.expanded_paths();
        assert!(expanded.contains(&"/books/fiction".to_string()));
        assert!(expanded.contains(&"/books/authors/Herbert/Dune".to_string()));
        assert!(expanded.contains(&"/genre/scifi/Dune".to_string()));
    }

    #[test]
    fn test_duplicate_gets_fresh_uuid() {
        let container = sample();
        let copy = container.duplicate();
        assert_ne!(container.uuid().unwrap(), copy.uuid().unwrap());
        assert_eq!(container.paths()[1..], copy.paths()[1..]);
    }

    #[test]
    fn test_fields_roundtrip() {
        let container = sample();
        let manifest = container.to_manifest().unwrap();
        let again = Container::from_manifest(manifest).unwrap();
        assert_eq!(again.paths(), container.paths());
        assert_eq!(again.title(), container.title());
        assert_eq!(again.categories(), container.categories());
    }
}
