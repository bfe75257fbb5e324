use serde_yaml::{Mapping, Value};
use uuid::Uuid;

use crate::manifest::{Manifest, ManifestError};

use super::{str_field, str_list_field};

/// Where a storage looks for subcontainer manifests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestPattern {
    /// A path template with `*`, `{path}` and `{object-type}` placeholders.
    Glob { path: String },
    /// An explicit list of absolute paths inside the storage.
    List { paths: Vec<String> },
}

impl ManifestPattern {
    /// Applied when a storage declares no pattern of its own.
    pub fn default_glob() -> Self {
        ManifestPattern::Glob {
            path: "/*.{object-type}.yaml".to_string(),
        }
    }

    pub fn from_fields(fields: &Mapping) -> Result<Self, ManifestError> {
        match fields.get("type").and_then(Value::as_str) {
            Some("glob") => {
                let path = str_field(fields, "path")?;
                if !path.starts_with('/') {
                    return Err(ManifestError::Malformed(format!(
                        "manifest-pattern glob path must be absolute: {path}"
                    )));
                }
                if path.matches("{path}").count() > 1 {
                    return Err(ManifestError::Malformed(
                        "manifest-pattern glob may contain at most one {path}".into(),
                    ));
                }
                Ok(ManifestPattern::Glob { path })
            }
            Some("list") => Ok(ManifestPattern::List {
                paths: str_list_field(fields, "paths")?,
            }),
            other => Err(ManifestError::Malformed(format!(
                "unknown manifest-pattern type: {other:?}"
            ))),
        }
    }

    pub fn to_fields(&self) -> Mapping {
        let mut fields = Mapping::new();
        match self {
            ManifestPattern::Glob { path } => {
                fields.insert("type".into(), "glob".into());
                fields.insert("path".into(), path.clone().into());
            }
            ManifestPattern::List { paths } => {
                fields.insert("type".into(), "list".into());
                fields.insert(
                    "paths".into(),
                    Value::Sequence(paths.iter().cloned().map(Value::String).collect()),
                );
            }
        }
        fields
    }
}

/// A concrete backend instance servicing a container.
///
/// The typed getters cover the common fields; backend-specific parameters
/// stay in the raw `params` mapping and are interpreted by the backend
/// constructor selected by `type`.
#[derive(Debug, Clone)]
pub struct Storage {
    owner: String,
    storage_type: String,
    backend_id: String,
    container_path: String,
    read_only: bool,
    trusted: bool,
    watcher_interval: Option<u64>,
    manifest_pattern: Option<ManifestPattern>,
    params: Mapping,
    manifest: Option<Manifest>,
}

impl Storage {
    pub fn from_manifest(manifest: Manifest) -> Result<Self, ManifestError> {
        let mut storage = Self::from_fields(manifest.fields().clone())?;
        storage.manifest = Some(manifest);
        Ok(storage)
    }

    pub fn from_fields(fields: Mapping) -> Result<Self, ManifestError> {
        let owner = str_field(&fields, "owner")?;
        let storage_type = str_field(&fields, "type")?;
        let backend_id = str_field(&fields, "backend-id")?;
        let container_path = str_field(&fields, "container-path")?;
        if !container_path.starts_with("/.uuid/") {
            return Err(ManifestError::Malformed(format!(
                "container-path must be a /.uuid/ path: {container_path}"
            )));
        }
        let read_only = fields
            .get("read-only")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let trusted = fields
            .get("trusted")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let watcher_interval = fields.get("watcher-interval").and_then(Value::as_u64);
        let manifest_pattern = match fields.get("manifest-pattern") {
            Some(Value::Mapping(m)) => Some(ManifestPattern::from_fields(m)?),
            Some(_) => {
                return Err(ManifestError::Malformed(
                    "manifest-pattern is not a mapping".into(),
                ))
            }
            None => None,
        };

        Ok(Storage {
            owner,
            storage_type,
            backend_id,
            container_path,
            read_only,
            trusted,
            watcher_interval,
            manifest_pattern,
            params: fields,
            manifest: None,
        })
    }

    /// Fields for a fresh storage attached to a container.
    ///
    /// `params` carries the backend-specific portion (e.g. `location` for
    /// a local storage); the common fields are filled in here, with a
    /// fresh `backend-id`.
    pub fn new_fields(
        owner: &str,
        storage_type: &str,
        container_path: &str,
        params: Mapping,
    ) -> Mapping {
        let mut fields = params;
        fields.insert("object".into(), "storage".into());
        fields.insert("owner".into(), owner.into());
        fields.insert("version".into(), crate::manifest::WILDLAND_VERSION.into());
        fields.insert("type".into(), storage_type.into());
        fields.insert("backend-id".into(), Uuid::new_v4().to_string().into());
        fields.insert("container-path".into(), container_path.into());
        fields
    }

    /* Getters */

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn storage_type(&self) -> &str {
        &self.storage_type
    }

    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }

    /// The UUID path of the container this storage belongs to.
    pub fn container_path(&self) -> &str {
        &self.container_path
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// Manifests found in a trusted storage may be accepted without a
    /// valid signature, under this storage's owner.
    pub fn trusted(&self) -> bool {
        self.trusted
    }

    pub fn watcher_interval(&self) -> Option<u64> {
        self.watcher_interval
    }

    pub fn manifest_pattern(&self) -> Option<&ManifestPattern> {
        self.manifest_pattern.as_ref()
    }

    /// The declared pattern, or the default glob.
    pub fn effective_manifest_pattern(&self) -> ManifestPattern {
        self.manifest_pattern
            .clone()
            .unwrap_or_else(ManifestPattern::default_glob)
    }

    /// The full parameter mapping, backend-specific fields included.
    pub fn params(&self) -> &Mapping {
        &self.params
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_ref()
    }

    /// Is this storage local to the machine (usable without network)?
    pub fn is_local(&self) -> bool {
        matches!(self.storage_type.as_str(), "local" | "static" | "zip")
    }

    pub fn to_fields(&self) -> Mapping {
        self.params.clone()
    }

    pub fn to_manifest(&self) -> Result<Manifest, ManifestError> {
        Manifest::from_fields(self.to_fields())
    }

    /// Give the storage a fresh `backend-id` (used when duplicating a
    /// container).
    pub fn refresh_backend_id(&mut self) {
        self.backend_id = Uuid::new_v4().to_string();
        self.params
            .insert("backend-id".into(), self.backend_id.clone().into());
    }
}
