use serde_yaml::{Mapping, Value};

use crate::manifest::{Manifest, ManifestError};

use super::str_field;

/// A pointer to a single file inside a specific storage.
///
/// The storage is an inline storage manifest; resolving the link means
/// instantiating that storage and reading `file` from it, which happens
/// at the client layer.
#[derive(Debug, Clone)]
pub struct Link {
    storage_fields: Mapping,
    file: String,
    owner: String,
}

impl Link {
    pub fn from_manifest(manifest: Manifest) -> Result<Self, ManifestError> {
        let owner = manifest.owner().to_string();
        Self::from_fields(manifest.fields().clone(), Some(&owner))
    }

    pub fn from_fields(fields: Mapping, default_owner: Option<&str>) -> Result<Self, ManifestError> {
        let file = str_field(&fields, "file")?;
        if !file.starts_with('/') {
            return Err(ManifestError::Malformed(format!(
                "link file path must be absolute: {file}"
            )));
        }
        let storage_fields = match fields.get("storage") {
            Some(Value::Mapping(m)) => m.clone(),
            _ => {
                return Err(ManifestError::Malformed(
                    "link storage is not an inline manifest".into(),
                ))
            }
        };
        let owner = fields
            .get("owner")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| default_owner.map(str::to_string))
            .ok_or_else(|| ManifestError::Malformed("link has no owner".into()))?;

        Ok(Link {
            storage_fields,
            file,
            owner,
        })
    }

    pub fn new(storage_fields: Mapping, file: String, owner: &str) -> Self {
        Link {
            storage_fields,
            file,
            owner: owner.to_string(),
        }
    }

    /* Getters */

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Inline manifest fields of the storage holding the target file.
    pub fn storage_fields(&self) -> &Mapping {
        &self.storage_fields
    }

    /// Absolute path of the target file within the storage.
    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn to_fields(&self) -> Mapping {
        let mut fields = Mapping::new();
        fields.insert("object".into(), "link".into());
        fields.insert("storage".into(), Value::Mapping(self.storage_fields.clone()));
        fields.insert("file".into(), self.file.clone().into());
        fields
    }
}
