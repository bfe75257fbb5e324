use serde_yaml::{Mapping, Value};

use crate::manifest::{Manifest, ManifestError};

use super::{str_field, str_list_field};

/// One entry of a user's manifests catalog: where the user publishes
/// their container manifests.
#[derive(Debug, Clone)]
pub enum CatalogEntry {
    /// URL of a container manifest.
    Url(String),
    /// An inline container manifest body.
    Inline(Mapping),
}

/// A user: identity, keys, human-readable paths, and the catalog of
/// containers through which their manifests are published.
#[derive(Debug, Clone)]
pub struct User {
    owner: String,
    pubkeys: Vec<String>,
    paths: Vec<String>,
    manifests_catalog: Vec<CatalogEntry>,
    manifest: Option<Manifest>,
}

impl User {
    pub fn from_manifest(manifest: Manifest) -> Result<Self, ManifestError> {
        let fields = manifest.fields();
        let owner = str_field(fields, "owner")?;
        let pubkeys = str_list_field(fields, "pubkeys")?;
        if pubkeys.is_empty() {
            return Err(ManifestError::Malformed("user has no pubkeys".into()));
        }
        let paths = str_list_field(fields, "paths")?;
        let manifests_catalog = match fields.get("manifests-catalog") {
            None => vec![],
            Some(Value::Sequence(seq)) => seq
                .iter()
                .map(|entry| match entry {
                    Value::String(url) => Ok(CatalogEntry::Url(url.clone())),
                    Value::Mapping(m) => Ok(CatalogEntry::Inline(m.clone())),
                    _ => Err(ManifestError::Malformed(
                        "manifests-catalog entry is neither URL nor mapping".into(),
                    )),
                })
                .collect::<Result<_, _>>()?,
            Some(_) => {
                return Err(ManifestError::Malformed(
                    "manifests-catalog is not a list".into(),
                ))
            }
        };

        Ok(User {
            owner,
            pubkeys,
            paths,
            manifests_catalog,
            manifest: Some(manifest),
        })
    }

    pub fn new(owner: &str, primary_pubkey: String, paths: Vec<String>) -> Self {
        User {
            owner: owner.to_string(),
            pubkeys: vec![primary_pubkey],
            paths,
            manifests_catalog: vec![],
            manifest: None,
        }
    }

    /* Getters */

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// All pubkeys; the first is the primary key.
    pub fn pubkeys(&self) -> &[String] {
        &self.pubkeys
    }

    pub fn primary_pubkey(&self) -> &str {
        &self.pubkeys[0]
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn manifests_catalog(&self) -> &[CatalogEntry] {
        &self.manifests_catalog
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_ref()
    }

    pub fn add_pubkey(&mut self, pubkey: String) {
        if !self.pubkeys.contains(&pubkey) {
            self.pubkeys.push(pubkey);
        }
    }

    pub fn add_catalog_entry(&mut self, entry: CatalogEntry) {
        self.manifests_catalog.push(entry);
    }

    pub fn to_fields(&self) -> Mapping {
        let mut fields = Mapping::new();
        fields.insert("object".into(), "user".into());
        fields.insert("owner".into(), self.owner.clone().into());
        fields.insert("version".into(), crate::manifest::WILDLAND_VERSION.into());
        fields.insert(
            "pubkeys".into(),
            Value::Sequence(self.pubkeys.iter().cloned().map(Value::String).collect()),
        );
        fields.insert(
            "paths".into(),
            Value::Sequence(self.paths.iter().cloned().map(Value::String).collect()),
        );
        if !self.manifests_catalog.is_empty() {
            let entries = self
                .manifests_catalog
                .iter()
                .map(|entry| match entry {
                    CatalogEntry::Url(url) => Value::String(url.clone()),
                    CatalogEntry::Inline(m) => Value::Mapping(m.clone()),
                })
                .collect();
            fields.insert("manifests-catalog".into(), Value::Sequence(entries));
        }
        fields
    }

    pub fn to_manifest(&self) -> Result<Manifest, ManifestError> {
        Manifest::from_fields(self.to_fields())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_roundtrip() {
        let mut user = User::new("0xaaa", "aabbcc".into(), vec!["/users/Alice".into()]);
        user.add_catalog_entry(CatalogEntry::Url(
            "https://example.com/catalog.container.yaml".into(),
        ));

        let manifest = user.to_manifest().unwrap();
        let again = User::from_manifest(manifest).unwrap();
        assert_eq!(again.owner(), "0xaaa");
        assert_eq!(again.primary_pubkey(), "aabbcc");
        assert_eq!(again.paths(), ["/users/Alice"]);
        assert_eq!(again.manifests_catalog().len(), 1);
    }

    #[test]
    fn test_user_requires_pubkeys() {
        let mut fields = User::new("0xaaa", "k".into(), vec![]).to_fields();
        fields.insert("pubkeys".into(), Value::Sequence(vec![]));
        let manifest = Manifest::from_fields(fields).unwrap();
        assert!(User::from_manifest(manifest).is_err());
    }
}
