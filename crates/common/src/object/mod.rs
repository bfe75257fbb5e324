//! Typed views over manifest bodies.
//!
//! Each object type keeps a reference to its source [`Manifest`] (for
//! re-serialization) next to typed getters for its fields. Conversion back
//! to fields goes through `to_fields()`, used when publishing or inlining.

mod bridge;
mod container;
mod link;
mod storage;
mod user;

use std::str::FromStr;

pub use bridge::{Bridge, UserLocation};
pub use container::Container;
pub use link::Link;
pub use storage::{ManifestPattern, Storage};
pub use user::{CatalogEntry, User};

use crate::manifest::{Manifest, ManifestError};

/// The manifest type tag: the mandatory `object` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    User,
    Container,
    Storage,
    Bridge,
    Link,
}

impl ObjectType {
    pub fn tag(&self) -> &'static str {
        match self {
            ObjectType::User => "user",
            ObjectType::Container => "container",
            ObjectType::Storage => "storage",
            ObjectType::Bridge => "bridge",
            ObjectType::Link => "link",
        }
    }

    /// All tags, in the order used when expanding `{object-type}` in
    /// manifest patterns.
    pub fn all() -> [ObjectType; 5] {
        [
            ObjectType::User,
            ObjectType::Container,
            ObjectType::Storage,
            ObjectType::Bridge,
            ObjectType::Link,
        ]
    }
}

impl FromStr for ObjectType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(ObjectType::User),
            "container" => Ok(ObjectType::Container),
            "storage" => Ok(ObjectType::Storage),
            "bridge" => Ok(ObjectType::Bridge),
            "link" => Ok(ObjectType::Link),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// A loaded object of any type.
#[derive(Debug, Clone)]
pub enum WildlandObject {
    User(User),
    Container(Container),
    Storage(Storage),
    Bridge(Bridge),
    Link(Link),
}

impl WildlandObject {
    /// Dispatch on the manifest's `object` field.
    pub fn from_manifest(manifest: Manifest) -> Result<Self, ManifestError> {
        Ok(match manifest.object_type()? {
            ObjectType::User => WildlandObject::User(User::from_manifest(manifest)?),
            ObjectType::Container => {
                WildlandObject::Container(Container::from_manifest(manifest)?)
            }
            ObjectType::Storage => WildlandObject::Storage(Storage::from_manifest(manifest)?),
            ObjectType::Bridge => WildlandObject::Bridge(Bridge::from_manifest(manifest)?),
            ObjectType::Link => WildlandObject::Link(Link::from_manifest(manifest)?),
        })
    }

    pub fn object_type(&self) -> ObjectType {
        match self {
            WildlandObject::User(_) => ObjectType::User,
            WildlandObject::Container(_) => ObjectType::Container,
            WildlandObject::Storage(_) => ObjectType::Storage,
            WildlandObject::Bridge(_) => ObjectType::Bridge,
            WildlandObject::Link(_) => ObjectType::Link,
        }
    }

    pub fn owner(&self) -> &str {
        match self {
            WildlandObject::User(u) => u.owner(),
            WildlandObject::Container(c) => c.owner(),
            WildlandObject::Storage(s) => s.owner(),
            WildlandObject::Bridge(b) => b.owner(),
            WildlandObject::Link(l) => l.owner(),
        }
    }
}

pub(crate) fn str_field(
    fields: &serde_yaml::Mapping,
    key: &str,
) -> Result<String, ManifestError> {
    fields
        .get(key)
        .and_then(serde_yaml::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ManifestError::Malformed(format!("missing or non-string field '{key}'")))
}

pub(crate) fn str_list_field(
    fields: &serde_yaml::Mapping,
    key: &str,
) -> Result<Vec<String>, ManifestError> {
    match fields.get(key) {
        None => Ok(vec![]),
        Some(serde_yaml::Value::Sequence(seq)) => seq
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| ManifestError::Malformed(format!("non-string entry in '{key}'")))
            })
            .collect(),
        Some(_) => Err(ManifestError::Malformed(format!(
            "field '{key}' is not a list"
        ))),
    }
}
