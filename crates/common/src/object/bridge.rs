use serde_yaml::{Mapping, Value};

use crate::manifest::{Manifest, ManifestError};

use super::{str_field, str_list_field, Link};

/// Where a bridge's target user manifest lives.
#[derive(Debug, Clone)]
pub enum UserLocation {
    Url(String),
    Link(Link),
}

/// A signed declaration grafting another user's namespace into the
/// bridging user's namespace under the bridge paths.
#[derive(Debug, Clone)]
pub struct Bridge {
    owner: String,
    /// Fingerprint of the target user.
    user: String,
    /// The target user's claimed primary pubkey; must match the pubkey in
    /// the target's user manifest once fetched.
    pubkey: String,
    user_location: UserLocation,
    paths: Vec<String>,
    manifest: Option<Manifest>,
}

impl Bridge {
    pub fn from_manifest(manifest: Manifest) -> Result<Self, ManifestError> {
        let fields = manifest.fields();
        let owner = str_field(fields, "owner")?;
        let user = str_field(fields, "user")?;
        let pubkey = str_field(fields, "pubkey")?;
        let user_location = match fields.get("user-location") {
            Some(Value::String(url)) => UserLocation::Url(url.clone()),
            Some(Value::Mapping(m)) => {
                UserLocation::Link(Link::from_fields(m.clone(), Some(&owner))?)
            }
            _ => {
                return Err(ManifestError::Malformed(
                    "user-location is neither URL nor link".into(),
                ))
            }
        };
        let paths = str_list_field(fields, "paths")?;
        if paths.is_empty() {
            return Err(ManifestError::Malformed("bridge has no paths".into()));
        }

        Ok(Bridge {
            owner,
            user,
            pubkey,
            user_location,
            paths,
            manifest: Some(manifest),
        })
    }

    pub fn new(
        owner: &str,
        user: &str,
        pubkey: String,
        user_location: UserLocation,
        paths: Vec<String>,
    ) -> Self {
        Bridge {
            owner: owner.to_string(),
            user: user.to_string(),
            pubkey,
            user_location,
            paths,
            manifest: None,
        }
    }

    /* Getters */

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn pubkey(&self) -> &str {
        &self.pubkey
    }

    pub fn user_location(&self) -> &UserLocation {
        &self.user_location
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_ref()
    }

    /// Rewrite target paths into `/forests/<fingerprint>-<slug>` so an
    /// untrusted bridge cannot inject arbitrary names into the local
    /// namespace.
    pub fn create_safe_bridge_paths(fingerprint: &str, target_paths: &[String]) -> Vec<String> {
        target_paths
            .iter()
            .map(|path| format!("/forests/{}-{}", fingerprint, slug(path)))
            .collect()
    }

    pub fn to_fields(&self) -> Mapping {
        let mut fields = Mapping::new();
        fields.insert("object".into(), "bridge".into());
        fields.insert("owner".into(), self.owner.clone().into());
        fields.insert("version".into(), crate::manifest::WILDLAND_VERSION.into());
        fields.insert("user".into(), self.user.clone().into());
        fields.insert("pubkey".into(), self.pubkey.clone().into());
        match &self.user_location {
            UserLocation::Url(url) => {
                fields.insert("user-location".into(), url.clone().into());
            }
            UserLocation::Link(link) => {
                fields.insert("user-location".into(), Value::Mapping(link.to_fields()));
            }
        }
        fields.insert(
            "paths".into(),
            Value::Sequence(self.paths.iter().cloned().map(Value::String).collect()),
        );
        fields
    }

    pub fn to_manifest(&self) -> Result<Manifest, ManifestError> {
        Manifest::from_fields(self.to_fields())
    }
}

/// Flatten an absolute path into a single safe component: separators turn
/// into dashes, anything outside `[A-Za-z0-9_.-]` into underscores.
fn slug(path: &str) -> String {
    path.trim_matches('/')
        .chars()
        .map(|c| match c {
            '/' => '-',
            c if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' => c,
            _ => '_',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_bridge_paths() {
        let paths = Bridge::create_safe_bridge_paths(
            "0xaaa",
            &["/users/Alice".to_string(), "/people/a b!".to_string()],
        );
        assert_eq!(paths, ["/forests/0xaaa-users-Alice", "/forests/0xaaa-people-a_b_"]);
    }

    #[test]
    fn test_bridge_roundtrip() {
        let bridge = Bridge::new(
            "0xaaa",
            "0xbbb",
            "ddeeff".into(),
            UserLocation::Url("https://example.com/bob.user.yaml".into()),
            vec!["/users/Bob".into()],
        );
        let manifest = bridge.to_manifest().unwrap();
        let again = Bridge::from_manifest(manifest).unwrap();
        assert_eq!(again.user(), "0xbbb");
        assert_eq!(again.paths(), ["/users/Bob"]);
        assert!(matches!(again.user_location(), UserLocation::Url(_)));
    }
}
