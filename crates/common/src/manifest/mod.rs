//! # Manifest envelope
//!
//! Every Wildland object travels as a manifest: a UTF-8 YAML header, a
//! delimiter line, and a UTF-8 YAML body. The header carries a detached
//! signature over the exact body bytes; the body carries the object fields
//! (`object`, `owner`, `version`, plus type-specific data).
//!
//! ```text
//! signature: |
//!   0xaaa...fff.9f2c...
//!   51be...
//! ---
//! object: container
//! owner: '0xaaa...fff'
//! version: '1'
//! paths:
//!   - /.uuid/...
//! ```
//!
//! The signed payload is exactly the bytes after the delimiter, with no
//! re-canonicalization, so a manifest round-trips byte-identically as long
//! as its fields are untouched.
//!
//! Inline sub-manifests (a storage embedded in a container, a link inside
//! a bridge) are plain mappings inside the enclosing body. They inherit
//! the enclosing owner unless they state one, and the enclosing envelope's
//! signature transitively authorizes them.

mod schema;

pub use schema::{yaml_to_json, Schema, SchemaSet};

use serde_yaml::{Mapping, Value};

use crate::crypto::{SigContext, SigError};
use crate::object::ObjectType;

/// Line separating the signature header from the body.
pub const HEADER_SEPARATOR: &[u8] = b"\n---\n";

/// The only supported manifest format version.
pub const WILDLAND_VERSION: &str = "1";

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("malformed manifest: {0}")]
    Malformed(String),
    #[error("schema violation at '{path}': {reason}")]
    Schema { path: String, reason: String },
    #[error(transparent)]
    Sig(#[from] SigError),
    #[error("unexpected owner: {actual} (expected {expected})")]
    WrongOwner { expected: String, actual: String },
    #[error("manifest is encrypted for other users")]
    Encrypted,
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// A parsed manifest: owner, body fields, the exact body bytes, and the
/// signature (absent only for freshly edited, not-yet-signed manifests).
#[derive(Debug, Clone)]
pub struct Manifest {
    owner: String,
    fields: Mapping,
    body: Vec<u8>,
    signature: Option<String>,
}

impl Manifest {
    /// Build a manifest from body fields. The body is serialized
    /// canonically right away; signing happens in [`Manifest::to_bytes`].
    pub fn from_fields(fields: Mapping) -> Result<Self, ManifestError> {
        let owner = owner_of(&fields)?;
        let body = serde_yaml::to_string(&fields)?.into_bytes();
        Ok(Manifest {
            owner,
            fields,
            body,
            signature: None,
        })
    }

    /// Accept body bytes only, marking the manifest unsigned. Used when
    /// re-reading a manifest that was just edited and will be re-signed.
    pub fn from_unsigned(body: &[u8]) -> Result<Self, ManifestError> {
        let fields: Mapping = serde_yaml::from_slice(body)
            .map_err(|e| ManifestError::Malformed(format!("body is not a mapping: {e}")))?;
        let owner = owner_of(&fields)?;
        Ok(Manifest {
            owner,
            fields,
            body: body.to_vec(),
            signature: None,
        })
    }

    /// An inline sub-manifest from a mapping inside an enclosing body.
    ///
    /// The sub-manifest inherits `default_owner` unless it states its own
    /// owner; its authorization comes from the enclosing envelope, so it
    /// carries no signature of its own.
    pub fn inline(mut fields: Mapping, default_owner: &str) -> Result<Self, ManifestError> {
        if !fields.contains_key("owner") {
            fields.insert("owner".into(), Value::String(default_owner.to_string()));
        }
        if !fields.contains_key("version") {
            fields.insert(
                "version".into(),
                Value::String(WILDLAND_VERSION.to_string()),
            );
        }
        Self::from_fields(fields)
    }

    /// Split raw bytes into `(signature, body_bytes)` at the delimiter.
    pub fn parse(bytes: &[u8]) -> Result<(Option<String>, &[u8]), ManifestError> {
        let (header_end, body_start) = find_separator(bytes).ok_or_else(|| {
            ManifestError::Malformed("no header separator ('---' line) found".into())
        })?;
        let header = &bytes[..header_end];
        let body = &bytes[body_start..];

        let header_str = std::str::from_utf8(header)
            .map_err(|_| ManifestError::Malformed("header is not UTF-8".into()))?;
        if header_str.trim().is_empty() {
            return Ok((None, body));
        }
        let header_map: Mapping = serde_yaml::from_str(header_str)
            .map_err(|e| ManifestError::Malformed(format!("header is not a mapping: {e}")))?;
        let signature = match header_map.get("signature") {
            Some(Value::String(s)) => Some(s.trim_end().to_string()),
            Some(_) => {
                return Err(ManifestError::Malformed(
                    "header signature is not a string".into(),
                ))
            }
            None => None,
        };
        Ok((signature, body))
    }

    /// Parse, verify the signature, check the owner and validate the body
    /// against the schema selected by its `object` field.
    ///
    /// An unsigned manifest is accepted only when `trusted_owner` matches
    /// the body owner (the manifest came from a `trusted` storage).
    pub fn verify_and_load(
        bytes: &[u8],
        sig_ctx: &dyn SigContext,
        expected_owner: Option<&str>,
        trusted_owner: Option<&str>,
        schemas: &SchemaSet,
    ) -> Result<Self, ManifestError> {
        let (signature, body) = Self::parse(bytes)?;

        let fields: Mapping = serde_yaml::from_slice(body)
            .map_err(|e| ManifestError::Malformed(format!("body is not a mapping: {e}")))?;
        let owner = owner_of(&fields)?;

        let signer = match &signature {
            Some(sig) => Some(sig_ctx.verify(sig, body, Some(&owner))?),
            None => {
                if trusted_owner != Some(owner.as_str()) {
                    return Err(SigError::MissingSignature.into());
                }
                tracing::debug!(owner, "accepting unsigned manifest from trusted storage");
                None
            }
        };
        if let Some(expected) = expected_owner {
            if expected != owner {
                return Err(ManifestError::WrongOwner {
                    expected: expected.to_string(),
                    actual: owner,
                });
            }
        }

        check_version(&fields)?;

        let manifest = Manifest {
            owner,
            fields,
            body: body.to_vec(),
            signature,
        };
        let object_type = manifest.object_type()?;

        // User manifests are self-certifying: only the primary key may
        // sign them.
        if object_type == ObjectType::User {
            if let (Some(signer), Some(primary)) =
                (&signer, sig_ctx.primary_pubkey(&manifest.owner))
            {
                if *signer != primary {
                    return Err(SigError::UntrustedSigner {
                        expected: manifest.owner.clone(),
                    }
                    .into());
                }
            }
        }

        schemas.validate(object_type, &yaml_to_json(&Value::Mapping(manifest.fields.clone()))?)?;
        Ok(manifest)
    }

    /// Serialize the envelope: sign the body bytes and prepend the header.
    pub fn to_bytes(&self, sig_ctx: &dyn SigContext) -> Result<Vec<u8>, ManifestError> {
        let signature = sig_ctx.sign(&self.owner, &self.body)?;

        let mut out = Vec::with_capacity(self.body.len() + signature.len() + 32);
        out.extend_from_slice(b"signature: |\n");
        for line in signature.lines() {
            out.extend_from_slice(b"  ");
            out.extend_from_slice(line.as_bytes());
            out.push(b'\n');
        }
        // The separator contributes the newline terminating the header.
        out.extend_from_slice(b"---\n");
        out.extend_from_slice(&self.body);
        Ok(out)
    }

    /// Validate the body against an additional schema (backend parameter
    /// schemas use this on top of the generic storage schema).
    pub fn apply_schema(&self, schema: &Schema) -> Result<(), ManifestError> {
        schema.validate(&yaml_to_json(&Value::Mapping(self.fields.clone()))?)
    }

    /// Replace the body fields; re-serializes the body canonically and
    /// drops the now-stale signature.
    pub fn update_fields(&mut self, fields: Mapping) -> Result<(), ManifestError> {
        self.owner = owner_of(&fields)?;
        self.body = serde_yaml::to_string(&fields)?.into_bytes();
        self.fields = fields;
        self.signature = None;
        Ok(())
    }

    /* Getters */

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn fields(&self) -> &Mapping {
        &self.fields
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    pub fn object_type(&self) -> Result<ObjectType, ManifestError> {
        let tag = self
            .fields
            .get("object")
            .and_then(Value::as_str)
            .ok_or_else(|| ManifestError::Malformed("missing 'object' field".into()))?;
        tag.parse()
            .map_err(|_| ManifestError::Malformed(format!("unknown object type: {tag}")))
    }

    /// The `access` list, if present: owner fingerprints, or `*` meaning
    /// no encryption.
    pub fn access(&self) -> Option<Vec<String>> {
        let list = self.fields.get("access")?.as_sequence()?;
        Some(
            list.iter()
                .filter_map(|entry| entry.get("user"))
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
        )
    }

    /// Does the access list admit the given owner (or everyone)?
    /// A manifest without an access list is readable by anyone holding it.
    pub fn readable_by(&self, owner: &str) -> bool {
        match self.access() {
            None => true,
            Some(users) => users.iter().any(|u| u == "*" || u == owner),
        }
    }
}

fn owner_of(fields: &Mapping) -> Result<String, ManifestError> {
    fields
        .get("owner")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ManifestError::Malformed("missing 'owner' field".into()))
}

fn check_version(fields: &Mapping) -> Result<(), ManifestError> {
    match fields.get("version").and_then(Value::as_str) {
        Some(WILDLAND_VERSION) => Ok(()),
        Some(other) => Err(ManifestError::Malformed(format!(
            "unsupported manifest version: {other}"
        ))),
        None => Err(ManifestError::Malformed("missing 'version' field".into())),
    }
}

/// Locate the delimiter line, returning `(header_end, body_start)`.
/// Header-less manifests may start with the separator line directly, in
/// which case the header is empty.
fn find_separator(bytes: &[u8]) -> Option<(usize, usize)> {
    if bytes.starts_with(b"---\n") {
        return Some((0, b"---\n".len()));
    }
    bytes
        .windows(HEADER_SEPARATOR.len())
        .position(|w| w == HEADER_SEPARATOR)
        .map(|pos| (pos, pos + HEADER_SEPARATOR.len()))
}
