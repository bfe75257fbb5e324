/**
 * Signature contexts and the keystore.
 *  - Owner fingerprints derived from public keys
 *  - Detached signing/verification over manifest bodies
 *  - A dummy context for tests
 */
pub mod crypto;
/**
 * The manifest envelope codec.
 * Parses the header+body format, verifies the
 *  detached signature and validates bodies against
 *  per-object schemas.
 */
pub mod manifest;
/**
 * Typed views over manifest bodies: users, containers,
 *  storages, bridges and links.
 */
pub mod object;
/**
 * The Wildland path grammar:
 *  [owner][@hint]:(/part)+:[file_path]
 */
pub mod path;

pub mod prelude {
    pub use crate::crypto::{DummySigContext, Ed25519SigContext, PublicKey, SigContext, SigError};
    pub use crate::manifest::{Manifest, ManifestError, SchemaSet};
    pub use crate::object::{
        Bridge, Container, Link, ManifestPattern, ObjectType, Storage, User, WildlandObject,
    };
    pub use crate::path::{PathError, WildlandPath};
}
