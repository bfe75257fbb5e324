//! Shared fixtures for resolver integration tests.
//!
//! Builds a temp-dir client with the dummy signature context and a
//! default owner, and writes dummy-signed manifests into the config tree
//! or into storage directories.

use std::path::Path;

use client::client::Client;
use client::config::Config;
use common::manifest::Manifest;
use common::object::{Container, User};
use serde_yaml::{Mapping, Value};
use tempfile::TempDir;

pub const OWNER: &str = "0xaaa";

/// A client rooted in a fresh temp dir, `0xaaa` as the default owner,
/// with that user's manifest already in place.
pub fn setup_env() -> (TempDir, Client) {
    let dir = TempDir::new().unwrap();
    let mut config = Config::for_test(dir.path());
    config.set_alias("default", OWNER);
    config.set_alias("default-owner", OWNER);

    // Client::new creates the manifest directories; write the user
    // manifest first so recognition picks it up.
    std::fs::create_dir_all(dir.path().join("users")).unwrap();
    let user = User::new(OWNER, "aa11".into(), vec!["/users/alice".into()]);
    write_signed(
        &dir.path().join("users/alice.user.yaml"),
        OWNER,
        &user.to_manifest().unwrap(),
    );

    let client = Client::new(config).unwrap();
    (dir, client)
}

/// Serialize a manifest with a dummy signature header.
pub fn signed_bytes(manifest: &Manifest, owner: &str) -> Vec<u8> {
    let mut out = format!("signature: |\n  dummy.{owner}\n---\n").into_bytes();
    out.extend_from_slice(manifest.body());
    out
}

pub fn write_signed(path: &Path, owner: &str, manifest: &Manifest) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, signed_bytes(manifest, owner)).unwrap();
}

/// Inline fields for a local storage rooted at `location`.
pub fn local_storage_fields(location: &Path, trusted: bool, pattern: Option<&str>) -> Mapping {
    let mut fields = Mapping::new();
    fields.insert("object".into(), "storage".into());
    fields.insert("type".into(), "local".into());
    fields.insert(
        "location".into(),
        location.display().to_string().into(),
    );
    if trusted {
        fields.insert("trusted".into(), true.into());
    }
    if let Some(glob) = pattern {
        let mut mapping = Mapping::new();
        mapping.insert("type".into(), "glob".into());
        mapping.insert("path".into(), glob.into());
        fields.insert("manifest-pattern".into(), Value::Mapping(mapping));
    }
    fields
}

/// A container for `owner` with one inline local storage.
pub fn local_container(
    owner: &str,
    paths: &[&str],
    location: &Path,
    trusted: bool,
    pattern: Option<&str>,
) -> Container {
    let mut container = Container::new(
        owner,
        paths.iter().map(|p| p.to_string()).collect(),
        None,
        vec![],
    );
    container.add_backend(Value::Mapping(local_storage_fields(
        location, trusted, pattern,
    )));
    container
}
