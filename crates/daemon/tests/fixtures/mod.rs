//! Shared fixtures for mount controller integration tests.

use std::path::Path;
use std::sync::Arc;

use client::client::Client;
use client::config::Config;
use common::manifest::Manifest;
use common::object::{Container, User};
use daemon::mount::MountController;
use daemon::testkit::RecordingFsDriver;
use serde_yaml::{Mapping, Value};
use tempfile::TempDir;

pub const OWNER: &str = "0xaaa";

/// Client + recording driver + controller in a fresh temp dir, with
/// `0xaaa` as the recognized default owner.
pub fn setup_controller() -> (TempDir, Arc<RecordingFsDriver>, MountController) {
    let dir = TempDir::new().unwrap();
    let mut config = Config::for_test(dir.path());
    config.set_alias("default", OWNER);

    std::fs::create_dir_all(dir.path().join("users")).unwrap();
    let user = User::new(OWNER, "aa11".into(), vec!["/users/alice".into()]);
    write_signed(
        &dir.path().join("users/alice.user.yaml"),
        OWNER,
        &user.to_manifest().unwrap(),
    );

    let client = Client::new(config).unwrap();
    let driver = RecordingFsDriver::new();
    let controller = MountController::new(client, driver.clone());
    (dir, driver, controller)
}

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

pub fn local_storage_fields(location: &Path, trusted: bool) -> Mapping {
    let mut fields = Mapping::new();
    fields.insert("object".into(), "storage".into());
    fields.insert("type".into(), "local".into());
    fields.insert("location".into(), location.display().to_string().into());
    fields.insert("backend-id".into(), uuid::Uuid::new_v4().to_string().into());
    if trusted {
        fields.insert("trusted".into(), true.into());
    }
    fields
}

pub fn local_container(owner: &str, paths: &[&str], location: &Path) -> Container {
    let mut container = Container::new(
        owner,
        paths.iter().map(|p| p.to_string()).collect(),
        None,
        vec![],
    );
    container.add_backend(Value::Mapping(local_storage_fields(location, false)));
    container
}
