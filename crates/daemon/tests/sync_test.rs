//! Sync daemon tests: convergence, deletion propagation, conflict
//! detection and listing.

use std::path::Path;
use std::sync::Arc;

use daemon::hashdb::HashDb;
use daemon::sync::Syncer;
use serde_yaml::Mapping;
use storage::base::{BackendInit, StorageBackend};
use storage::backend::local::LocalBackend;
use uuid::Uuid;

fn local_backend(root: &Path, backend_id: &str) -> Arc<dyn StorageBackend> {
    let mut params = Mapping::new();
    params.insert("type".into(), "local".into());
    params.insert("location".into(), root.display().to_string().into());
    params.insert("backend-id".into(), backend_id.into());
    Arc::new(LocalBackend::new(BackendInit::new(params)).unwrap())
}

fn setup_syncer() -> (tempfile::TempDir, Uuid, Arc<HashDb>, Syncer) {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("a")).unwrap();
    std::fs::create_dir_all(dir.path().join("b")).unwrap();

    let uuid = Uuid::new_v4();
    let db = Arc::new(HashDb::in_memory().unwrap());
    let syncer = Syncer::new(
        uuid,
        local_backend(&dir.path().join("a"), "backend-a"),
        local_backend(&dir.path().join("b"), "backend-b"),
        db.clone(),
    );
    (dir, uuid, db, syncer)
}

#[test]
fn test_new_files_propagate_both_ways() {
    let (dir, _uuid, _db, syncer) = setup_syncer();
    std::fs::write(dir.path().join("a/from_a.txt"), b"a-side").unwrap();
    std::fs::write(dir.path().join("b/from_b.txt"), b"b-side").unwrap();

    let report = syncer.run_once().unwrap();
    assert_eq!(report.copied, 2);
    assert!(report.conflicts.is_empty());

    assert_eq!(
        std::fs::read(dir.path().join("b/from_a.txt")).unwrap(),
        b"a-side"
    );
    assert_eq!(
        std::fs::read(dir.path().join("a/from_b.txt")).unwrap(),
        b"b-side"
    );
}

#[test]
fn test_single_side_change_propagates() {
    let (dir, _uuid, _db, syncer) = setup_syncer();
    std::fs::write(dir.path().join("a/doc.txt"), b"v1").unwrap();
    syncer.run_once().unwrap();

    std::fs::write(dir.path().join("a/doc.txt"), b"v2").unwrap();
    let report = syncer.run_once().unwrap();
    assert_eq!(report.copied, 1);
    assert_eq!(std::fs::read(dir.path().join("b/doc.txt")).unwrap(), b"v2");

    // A further pass is a no-op.
    let report = syncer.run_once().unwrap();
    assert_eq!(report.copied, 0);
}

#[test]
fn test_deletion_propagates() {
    let (dir, _uuid, _db, syncer) = setup_syncer();
    std::fs::write(dir.path().join("a/doc.txt"), b"v1").unwrap();
    syncer.run_once().unwrap();
    assert!(dir.path().join("b/doc.txt").exists());

    std::fs::remove_file(dir.path().join("a/doc.txt")).unwrap();
    let report = syncer.run_once().unwrap();
    assert_eq!(report.deleted, 1);
    assert!(!dir.path().join("b/doc.txt").exists());
}

#[test]
fn test_conflicting_edits_are_reported() {
    let (dir, uuid, db, syncer) = setup_syncer();
    std::fs::write(dir.path().join("a/shared.txt"), b"same").unwrap();
    syncer.run_once().unwrap();

    // Both sides diverge.
    std::fs::write(dir.path().join("a/shared.txt"), b"mine").unwrap();
    std::fs::write(dir.path().join("b/shared.txt"), b"theirs").unwrap();

    let report = syncer.run_once().unwrap();
    assert_eq!(report.conflicts, ["shared.txt"]);

    // Neither side was overwritten.
    assert_eq!(
        std::fs::read(dir.path().join("a/shared.txt")).unwrap(),
        b"mine"
    );
    assert_eq!(
        std::fs::read(dir.path().join("b/shared.txt")).unwrap(),
        b"theirs"
    );

    let conflicts = db.list_conflicts(Some(uuid)).unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].path, "shared.txt");
}

#[test]
fn test_conflict_clears_after_agreement() {
    let (dir, uuid, db, syncer) = setup_syncer();
    std::fs::write(dir.path().join("a/shared.txt"), b"mine").unwrap();
    std::fs::write(dir.path().join("b/shared.txt"), b"theirs").unwrap();
    syncer.run_once().unwrap();
    assert_eq!(db.list_conflicts(Some(uuid)).unwrap().len(), 1);

    // Resolve by hand, then re-run.
    std::fs::write(dir.path().join("b/shared.txt"), b"mine").unwrap();
    let report = syncer.run_once().unwrap();
    assert!(report.conflicts.is_empty());
    assert!(db.list_conflicts(Some(uuid)).unwrap().is_empty());
}
