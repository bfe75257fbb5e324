//! Mount state machine tests: idempotent remounts, minimal remounts on
//! parameter changes, orphan handling, pseudomanifest pairing,
//! subcontainer mounting.

mod fixtures;

use daemon::fs::MountError;
use daemon::mount::StorageId;
use daemon::testkit::FsCall;
use fixtures::{local_container, local_storage_fields, setup_controller, OWNER};
use serde_yaml::{Mapping, Value};

#[test]
fn test_mount_creates_expected_paths() {
    let (dir, driver, mut controller) = setup_controller();
    let data_dir = dir.path().join("data");
    std::fs::create_dir_all(&data_dir).unwrap();

    let container = local_container(OWNER, &["/books"], &data_dir);
    let uuid = container.uuid().unwrap();
    let entry = controller.plan_for(&container, false).unwrap();
    controller.mount_many(vec![entry]).unwrap();

    assert!(controller.is_mounted(uuid));
    let mounted = driver.mounted_paths();
    assert!(mounted.iter().any(|p| p.starts_with(&format!(
        "/.users/{OWNER}:/.backends/{uuid}/"
    ))));
    assert!(mounted.contains(&format!("/.users/{OWNER}:/.uuid/{uuid}")));
    assert!(mounted.contains(&format!("/.users/{OWNER}:/books")));
    // Default owner containers alias at the root too.
    assert!(mounted.contains(&"/books".to_string()));
}

#[test]
fn test_mount_twice_without_remount_fails() {
    let (dir, _driver, mut controller) = setup_controller();
    let data_dir = dir.path().join("data");
    std::fs::create_dir_all(&data_dir).unwrap();

    let container = local_container(OWNER, &["/books"], &data_dir);
    let entry = controller.plan_for(&container, false).unwrap();
    controller.mount_many(vec![entry]).unwrap();

    let again = controller.plan_for(&container, false).unwrap();
    assert!(matches!(
        controller.mount_many(vec![again]).unwrap_err(),
        MountError::AlreadyMounted(_)
    ));
}

#[test]
fn test_remount_unchanged_issues_nothing() {
    let (dir, driver, mut controller) = setup_controller();
    let data_dir = dir.path().join("data");
    std::fs::create_dir_all(&data_dir).unwrap();

    let container = local_container(OWNER, &["/books"], &data_dir);
    let entry = controller.plan_for(&container, false).unwrap();
    controller.mount_many(vec![entry]).unwrap();

    driver.clear();
    let again = controller.plan_for(&container, true).unwrap();
    controller.mount_many(vec![again]).unwrap();

    assert_eq!(driver.mount_count(), 0);
    assert_eq!(driver.unmount_count(), 0);
}

#[test]
fn test_remount_changed_storage_remounts_exactly_that_storage() {
    let (dir, driver, mut controller) = setup_controller();
    let data_a = dir.path().join("a");
    let data_b = dir.path().join("b");
    std::fs::create_dir_all(&data_a).unwrap();
    std::fs::create_dir_all(&data_b).unwrap();

    let container = local_container(OWNER, &["/books"], &data_a);
    let uuid = container.uuid().unwrap();
    let entry = controller.plan_for(&container, false).unwrap();
    let backend_id = entry.storages[0].backend_id().to_string();
    controller.mount_many(vec![entry]).unwrap();

    let storage_id = StorageId {
        container_uuid: uuid,
        backend_id: backend_id.clone(),
    };
    let old_mount_id = controller.live_storage(&storage_id).unwrap().mount_id;

    // Change the storage's location, keeping the backend-id.
    let mut fields = match &container.backend_refs()[0] {
        Value::Mapping(fields) => fields.clone(),
        _ => unreachable!(),
    };
    fields.insert("location".into(), data_b.display().to_string().into());
    // Same container identity, new storage params.
    let mut changed = container.clone();
    changed.remove_backend(&backend_id);
    changed.add_backend(Value::Mapping(fields));

    driver.clear();
    let entry = controller.plan_for(&changed, true).unwrap();
    controller.mount_many(vec![entry]).unwrap();

    // Exactly one unmount and one mount for that storage id.
    let calls = driver.calls.lock().clone();
    let unmounts: Vec<_> = calls
        .iter()
        .filter(|call| matches!(call, FsCall::Unmount { mount_id } if *mount_id == old_mount_id))
        .collect();
    assert_eq!(unmounts.len(), 1);
    let storage_mounts: Vec<_> = calls
        .iter()
        .filter(|call| {
            matches!(call, FsCall::Mount { paths, .. }
                if paths.iter().any(|p| p.contains(&format!("/.backends/{uuid}/{backend_id}"))))
        })
        .collect();
    assert_eq!(storage_mounts.len(), 1);

    let new_mount_id = controller.live_storage(&storage_id).unwrap().mount_id;
    assert_ne!(new_mount_id, old_mount_id);
}

#[test]
fn test_remount_unmounts_orphaned_storage() {
    let (dir, driver, mut controller) = setup_controller();
    let data_a = dir.path().join("a");
    let data_b = dir.path().join("b");
    std::fs::create_dir_all(&data_a).unwrap();
    std::fs::create_dir_all(&data_b).unwrap();

    let mut container = local_container(OWNER, &["/books"], &data_a);
    container.add_backend(Value::Mapping(local_storage_fields(&data_b, false)));
    let uuid = container.uuid().unwrap();

    let entry = controller.plan_for(&container, false).unwrap();
    let orphan_id = entry.storages[1].backend_id().to_string();
    controller.mount_many(vec![entry]).unwrap();

    // Drop the second storage from the manifest and remount.
    container.remove_backend(&orphan_id);
    driver.clear();
    let entry = controller.plan_for(&container, true).unwrap();
    controller.mount_many(vec![entry]).unwrap();

    assert!(controller
        .live_storage(&StorageId {
            container_uuid: uuid,
            backend_id: orphan_id,
        })
        .is_none());
    assert_eq!(driver.unmount_count(), 1);
}

#[test]
fn test_unmount_container_removes_everything() {
    let (dir, driver, mut controller) = setup_controller();
    let data_dir = dir.path().join("data");
    std::fs::create_dir_all(&data_dir).unwrap();

    let container = local_container(OWNER, &["/books"], &data_dir);
    let uuid = container.uuid().unwrap();
    let entry = controller.plan_for(&container, false).unwrap();
    controller.mount_many(vec![entry]).unwrap();

    controller.unmount_container(uuid).unwrap();
    assert!(!controller.is_mounted(uuid));
    // Storage and pseudomanifest both gone.
    assert!(driver.mounted_paths().is_empty());
}

#[test]
fn test_pseudomanifest_mounted_alongside() {
    let (dir, driver, mut controller) = setup_controller();
    let data_dir = dir.path().join("data");
    std::fs::create_dir_all(&data_dir).unwrap();

    let container = local_container(OWNER, &["/books"], &data_dir);
    let uuid = container.uuid().unwrap();
    let entry = controller.plan_for(&container, false).unwrap();
    controller.mount_many(vec![entry]).unwrap();

    // One mount for the storage, one for the pseudomanifest.
    assert_eq!(driver.mount_count(), 2);
    assert!(driver
        .mounted_paths()
        .contains(&format!("/.users/{OWNER}:/.uuid/{uuid}")));
}

#[test]
fn test_categorization_subcontainers_mount_as_children() {
    let (dir, driver, mut controller) = setup_controller();
    let tree = dir.path().join("tree");
    std::fs::create_dir_all(tree.join("@authors/Alice/@titles_Book1")).unwrap();
    std::fs::write(tree.join("@authors/Alice/@titles_Book1/a.pdf"), b"pdf").unwrap();

    // The parent container carries a categorization storage over an
    // inline reference container backed by the local tree.
    let reference = local_container(OWNER, &["/raw"], &tree);
    let mut proxy_fields = Mapping::new();
    proxy_fields.insert("object".into(), "storage".into());
    proxy_fields.insert("type".into(), "categorization".into());
    proxy_fields.insert(
        "backend-id".into(),
        "d9c4a2aa-9a28-4a6a-8eeb-bdb2f79a1a1b".into(),
    );
    proxy_fields.insert(
        "reference-container".into(),
        Value::Mapping(reference.to_fields()),
    );

    let mut parent = common::object::Container::new(OWNER, vec!["/tagged".into()], None, vec![]);
    parent.add_backend(Value::Mapping(proxy_fields));

    let entry = controller.plan_for(&parent, false).unwrap();
    let parent_storage = entry.storages[0].clone();
    controller.mount_many(vec![entry]).unwrap();

    let mounted = controller
        .mount_subcontainers(&parent, &parent_storage)
        .unwrap();
    assert_eq!(mounted.len(), 1);

    let paths = driver.mounted_paths();
    assert!(paths.contains(&format!("/.users/{OWNER}:/authors/Alice")));
    assert!(paths.contains(&format!("/.users/{OWNER}:/titles/Book1")));

    // Unmounting the parent takes the subcontainer down too.
    controller.unmount_container(parent.uuid().unwrap()).unwrap();
    assert!(driver.mounted_paths().is_empty());
}
