//! Watch-based remount: manifests appearing in a watched storage get
//! mounted, vanishing ones get unmounted.

mod fixtures;

use std::sync::Arc;
use std::time::{Duration, Instant};

use daemon::watch::MountWatch;
use fixtures::{local_container, setup_controller, signed_bytes, write_signed, OWNER};
use parking_lot::Mutex;

fn wait_for(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    condition()
}

#[test]
fn test_mount_watch_mounts_and_unmounts() {
    let (dir, _driver, mut controller) = setup_controller();
    let watched_dir = dir.path().join("watched");
    let data_dir = dir.path().join("data");
    std::fs::create_dir_all(&watched_dir).unwrap();
    std::fs::create_dir_all(&data_dir).unwrap();

    // The watched container itself, known locally at :/path:.
    let watched = local_container(OWNER, &["/path"], &watched_dir);
    write_signed(
        &dir.path().join("containers/watched.container.yaml"),
        OWNER,
        &watched.to_manifest().unwrap(),
    );
    controller.reload_manifests().unwrap();

    let controller = Arc::new(Mutex::new(controller));
    let watch = MountWatch::start_with_lease(
        controller.clone(),
        ":/path:/*.container.yaml",
        "wildland-watch-test-a.pid",
    )
    .unwrap();

    // A new valid manifest lands in the watched directory.
    let incoming = local_container(OWNER, &["/incoming"], &data_dir);
    let uuid = incoming.uuid().unwrap();
    std::fs::write(
        watched_dir.join("new.container.yaml"),
        signed_bytes(&incoming.to_manifest().unwrap(), OWNER),
    )
    .unwrap();

    assert!(
        wait_for(
            || controller.lock().is_mounted(uuid),
            Duration::from_secs(2)
        ),
        "new manifest was not mounted in time"
    );

    // Deleting the file unmounts the container.
    std::fs::remove_file(watched_dir.join("new.container.yaml")).unwrap();
    assert!(
        wait_for(
            || !controller.lock().is_mounted(uuid),
            Duration::from_secs(2)
        ),
        "deleted manifest was not unmounted in time"
    );

    watch.stop();
}

#[test]
fn test_mount_watch_ignores_non_matching_files() {
    let (dir, _driver, mut controller) = setup_controller();
    let watched_dir = dir.path().join("watched");
    std::fs::create_dir_all(&watched_dir).unwrap();

    let watched = local_container(OWNER, &["/path"], &watched_dir);
    write_signed(
        &dir.path().join("containers/watched.container.yaml"),
        OWNER,
        &watched.to_manifest().unwrap(),
    );
    controller.reload_manifests().unwrap();

    let controller = Arc::new(Mutex::new(controller));
    let watch = MountWatch::start_with_lease(
        controller.clone(),
        ":/path:/*.container.yaml",
        "wildland-watch-test-b.pid",
    )
    .unwrap();

    let stray = local_container(OWNER, &["/stray"], &watched_dir);
    let uuid = stray.uuid().unwrap();
    std::fs::write(
        watched_dir.join("stray.bridge.yaml"),
        signed_bytes(&stray.to_manifest().unwrap(), OWNER),
    )
    .unwrap();

    assert!(
        !wait_for(
            || controller.lock().is_mounted(uuid),
            Duration::from_millis(700)
        ),
        "non-matching file must not be mounted"
    );
    watch.stop();
}
