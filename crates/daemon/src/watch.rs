//! Watch-based remount.
//!
//! `MountWatch` observes manifest files inside Wildland itself: it
//! resolves the watched path to a storage, subscribes to that storage's
//! change watcher and, as manifests appear, change or vanish, mounts,
//! remounts or unmounts the corresponding containers. A PID lease file
//! in the runtime directory keeps a second watcher from starting.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use uuid::Uuid;

use client::client::Client;
use client::config::runtime_dir;
use client::search::Search;
use common::object::WildlandObject;
use common::path::WildlandPath;
use storage::watch::{start_watcher, FileEvent, FileEventType};

use crate::fs::MountError;
use crate::mount::MountController;

pub const LEASE_FILE: &str = "wildland-mount-watch.pid";

/// A PID lockfile. Stale leases (dead process) are taken over.
#[derive(Debug)]
pub struct Lease {
    path: PathBuf,
}

impl Lease {
    pub fn acquire(name: &str) -> Result<Self, MountError> {
        let path = runtime_dir().join(name);
        if let Ok(content) = std::fs::read_to_string(&path) {
            if let Ok(pid) = content.trim().parse::<i32>() {
                if unsafe { libc::kill(pid, 0) } == 0 {
                    return Err(MountError::LeaseHeld(pid));
                }
            }
            tracing::debug!("removing stale lease {}", path.display());
            let _ = std::fs::remove_file(&path);
        }
        std::fs::write(&path, format!("{}\n", std::process::id())).map_err(|e| {
            MountError::Io {
                path: path.clone(),
                source: e,
            }
        })?;
        Ok(Lease { path })
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// The running watch daemon.
pub struct MountWatch {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    _lease: Lease,
}

impl MountWatch {
    /// Start watching. `pattern` is a Wildland path whose file part is a
    /// glob over manifest files, e.g. `:/path:/*.container.yaml`.
    pub fn start(
        controller: Arc<Mutex<MountController>>,
        pattern: &str,
    ) -> Result<MountWatch, MountError> {
        Self::start_with_lease(controller, pattern, LEASE_FILE)
    }

    /// Like [`MountWatch::start`], with a caller-chosen lease file name.
    pub fn start_with_lease(
        controller: Arc<Mutex<MountController>>,
        pattern: &str,
        lease_name: &str,
    ) -> Result<MountWatch, MountError> {
        let lease = Lease::acquire(lease_name)?;
        let wlpath = WildlandPath::from_str(pattern)
            .map_err(client::error::ClientError::Path)?;
        let file_glob = wlpath
            .file_path
            .clone()
            .unwrap_or_else(|| "/*.container.yaml".to_string());
        let glob = glob_regex(file_glob.trim_start_matches('/'));

        let client = controller.lock().client().clone();
        let search = Search::new(&client, wlpath.without_file())?;
        let step = search
            .steps()
            .next()
            .ok_or_else(|| client::error::ClientError::NotFound(pattern.to_string()))?;
        let storage = step.client.select_storage(&step.container, false)?;
        let backend = step.client.construct_backend(&storage, None)?;
        backend.mount()?;

        let (tx, rx) = flume::unbounded::<Vec<FileEvent>>();
        let watcher = start_watcher(backend.clone(), tx).ok_or_else(|| {
            MountError::Storage(storage::base::StorageError::Unsupported(
                "storage has no watcher",
            ))
        })?;

        let trusted_owner = storage.trusted().then(|| storage.owner().to_string());
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let thread = std::thread::spawn(move || {
            // Keep the watcher thread alive for the daemon's lifetime.
            let _watcher = watcher;
            let mut mounted: HashMap<PathBuf, Uuid> = HashMap::new();
            while !stop_flag.load(Ordering::SeqCst) {
                let events = match rx.recv_timeout(Duration::from_millis(200)) {
                    Ok(events) => events,
                    Err(flume::RecvTimeoutError::Timeout) => continue,
                    Err(flume::RecvTimeoutError::Disconnected) => break,
                };
                for event in events {
                    if !glob.is_match(&event.path.to_string_lossy()) {
                        continue;
                    }
                    handle_event(
                        &controller,
                        &step.client,
                        backend.as_ref(),
                        trusted_owner.clone(),
                        &event,
                        &mut mounted,
                    );
                }
            }
        });

        Ok(MountWatch {
            stop,
            thread: Some(thread),
            _lease: lease,
        })
    }

    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for MountWatch {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn handle_event(
    controller: &Arc<Mutex<MountController>>,
    client: &Client,
    backend: &dyn storage::base::StorageBackend,
    trusted_owner: Option<String>,
    event: &FileEvent,
    mounted: &mut HashMap<PathBuf, Uuid>,
) {
    match event.event_type {
        FileEventType::Create | FileEventType::Modify => {
            let loaded = read_container_manifest(client, backend, trusted_owner, &event.path);
            match loaded {
                Ok(container) => {
                    let uuid = match container.uuid() {
                        Ok(uuid) => uuid,
                        Err(err) => {
                            tracing::warn!("manifest {:?} has no uuid: {err}", event.path);
                            return;
                        }
                    };
                    let mut controller = controller.lock();
                    let result = controller
                        .plan_for(&container, true)
                        .and_then(|entry| controller.mount_many(vec![entry]));
                    match result {
                        Ok(_) => {
                            tracing::info!("mounted {uuid} from {:?}", event.path);
                            mounted.insert(event.path.clone(), uuid);
                        }
                        Err(err) => tracing::warn!("mount of {:?} failed: {err}", event.path),
                    }
                }
                Err(err) => tracing::warn!("cannot load manifest {:?}: {err}", event.path),
            }
        }
        FileEventType::Delete => {
            if let Some(uuid) = mounted.remove(&event.path) {
                let mut controller = controller.lock();
                if let Err(err) = controller.unmount_container(uuid) {
                    tracing::warn!("unmount of {uuid} failed: {err}");
                } else {
                    tracing::info!("unmounted {uuid} after {:?} vanished", event.path);
                }
            }
        }
    }
}

fn read_container_manifest(
    client: &Client,
    backend: &dyn storage::base::StorageBackend,
    trusted_owner: Option<String>,
    path: &Path,
) -> Result<common::object::Container, client::error::ClientError> {
    // A short-lived driver without the mount bracket: the backend is
    // already mounted for the watcher's lifetime.
    let mut file = backend.open(path, storage::base::OpenFlags::read_only())?;
    let attr = file.fgetattr()?;
    let bytes = file.read(attr.size as usize, 0)?;
    file.release()?;
    match client.load_object_from_bytes(&bytes, None, trusted_owner)? {
        WildlandObject::Container(container) => Ok(container),
        _ => Err(client::error::ClientError::NotFound(format!(
            "{} is not a container manifest",
            path.display()
        ))),
    }
}

/// Compile a file glob (single directory level per `*`) into a regex.
fn glob_regex(pattern: &str) -> Regex {
    let mut out = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => out.push_str("[^/]*"),
            ch => out.push_str(&regex::escape(&ch.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out).expect("escaped glob is a valid regex")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_regex() {
        let regex = glob_regex("*.container.yaml");
        assert!(regex.is_match("new.container.yaml"));
        assert!(!regex.is_match("sub/new.container.yaml"));
        assert!(!regex.is_match("new.bridge.yaml"));
    }

    #[test]
    fn test_lease_blocks_second_acquire() {
        let first = Lease::acquire("wildland-test-lease.pid").unwrap();
        let second = Lease::acquire("wildland-test-lease.pid");
        assert!(matches!(second.unwrap_err(), MountError::LeaseHeld(_)));
        drop(first);
        // Released lease can be re-acquired.
        Lease::acquire("wildland-test-lease.pid").unwrap();
    }
}
