//! The per-container sync daemon.
//!
//! Keeps two selected storages of one container in byte-identical state.
//! The hash database remembers what each path looked like when both
//! sides last agreed; a path that changed on one side since then is
//! copied over, a path that changed on both sides is a conflict. Writes
//! into a side that supports it go through safe replace, so a change
//! racing the copy turns into a conflict instead of a lost update.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use uuid::Uuid;

use storage::base::{walk_files, OpenFlags, StorageBackend, StorageError};
use storage::driver::StorageDriver;

use crate::hashdb::{HashDb, SyncError};

/// What one pass over the tree did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub copied: usize,
    pub deleted: usize,
    pub conflicts: Vec<String>,
}

struct Side {
    backend: Arc<dyn StorageBackend>,
    backend_id: String,
}

pub struct Syncer {
    container_uuid: Uuid,
    local: Side,
    remote: Side,
    db: Arc<HashDb>,
}

impl Syncer {
    pub fn new(
        container_uuid: Uuid,
        local: Arc<dyn StorageBackend>,
        remote: Arc<dyn StorageBackend>,
        db: Arc<HashDb>,
    ) -> Self {
        Syncer {
            container_uuid,
            local: Side {
                backend_id: local.backend_id(),
                backend: local,
            },
            remote: Side {
                backend_id: remote.backend_id(),
                backend: remote,
            },
            db,
        }
    }

    /// One full pass: walk both sides, reconcile every path.
    pub fn run_once(&self) -> Result<SyncReport, SyncError> {
        let mut paths: BTreeSet<PathBuf> = BTreeSet::new();
        for side in [&self.local, &self.remote] {
            for (path, _) in walk_files(side.backend.as_ref(), Path::new(""))? {
                paths.insert(path);
            }
        }

        let mut report = SyncReport::default();
        for path in paths {
            if let Err(err) = self.sync_path(&path, &mut report) {
                match err {
                    SyncError::Conflict(_) => {
                        report.conflicts.push(path.display().to_string())
                    }
                    other => return Err(other),
                }
            }
        }
        Ok(report)
    }

    fn sync_path(&self, path: &Path, report: &mut SyncReport) -> Result<(), SyncError> {
        let path_str = path.display().to_string();
        let local_hash = hash_of(&self.local, path)?;
        let remote_hash = hash_of(&self.remote, path)?;
        let last_local =
            self.db
                .retrieve_hash(self.container_uuid, &self.local.backend_id, &path_str)?;
        let last_remote =
            self.db
                .retrieve_hash(self.container_uuid, &self.remote.backend_id, &path_str)?;

        match (&local_hash, &remote_hash) {
            (Some(local), Some(remote)) if local == remote => {
                self.remember(&path_str, path, local)?;
                self.db.clear_conflict(self.container_uuid, &path_str)?;
            }
            (Some(local), Some(remote)) => {
                let local_unchanged = last_local.as_deref() == Some(local.as_str());
                let remote_unchanged = last_remote.as_deref() == Some(remote.as_str());
                if local_unchanged && !remote_unchanged {
                    self.copy(&self.remote, &self.local, path, Some(local))?;
                    report.copied += 1;
                    self.remember(&path_str, path, remote)?;
                } else if remote_unchanged && !local_unchanged {
                    self.copy(&self.local, &self.remote, path, Some(remote))?;
                    report.copied += 1;
                    self.remember(&path_str, path, local)?;
                } else {
                    self.conflict(&path_str, "changed on both storages")?;
                }
            }
            (Some(local), None) => {
                if last_remote.is_some() && last_local.as_deref() == Some(local.as_str()) {
                    // Deleted remotely, unchanged here: propagate.
                    self.local
                        .backend
                        .unlink(path)
                        .map_err(SyncError::Storage)?;
                    report.deleted += 1;
                    self.forget(&path_str)?;
                } else if last_remote.is_some() {
                    self.conflict(&path_str, "changed here but deleted remotely")?;
                } else {
                    self.copy(&self.local, &self.remote, path, None)?;
                    report.copied += 1;
                    self.remember(&path_str, path, local)?;
                }
            }
            (None, Some(remote)) => {
                if last_local.is_some() && last_remote.as_deref() == Some(remote.as_str()) {
                    self.remote
                        .backend
                        .unlink(path)
                        .map_err(SyncError::Storage)?;
                    report.deleted += 1;
                    self.forget(&path_str)?;
                } else if last_local.is_some() {
                    self.conflict(&path_str, "changed remotely but deleted here")?;
                } else {
                    self.copy(&self.remote, &self.local, path, None)?;
                    report.copied += 1;
                    self.remember(&path_str, path, remote)?;
                }
            }
            (None, None) => self.forget(&path_str)?,
        }
        Ok(())
    }

    fn remember(&self, path_str: &str, path: &Path, hash: &str) -> Result<(), SyncError> {
        // Tokens make the next pass cheap when the backend can produce
        // them; hashes remain the source of truth.
        let local_token = self.local.backend.get_file_token(path).unwrap_or(None);
        let remote_token = self.remote.backend.get_file_token(path).unwrap_or(None);
        self.db.store_hash(
            self.container_uuid,
            &self.local.backend_id,
            path_str,
            hash,
            local_token,
        )?;
        self.db.store_hash(
            self.container_uuid,
            &self.remote.backend_id,
            path_str,
            hash,
            remote_token,
        )?;
        Ok(())
    }

    fn forget(&self, path_str: &str) -> Result<(), SyncError> {
        self.db
            .remove_hash(self.container_uuid, &self.local.backend_id, path_str)?;
        self.db
            .remove_hash(self.container_uuid, &self.remote.backend_id, path_str)?;
        Ok(())
    }

    fn conflict(&self, path_str: &str, detail: &str) -> Result<(), SyncError> {
        tracing::warn!("sync conflict on {path_str}: {detail}");
        self.db
            .record_conflict(self.container_uuid, path_str, detail)?;
        Err(SyncError::Conflict(path_str.to_string()))
    }

    /// Copy one file, guarding the destination with safe replace when the
    /// destination already holds known content.
    fn copy(
        &self,
        from: &Side,
        to: &Side,
        path: &Path,
        expected_dest_hash: Option<&String>,
    ) -> Result<(), SyncError> {
        let driver = StorageDriver::new(from.backend.clone())?;
        let data = driver.read_file(path)?;
        drop(driver);

        match expected_dest_hash {
            Some(expected) => {
                match to
                    .backend
                    .open_for_safe_replace(path, OpenFlags::write_only(), expected)
                {
                    Ok(mut file) => {
                        file.ftruncate(0)?;
                        file.write(&data, 0)?;
                        match file.release() {
                            Ok(()) => Ok(()),
                            Err(StorageError::HashMismatch(_)) => {
                                self.conflict(&path.display().to_string(), "raced a local change")
                            }
                            Err(err) => Err(err.into()),
                        }
                    }
                    Err(StorageError::Unsupported(_)) => {
                        let driver = StorageDriver::new(to.backend.clone())?;
                        driver.write_file(path, &data)?;
                        Ok(())
                    }
                    Err(err) => Err(err.into()),
                }
            }
            None => {
                let driver = StorageDriver::new(to.backend.clone())?;
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        driver.makedirs(parent, 0o755)?;
                    }
                }
                driver.write_file(path, &data)?;
                Ok(())
            }
        }
    }

    /// Run in a background thread at the given interval.
    pub fn spawn(self, interval: Duration) -> SyncHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let thread = std::thread::spawn(move || {
            while !stop_flag.load(Ordering::SeqCst) {
                match self.run_once() {
                    Ok(report) if !report.conflicts.is_empty() => {
                        tracing::warn!(
                            "sync pass finished with {} conflicts",
                            report.conflicts.len()
                        );
                    }
                    Ok(_) => {}
                    Err(err) => tracing::warn!("sync pass failed: {err}"),
                }
                let mut slept = Duration::ZERO;
                while slept < interval && !stop_flag.load(Ordering::SeqCst) {
                    let step = Duration::from_millis(200).min(interval - slept);
                    std::thread::sleep(step);
                    slept += step;
                }
            }
        });
        SyncHandle {
            stop,
            thread: Some(thread),
        }
    }
}

fn hash_of(side: &Side, path: &Path) -> Result<Option<String>, SyncError> {
    match side.backend.get_hash(path) {
        Ok(hash) => Ok(Some(hash)),
        Err(err) if err.is_recoverable() => Ok(None),
        Err(err) => Err(err.into()),
    }
}

pub struct SyncHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SyncHandle {
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
