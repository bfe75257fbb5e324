//! The boundary to the filesystem layer.
//!
//! The controller does not talk to a kernel filesystem directly; it
//! issues mount and unmount commands to an [`FsDriver`] and remembers the
//! numeric ids the driver hands back. Embedders plug in their FUSE (or
//! other) integration here.

use std::path::PathBuf;
use std::sync::Arc;

use storage::base::{StorageBackend, StorageError};

pub type MountId = u64;

#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("container is already mounted: {0}")]
    AlreadyMounted(String),
    #[error("storage is not mounted: {0}")]
    NotMounted(String),
    #[error("mount-watch lease is held by pid {0}")]
    LeaseHeld(i32),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Manifest(#[from] common::manifest::ManifestError),
    #[error(transparent)]
    Client(#[from] client::error::ClientError),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One storage to expose in the filesystem tree, under every given path.
pub struct MountCommand {
    pub paths: Vec<String>,
    pub backend: Arc<dyn StorageBackend>,
    pub read_only: bool,
}

/// The filesystem layer: mounts storages under paths, hands out ids.
pub trait FsDriver: Send + Sync {
    fn mount_storage(&self, command: MountCommand) -> Result<MountId, MountError>;
    fn unmount_storage(&self, mount_id: MountId) -> Result<(), MountError>;
}
