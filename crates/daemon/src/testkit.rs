//! In-memory filesystem driver recording every mount and unmount, for
//! tests and embedders that want to inspect mount decisions.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::fs::{FsDriver, MountCommand, MountError, MountId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsCall {
    Mount { mount_id: MountId, paths: Vec<String> },
    Unmount { mount_id: MountId },
}

#[derive(Default)]
pub struct RecordingFsDriver {
    next_id: Mutex<MountId>,
    pub calls: Mutex<Vec<FsCall>>,
}

impl RecordingFsDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn mount_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, FsCall::Mount { .. }))
            .count()
    }

    pub fn unmount_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, FsCall::Unmount { .. }))
            .count()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    pub fn mounted_paths(&self) -> Vec<String> {
        let mut mounted: Vec<(MountId, Vec<String>)> = Vec::new();
        for call in self.calls.lock().iter() {
            match call {
                FsCall::Mount { mount_id, paths } => mounted.push((*mount_id, paths.clone())),
                FsCall::Unmount { mount_id } => mounted.retain(|(id, _)| id != mount_id),
            }
        }
        mounted.into_iter().flat_map(|(_, paths)| paths).collect()
    }
}

impl FsDriver for RecordingFsDriver {
    fn mount_storage(&self, command: MountCommand) -> Result<MountId, MountError> {
        let mut next = self.next_id.lock();
        *next += 1;
        let mount_id = *next;
        self.calls.lock().push(FsCall::Mount {
            mount_id,
            paths: command.paths,
        });
        Ok(mount_id)
    }

    fn unmount_storage(&self, mount_id: MountId) -> Result<(), MountError> {
        self.calls.lock().push(FsCall::Unmount { mount_id });
        Ok(())
    }
}
