/**
 * The boundary to the filesystem layer: mount
 *  commands, mount ids, the driver trait.
 */
pub mod fs;
/**
 * On-disk hash cache backing conflict detection.
 */
pub mod hashdb;
/**
 * The mount controller and its live table.
 */
pub mod mount;
/**
 * Per-container storage synchronization.
 */
pub mod sync;
/**
 * In-memory driver recording mount decisions,
 *  for tests and embedders.
 */
pub mod testkit;
/**
 * Watch-based remount: observe manifest files,
 *  mount/remount/unmount as they change.
 */
pub mod watch;

pub mod prelude {
    pub use crate::fs::{FsDriver, MountCommand, MountError, MountId};
    pub use crate::hashdb::{ConflictRow, HashDb, SyncError};
    pub use crate::mount::{MountController, MountPlanEntry, StorageId};
    pub use crate::sync::{SyncReport, Syncer};
    pub use crate::watch::MountWatch;
}
