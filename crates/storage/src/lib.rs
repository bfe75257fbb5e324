/**
 * The storage backend contract: file operations,
 *  attributes, error taxonomy and the type registry.
 */
pub mod base;
/**
 * Concrete backends: local, static, delegate,
 *  date/categorization proxies, http, pseudomanifest.
 */
pub mod backend;
/**
 * Whole-file and paged buffering for backends that
 *  can only read/write complete files or byte ranges.
 */
pub mod buffered;
/**
 * Directory metadata caches with a short TTL,
 *  whole-tree and per-directory flavors.
 */
pub mod cached;
/**
 * Direct manipulation of a backend outside a mounted
 *  tree (read/write/makedirs with a mount bracket).
 */
pub mod driver;
/**
 * Lazy entry trees for synthetic read-only storages.
 */
pub mod generated;
/**
 * Manifest-pattern based discovery of subcontainer
 *  manifests inside a storage.
 */
pub mod subcontainers;
/**
 * Change watchers: native event sources and the
 *  polling fallback.
 */
pub mod watch;

pub mod prelude {
    pub use crate::base::{
        Attr, BackendInit, BackendRegistry, File, OpenFlags, StorageBackend, StorageError,
        Subcontainer,
    };
    pub use crate::driver::StorageDriver;
    pub use crate::watch::{FileEvent, FileEventType, WatcherHandle};
}
