/**
 * The client proper: local manifest caches, URL
 *  loading, storage selection, sub-clients.
 */
pub mod client;
/**
 * Configuration file and directory layout.
 */
pub mod config;
pub mod error;
/**
 * The Wildland path resolver.
 */
pub mod search;

pub mod prelude {
    pub use crate::client::Client;
    pub use crate::config::Config;
    pub use crate::error::ClientError;
    pub use crate::search::{Search, Step, WatchParam};
}
