use std::path::PathBuf;

use common::crypto::SigError;
use common::manifest::ManifestError;
use common::path::PathError;
use storage::base::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Sig(#[from] SigError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("cannot read url {url}: {reason}")]
    Url { url: String, reason: String },
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ClientError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ClientError::Io {
            path: path.into(),
            source,
        }
    }

    /// Recoverable during traversal: the resolver logs it and tries the
    /// next candidate.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ClientError::NotFound(_) | ClientError::Url { .. } => true,
            ClientError::Storage(err) => err.is_recoverable(),
            _ => false,
        }
    }
}
