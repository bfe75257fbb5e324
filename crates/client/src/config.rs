//! Client configuration.
//!
//! Lives in `config.yaml` under the base directory; every field is
//! optional with a sensible default. The base directory itself defaults
//! through XDG (`~/.local/share/wildland`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ClientError;

/// Subdirectories of the base dir holding local manifests, by kind.
pub const MANIFEST_DIRS: [&str; 5] = ["users", "containers", "storages", "bridges", "templates"];

#[derive(Debug, Clone, Default, Deserialize)]
struct RawConfig {
    #[serde(rename = "mount-dir")]
    mount_dir: Option<PathBuf>,
    #[serde(rename = "default-owner")]
    default_owner: Option<String>,
    #[serde(rename = "default-signing-owner")]
    default_signing_owner: Option<String>,
    #[serde(default)]
    aliases: HashMap<String, String>,
    dummy: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub base_dir: PathBuf,
    pub mount_dir: PathBuf,
    /// Alias name (without `@`) to owner fingerprint.
    pub aliases: HashMap<String, String>,
    /// Use the dummy signature context (tests, offline tooling).
    pub dummy: bool,
}

impl Config {
    /// Load from `base_dir/config.yaml`; a missing file means defaults.
    pub fn load(base_dir: Option<PathBuf>) -> Result<Self, ClientError> {
        let base_dir = match base_dir {
            Some(dir) => dir,
            None => default_base_dir()?,
        };

        let raw: RawConfig = match std::fs::read(base_dir.join("config.yaml")) {
            Ok(bytes) => serde_yaml::from_slice(&bytes)
                .map_err(|e| ClientError::Config(format!("config.yaml: {e}")))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => RawConfig::default(),
            Err(err) => return Err(ClientError::Config(format!("config.yaml: {err}"))),
        };

        let mut aliases = raw.aliases;
        if let Some(owner) = raw.default_owner {
            aliases.insert("default".to_string(), owner);
        }
        if let Some(owner) = raw.default_signing_owner {
            aliases.insert("default-owner".to_string(), owner);
        }

        let mount_dir = raw.mount_dir.unwrap_or_else(|| base_dir.join("wildland"));

        Ok(Config {
            base_dir,
            mount_dir,
            aliases,
            dummy: raw.dummy.unwrap_or(false),
        })
    }

    /// An in-memory configuration rooted at `base_dir`, dummy signatures
    /// on. What tests start from.
    pub fn for_test(base_dir: &Path) -> Self {
        Config {
            base_dir: base_dir.to_path_buf(),
            mount_dir: base_dir.join("wildland"),
            aliases: HashMap::new(),
            dummy: true,
        }
    }

    pub fn manifest_dir(&self, kind: &str) -> PathBuf {
        self.base_dir.join(kind)
    }

    /// The owner a bare `:` path resolves under.
    pub fn default_owner(&self) -> Option<&str> {
        self.aliases.get("default").map(String::as_str)
    }

    /// Resolve `@alias` to a fingerprint.
    pub fn resolve_alias(&self, alias: &str) -> Result<String, ClientError> {
        let name = alias.trim_start_matches('@');
        self.aliases
            .get(name)
            .cloned()
            .ok_or_else(|| ClientError::Path(common::path::PathError::UnknownAlias(name.into())))
    }

    pub fn set_alias(&mut self, name: &str, owner: &str) {
        self.aliases.insert(name.to_string(), owner.to_string());
    }
}

fn default_base_dir() -> Result<PathBuf, ClientError> {
    let dirs = directories::BaseDirs::new()
        .ok_or_else(|| ClientError::Config("cannot determine home directory".into()))?;
    Ok(dirs.data_dir().join("wildland"))
}

/// The runtime directory for PID and lease files (`XDG_RUNTIME_DIR`, with
/// a `/tmp` fallback).
pub fn runtime_dir() -> PathBuf {
    directories::BaseDirs::new()
        .and_then(|dirs| dirs.runtime_dir().map(Path::to_path_buf))
        .unwrap_or_else(std::env::temp_dir)
}
