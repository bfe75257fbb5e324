//! The mount controller.
//!
//! Keeps the live mount table keyed by *storage identity*, the pair of
//! (container UUID, backend-id), and translates mount plans into the
//! minimal set of filesystem-level mount and unmount commands. Re-running
//! a plan with unchanged storages issues nothing; a storage whose params
//! or paths changed is remounted alone; storages that disappeared from
//! the plan are orphans and get unmounted.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_yaml::Mapping;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use client::client::Client;
use common::manifest::Manifest;
use common::object::{Container, Storage};
use storage::base::{StorageBackend, Subcontainer};

use crate::fs::{FsDriver, MountCommand, MountError, MountId};

/// Identity of a mounted storage across manifest edits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageId {
    pub container_uuid: Uuid,
    pub backend_id: String,
}

/// Everything the controller knows about one live storage.
pub struct LiveStorage {
    pub owner: String,
    pub mount_id: MountId,
    pub paths: Vec<String>,
    /// Hash of (params, paths); decides whether a remount is needed.
    pub fingerprint: String,
    pub parent: Option<StorageId>,
    pub primary: bool,
}

struct PseudoMount {
    mount_id: MountId,
    fingerprint: String,
}

/// One entry of a mount plan.
pub struct MountPlanEntry {
    pub container: Container,
    pub storages: Vec<Storage>,
    /// Namespace prefixes under which the container's owner is reachable
    /// (bridge paths; the empty prefix for the default owner).
    pub user_paths: Vec<String>,
    pub remount: bool,
    pub parent: Option<StorageId>,
    /// Pre-resolved inner backend for reference-holding storages
    /// (subcontainers delegating into their parent).
    pub reference_backend: Option<Arc<dyn StorageBackend>>,
}

pub struct MountController {
    client: Client,
    driver: Arc<dyn FsDriver>,
    table: HashMap<StorageId, LiveStorage>,
    pseudo: HashMap<Uuid, PseudoMount>,
}

impl MountController {
    pub fn new(client: Client, driver: Arc<dyn FsDriver>) -> Self {
        MountController {
            client,
            driver,
            table: HashMap::new(),
            pseudo: HashMap::new(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Re-read the local manifest directories (after an edit or import).
    pub fn reload_manifests(&mut self) -> Result<(), MountError> {
        self.client.load_local_manifests()?;
        Ok(())
    }

    pub fn is_mounted(&self, container_uuid: Uuid) -> bool {
        self.table
            .keys()
            .any(|id| id.container_uuid == container_uuid)
    }

    pub fn mounted_containers(&self) -> Vec<Uuid> {
        let mut uuids: Vec<Uuid> = self
            .table
            .keys()
            .map(|id| id.container_uuid)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        uuids.sort();
        uuids
    }

    pub fn live_storage(&self, id: &StorageId) -> Option<&LiveStorage> {
        self.table.get(id)
    }

    /// Build a plan entry for a container using its loadable storages and
    /// the owner's bridge paths.
    pub fn plan_for(
        &self,
        container: &Container,
        remount: bool,
    ) -> Result<MountPlanEntry, MountError> {
        let storages: Vec<Storage> = self
            .client
            .load_storages(container)
            .into_iter()
            .filter(|s| self.client.registry().is_type_supported(s.storage_type()))
            .collect();
        let mut user_paths = self.client.get_bridge_paths_for_user(container.owner());
        if self.client.config().default_owner() == Some(container.owner()) {
            // The default owner's containers also live at the root.
            user_paths.push(String::new());
        }
        Ok(MountPlanEntry {
            container: container.clone(),
            storages,
            user_paths,
            remount,
            parent: None,
            reference_backend: None,
        })
    }

    /// Execute a mount plan. Returns the storage ids touched by a mount.
    pub fn mount_many(&mut self, plan: Vec<MountPlanEntry>) -> Result<Vec<StorageId>, MountError> {
        let mut touched = Vec::new();
        for entry in plan {
            touched.extend(self.mount_entry(entry)?);
        }
        Ok(touched)
    }

    fn mount_entry(&mut self, entry: MountPlanEntry) -> Result<Vec<StorageId>, MountError> {
        let uuid = entry.container.uuid()?;
        let already_mounted = self.is_mounted(uuid);
        if already_mounted && !entry.remount {
            return Err(MountError::AlreadyMounted(format!("/.uuid/{uuid}")));
        }

        let primary_id = primary_backend_id(&entry.storages);
        let mut touched = Vec::new();

        if already_mounted {
            // Orphans: live storages of this container absent from the plan.
            let planned: HashSet<String> = entry
                .storages
                .iter()
                .map(|s| s.backend_id().to_string())
                .collect();
            let orphans: Vec<StorageId> = self
                .table
                .keys()
                .filter(|id| id.container_uuid == uuid && !planned.contains(&id.backend_id))
                .cloned()
                .collect();
            for orphan in orphans {
                tracing::info!(
                    "unmounting orphaned storage {}/{}",
                    orphan.container_uuid,
                    orphan.backend_id
                );
                self.unmount_storage_id(&orphan)?;
            }
        }

        for storage in &entry.storages {
            let id = StorageId {
                container_uuid: uuid,
                backend_id: storage.backend_id().to_string(),
            };
            let primary = Some(storage.backend_id()) == primary_id.as_deref();
            let paths = storage_mount_paths(&entry.container, storage, primary, &entry.user_paths)?;
            let fingerprint = storage_fingerprint(storage.params(), &paths);

            match self.table.get(&id) {
                Some(live) if live.fingerprint == fingerprint => {
                    tracing::debug!("storage {} unchanged, skipping", id.backend_id);
                    continue;
                }
                Some(_) => {
                    tracing::info!("storage {} changed, remounting", id.backend_id);
                    self.unmount_storage_id(&id)?;
                }
                None => {}
            }

            let backend = self
                .client
                .construct_backend(storage, entry.reference_backend.clone())?;
            backend.mount()?;
            let mount_id = self.driver.mount_storage(MountCommand {
                paths: paths.clone(),
                backend,
                read_only: storage.read_only(),
            })?;
            self.table.insert(
                id.clone(),
                LiveStorage {
                    owner: entry.container.owner().to_string(),
                    mount_id,
                    paths,
                    fingerprint,
                    parent: entry.parent.clone(),
                    primary,
                },
            );
            touched.push(id);
        }

        self.mount_pseudomanifest(&entry.container)?;
        Ok(touched)
    }

    /// Every mounted container is paired with a synthetic read-only
    /// storage exposing its current manifest text.
    fn mount_pseudomanifest(&mut self, container: &Container) -> Result<(), MountError> {
        let uuid = container.uuid()?;
        let manifest = container.to_manifest()?;
        let text = String::from_utf8_lossy(manifest.body()).into_owned();
        let fingerprint = hex::encode(Sha256::digest(text.as_bytes()));

        if let Some(existing) = self.pseudo.get(&uuid) {
            if existing.fingerprint == fingerprint {
                return Ok(());
            }
            let mount_id = existing.mount_id;
            self.driver.unmount_storage(mount_id)?;
            self.pseudo.remove(&uuid);
        }

        let mut params = Mapping::new();
        params.insert("type".into(), "pseudomanifest".into());
        params.insert("backend-id".into(), format!("pseudo-{uuid}").into());
        params.insert("owner".into(), container.owner().into());
        params.insert("manifest-text".into(), text.into());
        let backend = self
            .client
            .registry()
            .construct(storage::base::BackendInit::new(params))?;

        let paths = vec![format!(
            "/.users/{}:/.uuid/{uuid}",
            container.owner()
        )];
        let mount_id = self.driver.mount_storage(MountCommand {
            paths,
            backend,
            read_only: true,
        })?;
        self.pseudo.insert(uuid, PseudoMount { mount_id, fingerprint });
        Ok(())
    }

    /// Unmount one storage by identity.
    pub fn unmount_storage_id(&mut self, id: &StorageId) -> Result<(), MountError> {
        let live = self
            .table
            .remove(id)
            .ok_or_else(|| MountError::NotMounted(id.backend_id.clone()))?;
        self.driver.unmount_storage(live.mount_id)
    }

    /// Unmount a container: all its storages, its pseudomanifest, and
    /// every subcontainer mounted beneath it.
    pub fn unmount_container(&mut self, container_uuid: Uuid) -> Result<(), MountError> {
        // Children first.
        let children: HashSet<Uuid> = self
            .table
            .iter()
            .filter_map(|(id, live)| {
                live.parent
                    .as_ref()
                    .filter(|parent| parent.container_uuid == container_uuid)
                    .map(|_| id.container_uuid)
            })
            .collect();
        for child in children {
            if child != container_uuid {
                self.unmount_container(child)?;
            }
        }

        let ids: Vec<StorageId> = self
            .table
            .keys()
            .filter(|id| id.container_uuid == container_uuid)
            .cloned()
            .collect();
        for id in ids {
            self.unmount_storage_id(&id)?;
        }
        if let Some(pseudo) = self.pseudo.remove(&container_uuid) {
            self.driver.unmount_storage(pseudo.mount_id)?;
        }
        Ok(())
    }

    /// Mount the subcontainers a storage exposes, as children of the
    /// given parent storage. Delegating subcontainers reuse the parent's
    /// live backend as their reference.
    pub fn mount_subcontainers(
        &mut self,
        container: &Container,
        parent_storage: &Storage,
    ) -> Result<Vec<StorageId>, MountError> {
        let parent_uuid = container.uuid()?;
        let parent_id = StorageId {
            container_uuid: parent_uuid,
            backend_id: parent_storage.backend_id().to_string(),
        };
        let parent_backend = self.client.construct_backend(parent_storage, None)?;
        parent_backend.mount()?;

        let mut plan = Vec::new();
        for child in parent_backend.get_children(None)? {
            let loaded = match child {
                Subcontainer::Fields { fields, .. } => {
                    Manifest::inline(fields, container.owner())
                        .and_then(Container::from_manifest)
                        .map_err(MountError::Manifest)
                }
                Subcontainer::Link { link, .. } => {
                    let trusted = parent_storage
                        .trusted()
                        .then(|| parent_storage.owner().to_string());
                    self.client
                        .read_link(&link)
                        .and_then(|bytes| {
                            self.client.load_object_from_bytes(
                                &bytes,
                                Some(container.owner()),
                                trusted,
                            )
                        })
                        .map_err(MountError::Client)
                        .and_then(|object| match object {
                            common::object::WildlandObject::Container(c) => Ok(c),
                            _ => Err(MountError::Client(client::error::ClientError::NotFound(
                                "subcontainer link does not hold a container".into(),
                            ))),
                        })
                }
            };
            let child_container = match loaded {
                Ok(container) => container,
                Err(err) => {
                    tracing::warn!("skipping subcontainer: {err}");
                    continue;
                }
            };

            let mut entry = self.plan_for(&child_container, true)?;
            // Subcontainer storages are loaded from the inline fields of
            // the synthesized manifest.
            entry.parent = Some(parent_id.clone());
            entry.reference_backend = Some(parent_backend.clone());
            plan.push(entry);
        }
        self.mount_many(plan)
    }

    /// Unmount everything. Used on shutdown.
    pub fn unmount_all(&mut self) -> Result<(), MountError> {
        for uuid in self.mounted_containers() {
            self.unmount_container(uuid)?;
        }
        Ok(())
    }
}

/// The first writable storage, else the first listed.
fn primary_backend_id(storages: &[Storage]) -> Option<String> {
    storages
        .iter()
        .find(|s| !s.read_only())
        .or_else(|| storages.first())
        .map(|s| s.backend_id().to_string())
}

/// The filesystem paths a storage mounts under.
///
/// Every storage gets its canonical `/.backends/` path; the primary also
/// serves the `/.uuid/` alias, the container's expanded paths, and the
/// same set under each user path prefix.
pub fn storage_mount_paths(
    container: &Container,
    storage: &Storage,
    primary: bool,
    user_paths: &[String],
) -> Result<Vec<String>, MountError> {
    let owner = container.owner();
    let uuid = container.uuid()?;
    let mut paths = vec![format!(
        "/.users/{owner}:/.backends/{uuid}/{}",
        storage.backend_id()
    )];
    if primary {
        for path in container.expanded_paths() {
            let user_scoped = format!("/.users/{owner}:{path}");
            if !paths.contains(&user_scoped) {
                paths.push(user_scoped);
            }
            for prefix in user_paths {
                let aliased = format!("{}{path}", prefix.trim_end_matches('/'));
                if !paths.contains(&aliased) {
                    paths.push(aliased);
                }
            }
        }
    }
    Ok(paths)
}

/// Hash of the storage parameters and mount paths; an unchanged
/// fingerprint means no remount.
pub fn storage_fingerprint(params: &Mapping, paths: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(serde_yaml::to_string(params).unwrap_or_default().as_bytes());
    for path in paths {
        hasher.update([0u8]);
        hasher.update(path.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_changes_with_params_and_paths() {
        let mut params = Mapping::new();
        params.insert("type".into(), "local".into());
        let base = storage_fingerprint(&params, &["/a".into()]);

        assert_eq!(base, storage_fingerprint(&params, &["/a".into()]));
        assert_ne!(base, storage_fingerprint(&params, &["/b".into()]));

        params.insert("location".into(), "/tmp".into());
        assert_ne!(base, storage_fingerprint(&params, &["/a".into()]));
    }
}
