//! The Wildland path resolver.
//!
//! Resolution walks user→bridge→container→storage chains, across
//! federation boundaries, until every part of the path has matched. The
//! walk emits [`Step`]s lazily: the I/O for a candidate happens only when
//! the traversal actually reaches it, so `read_file` stops at the first
//! container that has the file.
//!
//! Per part, candidates come from three places, in order:
//!
//! 1. locally loaded containers whose expanded paths include the part;
//! 2. locally loaded bridges whose paths include the part (crossing into
//!    the target user's namespace);
//! 3. manifests found inside the current container's storage, through its
//!    `manifest-pattern`.
//!
//! Crossing a bridge clones the client with the target's pubkey loaded,
//! so manifests published by the target verify. Circular bridges are
//! permitted; each (owner, part-index) pair is crossed at most once.

use std::collections::HashSet;
use std::path::Path;

use common::manifest::Manifest;
use common::object::{Bridge, Container, User, UserLocation, WildlandObject};
use common::path::{PathError, WildlandPath};
use storage::driver::StorageDriver;
use storage::subcontainers::{find_manifest_files, watch_pattern};

use crate::client::Client;
use crate::error::ClientError;

/// A single step of a resolved path.
#[derive(Clone)]
pub struct Step {
    /// Owner of the current manifest.
    pub owner: String,
    /// Client with the current keys loaded.
    pub client: Client,
    pub container: Container,
    /// Set when the search crossed into another user at this step.
    pub user: Option<User>,
}

/// What a mount watcher must observe to keep one resolved path fresh.
#[derive(Debug, Clone)]
pub struct WatchParam {
    pub container: Container,
    /// Storage-relative file patterns, `{path}` already substituted.
    pub patterns: Vec<String>,
}

pub struct Search {
    client: Client,
    wlpath: WildlandPath,
    initial_owner: String,
}

impl Search {
    /// Prepare a search; resolves the owner alias and, when the owner is
    /// unknown locally, fetches their user manifest from the hint URL.
    pub fn new(client: &Client, wlpath: WildlandPath) -> Result<Self, ClientError> {
        let initial_owner = client.resolve_owner(wlpath.owner.as_deref())?;
        let mut client = client.clone();

        if !client.sig().is_known_owner(&initial_owner) {
            if let Some(hint) = &wlpath.hint {
                register_hinted_user(&mut client, hint, &initial_owner)?;
            }
        }

        Ok(Search {
            client,
            wlpath,
            initial_owner,
        })
    }

    /// Lazily yield every step matching the full path.
    pub fn steps(&self) -> Steps<'_> {
        Steps {
            search: self,
            stack: None,
            visited_bridges: HashSet::new(),
            first_error: None,
        }
    }

    /// All containers matching the path.
    pub fn read_container(&self) -> Result<Vec<Container>, ClientError> {
        if self.wlpath.file_path.is_some() {
            return Err(
                PathError::Other(format!("expecting a container path: {}", self.wlpath)).into(),
            );
        }
        let mut steps = self.steps();
        let mut containers: Vec<Container> = Vec::new();
        for step in &mut steps {
            containers.push(step.container);
        }
        if containers.is_empty() {
            return Err(steps.take_error().unwrap_or_else(|| {
                ClientError::NotFound(format!("container not found for path: {}", self.wlpath))
            }));
        }
        Ok(containers)
    }

    /// Read the file under the path, from the first container that has it.
    pub fn read_file(&self) -> Result<Vec<u8>, ClientError> {
        let file_path = self.require_file_path()?;
        let relative = Path::new(file_path.trim_start_matches('/')).to_path_buf();

        let mut steps = self.steps();
        for step in &mut steps {
            let driver = match self.open_step_storage(&step, false) {
                Ok(driver) => driver,
                Err(err) => {
                    tracing::debug!("cannot open storage for step: {err}");
                    continue;
                }
            };
            match driver.read_file(&relative) {
                Ok(data) => return Ok(data),
                Err(err) if err.is_recoverable() => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(steps
            .take_error()
            .unwrap_or_else(|| ClientError::NotFound(format!("{}", self.wlpath))))
    }

    /// Write the file under the path, into the first container with a
    /// writable storage.
    pub fn write_file(&self, data: &[u8]) -> Result<(), ClientError> {
        let file_path = self.require_file_path()?;
        let relative = Path::new(file_path.trim_start_matches('/')).to_path_buf();

        let mut steps = self.steps();
        for step in &mut steps {
            let driver = match self.open_step_storage(&step, true) {
                Ok(driver) => driver,
                Err(err) => {
                    tracing::debug!("cannot open writable storage for step: {err}");
                    continue;
                }
            };
            return driver.write_file(&relative, data).map_err(Into::into);
        }
        Err(steps
            .take_error()
            .unwrap_or_else(|| ClientError::NotFound(format!("{}", self.wlpath))))
    }

    /// For incremental mounts: every container along each resolved chain,
    /// paired with the file patterns whose changes invalidate the chain.
    /// The final part's file path becomes the innermost pattern.
    pub fn watch_params(&self) -> Result<Vec<WatchParam>, ClientError> {
        let mut visited = HashSet::new();
        let mut first_error = None;
        let mut params = Vec::new();
        for (step, part) in self.resolve_first(&mut visited, &mut first_error) {
            self.watch_walk(step, part, &mut visited, &mut first_error, &mut params);
        }
        Ok(params)
    }

    fn watch_walk(
        &self,
        step: Step,
        part: usize,
        visited: &mut HashSet<(String, usize)>,
        first_error: &mut Option<ClientError>,
        out: &mut Vec<WatchParam>,
    ) {
        if part == self.wlpath.parts.len() {
            let patterns = match &self.wlpath.file_path {
                Some(file) => vec![file.clone()],
                None => vec![],
            };
            out.push(WatchParam {
                container: step.container,
                patterns,
            });
            return;
        }

        if let Ok(storage) = step.client.select_storage(&step.container, false) {
            out.push(WatchParam {
                container: step.container.clone(),
                patterns: watch_pattern(
                    &storage.effective_manifest_pattern(),
                    &self.wlpath.parts[part],
                ),
            });
        }
        for (next, next_part) in self.resolve_next(&step, part, visited, first_error) {
            self.watch_walk(next, next_part, visited, first_error, out);
        }
    }

    fn require_file_path(&self) -> Result<&str, ClientError> {
        self.wlpath
            .file_path
            .as_deref()
            .ok_or_else(|| {
                PathError::Other(format!("expecting a file path: {}", self.wlpath)).into()
            })
    }

    fn open_step_storage(
        &self,
        step: &Step,
        writable: bool,
    ) -> Result<StorageDriver, ClientError> {
        let storage = step.client.select_storage(&step.container, writable)?;
        let backend = step.client.construct_backend(&storage, None)?;
        Ok(StorageDriver::new(backend)?)
    }

    /* Resolution */

    fn resolve_first(
        &self,
        visited: &mut HashSet<(String, usize)>,
        first_error: &mut Option<ClientError>,
    ) -> Vec<(Step, usize)> {
        let part = &self.wlpath.parts[0];
        let mut out = Vec::new();

        // Local containers and bridges under the initial owner.
        out.extend(
            self.resolve_local(&self.client, &self.initial_owner, part, 0, visited, first_error)
                .into_iter()
                .map(|step| (step, 1)),
        );

        // The initial owner's own catalog: part 0 is looked up inside it.
        for user in self.client.users().to_vec() {
            if user.owner() == self.initial_owner {
                for step in self.user_steps(&self.client, &user) {
                    out.push((step, 0));
                }
            }
        }
        out
    }

    /// Containers and bridges already loaded locally that match `part`.
    fn resolve_local(
        &self,
        client: &Client,
        owner: &str,
        part: &str,
        part_index: usize,
        visited: &mut HashSet<(String, usize)>,
        first_error: &mut Option<ClientError>,
    ) -> Vec<Step> {
        let mut out = Vec::new();
        for container in client.containers() {
            if container.owner() == owner
                && container.expanded_paths().iter().any(|p| p == part)
            {
                tracing::debug!("{part}: local container match");
                out.push(Step {
                    owner: owner.to_string(),
                    client: client.clone(),
                    container: container.clone(),
                    user: None,
                });
            }
        }
        for bridge in client.bridges().to_vec() {
            if bridge.owner() == owner && bridge.paths().iter().any(|p| p == part) {
                tracing::debug!("{part}: local bridge match");
                out.extend(self.bridge_steps(client, &bridge, part_index, visited, first_error));
            }
        }
        out
    }

    /// Resolve part `part_index` within a step: local matches first, then
    /// manifests found in the step's storage.
    fn resolve_next(
        &self,
        step: &Step,
        part_index: usize,
        visited: &mut HashSet<(String, usize)>,
        first_error: &mut Option<ClientError>,
    ) -> Vec<(Step, usize)> {
        let part = &self.wlpath.parts[part_index];
        let mut out: Vec<(Step, usize)> = self
            .resolve_local(&step.client, &step.owner, part, part_index, visited, first_error)
            .into_iter()
            .map(|next| (next, part_index + 1))
            .collect();

        let (storage, driver) = match step
            .client
            .select_storage(&step.container, false)
            .and_then(|storage| {
                let backend = step.client.construct_backend(&storage, None)?;
                Ok((storage, StorageDriver::new(backend)?))
            }) {
            Ok(found) => found,
            Err(err) => {
                tracing::debug!("{part}: no usable storage: {err}");
                record_error(first_error, err);
                return out;
            }
        };

        let pattern = storage.effective_manifest_pattern();
        let manifest_paths =
            match find_manifest_files(driver.backend().as_ref(), &pattern, Some(part)) {
                Ok(paths) => paths,
                Err(err) => {
                    tracing::debug!("{part}: manifest lookup failed: {err}");
                    record_error(first_error, err.into());
                    return out;
                }
            };

        let trusted_owner = storage.trusted().then(|| storage.owner().to_string());
        for manifest_path in manifest_paths {
            let relative = Path::new(manifest_path.trim_start_matches('/'));
            let bytes = match driver.read_file(relative) {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::warn!("could not read {manifest_path}: {err}");
                    continue;
                }
            };
            let object = match step.client.load_object_from_bytes(
                &bytes,
                None,
                trusted_owner.clone(),
            ) {
                Ok(object) => object,
                Err(err) => {
                    tracing::warn!("could not load {manifest_path}: {err}");
                    record_error(first_error, err);
                    continue;
                }
            };

            match object {
                WildlandObject::Container(container) => {
                    if container.owner() != step.owner {
                        tracing::warn!(
                            "{manifest_path}: unexpected owner {} (expected {})",
                            container.owner(),
                            step.owner
                        );
                        continue;
                    }
                    if let Some(manifest) = container.manifest() {
                        if !self.readable_by_viewer(manifest) {
                            tracing::warn!("{manifest_path}: not readable by viewer, skipping");
                            continue;
                        }
                    }
                    if !container.expanded_paths().iter().any(|p| p == part) {
                        tracing::debug!("{part}: path not found in manifest, skipping");
                        continue;
                    }
                    tracing::info!("{part}: container manifest: {manifest_path}");
                    out.push((
                        Step {
                            owner: step.owner.clone(),
                            client: step.client.clone(),
                            container,
                            user: None,
                        },
                        part_index + 1,
                    ));
                }
                WildlandObject::Bridge(bridge) => {
                    if bridge.owner() != step.owner {
                        tracing::warn!(
                            "{manifest_path}: unexpected bridge owner {} (expected {})",
                            bridge.owner(),
                            step.owner
                        );
                        continue;
                    }
                    if !bridge.paths().iter().any(|p| p == part) {
                        continue;
                    }
                    tracing::info!("{part}: bridge manifest: {manifest_path}");
                    for next in
                        self.bridge_steps(&step.client, &bridge, part_index, visited, first_error)
                    {
                        out.push((next, part_index + 1));
                    }
                }
                _ => {
                    tracing::debug!("{manifest_path}: neither container nor bridge, skipping");
                }
            }
        }
        out
    }

    /// Cross a bridge: sub-client with the target's key, fetch and verify
    /// the target user manifest, then enter the target's catalog.
    fn bridge_steps(
        &self,
        client: &Client,
        bridge: &Bridge,
        part_index: usize,
        visited: &mut HashSet<(String, usize)>,
        first_error: &mut Option<ClientError>,
    ) -> Vec<Step> {
        if !visited.insert((bridge.user().to_string(), part_index)) {
            tracing::debug!(
                "bridge to {} at part {part_index} already visited",
                bridge.user()
            );
            return vec![];
        }

        let crossed = (|| -> Result<Vec<Step>, ClientError> {
            let sub = client.sub_client_with_key(bridge.user(), bridge.pubkey())?;
            let bytes = match bridge.user_location() {
                UserLocation::Url(url) => sub.read_from_url(url)?,
                UserLocation::Link(link) => sub.read_link(link)?,
            };
            let user = match sub.load_object_from_bytes(&bytes, Some(bridge.user()), None)? {
                WildlandObject::User(user) => user,
                _ => {
                    return Err(ClientError::Config(format!(
                        "bridge target of {} is not a user manifest",
                        bridge.user()
                    )))
                }
            };
            if user.primary_pubkey() != bridge.pubkey() {
                return Err(ClientError::Config(format!(
                    "bridge pubkey does not match user manifest for {}",
                    bridge.user()
                )));
            }
            for pubkey in user.pubkeys() {
                if let Ok(key) = common::crypto::PublicKey::from_hex(pubkey) {
                    sub.sig().load_pubkey(user.owner(), key);
                }
            }
            Ok(self.user_steps(&sub, &user))
        })();

        match crossed {
            Ok(steps) => steps,
            Err(err) => {
                tracing::warn!("bridge to {} failed: {err}", bridge.user());
                record_error(first_error, err);
                vec![]
            }
        }
    }

    /// One step per loadable container of the user's manifests catalog.
    fn user_steps(&self, client: &Client, user: &User) -> Vec<Step> {
        client
            .load_catalog(user)
            .into_iter()
            .map(|container| Step {
                owner: user.owner().to_string(),
                client: client.clone(),
                container,
                user: Some(user.clone()),
            })
            .collect()
    }

    fn readable_by_viewer(&self, manifest: &Manifest) -> bool {
        manifest.readable_by(&self.initial_owner)
            || self
                .client
                .config()
                .default_owner()
                .map(|owner| manifest.readable_by(owner))
                .unwrap_or(false)
    }
}

fn record_error(first_error: &mut Option<ClientError>, err: ClientError) {
    if first_error.is_none() {
        *first_error = Some(err);
    }
}

/// Fetch the user manifest named by a path hint and register the user
/// with the client, verifying the stated owner.
fn register_hinted_user(
    client: &mut Client,
    hint: &str,
    owner: &str,
) -> Result<(), ClientError> {
    let bytes = client.read_from_url(hint)?;
    // Keys must be registered before the signature can verify.
    let (_, body) = Manifest::parse(&bytes)?;
    let unsigned = Manifest::from_unsigned(body)?;
    if unsigned.owner() != owner {
        return Err(ClientError::Config(format!(
            "hinted user manifest has owner {} (expected {owner})",
            unsigned.owner()
        )));
    }
    if let Some(serde_yaml::Value::Sequence(pubkeys)) = unsigned.fields().get("pubkeys") {
        for pubkey in pubkeys.iter().filter_map(serde_yaml::Value::as_str) {
            if let Ok(key) = common::crypto::PublicKey::from_hex(pubkey) {
                client.sig().load_pubkey(owner, key);
            }
        }
    }
    if client.config().dummy {
        client
            .sig()
            .load_pubkey(owner, common::crypto::PublicKey::from_bytes(owner.as_bytes()));
    }
    match client.load_object_from_bytes(&bytes, Some(owner), None)? {
        WildlandObject::User(user) => {
            client.add_user(user);
            Ok(())
        }
        _ => Err(ClientError::Config(format!(
            "hint {hint} does not point at a user manifest"
        ))),
    }
}

/// Lazy step stream over a search. Work is expanded depth-first; a
/// candidate's storage is only touched when the stream reaches it.
pub struct Steps<'a> {
    search: &'a Search,
    /// `None` until the first `next()` call seeds the stack.
    stack: Option<Vec<(Step, usize)>>,
    visited_bridges: HashSet<(String, usize)>,
    first_error: Option<ClientError>,
}

impl Steps<'_> {
    /// The first recoverable error hit during traversal, for surfacing
    /// when the stream turned out empty.
    pub fn take_error(&mut self) -> Option<ClientError> {
        self.first_error.take()
    }
}

impl Iterator for Steps<'_> {
    type Item = Step;

    fn next(&mut self) -> Option<Step> {
        if self.stack.is_none() {
            let mut seed = self
                .search
                .resolve_first(&mut self.visited_bridges, &mut self.first_error);
            seed.reverse();
            self.stack = Some(seed);
        }

        while let Some((step, part_index)) = self.stack.as_mut()?.pop() {
            if part_index == self.search.wlpath.parts.len() {
                return Some(step);
            }
            let mut children = self.search.resolve_next(
                &step,
                part_index,
                &mut self.visited_bridges,
                &mut self.first_error,
            );
            children.reverse();
            self.stack.as_mut()?.extend(children);
        }
        None
    }
}
