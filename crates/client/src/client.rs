//! The client: loads and caches local manifests, fetches objects from
//! URLs, selects and constructs storages, and spawns the sub-clients the
//! resolver uses when crossing bridges.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_yaml::{Mapping, Value};

use common::crypto::{DummySigContext, Ed25519SigContext, PublicKey, SigContext};
use common::manifest::{Manifest, SchemaSet};
use common::object::{
    Bridge, CatalogEntry, Container, Link, ObjectType, Storage, User, WildlandObject,
};
use common::path::WildlandPath;
use storage::backend::needs_reference;
use storage::base::{BackendInit, BackendRegistry, StorageBackend};
use storage::driver::StorageDriver;
use storage::subcontainers::find_manifest_files;

use crate::config::{Config, MANIFEST_DIRS};
use crate::error::ClientError;
use crate::search::Search;

/// Name of the per-directory trust file: a newline-separated allowlist of
/// owner fingerprints whose unsigned manifests are accepted anywhere in
/// the subtree below it.
pub const TRUST_FILE: &str = ".wildland-owners";

pub struct Client {
    config: Config,
    sig: Box<dyn SigContext>,
    schemas: Arc<SchemaSet>,
    registry: Arc<BackendRegistry>,
    users: Vec<User>,
    containers: Vec<Container>,
    bridges: Vec<Bridge>,
    storages: Vec<Storage>,
    http: reqwest::blocking::Client,
}

impl Clone for Client {
    fn clone(&self) -> Self {
        Client {
            config: self.config.clone(),
            sig: self.sig.clone_ctx(),
            schemas: self.schemas.clone(),
            registry: self.registry.clone(),
            users: self.users.clone(),
            containers: self.containers.clone(),
            bridges: self.bridges.clone(),
            storages: self.storages.clone(),
            http: self.http.clone(),
        }
    }
}

impl Client {
    /// Build a client: signature context per config, default backend
    /// registry, schema set, then load and recognize local manifests.
    pub fn new(config: Config) -> Result<Self, ClientError> {
        let sig: Box<dyn SigContext> = if config.dummy {
            Box::new(DummySigContext::new())
        } else {
            Box::new(Ed25519SigContext::new())
        };
        let mut client = Client {
            config,
            sig,
            schemas: Arc::new(SchemaSet::load().map_err(ClientError::Manifest)?),
            registry: Arc::new(BackendRegistry::with_defaults()),
            users: Vec::new(),
            containers: Vec::new(),
            bridges: Vec::new(),
            storages: Vec::new(),
            http: reqwest::blocking::Client::new(),
        };
        client.ensure_dirs()?;
        client.recognize_users_and_bridges()?;
        client.load_local_manifests()?;
        Ok(client)
    }

    fn ensure_dirs(&self) -> Result<(), ClientError> {
        for kind in MANIFEST_DIRS {
            let dir = self.config.manifest_dir(kind);
            std::fs::create_dir_all(&dir).map_err(|e| ClientError::io(&dir, e))?;
        }
        Ok(())
    }

    /* Accessors */

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sig(&self) -> &dyn SigContext {
        self.sig.as_ref()
    }

    pub fn schemas(&self) -> &SchemaSet {
        &self.schemas
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    pub fn containers(&self) -> &[Container] {
        &self.containers
    }

    pub fn bridges(&self) -> &[Bridge] {
        &self.bridges
    }

    pub fn storages(&self) -> &[Storage] {
        &self.storages
    }

    /// Register a user loaded from elsewhere (a path hint, an import).
    pub fn add_user(&mut self, user: User) {
        self.users.push(user);
    }

    /// The default owner, with aliases resolved.
    pub fn resolve_owner(&self, owner: Option<&str>) -> Result<String, ClientError> {
        match owner {
            None => self
                .config
                .default_owner()
                .map(str::to_string)
                .ok_or_else(|| ClientError::Config("no default owner configured".into())),
            Some(alias) if alias.starts_with('@') => self.config.resolve_alias(alias),
            Some(owner) => Ok(owner.to_string()),
        }
    }

    /* Local manifest loading */

    /// Register every local user's pubkeys and every bridge's target
    /// pubkey with the signature context, so verification succeeds before
    /// full loading starts.
    pub fn recognize_users_and_bridges(&mut self) -> Result<(), ClientError> {
        for path in manifest_files(&self.config.manifest_dir("users"))? {
            let bytes = std::fs::read(&path).map_err(|e| ClientError::io(&path, e))?;
            if let Err(err) = self.register_user_keys(&bytes) {
                tracing::warn!("cannot recognize user keys from {}: {err}", path.display());
            }
        }
        for path in manifest_files(&self.config.manifest_dir("bridges"))? {
            let bytes = std::fs::read(&path).map_err(|e| ClientError::io(&path, e))?;
            if let Err(err) = self.register_bridge_keys(&bytes) {
                tracing::warn!("cannot recognize bridge keys from {}: {err}", path.display());
            }
        }
        Ok(())
    }

    /// Pre-register the keys a user manifest declares (its body is read
    /// without verification; the subsequent verified load uses the keys).
    fn register_user_keys(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        let (_, body) = Manifest::parse(bytes)?;
        let manifest = Manifest::from_unsigned(body)?;
        let owner = manifest.owner().to_string();
        if let Some(Value::Sequence(pubkeys)) = manifest.fields().get("pubkeys") {
            for pubkey in pubkeys.iter().filter_map(Value::as_str) {
                if let Ok(key) = PublicKey::from_hex(pubkey) {
                    self.sig.load_pubkey(&owner, key);
                }
            }
        }
        // The dummy context identifies keys with owners.
        if self.config.dummy {
            self.sig
                .load_pubkey(&owner, PublicKey::from_bytes(owner.as_bytes()));
        }
        Ok(())
    }

    fn register_bridge_keys(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        let (_, body) = Manifest::parse(bytes)?;
        let manifest = Manifest::from_unsigned(body)?;
        if let (Some(user), Some(pubkey)) = (
            manifest.fields().get("user").and_then(Value::as_str),
            manifest.fields().get("pubkey").and_then(Value::as_str),
        ) {
            if let Ok(key) = PublicKey::from_hex(pubkey) {
                self.sig.load_pubkey(user, key);
            }
            if self.config.dummy {
                self.sig
                    .load_pubkey(user, PublicKey::from_bytes(user.as_bytes()));
            }
        }
        Ok(())
    }

    /// Load every manifest in the configured directories into the caches.
    pub fn load_local_manifests(&mut self) -> Result<(), ClientError> {
        self.users.clear();
        self.containers.clear();
        self.bridges.clear();
        self.storages.clear();

        for (kind, object_type) in [
            ("users", ObjectType::User),
            ("bridges", ObjectType::Bridge),
            ("containers", ObjectType::Container),
            ("storages", ObjectType::Storage),
        ] {
            for path in manifest_files(&self.config.manifest_dir(kind))? {
                match self.load_local_object(&path, object_type) {
                    Ok(object) => self.cache_object(object),
                    Err(err) => {
                        tracing::warn!("skipping {}: {err}", path.display());
                    }
                }
            }
        }
        tracing::debug!(
            users = self.users.len(),
            containers = self.containers.len(),
            bridges = self.bridges.len(),
            storages = self.storages.len(),
            "local manifests loaded"
        );
        Ok(())
    }

    fn load_local_object(
        &self,
        path: &Path,
        expected_type: ObjectType,
    ) -> Result<WildlandObject, ClientError> {
        let bytes = std::fs::read(path).map_err(|e| ClientError::io(path, e))?;
        let trusted = trusted_owner_match(&bytes, &trusted_owners_for(path));
        let object = self.load_object_from_bytes(&bytes, None, trusted)?;
        if object.object_type() != expected_type {
            return Err(ClientError::Config(format!(
                "expected a {expected_type} manifest in {}",
                path.display()
            )));
        }
        Ok(object)
    }

    fn cache_object(&mut self, object: WildlandObject) {
        match object {
            WildlandObject::User(user) => self.users.push(user),
            WildlandObject::Container(container) => self.containers.push(container),
            WildlandObject::Bridge(bridge) => self.bridges.push(bridge),
            WildlandObject::Storage(storage) => self.storages.push(storage),
            WildlandObject::Link(_) => {}
        }
    }

    /// Verify and load an object of any type from manifest bytes.
    pub fn load_object_from_bytes(
        &self,
        bytes: &[u8],
        expected_owner: Option<&str>,
        trusted_owner: Option<String>,
    ) -> Result<WildlandObject, ClientError> {
        let manifest = Manifest::verify_and_load(
            bytes,
            self.sig.as_ref(),
            expected_owner,
            trusted_owner.as_deref(),
            &self.schemas,
        )?;
        Ok(WildlandObject::from_manifest(manifest)?)
    }

    /* URL loading */

    /// Fetch raw bytes from a `file:`, `http(s):` or `wildland:` URL.
    pub fn read_from_url(&self, url: &str) -> Result<Vec<u8>, ClientError> {
        if let Some(rest) = url.strip_prefix("wildland:") {
            let wlpath = WildlandPath::from_str(rest)?;
            return Search::new(self, wlpath)?.read_file();
        }
        if url.starts_with("file:") {
            let path = file_url_to_path(url)?;
            return std::fs::read(&path).map_err(|e| ClientError::io(&path, e));
        }
        if url.starts_with("http://") || url.starts_with("https://") {
            let response = self
                .http
                .get(url)
                .header(reqwest::header::ACCEPT, "application/x-yaml, text/yaml, */*")
                .send()
                .map_err(|e| ClientError::Url {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;
            if !response.status().is_success() {
                return Err(ClientError::Url {
                    url: url.to_string(),
                    reason: format!("status {}", response.status()),
                });
            }
            return response.bytes().map(|b| b.to_vec()).map_err(|e| ClientError::Url {
                url: url.to_string(),
                reason: e.to_string(),
            });
        }
        Err(ClientError::Url {
            url: url.to_string(),
            reason: "unsupported scheme".to_string(),
        })
    }

    /// Fetch and verify an object from a URL. Local `file:` URLs honor
    /// `.wildland-owners` trust files.
    pub fn load_object_from_url(
        &self,
        url: &str,
        expected_owner: Option<&str>,
    ) -> Result<WildlandObject, ClientError> {
        let bytes = self.read_from_url(url)?;
        let trusted_owner = if url.starts_with("file:") {
            file_url_to_path(url)
                .ok()
                .and_then(|p| trusted_owner_match(&bytes, &trusted_owners_for(&p)))
        } else {
            None
        };
        self.load_object_from_bytes(&bytes, expected_owner, trusted_owner)
    }

    /// Read the file a link points at, via its inline storage.
    pub fn read_link(&self, link: &Link) -> Result<Vec<u8>, ClientError> {
        let manifest = Manifest::inline(link.storage_fields().clone(), link.owner())?;
        let storage = Storage::from_manifest(manifest)?;
        let backend = self.construct_backend(&storage, None)?;
        let driver = StorageDriver::new(backend)?;
        let relative = Path::new(link.file().trim_start_matches('/'));
        Ok(driver.read_file(relative)?)
    }

    /// The containers of a user's manifests catalog, in catalog order.
    /// Entries that fail to load or claim a foreign owner are skipped.
    pub fn load_catalog(&self, user: &User) -> Vec<Container> {
        let mut containers = Vec::new();
        for entry in user.manifests_catalog() {
            let loaded = match entry {
                CatalogEntry::Url(url) => {
                    match self.load_object_from_url(url, Some(user.owner())) {
                        Ok(WildlandObject::Container(container)) => Ok(container),
                        Ok(_) => Err(ClientError::Config(format!(
                            "catalog entry {url} is not a container"
                        ))),
                        Err(err) => Err(err),
                    }
                }
                CatalogEntry::Inline(fields) => Manifest::inline(fields.clone(), user.owner())
                    .and_then(Container::from_manifest)
                    .map_err(ClientError::Manifest),
            };
            match loaded {
                Ok(container) if container.owner() == user.owner() => containers.push(container),
                Ok(container) => tracing::warn!(
                    "unexpected owner for catalog container: {} (expected {})",
                    container.owner(),
                    user.owner()
                ),
                Err(err) => tracing::warn!("cannot load catalog container: {err}"),
            }
        }
        containers
    }

    /* Storages */

    /// All storages of a container, inline and URL-referenced.
    pub fn load_storages(&self, container: &Container) -> Vec<Storage> {
        let mut storages = Vec::new();
        for reference in container.backend_refs() {
            let loaded = match reference {
                Value::String(url) => self
                    .load_object_from_url(url, Some(container.owner()))
                    .and_then(|object| match object {
                        WildlandObject::Storage(storage) => Ok(storage),
                        _ => Err(ClientError::Config(format!(
                            "storage url {url} does not hold a storage manifest"
                        ))),
                    }),
                Value::Mapping(fields) => {
                    // Inline storages inherit their container's identity.
                    let mut fields = fields.clone();
                    if !fields.contains_key("container-path") {
                        if let Ok(uuid_path) = container.uuid_path() {
                            fields.insert("container-path".into(), uuid_path.into());
                        }
                    }
                    if !fields.contains_key("backend-id") {
                        // Derived, not random: the same inline params must
                        // map to the same storage identity on every load.
                        let seed = serde_yaml::to_string(&fields).unwrap_or_default();
                        let ns = container.uuid().unwrap_or(uuid::Uuid::NAMESPACE_OID);
                        fields.insert(
                            "backend-id".into(),
                            uuid::Uuid::new_v5(&ns, seed.as_bytes()).to_string().into(),
                        );
                    }
                    Manifest::inline(fields, container.owner())
                        .and_then(Storage::from_manifest)
                        .map_err(ClientError::Manifest)
                }
                other => Err(ClientError::Config(format!(
                    "storage reference is neither URL nor mapping: {other:?}"
                ))),
            };
            match loaded {
                Ok(storage) => storages.push(storage),
                Err(err) => tracing::warn!(
                    "skipping storage of container {}: {err}",
                    container.paths().first().map(String::as_str).unwrap_or("?")
                ),
            }
        }
        storages
    }

    /// Pick one storage from a container: first writable if required,
    /// else any local, else any supported one.
    pub fn select_storage(
        &self,
        container: &Container,
        writable_required: bool,
    ) -> Result<Storage, ClientError> {
        let storages: Vec<Storage> = self
            .load_storages(container)
            .into_iter()
            .filter(|s| self.registry.is_type_supported(s.storage_type()))
            .collect();
        if writable_required {
            return storages
                .iter()
                .find(|s| !s.read_only())
                .cloned()
                .ok_or_else(|| {
                    ClientError::NotFound("no writable storage for container".to_string())
                });
        }
        storages
            .iter()
            .find(|s| s.is_local())
            .or_else(|| storages.first())
            .cloned()
            .ok_or_else(|| ClientError::NotFound("no usable storage for container".to_string()))
    }

    /// Construct a live backend for a storage, resolving its reference
    /// container first when the type requires one. An already-resolved
    /// inner backend can be supplied (the mount controller does this for
    /// `@parent-container` references).
    pub fn construct_backend(
        &self,
        storage: &Storage,
        inner: Option<Arc<dyn StorageBackend>>,
    ) -> Result<Arc<dyn StorageBackend>, ClientError> {
        let params = storage.params().clone();
        let init = if needs_reference(storage.storage_type()) {
            let inner = match inner {
                Some(inner) => inner,
                None => self.resolve_reference_backend(&params, storage.owner())?,
            };
            BackendInit::with_inner(params, inner)
        } else {
            BackendInit::new(params)
        };
        Ok(self.registry.construct(init)?)
    }

    fn resolve_reference_backend(
        &self,
        params: &Mapping,
        owner: &str,
    ) -> Result<Arc<dyn StorageBackend>, ClientError> {
        let reference = params.get("reference-container").ok_or_else(|| {
            ClientError::Config("reference-holding storage without reference-container".into())
        })?;
        let container = match reference {
            Value::String(url) => match self.load_object_from_url(url, None)? {
                WildlandObject::Container(container) => container,
                _ => {
                    return Err(ClientError::Config(format!(
                        "reference-container {url} is not a container"
                    )))
                }
            },
            Value::Mapping(fields) => {
                let manifest = Manifest::inline(fields.clone(), owner)?;
                Container::from_manifest(manifest)?
            }
            other => {
                return Err(ClientError::Config(format!(
                    "reference-container is neither URL nor mapping: {other:?}"
                )))
            }
        };
        let storage = self.select_storage(&container, false)?;
        self.construct_backend(&storage, None)
    }

    /* Sub-clients and bridges */

    /// A clone whose signature context additionally trusts `pubkey` under
    /// `owner`; used when the resolver crosses a bridge.
    pub fn sub_client_with_key(&self, owner: &str, pubkey: &str) -> Result<Client, ClientError> {
        let sub = self.clone();
        if let Ok(key) = PublicKey::from_hex(pubkey) {
            sub.sig.load_pubkey(owner, key);
        }
        if self.config.dummy {
            sub.sig
                .load_pubkey(owner, PublicKey::from_bytes(owner.as_bytes()));
        }
        Ok(sub)
    }

    /// Local namespace paths under which a given user is reachable, for
    /// mount-path generation. The default owner also lives at the root.
    pub fn get_bridge_paths_for_user(&self, owner: &str) -> Vec<String> {
        self.bridges
            .iter()
            .filter(|bridge| bridge.user() == owner)
            .flat_map(|bridge| bridge.paths().iter().cloned())
            .collect()
    }

    /* Saving and publishing */

    /// Create a user with a fresh key and write their manifest. Users
    /// are never destroyed by the runtime.
    pub fn create_user(&mut self, name: &str, paths: Vec<String>) -> Result<User, ClientError> {
        let (owner, pubkey) = self.sig.generate()?;
        let user = User::new(&owner, pubkey.to_hex(), paths);
        self.save_object(&WildlandObject::User(user.clone()), name)?;
        Ok(user)
    }

    /// Duplicate a container: new UUID, same paths and content, and a
    /// fresh `backend-id` on every inline storage so the copy mounts as
    /// a distinct set of storages. URL-referenced storages stay shared
    /// with the original; rewriting a standalone manifest is up to its
    /// owner.
    pub fn duplicate_container(&self, container: &Container) -> Result<Container, ClientError> {
        let mut copy = container.duplicate();
        let uuid_path = copy.uuid_path().map_err(ClientError::Manifest)?;

        let mut backends = Vec::with_capacity(copy.backend_refs().len());
        for reference in copy.backend_refs().to_vec() {
            match reference {
                Value::Mapping(mut fields) => {
                    fields.insert("container-path".into(), uuid_path.clone().into());
                    if !fields.contains_key("backend-id") {
                        fields.insert(
                            "backend-id".into(),
                            uuid::Uuid::new_v4().to_string().into(),
                        );
                    }
                    let manifest = Manifest::inline(fields, copy.owner())?;
                    let mut storage = Storage::from_manifest(manifest)?;
                    storage.refresh_backend_id();
                    backends.push(Value::Mapping(storage.to_fields()));
                }
                other => {
                    tracing::debug!("keeping shared storage reference on duplicate: {other:?}");
                    backends.push(other);
                }
            }
        }
        copy.set_backends(backends);
        Ok(copy)
    }

    /// Import another user: fetch their manifest and graft them into the
    /// local namespace through a bridge under `/forests/…` paths.
    pub fn import_user(&mut self, url: &str, name: &str) -> Result<Bridge, ClientError> {
        let user = match self.load_object_from_url(url, None)? {
            WildlandObject::User(user) => user,
            other => {
                return Err(ClientError::Config(format!(
                    "{url} holds a {} manifest, not a user",
                    other.object_type()
                )))
            }
        };
        let bridging_owner = self
            .config
            .resolve_alias("@default-owner")
            .or_else(|_| self.resolve_owner(None))?;
        let paths = common::object::Bridge::create_safe_bridge_paths(user.owner(), user.paths());
        let bridge = Bridge::new(
            &bridging_owner,
            user.owner(),
            user.primary_pubkey().to_string(),
            common::object::UserLocation::Url(url.to_string()),
            paths,
        );
        self.save_object(&WildlandObject::Bridge(bridge.clone()), name)?;
        Ok(bridge)
    }

    /// Sign and write an object manifest under the per-kind directory.
    pub fn save_object(&mut self, object: &WildlandObject, name: &str) -> Result<PathBuf, ClientError> {
        let (kind, manifest) = match object {
            WildlandObject::User(user) => ("users", user.to_manifest()?),
            WildlandObject::Container(container) => ("containers", container.to_manifest()?),
            WildlandObject::Storage(storage) => ("storages", storage.to_manifest()?),
            WildlandObject::Bridge(bridge) => ("bridges", bridge.to_manifest()?),
            WildlandObject::Link(_) => {
                return Err(ClientError::Config(
                    "links cannot be standalone manifests".into(),
                ))
            }
        };
        let bytes = manifest.to_bytes(self.sig.as_ref())?;
        let path = self
            .config
            .manifest_dir(kind)
            .join(format!("{name}.{}.yaml", object.object_type()));
        std::fs::write(&path, bytes).map_err(|e| ClientError::io(&path, e))?;
        self.load_local_manifests()?;
        Ok(path)
    }

    /// Publish a container's manifest into a catalog storage of its
    /// owner: one copy per expanded path, per the storage's glob pattern.
    pub fn publish_container(&self, user: &User, container: &Container) -> Result<(), ClientError> {
        let (driver, pattern) = self.catalog_publish_target(user)?;
        let manifest = container.to_manifest()?;
        let bytes = manifest.to_bytes(self.sig.as_ref())?;
        for relpath in publish_paths(&pattern, container)? {
            if let Some(parent) = relpath.parent() {
                driver.makedirs(parent, 0o755)?;
            }
            driver.write_file(&relpath, &bytes)?;
        }
        Ok(())
    }

    /// Remove a container's published manifests; the `/.uuid/` copy goes
    /// last so readers do not observe a half-unpublished container.
    pub fn unpublish_container(
        &self,
        user: &User,
        container: &Container,
    ) -> Result<(), ClientError> {
        let (driver, pattern) = self.catalog_publish_target(user)?;
        let mut paths = publish_paths(&pattern, container)?;
        paths.reverse();
        for relpath in paths {
            match driver.remove_file(&relpath) {
                Ok(()) => {}
                Err(err) if err.is_recoverable() => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn catalog_publish_target(
        &self,
        user: &User,
    ) -> Result<(StorageDriver, String), ClientError> {
        for entry in user.manifests_catalog() {
            let container = match entry {
                CatalogEntry::Url(url) => match self.load_object_from_url(url, Some(user.owner())) {
                    Ok(WildlandObject::Container(container)) => container,
                    _ => continue,
                },
                CatalogEntry::Inline(fields) => {
                    match Manifest::inline(fields.clone(), user.owner())
                        .and_then(Container::from_manifest)
                    {
                        Ok(container) => container,
                        Err(_) => continue,
                    }
                }
            };
            let Ok(storage) = self.select_storage(&container, true) else {
                continue;
            };
            if let Some(common::object::ManifestPattern::Glob { path }) =
                storage.manifest_pattern()
            {
                let pattern = path.clone();
                let backend = self.construct_backend(&storage, None)?;
                return Ok((StorageDriver::new(backend)?, pattern));
            }
        }
        Err(ClientError::NotFound(
            "user has no writable catalog storage with a glob pattern".to_string(),
        ))
    }

    /// Look up container manifests matching `query` inside a storage.
    pub fn find_manifests(
        &self,
        backend: &dyn StorageBackend,
        pattern: &common::object::ManifestPattern,
        query: &str,
    ) -> Result<Vec<String>, ClientError> {
        Ok(find_manifest_files(backend, pattern, Some(query))?)
    }
}

/// Published copies of a container, as storage-relative paths: the glob
/// pattern with `*` bound to the UUID file name and `{path}` bound to
/// each expanded path. The `/.uuid/` copy comes first.
fn publish_paths(pattern: &str, container: &Container) -> Result<Vec<PathBuf>, ClientError> {
    let uuid_path = container.uuid_path().map_err(ClientError::Manifest)?;
    let file_name = uuid_path.trim_start_matches("/.uuid/").to_string();
    let template = pattern
        .replace('*', &file_name)
        .replace("{object-type}", "container");
    let mut out = Vec::new();
    for path in container.expanded_paths() {
        let relative = template
            .replace("{path}", path.trim_start_matches('/'))
            .trim_start_matches('/')
            .to_string();
        let relative = PathBuf::from(relative);
        if !out.contains(&relative) {
            out.push(relative);
        }
    }
    Ok(out)
}

/// Every `*.yaml` file directly inside `dir`, sorted.
fn manifest_files(dir: &Path) -> Result<Vec<PathBuf>, ClientError> {
    let mut files = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(err) => return Err(ClientError::io(dir, err)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| ClientError::io(dir, e))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("yaml") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// The nearest `.wildland-owners` allowlist on the way up from `path`;
/// it applies to the whole subtree below the directory holding it.
pub fn trusted_owners_for(path: &Path) -> Vec<String> {
    for dir in path.ancestors().skip(1) {
        let trust_file = dir.join(TRUST_FILE);
        if let Ok(content) = std::fs::read_to_string(&trust_file) {
            return content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string)
                .collect();
        }
    }
    Vec::new()
}

/// The owner a manifest claims, if that owner is on the allowlist; only
/// then may its signature be skipped.
fn trusted_owner_match(bytes: &[u8], allowlist: &[String]) -> Option<String> {
    let (_, body) = Manifest::parse(bytes).ok()?;
    let manifest = Manifest::from_unsigned(body).ok()?;
    let owner = manifest.owner().to_string();
    allowlist.contains(&owner).then_some(owner)
}

fn file_url_to_path(url: &str) -> Result<PathBuf, ClientError> {
    let parsed = url::Url::parse(url).map_err(|e| ClientError::Url {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    if let Some(host) = parsed.host_str() {
        if host != "localhost" {
            return Err(ClientError::Url {
                url: url.to_string(),
                reason: format!("unsupported file host: {host}"),
            });
        }
    }
    Ok(PathBuf::from(parsed.path()))
}
