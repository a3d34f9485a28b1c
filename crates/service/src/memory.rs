//! In-memory store implementations.
//!
//! Back the gateway when no real directory/storage backend is wired in:
//! the default binary wiring and the test suite both build on these.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use common::identity::{
    MetaStore, PathMeta, Role, Sharing, SharingStore, StoreError, User, UserStore,
};

use crate::fs::{FileContent, FsObject, Storage, FS_KIND_DIR, FS_KIND_FILE};

/// Users, path metadata, and share records in one process-local directory.
#[derive(Default)]
pub struct MemoryDirectory {
    users: RwLock<HashMap<String, User>>,
    metas: RwLock<Vec<PathMeta>>,
    sharings: RwLock<HashMap<String, Sharing>>,
    sign_mandated_roots: RwLock<Vec<String>>,
}

impl MemoryDirectory {
    /// A directory seeded with the standard `admin` and `guest` accounts.
    pub fn new() -> Self {
        let dir = Self::default();
        dir.put_user(User {
            username: "admin".to_string(),
            role: Role::Admin,
            disabled: false,
            pwd_epoch: 1,
        });
        dir.put_user(User {
            username: "guest".to_string(),
            role: Role::Guest,
            disabled: false,
            pwd_epoch: 1,
        });
        dir
    }

    pub fn put_user(&self, user: User) {
        self.users.write().insert(user.username.clone(), user);
    }

    pub fn put_meta(&self, meta: PathMeta) {
        let mut metas = self.metas.write();
        metas.retain(|m| m.path != meta.path);
        metas.push(meta);
    }

    pub fn put_sharing(&self, sharing: Sharing) {
        self.sharings.write().insert(sharing.id.clone(), sharing);
    }

    /// Mark a subtree as backed by storage that mandates signed links.
    pub fn mandate_sign(&self, root: &str) {
        self.sign_mandated_roots.write().push(root.to_string());
    }

    fn find_role(&self, role: Role) -> Result<User, StoreError> {
        self.users
            .read()
            .values()
            .find(|u| u.role == role)
            .cloned()
            .ok_or_else(|| StoreError::Backend(format!("no {role:?} account configured")))
    }
}

fn is_ancestor_of(ancestor: &str, path: &str) -> bool {
    ancestor == "/" || path == ancestor || path.starts_with(&format!("{ancestor}/"))
}

#[async_trait]
impl UserStore for MemoryDirectory {
    async fn admin(&self) -> Result<User, StoreError> {
        self.find_role(Role::Admin)
    }

    async fn guest(&self) -> Result<User, StoreError> {
        self.find_role(Role::Guest)
    }

    async fn by_name(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().get(username).cloned())
    }
}

#[async_trait]
impl MetaStore for MemoryDirectory {
    async fn nearest_meta(&self, path: &str) -> Result<Option<PathMeta>, StoreError> {
        // Deepest ancestor carrying metadata wins.
        Ok(self
            .metas
            .read()
            .iter()
            .filter(|m| is_ancestor_of(&m.path, path))
            .max_by_key(|m| m.path.len())
            .cloned())
    }

    fn storage_requires_sign(&self, path: &str) -> bool {
        self.sign_mandated_roots
            .read()
            .iter()
            .any(|root| is_ancestor_of(root, path))
    }
}

#[async_trait]
impl SharingStore for MemoryDirectory {
    async fn by_id(&self, id: &str) -> Result<Option<Sharing>, StoreError> {
        Ok(self.sharings.read().get(id).cloned())
    }
}

/// Flat in-memory file tree.
#[derive(Default)]
pub struct MemoryStorage {
    files: RwLock<HashMap<String, Bytes>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_file(&self, path: &str, bytes: impl Into<Bytes>) {
        self.files.write().insert(path.to_string(), bytes.into());
    }

    fn object_for(path: &str, kind: i32) -> FsObject {
        let name = common::path::base_name(path).unwrap_or("/").to_string();
        FsObject {
            name,
            path: path.to_string(),
            kind,
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn list(&self, path: &str) -> Result<Vec<FsObject>, StoreError> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        let files = self.files.read();
        let mut entries: Vec<FsObject> = Vec::new();
        let mut seen_dirs: Vec<String> = Vec::new();
        for file_path in files.keys() {
            let Some(rest) = file_path.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                None => entries.push(Self::object_for(file_path, FS_KIND_FILE)),
                Some((dir, _)) => {
                    let dir_path = format!("{prefix}{dir}");
                    if !seen_dirs.contains(&dir_path) {
                        seen_dirs.push(dir_path.clone());
                        entries.push(Self::object_for(&dir_path, FS_KIND_DIR));
                    }
                }
            }
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn get(&self, path: &str) -> Result<Option<FsObject>, StoreError> {
        Ok(self
            .files
            .read()
            .contains_key(path)
            .then(|| Self::object_for(path, FS_KIND_FILE)))
    }

    async fn fetch(&self, path: &str) -> Result<Option<FileContent>, StoreError> {
        Ok(self.files.read().get(path).map(|bytes| FileContent {
            mime: mime_guess::from_path(path)
                .first_or_octet_stream()
                .to_string(),
            bytes: bytes.clone(),
        }))
    }
}
