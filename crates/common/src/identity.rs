//! Caller identity model and the store traits the gateway consumes.
//!
//! The user/guest/admin directory, path metadata, and share records live in
//! an external storage layer; this crate only sees them through these
//! traits. Lookups are bounded-latency calls; "not found" is an `Ok(None)`
//! outcome, distinct from a hard backend failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Admin,
    User,
    Guest,
}

/// A resolved caller identity. Recomputed fresh on every request and never
/// cached across requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub role: Role,
    pub disabled: bool,
    /// Bumped on password change; session tokens carrying an older epoch
    /// are implicitly invalidated.
    pub pwd_epoch: i64,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_guest(&self) -> bool {
        self.role == Role::Guest
    }
}

/// Metadata attached to a path subtree by an administrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMeta {
    pub path: String,
    pub password: Option<String>,
    /// Whether a signature may also authorize paths below `path`, not just
    /// `path` itself.
    pub allow_signed_subpaths: bool,
}

/// A share link record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sharing {
    pub id: String,
    pub creator: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend failure: {0}")]
    Backend(String),
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn admin(&self) -> Result<User, StoreError>;
    async fn guest(&self) -> Result<User, StoreError>;
    async fn by_name(&self, username: &str) -> Result<Option<User>, StoreError>;
}

#[async_trait]
pub trait MetaStore: Send + Sync {
    /// Metadata for `path` or its nearest ancestor carrying any.
    async fn nearest_meta(&self, path: &str) -> Result<Option<PathMeta>, StoreError>;

    /// Whether the storage backend mounted at `path` mandates signed links
    /// regardless of path metadata.
    fn storage_requires_sign(&self, path: &str) -> bool;
}

#[async_trait]
pub trait SharingStore: Send + Sync {
    async fn by_id(&self, id: &str) -> Result<Option<Sharing>, StoreError>;
}
