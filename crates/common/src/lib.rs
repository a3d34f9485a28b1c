//! Core building blocks for the MediaGate access-control and audit layer.
//!
//! This crate provides the pieces the HTTP service composes per request:
//! - Signed-link issuing and verification (`sign`)
//! - Bearer session tokens carrying a username and password epoch (`session`)
//! - The identity model and the store traits the gateway consumes (`identity`)
//! - Virtual path normalization (`path`)
//! - The access-behavior classifier and media detection tables (`classify`)
//! - The deduplicating audit logger (`audit`)

pub mod audit;
pub mod classify;
pub mod identity;
pub mod path;
pub mod session;
pub mod sign;

pub mod prelude {
    pub use crate::audit::{AuditEntry, AuditLogger, AuditSink, DedupCache};
    pub use crate::classify::{classify, Behavior};
    pub use crate::identity::{
        MetaStore, PathMeta, Role, Sharing, SharingStore, StoreError, User, UserStore,
    };
    pub use crate::path::clean_path;
    pub use crate::session::{SessionClaims, SessionCodec};
    pub use crate::sign::{SignError, SignedQuery, Signer};
}
