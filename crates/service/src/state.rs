use std::sync::Arc;

use common::audit::{AuditLogger, DedupCache, TracingSink};
use common::identity::{MetaStore, SharingStore, UserStore};
use common::session::SessionCodec;
use common::sign::Signer;

use crate::config::Config;
use crate::fs::Storage;

/// External collaborators the gateway consumes: the identity directory,
/// path metadata, share records, and the byte-serving backend.
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub metas: Arc<dyn MetaStore>,
    pub sharings: Arc<dyn SharingStore>,
    pub storage: Arc<dyn Storage>,
}

/// Shared per-process state. Built once at service start; cheap to clone.
#[derive(Clone)]
pub struct State {
    signer: Signer,
    sessions: SessionCodec,
    api_token: Arc<str>,
    sign_all: bool,
    users: Arc<dyn UserStore>,
    metas: Arc<dyn MetaStore>,
    sharings: Arc<dyn SharingStore>,
    storage: Arc<dyn Storage>,
    audit: Arc<AuditLogger>,
}

impl State {
    pub fn from_config(config: &Config, stores: Stores) -> Result<Self, StateSetupError> {
        if config.api_token.is_empty() {
            return Err(StateSetupError::EmptyApiToken);
        }
        let secret = config.api_token.as_bytes();
        let cache = DedupCache::with_windows(config.dedup_window, config.dedup_window * 3);
        Ok(Self {
            signer: Signer::new(secret, config.link_expiration_hours),
            sessions: SessionCodec::new(secret),
            api_token: Arc::from(config.api_token.as_str()),
            sign_all: config.sign_all,
            users: stores.users,
            metas: stores.metas,
            sharings: stores.sharings,
            storage: stores.storage,
            audit: Arc::new(AuditLogger::with_sink(cache, Arc::new(TracingSink))),
        })
    }

    /// Swap the audit logger; tests install one with a collecting sink.
    pub fn with_audit_logger(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    pub fn sessions(&self) -> &SessionCodec {
        &self.sessions
    }

    pub fn api_token(&self) -> &str {
        &self.api_token
    }

    pub fn sign_all(&self) -> bool {
        self.sign_all
    }

    pub fn users(&self) -> &Arc<dyn UserStore> {
        &self.users
    }

    pub fn metas(&self) -> &Arc<dyn MetaStore> {
        &self.metas
    }

    pub fn sharings(&self) -> &Arc<dyn SharingStore> {
        &self.sharings
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateSetupError {
    #[error("api token must not be empty")]
    EmptyApiToken,
}
