use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server listens on.
    pub listen_addr: SocketAddr,

    /// The master token. Presenting it verbatim as a bearer credential
    /// grants the admin identity; it is also the key material for signed
    /// links and session tokens.
    pub api_token: String,

    /// Signed-link lifetime in hours; `0` issues links that never expire.
    pub link_expiration_hours: u64,

    /// Require a valid signature on every content path, regardless of
    /// path metadata.
    pub sign_all: bool,

    /// Window within which repeated accesses to the same (client, path)
    /// collapse into one audit line.
    pub dedup_window: Duration,

    pub log_level: tracing::Level,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 5244),
            api_token: String::new(),
            link_expiration_hours: 0,
            sign_all: false,
            dedup_window: common::audit::DEFAULT_DEDUP_WINDOW,
            log_level: tracing::Level::INFO,
        }
    }
}
