//! Bearer session tokens.
//!
//! A session token proves a username and the password epoch it was issued
//! under. Bumping the epoch on password change invalidates every previously
//! issued token without a revocation list: the resolver compares the claimed
//! epoch against the user record on every request.
//!
//! Wire format: `base64url_nopad(claims_json) + "." + base64url_nopad(mac)`,
//! MAC'd with the same HMAC-SHA256 key family as signed links.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("malformed session token")]
    Malformed,
    #[error("session token is expired")]
    Expired,
    #[error("session token signature does not match")]
    SignatureMismatch,
}

/// Claims carried by a session token. `exp == 0` means no expiry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    pub username: String,
    pub pwd_epoch: i64,
    pub exp: i64,
}

/// Issues and parses session tokens. Stateless; one instance per process.
#[derive(Clone)]
pub struct SessionCodec {
    mac: HmacSha256,
}

impl SessionCodec {
    pub fn new(secret: &[u8]) -> Self {
        let mac = HmacSha256::new_from_slice(secret).expect("hmac accepts keys of any length");
        Self { mac }
    }

    fn mac_for(&self, claims_bytes: &[u8]) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(claims_bytes);
        mac
    }

    pub fn issue(
        &self,
        username: &str,
        pwd_epoch: i64,
        ttl: Option<Duration>,
    ) -> Result<String, SessionError> {
        let exp = match ttl {
            Some(ttl) => (unix_now() + ttl.as_secs()) as i64,
            None => 0,
        };
        let claims = SessionClaims {
            username: username.to_string(),
            pwd_epoch,
            exp,
        };
        let claims_bytes = serde_json::to_vec(&claims).map_err(|_| SessionError::Malformed)?;
        let mac = self.mac_for(&claims_bytes).finalize().into_bytes();
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&claims_bytes),
            URL_SAFE_NO_PAD.encode(mac)
        ))
    }

    pub fn parse(&self, token: &str) -> Result<SessionClaims, SessionError> {
        let (claims_b64, mac_b64) = token.split_once('.').ok_or(SessionError::Malformed)?;
        let claims_bytes = URL_SAFE_NO_PAD
            .decode(claims_b64)
            .map_err(|_| SessionError::Malformed)?;
        let presented = URL_SAFE_NO_PAD
            .decode(mac_b64)
            .map_err(|_| SessionError::Malformed)?;
        self.mac_for(&claims_bytes)
            .verify_slice(&presented)
            .map_err(|_| SessionError::SignatureMismatch)?;
        let claims: SessionClaims =
            serde_json::from_slice(&claims_bytes).map_err(|_| SessionError::Malformed)?;
        if claims.exp != 0 && (unix_now() as i64) > claims.exp {
            return Err(SessionError::Expired);
        }
        Ok(claims)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
