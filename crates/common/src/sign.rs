//! Signed-link authority.
//!
//! A signed link carries a tamper-proof, time-bounded proof that the bearer
//! was authorized to fetch a specific path, optionally as a specific user,
//! without holding a session. Token format:
//!
//! ```text
//! base64url_nopad(hmac_sha256(key, payload + ":" + expiry)) + ":" + expiry
//! ```
//!
//! where `expiry` is a unix timestamp in seconds and `0` means the token
//! never expires. Identity-bearing tokens use `path + "|" + username` as the
//! payload, so a link can simultaneously authorize the path and recover the
//! caller identity.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Separator between the path and the username inside an identity-bearing
/// payload. Usernames containing this character are refused outright, both
/// at signing and at verification time, so `a|b` can never be read as two
/// different (path, username) splits.
pub const USER_SEPARATOR: char = '|';

/// Marker splitting a `sign` query value into signature and username.
const USER_MARKER: &str = ":user:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SignError {
    /// The recomputed MAC does not match the presented one.
    #[error("signature does not match")]
    SignatureMismatch,
    /// The signature was valid once but its expiry has passed.
    #[error("signature is expired")]
    Expired,
    /// The token cannot be parsed at all.
    #[error("malformed signature")]
    Malformed,
}

/// Issues and verifies signed-link tokens.
///
/// The MAC key is derived once from the long-lived shared secret and reused
/// for the process lifetime. All operations are pure over `(payload, now)`,
/// so a single instance is safe under arbitrary concurrency.
#[derive(Clone)]
pub struct Signer {
    mac: HmacSha256,
    link_expiration: Duration,
}

impl Signer {
    /// `link_expiration_hours == 0` issues tokens that never expire.
    pub fn new(secret: &[u8], link_expiration_hours: u64) -> Self {
        let mac = HmacSha256::new_from_slice(secret).expect("hmac accepts keys of any length");
        Self {
            mac,
            link_expiration: Duration::from_secs(link_expiration_hours * 3600),
        }
    }

    fn expiry_for_new_token(&self) -> i64 {
        if self.link_expiration.is_zero() {
            0
        } else {
            (unix_now() + self.link_expiration.as_secs()) as i64
        }
    }

    fn mac_for(&self, payload: &str, expiry: &str) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        mac.update(b":");
        mac.update(expiry.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    fn sign_payload(&self, payload: &str, expiry: i64) -> String {
        let expiry = expiry.to_string();
        let mac = self.mac_for(payload, &expiry);
        format!("{}:{}", URL_SAFE_NO_PAD.encode(mac), expiry)
    }

    fn verify_payload(&self, payload: &str, token: &str) -> Result<(), SignError> {
        self.verify_payload_at(payload, token, unix_now() as i64)
    }

    fn verify_payload_at(&self, payload: &str, token: &str, now: i64) -> Result<(), SignError> {
        let (sig_b64, expiry_str) = token.rsplit_once(':').ok_or(SignError::Malformed)?;
        let presented = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| SignError::Malformed)?;
        let expiry: i64 = expiry_str.parse().map_err(|_| SignError::Malformed)?;
        // A negative expiry cannot have been produced by this signer.
        if expiry < 0 {
            return Err(SignError::Malformed);
        }
        if expiry != 0 && now > expiry {
            return Err(SignError::Expired);
        }
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        mac.update(b":");
        mac.update(expiry_str.as_bytes());
        // Mac::verify_slice compares in constant time.
        mac.verify_slice(&presented)
            .map_err(|_| SignError::SignatureMismatch)
    }

    /// Sign `path` under the configured expiration policy.
    pub fn sign(&self, path: &str) -> String {
        self.sign_payload(path, self.expiry_for_new_token())
    }

    /// Sign `path` bound to `username`, so the resulting link both
    /// authorizes the path and names the caller.
    pub fn sign_with_user(&self, path: &str, username: &str) -> Result<String, SignError> {
        if username.contains(USER_SEPARATOR) {
            return Err(SignError::Malformed);
        }
        let payload = format!("{path}{USER_SEPARATOR}{username}");
        Ok(self.sign_payload(&payload, self.expiry_for_new_token()))
    }

    /// Verify an anonymous token for `path`.
    pub fn verify(&self, path: &str, token: &str) -> Result<(), SignError> {
        self.verify_payload(path, token)
    }

    /// Verify an identity-bearing token. A token signed for one username
    /// never verifies for another.
    pub fn verify_with_user(
        &self,
        path: &str,
        username: &str,
        token: &str,
    ) -> Result<(), SignError> {
        if username.contains(USER_SEPARATOR) {
            return Err(SignError::Malformed);
        }
        let payload = format!("{path}{USER_SEPARATOR}{username}");
        self.verify_payload(&payload, token)
    }

    #[cfg(test)]
    fn sign_expiring_at(&self, path: &str, expiry: i64) -> String {
        self.sign_payload(path, expiry)
    }

    #[cfg(test)]
    fn verify_at(&self, path: &str, token: &str, now: i64) -> Result<(), SignError> {
        self.verify_payload_at(path, token, now)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Decoded form of the signed-link query parameters.
///
/// Two legacy encodings are recognized: the username embedded in the `sign`
/// value itself (`<token>:user:<name>`), and a separate `user` parameter
/// alongside a plain `sign`. The embedded form splits on the *last*
/// `:user:` occurrence; an embedded name that still contains the user
/// separator is dropped rather than guessed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedQuery {
    pub signature: String,
    pub username: Option<String>,
}

impl SignedQuery {
    pub fn decode(sign_param: &str, user_param: Option<&str>) -> Self {
        // Some clients append a stray slash when rewriting URLs.
        let sign_param = sign_param.strip_suffix('/').unwrap_or(sign_param);

        if let Some(idx) = sign_param.rfind(USER_MARKER) {
            let signature = &sign_param[..idx];
            let username = &sign_param[idx + USER_MARKER.len()..];
            if !signature.is_empty()
                && !username.is_empty()
                && !username.contains(USER_SEPARATOR)
            {
                return Self {
                    signature: signature.to_string(),
                    username: Some(username.to_string()),
                };
            }
        }

        let username = user_param
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string);
        Self {
            signature: sign_param.to_string(),
            username,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.signature.is_empty()
    }
}
