//! Anti-forgery token signing.
//!
//! A token is `<expires_at>.<signature>` where the signature is an
//! HMAC-SHA256 over the action, the client address and the expiry. The
//! server keeps no token state: issuing and validating agree because both
//! derive the same MAC from the same key.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use crate::config::schema::CsrfConfig;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CsrfError {
    #[error("csrf token is missing")]
    Missing,
    #[error("csrf token is malformed")]
    Malformed,
    #[error("csrf token expired")]
    Expired,
    #[error("csrf token does not match action or client")]
    Mismatch,
}

/// Issues and checks tokens bound to an (action, client) pair.
pub trait CsrfSigner: Send + Sync {
    fn issue(&self, action: &str, client: &str) -> String;
    fn verify(&self, token: &str, action: &str, client: &str) -> Result<(), CsrfError>;
}

/// Stateless HMAC signer.
#[derive(Clone)]
pub struct HmacCsrfSigner {
    keyed: HmacSha256,
    ttl: Duration,
}

impl std::fmt::Debug for HmacCsrfSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacCsrfSigner")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl HmacCsrfSigner {
    pub fn new(key: &[u8], ttl: Duration) -> Result<Self, InvalidLength> {
        Ok(Self {
            keyed: HmacSha256::new_from_slice(key)?,
            ttl,
        })
    }

    pub fn from_config(config: &CsrfConfig) -> Result<Self, InvalidLength> {
        Self::new(config.secret.as_bytes(), Duration::from_secs(config.ttl_secs))
    }

    fn mac(&self, action: &str, client: &str, expires_at: &str) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(action.as_bytes());
        mac.update(b"\n");
        mac.update(client.as_bytes());
        mac.update(b"\n");
        mac.update(expires_at.as_bytes());
        mac
    }

    pub fn issue_at(&self, action: &str, client: &str, now: u64) -> String {
        let expires_at = (now + self.ttl.as_secs()).to_string();
        let signature = URL_SAFE_NO_PAD.encode(self.mac(action, client, &expires_at).finalize().into_bytes());
        format!("{expires_at}.{signature}")
    }

    pub fn verify_at(&self, token: &str, action: &str, client: &str, now: u64) -> Result<(), CsrfError> {
        if token.is_empty() {
            return Err(CsrfError::Missing);
        }

        let (expires_raw, signature_raw) = token.split_once('.').ok_or(CsrfError::Malformed)?;
        let expires_at = expires_raw.parse::<u64>().map_err(|_| CsrfError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature_raw)
            .map_err(|_| CsrfError::Malformed)?;

        self.mac(action, client, expires_raw)
            .verify_slice(&signature)
            .map_err(|_| CsrfError::Mismatch)?;

        if expires_at <= now {
            return Err(CsrfError::Expired);
        }

        Ok(())
    }
}

impl CsrfSigner for HmacCsrfSigner {
    fn issue(&self, action: &str, client: &str) -> String {
        self.issue_at(action, client, unix_now())
    }

    fn verify(&self, token: &str, action: &str, client: &str) -> Result<(), CsrfError> {
        self.verify_at(token, action, client, unix_now())
    }
}
