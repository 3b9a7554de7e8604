//! Request signer
//!
//! Computes the `auth_token` / `auth_hash` query parameters for one URI path.

use std::fmt;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::types::{CourierError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Length of the random nonce in bytes (hex encoded on the wire)
const NONCE_BYTES: usize = 16;

/// Signature proof for one URI path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedAuth {
    /// Freshness nonce, sent as `auth_token`
    pub token: String,
    /// Keyed MAC over token and path, sent as `auth_hash`
    pub hash: String,
    /// Application key, sent as `key` when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl SignedAuth {
    /// Fixed auth parameters, e.g. handed over by a host that signed upstream
    pub fn new(token: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            hash: hash.into(),
            key: None,
        }
    }

    /// Attach the application key
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Query pairs in wire order: `auth_token`, `auth_hash`, then `key`
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("auth_token".to_string(), self.token.clone()),
            ("auth_hash".to_string(), self.hash.clone()),
        ];
        if let Some(key) = self.key.as_ref().filter(|k| !k.is_empty()) {
            pairs.push(("key".to_string(), key.clone()));
        }
        pairs
    }
}

/// Signs URI paths with an application key pair
#[derive(Clone)]
pub struct Signer {
    app_key: String,
    /// MAC state keyed with the application secret, cloned per signature
    mac: HmacSha256,
}

impl Signer {
    /// Create a signer from a non-empty key and secret
    pub fn new(app_key: impl Into<String>, app_secret: impl Into<String>) -> Result<Self> {
        let app_key = app_key.into();
        let secret = Zeroizing::new(app_secret.into());

        if app_key.is_empty() {
            return Err(CourierError::Config("application key is empty".into()));
        }
        if secret.is_empty() {
            return Err(CourierError::Config("application secret is empty".into()));
        }

        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| CourierError::Config(format!("invalid application secret: {}", e)))?;

        Ok(Self { app_key, mac })
    }

    /// Application key this signer identifies as
    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    /// Sign `path` with a fresh nonce
    pub fn sign(&self, path: &str) -> SignedAuth {
        let nonce: [u8; NONCE_BYTES] = rand::random();
        self.sign_with_nonce(path, &hex::encode(nonce))
    }

    /// Sign `path` with a caller-chosen nonce. Same inputs give the same hash.
    pub fn sign_with_nonce(&self, path: &str, nonce: &str) -> SignedAuth {
        let mut mac = self.mac.clone();
        mac.update(message(nonce, path).as_bytes());

        SignedAuth {
            token: nonce.to_string(),
            hash: hex::encode(mac.finalize().into_bytes()),
            key: Some(self.app_key.clone()),
        }
    }

    /// Check `auth` against `path` in constant time
    pub fn verify(&self, path: &str, auth: &SignedAuth) -> bool {
        let Ok(expected) = hex::decode(&auth.hash) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(message(&auth.token, path).as_bytes());
        mac.verify_slice(&expected).is_ok()
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("app_key", &self.app_key)
            .field("app_secret", &"<redacted>")
            .finish()
    }
}

fn message(nonce: &str, path: &str) -> String {
    format!("{}:{}", nonce, path)
}

/// Auth parameters a host places in the request context
#[derive(Debug, Clone)]
pub enum AuthParams {
    /// Sign the final request path at build time
    Signer(Signer),
    /// Pre-computed parameters, attached as-is
    Fixed(SignedAuth),
}

impl AuthParams {
    /// Auth for `path`, signing it if a signer is configured
    pub fn for_path(&self, path: &str) -> SignedAuth {
        match self {
            Self::Signer(signer) => signer.sign(path),
            Self::Fixed(auth) => auth.clone(),
        }
    }
}
