//! Signed authentication tokens.
//!
//! The bridge authenticates devices with a short-lived JWT passed as the MQTT
//! password on connect. Tokens are minted fresh for every connection attempt;
//! nothing is cached, so a reconnect always carries a token whose lifetime
//! starts now.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Token construction and signing errors.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("key is not a usable RSA or EC private key: {0}")]
    InvalidKey(#[source] jsonwebtoken::errors::Error),
    #[error("failed to sign authentication token: {0}")]
    Sign(#[source] jsonwebtoken::errors::Error),
}

/// Signature algorithm family of a device key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    /// RSASSA-PKCS1-v1_5 with SHA-256 (`RS256`).
    Rsa,
    /// ECDSA over P-256 with SHA-256 (`ES256`).
    Ec,
}

/// The private key a device was registered with.
///
/// Only RSA and EC keys can be constructed, which is exactly the set the
/// bridge accepts.
pub struct DeviceKey {
    key: EncodingKey,
    algorithm: KeyAlgorithm,
}

impl DeviceKey {
    /// Load an RSA private key from PEM (PKCS#1 or PKCS#8).
    pub fn from_rsa_pem(pem: &[u8]) -> Result<Self, TokenError> {
        let key = EncodingKey::from_rsa_pem(pem).map_err(TokenError::InvalidKey)?;
        Ok(Self {
            key,
            algorithm: KeyAlgorithm::Rsa,
        })
    }

    /// Load an EC P-256 private key from PEM (SEC1 or PKCS#8).
    pub fn from_ec_pem(pem: &[u8]) -> Result<Self, TokenError> {
        let key = EncodingKey::from_ec_pem(pem).map_err(TokenError::InvalidKey)?;
        Ok(Self {
            key,
            algorithm: KeyAlgorithm::Ec,
        })
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    fn signature_algorithm(&self) -> Algorithm {
        match self.algorithm {
            KeyAlgorithm::Rsa => Algorithm::RS256,
            KeyAlgorithm::Ec => Algorithm::ES256,
        }
    }
}

impl fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceKey")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Claims carried by a device auth token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Audience: the cloud project id.
    pub aud: String,
    /// Issued-at, whole seconds since the Unix epoch.
    pub iat: i64,
    /// Expiry, whole seconds since the Unix epoch.
    pub exp: i64,
}

/// Source of the current time, injectable for tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Mints compact signed JWTs for bridge authentication.
pub struct JwtSigner {
    key: DeviceKey,
    audience: String,
    lifetime: Duration,
    clock: Arc<dyn Clock>,
}

impl JwtSigner {
    pub fn new(key: DeviceKey, audience: impl Into<String>, lifetime: Duration) -> Self {
        Self::with_clock(key, audience, lifetime, Arc::new(SystemClock))
    }

    /// Create a signer with an explicit clock.
    pub fn with_clock(
        key: DeviceKey,
        audience: impl Into<String>,
        lifetime: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            key,
            audience: audience.into(),
            lifetime,
            clock,
        }
    }

    /// Produce a signed token valid from now for the configured lifetime.
    ///
    /// The header algorithm follows the key: `RS256` for RSA keys, `ES256`
    /// for EC keys.
    pub fn mint(&self) -> Result<String, TokenError> {
        let iat = self.clock.now().timestamp();
        let claims = Claims {
            aud: self.audience.clone(),
            iat,
            exp: iat + self.lifetime.as_secs() as i64,
        };
        let header = Header::new(self.key.signature_algorithm());
        encode(&header, &claims, &self.key.key).map_err(TokenError::Sign)
    }
}

impl fmt::Debug for JwtSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtSigner")
            .field("algorithm", &self.key.algorithm)
            .field("audience", &self.audience)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_garbage_key_material() {
        assert!(matches!(
            DeviceKey::from_rsa_pem(b"not a pem").unwrap_err(),
            TokenError::InvalidKey(_)
        ));
        assert!(matches!(
            DeviceKey::from_ec_pem(b"not a pem").unwrap_err(),
            TokenError::InvalidKey(_)
        ));
    }

    #[test]
    fn claims_round_trip_through_serde() {
        let claims = Claims {
            aud: "my-project".to_string(),
            iat: 1_500_000_000,
            exp: 1_500_003_600,
        };
        let encoded = toml::to_string(&claims).unwrap();
        let parsed: Claims = toml::from_str(&encoded).unwrap();
        assert_eq!(parsed, claims);
    }
}
