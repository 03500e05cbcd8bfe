//! JWT client assertions (RFC 7523) for confidential clients.
//!
//! A [`ClientAssertionSigner`] turns a configured private key into short-lived
//! `private_key_jwt` assertions. The same assertion shape serves the
//! authorization code exchange and the backend services
//! (`client_credentials`) grant:
//!
//! - `iss` / `sub`: the client id
//! - `aud`: the token endpoint
//! - `exp`: issued-at + 300 seconds
//! - `jti`: 32 random bytes, hex encoded
//!
//! The signing algorithm is always explicit; RSA and P-384 keys are both
//! supported because deployments differ in the key type they register.

use std::fmt;

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use p384::pkcs8::{EncodePrivateKey, LineEnding};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::SmartResult;
use crate::config::SmartConfig;
use crate::error::SmartError;

/// `client_assertion_type` value for JWT bearer assertions.
pub const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Assertion lifetime in seconds.
pub const ASSERTION_LIFETIME_SECS: i64 = 300;

// ============================================================================
// Signing Algorithm
// ============================================================================

/// Supported assertion signing algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// RSA with SHA-256.
    RS256,
    /// RSA with SHA-384.
    RS384,
    /// ECDSA with P-384 curve.
    ES384,
}

impl SigningAlgorithm {
    /// Converts to the `jsonwebtoken` Algorithm type.
    #[must_use]
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::RS256 => Algorithm::RS256,
            Self::RS384 => Algorithm::RS384,
            Self::ES384 => Algorithm::ES384,
        }
    }

    /// Returns the algorithm name as used in JWT headers.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::ES384 => "ES384",
        }
    }

    /// Returns `true` if this is an RSA-based algorithm.
    #[must_use]
    pub fn is_rsa(&self) -> bool {
        matches!(self, Self::RS256 | Self::RS384)
    }

    /// Parses an algorithm name.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for anything but RS256, RS384 or ES384.
    pub fn parse(name: &str) -> SmartResult<Self> {
        match name {
            "RS256" => Ok(Self::RS256),
            "RS384" => Ok(Self::RS384),
            "ES384" => Ok(Self::ES384),
            other => Err(SmartError::configuration(format!(
                "Invalid signing algorithm: '{other}'. Must be RS256, RS384, or ES384"
            ))),
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Claims
// ============================================================================

/// JWT claims of a client assertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientAssertionClaims {
    /// Issuer (the client id).
    pub iss: String,

    /// Subject (the client id).
    pub sub: String,

    /// Audience (the token endpoint URL).
    pub aud: String,

    /// Expiration time as Unix timestamp.
    pub exp: i64,

    /// Unique assertion id.
    pub jti: String,

    /// Issued at time as Unix timestamp.
    pub iat: i64,
}

impl ClientAssertionClaims {
    /// Builds claims issued now with a fresh `jti`.
    #[must_use]
    pub fn new(
        issuer: impl Into<String>,
        subject: impl Into<String>,
        audience: impl Into<String>,
    ) -> Self {
        let iat = OffsetDateTime::now_utc().unix_timestamp();
        let mut jti = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut jti);

        Self {
            iss: issuer.into(),
            sub: subject.into(),
            aud: audience.into(),
            exp: iat + ASSERTION_LIFETIME_SECS,
            jti: hex::encode(jti),
            iat,
        }
    }
}

// ============================================================================
// Signer
// ============================================================================

struct SigningKey {
    algorithm: SigningAlgorithm,
    encoding_key: EncodingKey,
    kid: Option<String>,
}

/// Signs client assertions with the configured private key.
///
/// A signer without a key can be constructed so that public clients share the
/// same code path; asking it to sign fails with a configuration error.
pub struct ClientAssertionSigner {
    key: Option<SigningKey>,
}

impl fmt::Debug for ClientAssertionSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientAssertionSigner")
            .field("algorithm", &self.algorithm())
            .field("configured", &self.is_configured())
            .finish()
    }
}

impl ClientAssertionSigner {
    /// Loads a PEM private key for `algorithm`.
    ///
    /// RSA keys may be PKCS#1 or PKCS#8. P-384 keys may be SEC1 or PKCS#8.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the PEM does not hold a key usable
    /// with `algorithm`.
    pub fn from_pem(algorithm: SigningAlgorithm, private_pem: &str) -> SmartResult<Self> {
        let encoding_key = if algorithm.is_rsa() {
            EncodingKey::from_rsa_pem(private_pem.as_bytes())
                .map_err(|e| SmartError::configuration(format!("Invalid RSA private key: {e}")))?
        } else {
            let pkcs8 = normalize_ec_pem(private_pem)?;
            EncodingKey::from_ec_pem(pkcs8.as_bytes())
                .map_err(|e| SmartError::configuration(format!("Invalid EC private key: {e}")))?
        };

        Ok(Self {
            key: Some(SigningKey {
                algorithm,
                encoding_key,
                kid: None,
            }),
        })
    }

    /// A signer with no key. Every `sign` call fails.
    #[must_use]
    pub fn disabled() -> Self {
        Self { key: None }
    }

    /// Builds a signer from `private_key` / `signing_alg`.
    ///
    /// Returns a disabled signer when no key is configured.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a key is configured without an
    /// algorithm, or the key cannot be decoded.
    pub fn from_config(config: &SmartConfig) -> SmartResult<Self> {
        let Some(pem) = config.private_key_pem()? else {
            return Ok(Self::disabled());
        };
        let algorithm = config.signing_alg.ok_or_else(|| {
            SmartError::configuration("signing_alg is required when private_key is set")
        })?;
        Self::from_pem(algorithm, &pem)
    }

    /// Sets the `kid` header of produced assertions.
    #[must_use]
    pub fn with_key_id(mut self, kid: impl Into<String>) -> Self {
        if let Some(key) = self.key.as_mut() {
            key.kid = Some(kid.into());
        }
        self
    }

    /// Returns `true` if a private key is loaded.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.key.is_some()
    }

    /// Algorithm of the loaded key, if any.
    #[must_use]
    pub fn algorithm(&self) -> Option<SigningAlgorithm> {
        self.key.as_ref().map(|k| k.algorithm)
    }

    /// Signs an assertion for `client_id` addressed to `audience`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no key is loaded, or a signing error
    /// if encoding fails.
    pub fn sign(&self, client_id: &str, audience: &str) -> SmartResult<String> {
        self.sign_claims(&ClientAssertionClaims::new(client_id, client_id, audience))
    }

    /// Signs explicit claims.
    ///
    /// # Errors
    ///
    /// Same as [`ClientAssertionSigner::sign`].
    pub fn sign_claims(&self, claims: &ClientAssertionClaims) -> SmartResult<String> {
        let key = self.key.as_ref().ok_or_else(|| {
            SmartError::configuration("No private key configured for client assertions")
        })?;

        let mut header = Header::new(key.algorithm.to_jwt_algorithm());
        header.typ = Some("JWT".to_string());
        header.kid = key.kid.clone();

        let token = jsonwebtoken::encode(&header, claims, &key.encoding_key)
            .map_err(|e| SmartError::signing(e.to_string()))?;

        tracing::debug!(
            alg = %key.algorithm,
            aud = %claims.aud,
            jti = %claims.jti,
            "Signed client assertion"
        );
        Ok(token)
    }
}

/// Converts a SEC1 (`EC PRIVATE KEY`) PEM to PKCS#8, which `jsonwebtoken`
/// requires. PKCS#8 input is returned unchanged.
fn normalize_ec_pem(private_pem: &str) -> SmartResult<String> {
    if !private_pem.contains("BEGIN EC PRIVATE KEY") {
        return Ok(private_pem.to_string());
    }

    let secret = p384::SecretKey::from_sec1_pem(private_pem)
        .map_err(|e| SmartError::configuration(format!("Invalid P-384 SEC1 key: {e}")))?;
    let pkcs8 = secret
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| SmartError::configuration(format!("Cannot re-encode P-384 key: {e}")))?;
    Ok(pkcs8.to_string())
}

// ============================================================================
// Tests
// ============================================================================
