//! PKCE generator for the client side of RFC 7636 (S256 only).
//!
//! Verifier, challenge and `state` all come from the thread-local CSPRNG and
//! are base64url-encoded without padding, so they go into a query string as-is.
//!
//! ```
//! use octofhir_smart::oauth::PkceTriple;
//!
//! let pkce = PkceTriple::generate();
//! assert_eq!(pkce.challenge.as_str().len(), 43);
//! assert_eq!(pkce.method.as_str(), "S256");
//! ```

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Minimum verifier entropy in bytes (43 encoded characters).
pub const MIN_VERIFIER_BYTES: usize = 32;

/// Maximum verifier entropy in bytes (128 encoded characters).
pub const MAX_VERIFIER_BYTES: usize = 96;

/// Minimum state entropy in bytes.
pub const MIN_STATE_BYTES: usize = 16;

/// Requested entropy the generator refuses to produce.
#[derive(Debug, thiserror::Error)]
pub enum PkceError {
    #[error("verifier needs at least {MIN_VERIFIER_BYTES} bytes of entropy, got {0}")]
    VerifierTooShort(usize),

    #[error("verifier entropy above {MAX_VERIFIER_BYTES} bytes exceeds 128 characters, got {0}")]
    VerifierTooLong(usize),

    #[error("state needs at least {MIN_STATE_BYTES} bytes of entropy, got {0}")]
    StateTooShort(usize),
}

impl From<PkceError> for crate::error::SmartError {
    fn from(err: PkceError) -> Self {
        Self::configuration(err.to_string())
    }
}

/// `code_challenge_method` sent with the authorization request.
///
/// `plain` is not offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PkceChallengeMethod {
    #[default]
    S256,
}

impl PkceChallengeMethod {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S256 => "S256",
        }
    }
}

impl std::fmt::Display for PkceChallengeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encodes `bytes` bytes from the CSPRNG as base64url without padding.
#[must_use]
pub fn random_urlsafe(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Anti-CSRF `state` with [`MIN_STATE_BYTES`] of entropy.
#[must_use]
pub fn generate_state() -> String {
    random_urlsafe(MIN_STATE_BYTES)
}

/// `state` with a caller-chosen amount of entropy.
///
/// # Errors
///
/// Fails below [`MIN_STATE_BYTES`].
pub fn generate_state_with_entropy(bytes: usize) -> Result<String, PkceError> {
    if bytes < MIN_STATE_BYTES {
        return Err(PkceError::StateTooShort(bytes));
    }
    Ok(random_urlsafe(bytes))
}

/// The PKCE secret. Stays in the flow state until the token exchange and is
/// never sent to the user agent.
#[derive(Clone, PartialEq, Eq)]
pub struct PkceVerifier(String);

impl PkceVerifier {
    /// 32 bytes of entropy, 43 characters.
    #[must_use]
    pub fn generate() -> Self {
        Self(random_urlsafe(MIN_VERIFIER_BYTES))
    }

    /// # Errors
    ///
    /// Fails outside [`MIN_VERIFIER_BYTES`]..=[`MAX_VERIFIER_BYTES`], the
    /// range whose encoding fits RFC 7636's 43 to 128 characters.
    pub fn with_entropy(bytes: usize) -> Result<Self, PkceError> {
        match bytes {
            b if b < MIN_VERIFIER_BYTES => Err(PkceError::VerifierTooShort(b)),
            b if b > MAX_VERIFIER_BYTES => Err(PkceError::VerifierTooLong(b)),
            b => Ok(Self(random_urlsafe(b))),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `BASE64URL(SHA256(verifier))`.
    #[must_use]
    pub fn challenge(&self) -> PkceChallenge {
        let digest = Sha256::digest(self.0.as_bytes());
        PkceChallenge(URL_SAFE_NO_PAD.encode(digest))
    }
}

impl std::fmt::Debug for PkceVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PkceVerifier(***)")
    }
}

/// Challenge derived from a [`PkceVerifier`]; safe to put in the redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge(String);

impl PkceChallenge {
    #[must_use]
    pub fn from_verifier(verifier: &PkceVerifier) -> Self {
        verifier.challenge()
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Verifier, challenge, method and `state` for one authorization attempt.
#[derive(Debug, Clone)]
pub struct PkceTriple {
    pub verifier: PkceVerifier,
    pub challenge: PkceChallenge,
    pub method: PkceChallengeMethod,
    pub state: String,
}

impl PkceTriple {
    #[must_use]
    pub fn generate() -> Self {
        Self::from_verifier(PkceVerifier::generate(), generate_state())
    }

    fn from_verifier(verifier: PkceVerifier, state: String) -> Self {
        Self {
            challenge: verifier.challenge(),
            method: PkceChallengeMethod::S256,
            verifier,
            state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn is_urlsafe(s: &str) -> bool {
        s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    }

    #[test]
    fn test_verifier_is_43_urlsafe_chars() {
        let verifier = PkceVerifier::generate();
        assert_eq!(verifier.as_str().len(), 43);
        assert!(is_urlsafe(verifier.as_str()));
    }

    #[test]
    fn test_verifier_entropy_bounds() {
        assert!(matches!(
            PkceVerifier::with_entropy(31),
            Err(PkceError::VerifierTooShort(31))
        ));
        assert!(matches!(
            PkceVerifier::with_entropy(97),
            Err(PkceError::VerifierTooLong(97))
        ));
        assert_eq!(PkceVerifier::with_entropy(96).unwrap().as_str().len(), 128);
    }

    #[test]
    fn test_verifiers_never_repeat() {
        let mut seen = HashSet::with_capacity(10_000);
        for _ in 0..10_000 {
            assert!(seen.insert(PkceVerifier::generate().as_str().to_string()));
        }
    }

    #[test]
    fn test_challenge_matches_rfc7636_appendix_b() {
        let verifier = PkceVerifier("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".to_string());
        assert_eq!(
            verifier.challenge().as_str(),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_challenge_is_deterministic() {
        let verifier = PkceVerifier::generate();
        let challenge = PkceChallenge::from_verifier(&verifier);
        assert_eq!(challenge, verifier.challenge());
        assert!(is_urlsafe(challenge.as_str()));
        assert_ne!(challenge, PkceVerifier::generate().challenge());
    }

    #[test]
    fn test_state_entropy() {
        let state = generate_state();
        // 16 bytes -> 22 characters
        assert_eq!(state.len(), 22);
        assert!(is_urlsafe(&state));
        assert_ne!(state, generate_state());

        assert!(matches!(
            generate_state_with_entropy(8),
            Err(PkceError::StateTooShort(8))
        ));
        assert_eq!(generate_state_with_entropy(32).unwrap().len(), 43);
    }

    #[test]
    fn test_verifier_debug_is_redacted() {
        let verifier = PkceVerifier::generate();
        assert!(!format!("{verifier:?}").contains(verifier.as_str()));
    }

    #[test]
    fn test_triple_is_consistent() {
        let triple = PkceTriple::generate();
        assert_eq!(triple.challenge, triple.verifier.challenge());
        assert_eq!(triple.method.to_string(), "S256");
        assert!(!triple.state.is_empty());
    }
}
