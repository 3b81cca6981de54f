//! Credential verification.
//!
//! Pure function of token, secret, and clock. Expiry is checked here rather
//! than by `jsonwebtoken` so the comparison is strict (`expires_at > now`)
//! with no leeway.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};

use crate::claims::{Credential, now_secs};
use crate::errors::Rejection;

/// HS256 credential checker bound to the process secret.
pub struct CredentialVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl CredentialVerifier {
    /// Verifier for tokens signed with `secret`.
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: base_validation(),
        }
    }

    /// Verify against the current time.
    pub fn verify(&self, token: &str) -> Result<Credential, Rejection> {
        self.verify_at(token, now_secs())
    }

    /// Verify against an explicit clock reading.
    pub fn verify_at(&self, token: &str, now: i64) -> Result<Credential, Rejection> {
        let data = jsonwebtoken::decode::<Credential>(token, &self.key, &self.validation)
            .map_err(|e| classify(e.kind()))?;
        let claims = data.claims;
        if !claims.is_live_at(now) {
            return Err(Rejection::Expired);
        }
        Ok(claims)
    }
}

impl std::fmt::Debug for CredentialVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVerifier").finish_non_exhaustive()
    }
}

/// Decode claims without checking the signature, then check expiry locally.
///
/// Client-side counterpart of [`CredentialVerifier::verify_at`]: the client
/// never holds the secret, so only `Malformed` and `Expired` are possible.
pub fn inspect_unverified(token: &str, now: i64) -> Result<Credential, Rejection> {
    let mut validation = base_validation();
    validation.insecure_disable_signature_validation();
    let data = jsonwebtoken::decode::<Credential>(token, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|e| classify(e.kind()))?;
    if !data.claims.is_live_at(now) {
        return Err(Rejection::Expired);
    }
    Ok(data.claims)
}

fn base_validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.required_spec_claims.clear();
    validation
}

fn classify(kind: &ErrorKind) -> Rejection {
    match kind {
        ErrorKind::InvalidSignature => Rejection::BadSignature,
        _ => Rejection::Malformed,
    }
}
