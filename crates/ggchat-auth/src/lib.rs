//! # ggchat-auth
//!
//! Short-lived signed credentials for the GG Chat relay.
//!
//! - [`issuer`]: turns a completed external-identity handshake into an
//!   HS256-signed credential valid for seven days
//! - [`verifier`]: checks signature and expiry on every connection attempt
//! - [`handshake`]: pending-login table behind `begin`/`complete`/`poll`
//! - [`provider`]: the external identity seam, with a Discord-flavoured
//!   implementation over `reqwest`
//!
//! Signing uses one symmetric secret fixed at process start. Rotating the
//! secret invalidates every outstanding credential.

#![deny(unsafe_code)]

pub mod claims;
pub mod errors;
pub mod handshake;
pub mod issuer;
pub mod provider;
pub mod verifier;

pub use claims::{Credential, now_secs};
pub use errors::{AuthError, Rejection};
pub use handshake::{DEFAULT_LOGIN_TTL, LoginStart, LoginStatus, PendingLogins};
pub use issuer::{
    CREDENTIAL_TTL_SECS, CredentialIssuer, ExternalIdentity, GuildMembership, IssuedCredential,
};
pub use provider::{DiscordConfig, DiscordProvider, IdentityProvider, ResolvedIdentity};
pub use verifier::{CredentialVerifier, inspect_unverified};

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_credentials_verify() {
        let secret = b"re-export-secret";
        let issuer = CredentialIssuer::new(secret);
        let verifier = CredentialVerifier::new(secret);
        let token = issuer
            .issue(
                &ExternalIdentity::new("1", "Leo"),
                GuildMembership::member(),
            )
            .unwrap()
            .token;
        assert!(verifier.verify(&token).is_ok());
    }
}
