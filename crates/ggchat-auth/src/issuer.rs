//! Credential issuance.
//!
//! Runs once per completed login. Membership must already be confirmed by
//! the identity provider; the issuer refuses to sign for non-members.

use ggchat_core::Role;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::Serialize;

use crate::claims::{Credential, now_secs};
use crate::errors::AuthError;

/// Credential lifetime: seven days.
pub const CREDENTIAL_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Verified external user, as reported by the identity provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExternalIdentity {
    /// External user ID.
    pub user_id: String,
    /// Name shown in chat.
    pub display_name: String,
}

impl ExternalIdentity {
    /// Create an external identity.
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Result of the external group membership lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GuildMembership {
    /// Whether the user belongs to the required group at all.
    pub is_member: bool,
    /// Whether the user holds the officer role.
    pub is_officer: bool,
}

impl GuildMembership {
    /// Plain member.
    pub fn member() -> Self {
        Self {
            is_member: true,
            is_officer: false,
        }
    }

    /// Member with the officer role.
    pub fn officer() -> Self {
        Self {
            is_member: true,
            is_officer: true,
        }
    }

    /// Not in the group.
    pub fn outsider() -> Self {
        Self {
            is_member: false,
            is_officer: false,
        }
    }
}

/// A freshly signed credential.
#[derive(Clone, Debug, Serialize)]
pub struct IssuedCredential {
    /// Compact JWS string handed to the client.
    pub token: String,
    /// Decoded claims, for logging and tests.
    #[serde(skip)]
    pub claims: Credential,
}

/// HS256 credential signer.
pub struct CredentialIssuer {
    key: EncodingKey,
    ttl_secs: i64,
}

impl CredentialIssuer {
    /// Signer with the default seven-day lifetime.
    pub fn new(secret: &[u8]) -> Self {
        Self::with_ttl(secret, CREDENTIAL_TTL_SECS)
    }

    /// Signer with a custom lifetime in seconds.
    pub fn with_ttl(secret: &[u8], ttl_secs: i64) -> Self {
        Self {
            key: EncodingKey::from_secret(secret),
            ttl_secs,
        }
    }

    /// Lifetime applied to new credentials.
    pub fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }

    /// Sign a credential issued now.
    pub fn issue(
        &self,
        identity: &ExternalIdentity,
        membership: GuildMembership,
    ) -> Result<IssuedCredential, AuthError> {
        self.issue_at(identity, membership, now_secs())
    }

    /// Sign a credential as if issued at `now`.
    pub fn issue_at(
        &self,
        identity: &ExternalIdentity,
        membership: GuildMembership,
        now: i64,
    ) -> Result<IssuedCredential, AuthError> {
        if !membership.is_member {
            return Err(AuthError::NotAMember(identity.user_id.clone()));
        }
        let claims = Credential {
            subject_id: identity.user_id.clone(),
            display_name: identity.display_name.clone(),
            role: Role::from_officer_flag(membership.is_officer),
            issued_at: now,
            expires_at: now + self.ttl_secs,
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.key)?;
        tracing::debug!(
            subject = %claims.subject_id,
            role = ?claims.role,
            expires_at = claims.expires_at,
            "credential issued"
        );
        Ok(IssuedCredential { token, claims })
    }
}

impl std::fmt::Debug for CredentialIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialIssuer")
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}
