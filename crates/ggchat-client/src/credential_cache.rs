//! On-disk cache for the last issued credential.
//!
//! The client never holds the signing secret, so the cached credential is
//! checked only for shape and expiry by the local clock. The server remains
//! the authority: a credential it rejects is deleted here too.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ggchat_auth::{Credential, inspect_unverified, now_secs};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ClientError;

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    credential: String,
    saved_at: DateTime<Utc>,
}

/// A cached credential that passed the local expiry check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedCredential {
    /// Compact token to present to the server.
    pub token: String,
    /// Claims decoded without signature verification.
    pub claims: Credential,
}

/// JSON file holding one credential.
#[derive(Clone, Debug)]
pub struct CredentialCache {
    path: PathBuf,
}

impl CredentialCache {
    /// Cache stored at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.ggchat/credential.json`.
    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(".ggchat").join("credential.json")
    }

    /// File backing this cache.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist `token`, replacing any earlier credential.
    pub fn store(&self, token: &str) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = CacheFile {
            credential: token.to_owned(),
            saved_at: Utc::now(),
        };
        std::fs::write(&self.path, serde_json::to_string_pretty(&file)?)?;
        debug!(path = ?self.path, "credential cached");
        Ok(())
    }

    /// Raw cached token, if any.
    pub fn load(&self) -> Result<Option<String>, ClientError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => {
                let file: CacheFile = serde_json::from_str(&content)?;
                Ok(Some(file.credential))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Cached credential if it is still live by the local clock.
    ///
    /// Expired, malformed, or unreadable entries are deleted.
    pub fn load_usable(&self) -> Result<Option<CachedCredential>, ClientError> {
        self.load_usable_at(now_secs())
    }

    /// [`load_usable`](Self::load_usable) against an explicit clock.
    pub fn load_usable_at(&self, now: i64) -> Result<Option<CachedCredential>, ClientError> {
        let token = match self.load() {
            Ok(Some(token)) => token,
            Ok(None) => return Ok(None),
            Err(ClientError::Json(e)) => {
                info!(error = %e, "discarding unreadable credential cache");
                self.clear()?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        match inspect_unverified(&token, now) {
            Ok(claims) => Ok(Some(CachedCredential { token, claims })),
            Err(rejection) => {
                info!(reason = %rejection, "discarding cached credential");
                self.clear()?;
                Ok(None)
            }
        }
    }

    /// Delete the cached credential. Missing files are fine.
    pub fn clear(&self) -> Result<(), ClientError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
