//! Settings errors.

use std::path::PathBuf;

use thiserror::Error;

/// Why settings could not be produced.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    ReadFile {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The file is not valid JSON, or the merged document does not fit
    /// [`RelaySettings`](crate::RelaySettings).
    #[error("malformed settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A value parsed but is unusable.
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// Settings result alias.
pub type Result<T> = std::result::Result<T, SettingsError>;
