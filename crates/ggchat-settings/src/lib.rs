//! # ggchat-settings
//!
//! Configuration for the GG Chat relay, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **User file**: `~/.ggchat/settings.json`, deep-merged over defaults
//! 3. **Environment variables**: `GGCHAT_*` overrides (highest priority)
//!
//! Settings are loaded once by the binary and passed down explicitly.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
