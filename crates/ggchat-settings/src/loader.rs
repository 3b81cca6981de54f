//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::RelaySettings;

/// Resolve the path to the settings file (`~/.ggchat/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".ggchat").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults merged with the file at `path`, without env overrides.
pub fn load_file_layer(path: &Path) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content =
            std::fs::read_to_string(path).map_err(|source| SettingsError::ReadFile {
                path: path.to_path_buf(),
                source,
            })?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `GGCHAT_*` environment overrides.
///
/// Invalid values are logged and ignored.
pub fn apply_env_overrides(settings: &mut RelaySettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary lookup. Lets tests supply variables
/// without touching the process environment.
pub fn apply_overrides<F>(settings: &mut RelaySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("GGCHAT_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("GGCHAT_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.usize("GGCHAT_MAX_CONNECTIONS", 1, 100_000) {
        settings.server.max_connections = v;
    }
    if let Some(v) = env.u64("GGCHAT_SEND_TIMEOUT_MS", 100, 60_000) {
        settings.server.send_timeout_ms = v;
    }
    if let Some(v) = env.u64("GGCHAT_HEARTBEAT_INTERVAL_SECS", 1, 3_600) {
        settings.server.heartbeat_interval_secs = v;
    }
    if let Some(v) = env.u64("GGCHAT_HEARTBEAT_TIMEOUT_SECS", 2, 7_200) {
        settings.server.heartbeat_timeout_secs = v;
    }

    // ── Auth ────────────────────────────────────────────────────────
    if let Some(v) = env.string("GGCHAT_JWT_SECRET") {
        settings.auth.signing_secret = Some(v);
    }
    if let Some(v) = env.u64("GGCHAT_CREDENTIAL_TTL_SECS", 60, 30 * 24 * 3_600) {
        settings.auth.credential_ttl_secs = i64::try_from(v).unwrap_or(i64::MAX);
    }
    if let Some(v) = env.string("GGCHAT_DISCORD_CLIENT_ID") {
        settings.auth.oauth.client_id = v;
    }
    if let Some(v) = env.string("GGCHAT_DISCORD_CLIENT_SECRET") {
        settings.auth.oauth.client_secret = v;
    }
    if let Some(v) = env.string("GGCHAT_DISCORD_REDIRECT_URI") {
        settings.auth.oauth.redirect_uri = v;
    }
    if let Some(v) = env.string("GGCHAT_DISCORD_GUILD_ID") {
        settings.auth.oauth.guild_id = v;
    }
    if let Some(v) = env.string("GGCHAT_DISCORD_BOT_TOKEN") {
        settings.auth.oauth.bot_token = v;
    }
    if let Some(v) = env.string("GGCHAT_DISCORD_OFFICER_ROLE_ID") {
        settings.auth.oauth.officer_role_id = Some(v);
    }

    // ── Bridge ──────────────────────────────────────────────────────
    if let Some(v) = env.string("GGCHAT_BRIDGE_WEBHOOK_URL") {
        settings.bridge.webhook_url = Some(v);
    }
    if let Some(v) = env.string("GGCHAT_BRIDGE_SECRET") {
        settings.bridge.inbound_secret = Some(v);
    }
    if let Some(v) = env.string("GGCHAT_BRIDGE_BOT_ID") {
        settings.bridge.bot_author_id = Some(v);
    }
    if let Some(v) = env.string("GGCHAT_BRIDGE_CHANNEL_ID") {
        settings.bridge.channel_id = Some(v);
    }

    // ── Polls / logging ─────────────────────────────────────────────
    if let Some(v) = env.usize("GGCHAT_MAX_POLLS", 1, 1_000_000) {
        settings.polls.max_polls = Some(v);
    }
    if let Some(v) = env.string("GGCHAT_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("GGCHAT_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn checked<T>(&self, name: &str, kind: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.checked(name, "bool", parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.checked(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.checked(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.checked(name, "usize", |v| parse_usize_range(v, min, max))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8800, "host": "0.0.0.0"}});
        let source = serde_json::json!({"server": {"port": 9000}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9000);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(
            serde_json::json!({"a": 1, "b": 2}),
            serde_json::json!({"a": null}),
        );
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_array_and_primitive_replace() {
        let merged = deep_merge(
            serde_json::json!({"items": [1, 2, 3], "obj": {"x": 1}}),
            serde_json::json!({"items": [4], "obj": 7}),
        );
        assert_eq!(merged["items"], serde_json::json!([4]));
        assert_eq!(merged["obj"], 7);
    }

    // ── file layer ──────────────────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_file_layer(Path::new("/nonexistent/ggchat/settings.json")).unwrap();
        assert_eq!(settings.server.port, 8800);
        assert_eq!(settings.bridge.queue_capacity, 256);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 9000}, "bridge": {"webhookUrl": "http://hook"}, "polls": {"maxPolls": 50}}"#,
        )
        .unwrap();

        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.max_connections, 256);
        assert_eq!(settings.bridge.webhook_url.as_deref(), Some("http://hook"));
        assert_eq!(settings.polls.max_polls, Some(50));
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();
        assert!(matches!(
            load_file_layer(&path).unwrap_err(),
            SettingsError::Json(_)
        ));
    }

    #[test]
    fn invalid_file_values_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"maxConnections": 0}}"#).unwrap();
        assert!(matches!(
            load_settings_from_path(&path).unwrap_err(),
            SettingsError::InvalidValue(_)
        ));
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn overrides_apply_to_every_section() {
        let mut s = RelaySettings::default();
        apply_overrides(
            &mut s,
            lookup_from(&[
                ("GGCHAT_PORT", "9100"),
                ("GGCHAT_HOST", "127.0.0.1"),
                ("GGCHAT_JWT_SECRET", "s3cret"),
                ("GGCHAT_DISCORD_GUILD_ID", "g42"),
                ("GGCHAT_BRIDGE_BOT_ID", "bot1"),
                ("GGCHAT_MAX_POLLS", "10"),
                ("GGCHAT_LOG_LEVEL", "debug"),
                ("GGCHAT_LOG_JSON", "yes"),
            ]),
        );
        assert_eq!(s.server.port, 9100);
        assert_eq!(s.server.host, "127.0.0.1");
        assert_eq!(s.auth.signing_secret.as_deref(), Some("s3cret"));
        assert_eq!(s.auth.oauth.guild_id, "g42");
        assert_eq!(s.bridge.bot_author_id.as_deref(), Some("bot1"));
        assert_eq!(s.polls.max_polls, Some(10));
        assert_eq!(s.logging.level, "debug");
        assert!(s.logging.json);
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let mut s = RelaySettings::default();
        apply_overrides(
            &mut s,
            lookup_from(&[
                ("GGCHAT_PORT", "0"),
                ("GGCHAT_MAX_CONNECTIONS", "lots"),
                ("GGCHAT_LOG_JSON", "maybe"),
                ("GGCHAT_HOST", ""),
            ]),
        );
        assert_eq!(s.server.port, 8800);
        assert_eq!(s.server.max_connections, 256);
        assert!(!s.logging.json);
        assert_eq!(s.server.host, "0.0.0.0");
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for val in &["true", "1", "yes", "on", "TRUE", "On"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in &["false", "0", "no", "off", "OFF"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("9090", 1, 65535), Some(9090));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("99999", 1, 65535), None);
        assert_eq!(parse_u64_range("500", 1000, 600_000), None);
        assert_eq!(parse_u64_range("1000", 1000, 600_000), Some(1000));
        assert_eq!(parse_usize_range("abc", 1, 10), None);
        assert_eq!(parse_usize_range("10", 1, 10), Some(10));
    }
}
