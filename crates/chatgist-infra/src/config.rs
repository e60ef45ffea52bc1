//! Configuration loader for chatgist.
//!
//! Reads `chatgist.toml` (by default from `~/.config/chatgist/`) and
//! deserializes it into [`GistConfig`]. Falls back to defaults when the file
//! is missing or malformed. Gemini API keys never live in the file; they are
//! read from `GEMINI_API_KEYS`.

use std::path::{Path, PathBuf};

use anyhow::bail;
use secrecy::SecretString;

use chatgist_types::config::GistConfig;

/// Environment variable holding a comma-separated list of Gemini API keys.
pub const API_KEYS_ENV: &str = "GEMINI_API_KEYS";

const CONFIG_FILE: &str = "chatgist.toml";

/// `{config_dir}/chatgist/chatgist.toml`, or `./chatgist.toml` when the
/// platform has no config directory.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("chatgist").join(CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE))
}

/// Load configuration from `path`.
///
/// - If the file does not exist, returns [`GistConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - Otherwise returns the parsed config; missing fields take their defaults.
pub async fn load_config(path: &Path) -> GistConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            return GistConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return GistConfig::default();
        }
    };

    match toml::from_str::<GistConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            GistConfig::default()
        }
    }
}

/// Split a comma-separated key list, dropping blanks.
pub fn parse_api_keys(raw: &str) -> Vec<SecretString> {
    raw.split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(|key| SecretString::from(key.to_string()))
        .collect()
}

/// Read the Gemini key pool from [`API_KEYS_ENV`]. At least one key is required.
pub fn gemini_api_keys_from_env() -> anyhow::Result<Vec<SecretString>> {
    let raw = std::env::var(API_KEYS_ENV).unwrap_or_default();
    let keys = parse_api_keys(&raw);
    if keys.is_empty() {
        bail!("{API_KEYS_ENV} is not set; provide one or more comma-separated Gemini API keys");
    }
    tracing::debug!(count = keys.len(), "Loaded Gemini API keys");
    Ok(keys)
}
