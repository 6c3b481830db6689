//! Configuration file parser for ~/.config/cinelist/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged, since they are usually typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable that overrides `api_url` from the file.
pub const API_URL_ENV: &str = "CINELIST_API_URL";

/// Backend used when nothing else is configured.
pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid api_url '{url}': {reason}")]
    InvalidApiUrl { url: String, reason: String },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the watchlist backend, without trailing slash.
    pub api_url: String,

    /// Quiet interval before a typed search is sent to the external catalog.
    pub search_debounce_ms: u64,

    /// Records per page in the catalog view.
    pub page_size: usize,

    /// Override for the session store location.
    pub database_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            search_debounce_ms: 600,
            page_size: 9,
            database_path: None,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 4] =
        ["api_url", "search_debounce_ms", "page_size", "database_path"];

    /// Load configuration from a TOML file, then apply `CINELIST_API_URL`.
    ///
    /// - Missing or empty file → defaults
    /// - Invalid TOML → `Err(ConfigError::Parse)`
    /// - Invalid `api_url` → `Err(ConfigError::InvalidApiUrl)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let env_url = std::env::var(API_URL_ENV).ok().filter(|v| !v.trim().is_empty());
        Self::load_with_override(path, env_url)
    }

    /// Same as [`Config::load`] with the environment override passed in explicitly.
    pub fn load_with_override(
        path: &Path,
        api_url_override: Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::read_file(path)?;
        if let Some(url) = api_url_override {
            tracing::debug!(env = API_URL_ENV, "api_url overridden from environment");
            config.api_url = url;
        }
        config.api_url = normalize_api_url(&config.api_url)?;
        config.page_size = config.page_size.max(1);
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), api_url = %config.api_url, "Loaded configuration");
        Ok(config)
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }
}

/// Check that `raw` is an absolute http(s) URL and strip the trailing slash.
fn normalize_api_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    let parsed = url::Url::parse(trimmed).map_err(|e| ConfigError::InvalidApiUrl {
        url: trimmed.to_string(),
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ConfigError::InvalidApiUrl {
                url: trimmed.to_string(),
                reason: format!("unsupported scheme '{other}'"),
            })
        }
    }

    Ok(trimmed.trim_end_matches('/').to_string())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(name: &str, content: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("cinelist_config_test_{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.search_debounce_ms, 600);
        assert_eq!(config.page_size, 9);
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/cinelist_test_nonexistent_config.toml");
        let config = Config::load_with_override(path, None).unwrap();
        assert_eq!(config.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_whitespace_file_returns_default() {
        let (dir, path) = write_config("whitespace", "  \n \n");
        let config = Config::load_with_override(&path, None).unwrap();
        assert_eq!(config.page_size, 9);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (dir, path) = write_config("partial", "search_debounce_ms = 250\n");
        let config = Config::load_with_override(&path, None).unwrap();
        assert_eq!(config.search_debounce_ms, 250);
        assert_eq!(config.search_debounce(), Duration::from_millis(250));
        assert_eq!(config.api_url, DEFAULT_API_URL);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let content = r#"
api_url = "https://movies.example.com/api/"
search_debounce_ms = 400
page_size = 12
database_path = "/tmp/cinelist.db"
"#;
        let (dir, path) = write_config("full", content);
        let config = Config::load_with_override(&path, None).unwrap();
        assert_eq!(config.api_url, "https://movies.example.com/api");
        assert_eq!(config.search_debounce_ms, 400);
        assert_eq!(config.page_size, 12);
        assert_eq!(
            config.database_path.as_deref(),
            Some(Path::new("/tmp/cinelist.db"))
        );
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_env_override_wins() {
        let (dir, path) = write_config("override", "api_url = \"https://file.example.com\"\n");
        let config =
            Config::load_with_override(&path, Some("https://env.example.com/api".into())).unwrap();
        assert_eq!(config.api_url, "https://env.example.com/api");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_zero_page_size_clamped() {
        let (dir, path) = write_config("zero_page", "page_size = 0\n");
        let config = Config::load_with_override(&path, None).unwrap();
        assert_eq!(config.page_size, 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (dir, path) = write_config("invalid", "this is not [valid toml");
        let err = Config::load_with_override(&path, None).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let (dir, path) = write_config("unknown", "page_size = 3\nfavourite_colour = \"red\"\n");
        let config = Config::load_with_override(&path, None).unwrap();
        assert_eq!(config.page_size, 3);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_non_http_api_url_rejected() {
        let (dir, path) = write_config("ftp", "api_url = \"ftp://example.com\"\n");
        let err = Config::load_with_override(&path, None).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidApiUrl { .. }));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_relative_api_url_rejected() {
        let path = Path::new("/tmp/cinelist_test_nonexistent_config.toml");
        let err = Config::load_with_override(path, Some("/api".into())).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidApiUrl { .. }));
    }

    #[test]
    fn test_too_large_file_rejected() {
        let (dir, path) = write_config("too_large", &"a".repeat(1_048_577));
        let err = Config::load_with_override(&path, None).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        std::fs::remove_dir_all(&dir).ok();
    }
}
