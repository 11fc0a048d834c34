//! Gateway configuration.
//!
//! The whole configuration lives in a single TOML file. The path is taken
//! from the `SEKAI_GATEWAY_CONFIG` environment variable and falls back to
//! `sekai-gateway.toml` in the working directory.

use std::collections::HashMap;
use std::env;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, SekaiError};
use crate::region::ServerRegion;

const CONFIG_ENV: &str = "SEKAI_GATEWAY_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "sekai-gateway.toml";

/// Static configuration for one regional deployment.
///
/// Immutable after load; shared read-only by every client in the region's
/// pool.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Base URL of the game API, without the `/api` suffix.
    #[serde(default)]
    pub api_url: String,
    /// AES key for the wire envelope, hex encoded (16 bytes).
    #[serde(default)]
    pub aes_key_hex: String,
    /// AES IV for the wire envelope, hex encoded (16 bytes).
    #[serde(default)]
    pub aes_iv_hex: String,
    /// Fixed headers sent on every request (user agent, platform markers).
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Whether the region sits behind a CDN that wants signed cookies.
    #[serde(default)]
    pub require_cookies: bool,
    /// Base URL of the versioned master-data snapshot endpoint
    /// (Nuverse regions only).
    #[serde(default)]
    pub master_data_url: String,
    /// Path to the restoration structure file (Nuverse regions only).
    #[serde(default)]
    pub structure_file_path: String,
    /// Directory scanned recursively for account definition files.
    #[serde(default)]
    pub account_dir: String,
    /// Path of the local version metadata file.
    #[serde(default)]
    pub version_path: String,
    /// Directory the restored master data is written into.
    #[serde(default)]
    pub master_dir: String,
    #[serde(default)]
    pub enable_master_updater: bool,
    /// Minutes between master update checks. Zero disables the job.
    #[serde(default)]
    pub master_updater_interval_minutes: u64,
    #[serde(default)]
    pub enable_app_hash_updater: bool,
    /// Minutes between app hash checks. Zero disables the job.
    #[serde(default)]
    pub app_hash_updater_interval_minutes: u64,
    /// Attempt budget for a single API call. Policy, not protocol.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Seconds between attempts.
    #[serde(default = "default_retry_wait_secs")]
    pub retry_wait_secs: u64,
    /// Deadline for a login call, in seconds.
    #[serde(default = "default_login_timeout_secs")]
    pub login_timeout_secs: u64,
    /// Deadline for a single generic API attempt, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: String::new(),
            aes_key_hex: String::new(),
            aes_iv_hex: String::new(),
            headers: HashMap::new(),
            require_cookies: false,
            master_data_url: String::new(),
            structure_file_path: String::new(),
            account_dir: String::new(),
            version_path: String::new(),
            master_dir: String::new(),
            enable_master_updater: false,
            master_updater_interval_minutes: 0,
            enable_app_hash_updater: false,
            app_hash_updater_interval_minutes: 0,
            max_attempts: default_max_attempts(),
            retry_wait_secs: default_retry_wait_secs(),
            login_timeout_secs: default_login_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_max_attempts() -> u32 {
    4
}
fn default_retry_wait_secs() -> u64 {
    1
}
fn default_login_timeout_secs() -> u64 {
    20
}
fn default_request_timeout_secs() -> u64 {
    45
}

/// HTTP facade settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Path of the JSON user store backing facade authentication.
    /// Empty disables authentication entirely.
    #[serde(default)]
    pub user_store_path: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    9999
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            user_store_path: String::new(),
        }
    }
}

/// Git remote used to publish restored master data.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Where the app hash updater looks for new appVersion/appHash pairs.
#[derive(Debug, Clone, Deserialize)]
pub struct AppHashSource {
    /// "file" or "url".
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default)]
    pub dir: String,
    /// URL template; `{region}` is substituted with the region name.
    #[serde(default)]
    pub url: String,
}

/// An external asset-mirroring service to notify on asset updates.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetUpdaterInfo {
    pub url: String,
    /// Bearer token. Empty sends the notification unauthenticated.
    #[serde(default)]
    pub authorization: String,
}

/// Root configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Outbound proxy URL applied to every upstream call. Empty disables.
    #[serde(default)]
    pub proxy: String,
    /// Signature-issuing endpoint for the JP CDN cookies.
    #[serde(default)]
    pub jp_cookie_url: String,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub apphash_sources: Vec<AppHashSource>,
    #[serde(default)]
    pub asset_updater_servers: Vec<AssetUpdaterInfo>,
    #[serde(default)]
    pub servers: HashMap<ServerRegion, ServerConfig>,
}

impl Config {
    /// Loads the configuration from `SEKAI_GATEWAY_CONFIG` or the default
    /// path.
    pub fn load() -> Result<Self> {
        let path = env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Loads the configuration from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            SekaiError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&data)?;
        Ok(config)
    }

    /// The proxy URL, or `None` when unset.
    pub fn proxy(&self) -> Option<&str> {
        if self.proxy.is_empty() {
            None
        } else {
            Some(&self.proxy)
        }
    }

    /// Regions that are enabled in this deployment.
    pub fn enabled_servers(&self) -> impl Iterator<Item = (ServerRegion, &ServerConfig)> {
        self.servers
            .iter()
            .filter(|(_, cfg)| cfg.enabled)
            .map(|(region, cfg)| (*region, cfg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_minimal_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
proxy = ""

[backend]
port = 8080

[servers.jp]
enabled = true
api_url = "https://example.invalid"
require_cookies = true

[servers.tw]
enabled = false
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.backend.port, 8080);
        assert!(config.proxy().is_none());

        let jp = &config.servers[&ServerRegion::Jp];
        assert!(jp.require_cookies);
        // Retry policy falls back to the documented defaults.
        assert_eq!(jp.max_attempts, 4);
        assert_eq!(jp.retry_wait_secs, 1);
        assert_eq!(jp.login_timeout_secs, 20);

        let enabled: Vec<_> = config.enabled_servers().map(|(r, _)| r).collect();
        assert_eq!(enabled, vec![ServerRegion::Jp]);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = Config::load_from(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(matches!(err, SekaiError::Config(_)));
    }
}
