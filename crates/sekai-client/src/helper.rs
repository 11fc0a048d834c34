//! Cookie and version helpers shared by every client in a region's pool.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use reqwest::Client;
use sekai_core::{Result, SekaiError};
use serde::{Deserialize, Serialize};

const COOKIE_ATTEMPTS: u32 = 4;
const COOKIE_RETRY_WAIT: Duration = Duration::from_secs(1);

/// Fetches signed CDN cookies from the signature-issuing endpoint.
///
/// The endpoint wants browser-like headers and answers with a `Set-Cookie`
/// header; the body is irrelevant.
pub struct CookieHelper {
    url: String,
    cookies: Mutex<String>,
}

impl CookieHelper {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            cookies: Mutex::new(String::new()),
        }
    }

    /// POSTs the signature endpoint, retrying up to 4 times with 1s backoff.
    pub async fn get_cookies(&self, proxy: Option<&str>) -> Result<String> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("ProductName/134 CFNetwork/1408.0.4 Darwin/22.5.0");
        if let Some(proxy_url) = proxy.filter(|p| !p.is_empty()) {
            builder = builder.proxy(
                reqwest::Proxy::all(proxy_url)
                    .map_err(|e| SekaiError::transport(format!("invalid proxy: {}", e)))?,
            );
        }
        let client = builder
            .build()
            .map_err(|e| SekaiError::transport(e.to_string()))?;

        let mut last_error = None;
        for attempt in 1..=COOKIE_ATTEMPTS {
            let result = client
                .post(&self.url)
                .header("Accept", "*/*")
                .header("Connection", "keep-alive")
                .header("Accept-Language", "zh-CN,zh-Hans;q=0.9")
                .header("Accept-Encoding", "gzip, deflate, br")
                .header("X-Unity-Version", "2022.3.21f1")
                .send()
                .await;
            match result {
                Ok(resp) if resp.status().is_success() => {
                    if let Some(cookie) = resp.headers().get("set-cookie") {
                        let cookie = cookie.to_str().unwrap_or_default().to_string();
                        *self.cookies.lock().unwrap() = cookie.clone();
                        return Ok(cookie);
                    }
                    last_error = Some(SekaiError::transport("no cookie in response"));
                }
                Ok(resp) => {
                    last_error = Some(SekaiError::transport(format!(
                        "cookie endpoint answered {}",
                        resp.status()
                    )));
                }
                Err(e) => {
                    last_error = Some(SekaiError::transport(e.to_string()));
                }
            }
            if attempt < COOKIE_ATTEMPTS {
                tokio::time::sleep(COOKIE_RETRY_WAIT).await;
            }
        }
        Err(last_error.unwrap_or(SekaiError::RetriesExhausted))
    }

    /// The most recently fetched cookie string.
    pub fn cached_cookies(&self) -> String {
        self.cookies.lock().unwrap().clone()
    }
}

/// Version metadata persisted beside the master data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionInfo {
    #[serde(rename = "appVersion", default)]
    pub app_version: String,
    #[serde(rename = "appHash", default)]
    pub app_hash: String,
    #[serde(rename = "dataVersion", default)]
    pub data_version: String,
    #[serde(rename = "assetVersion", default)]
    pub asset_version: String,
    #[serde(rename = "assetHash", default)]
    pub asset_hash: String,
    #[serde(rename = "cdnVersion", default)]
    pub cdn_version: i64,
}

/// Loads the local version metadata file and keeps the last copy in memory.
pub struct VersionHelper {
    version_path: PathBuf,
    version_info: Mutex<VersionInfo>,
}

impl VersionHelper {
    pub fn new(version_path: impl Into<PathBuf>) -> Self {
        Self {
            version_path: version_path.into(),
            version_info: Mutex::new(VersionInfo::default()),
        }
    }

    pub fn version_path(&self) -> &Path {
        &self.version_path
    }

    /// Reads the version file from disk, caching the parsed copy.
    pub async fn load(&self) -> Result<VersionInfo> {
        let data = tokio::fs::read(&self.version_path).await.map_err(|e| {
            SekaiError::parse(format!(
                "failed to read version file {}: {}",
                self.version_path.display(),
                e
            ))
        })?;
        let info: VersionInfo = serde_json::from_slice(&data)
            .map_err(|e| SekaiError::parse(format!("failed to parse version file: {}", e)))?;
        *self.version_info.lock().unwrap() = info.clone();
        Ok(info)
    }

    /// The last loaded copy, without touching the disk.
    pub fn get(&self) -> VersionInfo {
        self.version_info.lock().unwrap().clone()
    }

    pub fn update(&self, info: VersionInfo) {
        *self.version_info.lock().unwrap() = info;
    }
}
