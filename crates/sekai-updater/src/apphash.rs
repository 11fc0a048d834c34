//! Keeps the local appVersion/appHash pair fresh.
//!
//! The pair cannot be derived from the game API (a 426 just says "too
//! old"), so it is pulled from configured sources: a directory of
//! per-region JSON files, or a URL template. The first source that yields
//! a value wins.

use std::path::Path;
use std::time::Duration;

use sekai_core::config::AppHashSource;
use sekai_core::{Result, SekaiError, ServerRegion};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppInfo {
    #[serde(rename = "appVersion")]
    pub app_version: String,
    #[serde(rename = "appHash")]
    pub app_hash: String,
}

pub struct AppHashUpdater {
    pub region: ServerRegion,
    sources: Vec<AppHashSource>,
    version_path: String,
    proxy: Option<String>,
}

impl AppHashUpdater {
    pub fn new(
        region: ServerRegion,
        sources: Vec<AppHashSource>,
        version_path: String,
        proxy: Option<String>,
    ) -> Self {
        Self {
            region,
            sources,
            version_path,
            proxy,
        }
    }

    /// One check cycle. Failures are logged, never propagated.
    pub async fn check_update(&self) {
        info!("{} checking for app hash updates...", self.region);
        let current = match self.load_current().await {
            Ok(v) => v,
            Err(e) => {
                error!("{} failed to load version file: {}", self.region, e);
                return;
            }
        };
        for source in &self.sources {
            match self.fetch_from_source(source).await {
                Ok(Some(info)) => {
                    if info.app_version != current.app_version
                        || info.app_hash != current.app_hash
                    {
                        info!(
                            "{} found new app version: {}",
                            self.region, info.app_version
                        );
                        if let Err(e) = self.update_version_file(&info).await {
                            error!("{} failed to update version file: {}", self.region, e);
                        }
                    }
                    break;
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!("{} app hash source failed: {}", self.region, e);
                    continue;
                }
            }
        }
        info!("{} app hash check complete", self.region);
    }

    async fn load_current(&self) -> Result<AppInfo> {
        let data = tokio::fs::read(&self.version_path).await?;
        serde_json::from_slice(&data).map_err(Into::into)
    }

    async fn fetch_from_source(&self, source: &AppHashSource) -> Result<Option<AppInfo>> {
        match source.source_type.as_str() {
            "file" => self.fetch_from_file(source).await,
            "url" => self.fetch_from_url(source).await,
            other => {
                warn!("unknown app hash source type: {}", other);
                Ok(None)
            }
        }
    }

    async fn fetch_from_file(&self, source: &AppHashSource) -> Result<Option<AppInfo>> {
        let path = Path::new(&source.dir).join(format!("{}.json", self.region.as_str()));
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        let data = tokio::fs::read(&path).await?;
        let info: AppInfo = serde_json::from_slice(&data)?;
        Ok(Some(info))
    }

    async fn fetch_from_url(&self, source: &AppHashSource) -> Result<Option<AppInfo>> {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(10));
        if let Some(ref proxy) = self.proxy
            && !proxy.is_empty()
        {
            builder = builder.proxy(
                reqwest::Proxy::all(proxy)
                    .map_err(|e| SekaiError::transport(format!("invalid proxy: {}", e)))?,
            );
        }
        let client = builder
            .build()
            .map_err(|e| SekaiError::transport(e.to_string()))?;
        let url = source.url.replace("{region}", self.region.as_str());
        let resp = client
            .get(&url)
            .send()
            .await
            .map_err(|e| SekaiError::transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        let body = resp
            .bytes()
            .await
            .map_err(|e| SekaiError::transport(e.to_string()))?;
        let info: AppInfo = serde_json::from_slice(&body)?;
        Ok(Some(info))
    }

    /// Patches appVersion/appHash into the version file, leaving the other
    /// fields untouched.
    async fn update_version_file(&self, info: &AppInfo) -> Result<()> {
        let data = tokio::fs::read(&self.version_path).await?;
        let mut version: serde_json::Map<String, serde_json::Value> =
            serde_json::from_slice(&data)?;
        version.insert("appVersion".to_string(), info.app_version.clone().into());
        version.insert("appHash".to_string(), info.app_hash.clone().into());
        let json = serde_json::to_vec_pretty(&version)?;
        tokio::fs::write(&self.version_path, json).await?;
        Ok(())
    }
}
