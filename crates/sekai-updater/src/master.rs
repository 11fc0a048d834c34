//! The master-data update orchestrator.
//!
//! One updater per region. A run logs in through the pool, compares the
//! advertised data/asset versions against the locally persisted metadata,
//! and when something advanced: downloads the new master data (split parts
//! for CP regions, one snapshot for Nuverse regions), restores it, writes
//! one JSON file per record type, refreshes the version metadata (plus a
//! dated snapshot copy), notifies the asset mirrors, and pushes the master
//! directory to a git remote when one is configured.

use std::path::Path;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use sekai_client::{LoginResponse, SekaiClient, SekaiClientManager, VersionInfo};
use sekai_core::config::{AssetUpdaterInfo, GitConfig};
use sekai_core::version::compare_version;
use sekai_core::{Result, SekaiError, ServerRegion};
use sekai_master::{JsonMap, MasterRestorer};
use serde_json::Value as JsonValue;
use tracing::{error, info, warn};

use crate::assets;
use crate::git::GitHelper;

/// How many split-master parts are fetched concurrently.
const PART_CONCURRENCY: usize = 12;

pub struct MasterUpdater {
    pub region: ServerRegion,
    manager: Arc<SekaiClientManager>,
    git: Option<GitHelper>,
    asset_updaters: Vec<AssetUpdaterInfo>,
}

impl MasterUpdater {
    pub fn new(
        region: ServerRegion,
        manager: Arc<SekaiClientManager>,
        git_config: Option<&GitConfig>,
        asset_updaters: Vec<AssetUpdaterInfo>,
        proxy: Option<String>,
    ) -> Self {
        let git = git_config
            .filter(|c| c.enabled)
            .map(|c| GitHelper::new(c, proxy));
        Self {
            region,
            manager,
            git,
            asset_updaters,
        }
    }

    /// One update cycle. Failures are logged, never propagated; the next
    /// scheduled run starts fresh.
    pub async fn check_update(&self) {
        info!("{} checking for master data updates...", self.region);
        let current = match self.manager.version_helper.load().await {
            Ok(v) => v,
            Err(e) => {
                error!("{} failed to load version file: {}", self.region, e);
                return;
            }
        };
        let login = match self.manager.get_login_data().await {
            Ok(login) => login,
            Err(e) => {
                error!("{} updater failed to login: {}", self.region, e);
                return;
            }
        };

        let (need_master, need_asset) = match self.compare_versions(&login, &current) {
            Ok(decision) => decision,
            Err(e) => {
                warn!("{} failed to compare versions: {}", self.region, e);
                return;
            }
        };

        if need_asset {
            info!(
                "{} new asset version: {}",
                self.region, login.asset_version
            );
            let region = self.region;
            let updaters = self.asset_updaters.clone();
            let asset_version = login.asset_version.clone();
            let asset_hash = login.asset_hash.clone();
            // Best effort; the mirrors answer on their own schedule.
            tokio::spawn(async move {
                assets::notify_all(region, &updaters, &asset_version, &asset_hash).await;
            });
        }

        if need_master {
            info!(
                "{} new master data version: {} (cdn {})",
                self.region, login.data_version, login.cdn_version
            );
            if let Err(e) = self.update_master_data(&login).await {
                error!("{} failed to update master data: {}", self.region, e);
                return;
            }
        }

        if need_master || need_asset {
            let new_version = VersionInfo {
                app_version: current.app_version.clone(),
                app_hash: current.app_hash.clone(),
                data_version: login.data_version.clone(),
                asset_version: login.asset_version.clone(),
                asset_hash: login.asset_hash.clone(),
                cdn_version: login.cdn_version,
            };
            if let Err(e) = self.save_version(&new_version).await {
                error!("{} failed to save version file: {}", self.region, e);
                return;
            }
            self.manager.version_helper.update(new_version);

            if need_master
                && let Some(ref git) = self.git
            {
                let master_dir = self.manager.config.master_dir.clone();
                match git.push_changes(Path::new(&master_dir), &login.data_version) {
                    Ok(true) => info!("{} pushed master data to remote", self.region),
                    Ok(false) => {}
                    Err(e) => error!("{} git push failed: {}", self.region, e),
                }
            }
        }
        info!("{} master data check complete", self.region);
    }

    /// Decides `(need_master_update, need_asset_update)`.
    ///
    /// CP regions compare the dot-numeric data/asset version strings;
    /// Nuverse regions compare the integer CDN version, which gates both.
    fn compare_versions(
        &self,
        login: &LoginResponse,
        current: &VersionInfo,
    ) -> Result<(bool, bool)> {
        if self.region.is_cp_server() {
            let need_master = compare_version(&login.data_version, &current.data_version)?;
            let need_asset = compare_version(&login.asset_version, &current.asset_version)?;
            Ok((need_master, need_asset))
        } else {
            let advanced = login.cdn_version > current.cdn_version;
            Ok((advanced, advanced))
        }
    }

    async fn update_master_data(&self, login: &LoginResponse) -> Result<()> {
        let master_dir = self.manager.config.master_dir.clone();
        tokio::fs::create_dir_all(&master_dir).await?;
        let client = self
            .manager
            .get_client()
            .ok_or(SekaiError::NoClientAvailable)?;
        let _guard = client.lock_calls().await;

        let master = if self.region.is_cp_server() {
            self.fetch_split_master(&client, &login.suite_master_split_path)
                .await?
        } else {
            let raw = client.fetch_master_snapshot(login.cdn_version).await?;
            self.restore_snapshot(raw, Path::new(&master_dir)).await?
        };
        self.save_master_files(&master, Path::new(&master_dir))
            .await
    }

    /// Downloads every split-master part with bounded parallelism and
    /// accumulates them into one combined mapping. All downloads run to
    /// completion; the first error is what gets reported.
    async fn fetch_split_master(
        &self,
        client: &Arc<SekaiClient>,
        paths: &[String],
    ) -> Result<JsonMap> {
        let paths: Vec<String> = paths
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| {
                if p.starts_with('/') {
                    p.clone()
                } else {
                    format!("/{}", p)
                }
            })
            .collect();
        if paths.is_empty() {
            return Err(SekaiError::parse("login response carried no split paths"));
        }

        let results: Vec<(String, Result<(JsonValue, u16)>)> = stream::iter(paths)
            .map(|path| {
                let client = client.clone();
                async move {
                    let outcome = client.get(&path, None).await;
                    (path, outcome)
                }
            })
            .buffer_unordered(PART_CONCURRENCY)
            .collect()
            .await;

        let mut master = JsonMap::new();
        let mut first_error = None;
        for (path, outcome) in results {
            match outcome {
                Ok((JsonValue::Object(part), _)) => {
                    master.extend(part);
                }
                Ok((other, _)) => {
                    warn!("{} unexpected master part at {}: {}", self.region, path, other);
                    if first_error.is_none() {
                        first_error = Some(SekaiError::parse(format!(
                            "master part at {} is not an object",
                            path
                        )));
                    }
                }
                Err(e) => {
                    error!("{} failed to fetch part {}: {}", self.region, path, e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(master),
        }
    }

    /// Runs a Nuverse snapshot through the restorer, merging event cards
    /// with the previously persisted set.
    async fn restore_snapshot(
        &self,
        raw: indexmap::IndexMap<String, JsonValue>,
        master_dir: &Path,
    ) -> Result<JsonMap> {
        let structure_path = &self.manager.config.structure_file_path;
        let restorer = MasterRestorer::from_file(Path::new(structure_path))?;
        let previous = load_previous_event_cards(master_dir).await;
        let raw: JsonMap = raw.into_iter().collect();
        let outcome = restorer.restore(&raw, &previous);
        for failure in &outcome.failures {
            warn!(
                "{} failed to restore {}: {}",
                self.region, failure.key, failure.message
            );
        }
        Ok(outcome.data)
    }

    /// Writes one pretty-printed JSON file per record type.
    async fn save_master_files(&self, master: &JsonMap, master_dir: &Path) -> Result<()> {
        let mut written = 0usize;
        let mut failed = 0usize;
        for (key, value) in master {
            let path = master_dir.join(format!("{}.json", key));
            match serde_json::to_vec_pretty(value) {
                Ok(json) => {
                    if let Err(e) = tokio::fs::write(&path, json).await {
                        warn!("{} failed to write {}: {}", self.region, path.display(), e);
                        failed += 1;
                    } else {
                        written += 1;
                    }
                }
                Err(e) => {
                    warn!("{} failed to serialize {}: {}", self.region, key, e);
                    failed += 1;
                }
            }
        }
        info!(
            "{} wrote {}/{} master files",
            self.region,
            written,
            master.len()
        );
        if failed > 0 && written == 0 {
            return Err(SekaiError::Io("all master file writes failed".to_string()));
        }
        Ok(())
    }

    /// Rewrites the version metadata file, keeping unknown fields, and
    /// drops a dated snapshot copy named after the data version beside it.
    async fn save_version(&self, version: &VersionInfo) -> Result<()> {
        let path = Path::new(&self.manager.config.version_path);
        let mut existing: JsonMap = match tokio::fs::read(path).await {
            Ok(data) => serde_json::from_slice(&data).unwrap_or_default(),
            Err(_) => JsonMap::new(),
        };
        existing.insert("appVersion".to_string(), version.app_version.clone().into());
        existing.insert("appHash".to_string(), version.app_hash.clone().into());
        existing.insert(
            "dataVersion".to_string(),
            version.data_version.clone().into(),
        );
        existing.insert(
            "assetVersion".to_string(),
            version.asset_version.clone().into(),
        );
        existing.insert("assetHash".to_string(), version.asset_hash.clone().into());
        if !self.region.is_cp_server() {
            existing.insert("cdnVersion".to_string(), version.cdn_version.into());
        }
        let json = serde_json::to_vec_pretty(&existing)?;
        tokio::fs::write(path, &json).await?;

        let dir = path.parent().unwrap_or(Path::new("."));
        let snapshot = dir.join(format!("{}.json", version.data_version));
        tokio::fs::write(snapshot, &json).await?;
        Ok(())
    }
}

/// The previously restored event cards, used for the incremental merge.
/// A missing or unreadable file just means an empty previous set.
async fn load_previous_event_cards(master_dir: &Path) -> Vec<JsonValue> {
    let path = master_dir.join("eventCards.json");
    match tokio::fs::read(&path).await {
        Ok(data) => match serde_json::from_slice::<JsonValue>(&data) {
            Ok(JsonValue::Array(records)) => records,
            _ => {
                warn!("{} is not an array, ignoring", path.display());
                Vec::new()
            }
        },
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_previous_event_cards() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("eventCards.json"),
            r#"[{"cardId": 1}, {"cardId": 2}]"#,
        )
        .unwrap();
        let cards = load_previous_event_cards(dir.path()).await;
        assert_eq!(cards.len(), 2);
    }

    #[tokio::test]
    async fn test_load_previous_event_cards_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_previous_event_cards(dir.path()).await.is_empty());
    }
}
