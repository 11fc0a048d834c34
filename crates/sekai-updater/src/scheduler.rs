//! Background jobs: periodic master/app-hash checks and cookie refresh.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sekai_client::SekaiClientManager;
use sekai_core::ServerRegion;
use sekai_core::config::Config;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::apphash::AppHashUpdater;
use crate::master::MasterUpdater;

/// The signed CDN cookies live for roughly a day; refresh well inside that.
const COOKIE_REFRESH_INTERVAL: Duration = Duration::from_secs(20 * 60 * 60);

/// Spawns the recurring jobs for every enabled region and returns their
/// handles. Each job runs until the process exits.
pub fn start_jobs(
    managers: &HashMap<ServerRegion, Arc<SekaiClientManager>>,
    config: &Config,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    let proxy = config.proxy().map(str::to_string);

    for (region, manager) in managers {
        let server_config = &manager.config;

        if server_config.require_cookies {
            info!("{} cookie refresh scheduled every 20h", region);
            let manager = manager.clone();
            let region = *region;
            handles.push(spawn_interval(COOKIE_REFRESH_INTERVAL, move || {
                let manager = manager.clone();
                async move {
                    info!("{} running scheduled cookie refresh...", region);
                    if let Err(e) = manager.parse_cookies().await {
                        error!("{} failed to refresh cookies: {}", region, e);
                    }
                }
            }));
        }

        if server_config.enable_master_updater
            && server_config.master_updater_interval_minutes > 0
        {
            let interval =
                Duration::from_secs(server_config.master_updater_interval_minutes * 60);
            info!(
                "{} master updater scheduled every {}m",
                region, server_config.master_updater_interval_minutes
            );
            let updater = Arc::new(MasterUpdater::new(
                *region,
                manager.clone(),
                Some(&config.git),
                config.asset_updater_servers.clone(),
                proxy.clone(),
            ));
            handles.push(spawn_interval(interval, move || {
                let updater = updater.clone();
                async move {
                    updater.check_update().await;
                }
            }));
        }

        if server_config.enable_app_hash_updater
            && server_config.app_hash_updater_interval_minutes > 0
        {
            if config.apphash_sources.is_empty() {
                info!("{} app hash updater disabled: no sources configured", region);
                continue;
            }
            let interval =
                Duration::from_secs(server_config.app_hash_updater_interval_minutes * 60);
            info!(
                "{} app hash updater scheduled every {}m",
                region, server_config.app_hash_updater_interval_minutes
            );
            let updater = Arc::new(AppHashUpdater::new(
                *region,
                config.apphash_sources.clone(),
                server_config.version_path.clone(),
                proxy.clone(),
            ));
            handles.push(spawn_interval(interval, move || {
                let updater = updater.clone();
                async move {
                    updater.check_update().await;
                }
            }));
        }
    }
    handles
}

fn spawn_interval<F, Fut>(period: Duration, job: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick fires immediately; skip it so jobs start one full
        // period after boot.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            job().await;
        }
    })
}
