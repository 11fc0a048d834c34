//! Best-effort notifications to external asset-mirroring services.

use std::time::Duration;

use sekai_core::ServerRegion;
use sekai_core::config::AssetUpdaterInfo;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{info, warn};

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(30);
/// A 409 means the mirror is still working on an earlier version.
const CONFLICT_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize)]
struct AssetUpdatePayload {
    server: ServerRegion,
    #[serde(rename = "assetVersion")]
    asset_version: String,
    #[serde(rename = "assetHash")]
    asset_hash: String,
}

/// Notifies every configured mirror concurrently. Errors are logged, never
/// propagated; a single conflict response is tolerated by waiting once.
pub async fn notify_all(
    region: ServerRegion,
    updaters: &[AssetUpdaterInfo],
    asset_version: &str,
    asset_hash: &str,
) {
    if updaters.is_empty() {
        return;
    }
    let payload = AssetUpdatePayload {
        server: region,
        asset_version: asset_version.to_string(),
        asset_hash: asset_hash.to_string(),
    };
    let mut set = JoinSet::new();
    for updater in updaters {
        let updater = updater.clone();
        let payload = payload.clone();
        set.spawn(async move { notify_one(&updater, &payload).await });
    }
    while set.join_next().await.is_some() {}
    info!(
        "{} asset mirrors notified (version {})",
        region, asset_version
    );
}

async fn notify_one(updater: &AssetUpdaterInfo, payload: &AssetUpdatePayload) {
    let client = match reqwest::Client::builder().timeout(NOTIFY_TIMEOUT).build() {
        Ok(c) => c,
        Err(e) => {
            warn!("asset updater client build failed: {}", e);
            return;
        }
    };
    for attempt in 0..2 {
        let mut req = client
            .post(&updater.url)
            .header(
                "User-Agent",
                concat!("Sekai-Gateway/", env!("CARGO_PKG_VERSION")),
            )
            .json(payload);
        if !updater.authorization.is_empty() {
            req = req.header(
                "Authorization",
                format!("Bearer {}", updater.authorization),
            );
        }
        match req.send().await {
            Ok(resp) if resp.status().as_u16() == 409 && attempt == 0 => {
                warn!("asset updater {} busy, waiting once...", updater.url);
                tokio::time::sleep(CONFLICT_WAIT).await;
            }
            Ok(resp) => {
                if !resp.status().is_success() {
                    warn!(
                        "asset updater {} answered {}",
                        updater.url,
                        resp.status()
                    );
                }
                return;
            }
            Err(e) => {
                warn!("asset updater {} unreachable: {}", updater.url, e);
                return;
            }
        }
    }
}
