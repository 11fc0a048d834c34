//! The gateway binary: builds the regional client pools, starts the
//! background updater jobs, and serves the HTTP facade.

mod handlers;
mod image;
mod middleware;
mod routes;
mod state;
mod users;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use sekai_client::SekaiClientManager;
use sekai_core::config::Config;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::state::AppContext;
use crate::users::UserStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.backend.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let proxy = config.proxy().map(str::to_string);
    let cookie_url = if config.jp_cookie_url.is_empty() {
        None
    } else {
        Some(config.jp_cookie_url.clone())
    };

    let mut managers = HashMap::new();
    for (region, server_config) in config.enabled_servers() {
        let mut manager = SekaiClientManager::new(
            region,
            server_config.clone(),
            proxy.clone(),
            cookie_url.clone(),
        );
        // A region with a failing account still serves through whatever
        // clients did log in.
        if let Err(e) = manager.init().await {
            error!("{} manager initialization incomplete: {}", region, e);
        }
        managers.insert(region, Arc::new(manager));
    }
    if managers.is_empty() {
        anyhow::bail!("no server regions are enabled");
    }

    let users = if config.backend.user_store_path.is_empty() {
        info!("facade authentication disabled (no user store configured)");
        None
    } else {
        let store = UserStore::load(Path::new(&config.backend.user_store_path))
            .context("failed to load user store")?;
        info!("loaded {} facade users", store.len());
        Some(store)
    };

    let ctx = Arc::new(AppContext { managers, users });
    let _jobs = sekai_updater::start_jobs(&ctx.managers, &config);

    let addr = format!("{}:{}", config.backend.host, config.backend.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("sekai gateway listening on {}", addr);
    axum::serve(listener, routes::create_router(ctx.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for manager in ctx.managers.values() {
        manager.shutdown();
    }
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
