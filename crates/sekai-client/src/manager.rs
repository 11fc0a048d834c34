//! The per-region client pool.
//!
//! The manager owns one [`SekaiClient`] per discovered account, hands them
//! out round-robin, and wraps calls in the pool-level recovery loop:
//! upgrade-required re-parses versions across the whole pool, session and
//! cookie trouble re-parses cookies across the whole pool, maintenance
//! fails fast with a structured payload.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sekai_core::config::ServerConfig;
use sekai_core::{Result, SekaiError, ServerRegion};
use serde_json::{Value as JsonValue, json};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::account::{Account, CpAccount, NuverseAccount};
use crate::client::{LoginResponse, SekaiClient};
use crate::helper::{CookieHelper, VersionHelper};

pub struct SekaiClientManager {
    pub region: ServerRegion,
    pub config: Arc<ServerConfig>,
    pub version_helper: Arc<VersionHelper>,
    cookie_helper: Option<Arc<CookieHelper>>,
    clients: Vec<Arc<SekaiClient>>,
    cursor: AtomicUsize,
    proxy: Option<String>,
}

impl SekaiClientManager {
    pub fn new(
        region: ServerRegion,
        config: ServerConfig,
        proxy: Option<String>,
        cookie_url: Option<String>,
    ) -> Self {
        let config = Arc::new(config);
        let version_helper = Arc::new(VersionHelper::new(config.version_path.clone()));
        let cookie_helper = if config.require_cookies {
            cookie_url
                .filter(|url| !url.is_empty())
                .map(|url| Arc::new(CookieHelper::new(url)))
        } else {
            None
        };
        Self {
            region,
            config,
            version_helper,
            cookie_helper,
            clients: Vec::new(),
            cursor: AtomicUsize::new(0),
            proxy,
        }
    }

    /// Discovers accounts, builds one client per account, then initializes
    /// and logs in every client concurrently. All clients run each phase to
    /// completion; the first failure of each phase is what gets reported.
    pub async fn init(&mut self) -> Result<()> {
        info!("{} initializing client manager...", self.region);
        let accounts = self.parse_accounts()?;
        if accounts.is_empty() {
            warn!(
                "{} no accounts found in {}",
                self.region, self.config.account_dir
            );
            return Ok(());
        }
        for account in accounts {
            let client = SekaiClient::new(
                self.region,
                self.config.clone(),
                account,
                self.cookie_helper.clone(),
                self.version_helper.clone(),
                self.proxy.clone(),
            )?;
            self.clients.push(Arc::new(client));
        }

        self.for_each_client(|c| async move { c.init().await })
            .await?;
        self.for_each_client(|c| async move { c.login().await.map(|_| ()) })
            .await?;

        info!(
            "{} client manager initialized with {} clients",
            self.region,
            self.clients.len()
        );
        Ok(())
    }

    /// Runs one async operation on every client concurrently, joins all of
    /// them, and returns the first error encountered.
    async fn for_each_client<F, Fut>(&self, op: F) -> Result<()>
    where
        F: Fn(Arc<SekaiClient>) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut set = JoinSet::new();
        for client in &self.clients {
            set.spawn(op(client.clone()));
        }
        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("{} client operation failed: {}", self.region, e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(e) => {
                    error!("{} client task panicked: {}", self.region, e);
                    if first_error.is_none() {
                        first_error = Some(SekaiError::transport(e.to_string()));
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Round-robin selection. Only the cursor is shared state; request
    /// execution is serialized per client via its own lock.
    pub fn get_client(&self) -> Option<Arc<SekaiClient>> {
        if self.clients.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst) % self.clients.len();
        Some(self.clients[idx].clone())
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Refreshes CDN cookies on every client. No-op outside cookie regions.
    pub async fn parse_cookies(&self) -> Result<()> {
        if !self.config.require_cookies {
            return Ok(());
        }
        self.for_each_client(|c| async move { c.parse_cookies().await })
            .await
    }

    /// Reloads version headers on every client.
    pub async fn parse_version(&self) -> Result<()> {
        self.for_each_client(|c| async move { c.parse_version().await })
            .await
    }

    /// Logs in on one pool client and returns the login payload.
    pub async fn get_login_data(&self) -> Result<LoginResponse> {
        let client = self.get_client().ok_or(SekaiError::NoClientAvailable)?;
        let _guard = client.lock_calls().await;
        client.login().await
    }

    /// Top-level proxied call used by the HTTP facade.
    ///
    /// Always produces a payload: protocol failures come back as the
    /// structured `{result, status, message}` object with the matching
    /// HTTP status.
    pub async fn get_game_api(
        &self,
        path: &str,
        params: Option<&std::collections::HashMap<String, String>>,
    ) -> (JsonValue, u16) {
        let max_attempts = self.config.max_attempts.max(1);
        let retry_wait = Duration::from_secs(self.config.retry_wait_secs);
        let mut attempt = 0;
        while attempt < max_attempts {
            let Some(client) = self.get_client() else {
                return failure_payload(500, "No client is available, please try again later.");
            };
            let guard = client.lock_calls().await;
            let outcome = client.get(path, params).await;
            drop(guard);
            match outcome {
                Ok((payload, status)) => return (payload, status),
                Err(SekaiError::UpgradeRequired) => {
                    warn!("{} server upgrade required, re-parsing...", self.region);
                    if let Err(e) = self.parse_version().await {
                        return failure_payload(500, &format!("Failed to parse version: {}", e));
                    }
                }
                Err(SekaiError::SessionExpired) | Err(SekaiError::CookieExpired) => {
                    warn!("{} session rejected, re-parsing cookies...", self.region);
                    if let Err(e) = self.parse_cookies().await {
                        return failure_payload(500, &format!("Failed to parse cookies: {}", e));
                    }
                }
                Err(SekaiError::UnderMaintenance) => {
                    warn!("{} server is under maintenance", self.region);
                    return failure_payload(
                        503,
                        &format!("{} game server is under maintenance.", region_upper(self.region)),
                    );
                }
                Err(e) => {
                    warn!("{} API call failed: {}", self.region, e);
                    return failure_payload(500, &e.to_string());
                }
            }
            attempt += 1;
            tokio::time::sleep(retry_wait).await;
        }
        failure_payload(500, "Max retry attempts reached")
    }

    /// Fetches a photo from the region-appropriate image endpoint.
    pub async fn get_cp_mysekai_image(&self, path: &str) -> Result<Vec<u8>> {
        let client = self.get_client().ok_or(SekaiError::NoClientAvailable)?;
        client.get_cp_mysekai_image(path).await
    }

    pub async fn get_nuverse_mysekai_image(&self, user_id: &str, index: &str) -> Result<Vec<u8>> {
        let client = self.get_client().ok_or(SekaiError::NoClientAvailable)?;
        client.get_nuverse_mysekai_image(user_id, index).await
    }

    /// Closes every client.
    pub fn shutdown(&self) {
        for client in &self.clients {
            client.close();
        }
        info!("{} client manager shut down", self.region);
    }

    /// Reads every `*.json` file under the account directory (recursively)
    /// and parses each as one account or an array of accounts. Unreadable
    /// files and malformed records are logged and skipped.
    fn parse_accounts(&self) -> Result<Vec<Account>> {
        let mut accounts = Vec::new();
        let root = Path::new(&self.config.account_dir);
        if !root.exists() {
            return Ok(accounts);
        }
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let entries = std::fs::read_dir(&dir).map_err(|e| {
                SekaiError::parse(format!("failed to read {}: {}", dir.display(), e))
            })?;
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let data = match std::fs::read(&path) {
                    Ok(d) => d,
                    Err(e) => {
                        warn!("failed to read {}: {}", path.display(), e);
                        continue;
                    }
                };
                let value: JsonValue = match serde_json::from_slice(&data) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("failed to decode {}: {}", path.display(), e);
                        continue;
                    }
                };
                match value {
                    JsonValue::Array(items) => {
                        for (idx, item) in items.into_iter().enumerate() {
                            if let Some(account) = self.parse_account_value(item, &path, Some(idx))
                            {
                                accounts.push(account);
                            }
                        }
                    }
                    JsonValue::Object(_) => {
                        if let Some(account) = self.parse_account_value(value, &path, None) {
                            accounts.push(account);
                        }
                    }
                    other => {
                        warn!(
                            "unexpected account data in {}: {}",
                            path.display(),
                            other
                        );
                    }
                }
            }
        }
        Ok(accounts)
    }

    fn parse_account_value(
        &self,
        value: JsonValue,
        path: &Path,
        idx: Option<usize>,
    ) -> Option<Account> {
        let label = match idx {
            Some(i) => format!("{}[{}]", path.display(), i),
            None => path.display().to_string(),
        };
        let account = if self.region.is_cp_server() {
            serde_json::from_value::<CpAccount>(value).map(Account::Cp)
        } else {
            serde_json::from_value::<NuverseAccount>(value).map(Account::Nuverse)
        };
        match account {
            Ok(account) => match account.validate() {
                Ok(()) => Some(account),
                Err(e) => {
                    warn!("{}: {}", label, e);
                    None
                }
            },
            Err(e) => {
                warn!("{}: account parse error: {}", label, e);
                None
            }
        }
    }
}

fn failure_payload(status: u16, message: &str) -> (JsonValue, u16) {
    (
        json!({
            "result": "failed",
            "status": status,
            "message": message,
        }),
        status,
    )
}

fn region_upper(region: ServerRegion) -> String {
    region.as_str().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cp_manager(account_dir: &str) -> SekaiClientManager {
        let config = ServerConfig {
            enabled: true,
            account_dir: account_dir.to_string(),
            aes_key_hex: "00112233445566778899aabbccddeeff".to_string(),
            aes_iv_hex: "ffeeddccbbaa99887766554433221100".to_string(),
            ..Default::default()
        };
        SekaiClientManager::new(ServerRegion::Jp, config, None, None)
    }

    #[test]
    fn test_parse_accounts_recursive_and_mixed_shapes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("single.json"),
            r#"{"userId": 1, "credential": "a"}"#,
        )
        .unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(
            nested.join("many.json"),
            r#"[{"userId": 2, "credential": "b"}, {"userId": 3, "credential": "c"}]"#,
        )
        .unwrap();
        // Malformed file and a record with no secret: both skipped.
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        std::fs::write(dir.path().join("empty.json"), r#"{"userId": 4}"#).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let manager = cp_manager(dir.path().to_str().unwrap());
        let mut accounts = manager.parse_accounts().unwrap();
        accounts.sort_by(|a, b| a.user_id().cmp(b.user_id()));
        let ids: Vec<_> = accounts.iter().map(|a| a.user_id().to_string()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_parse_accounts_missing_dir_is_empty() {
        let manager = cp_manager("/nonexistent/accounts");
        assert!(manager.parse_accounts().unwrap().is_empty());
    }

    #[test]
    fn test_get_client_on_empty_pool() {
        let manager = cp_manager("/nonexistent/accounts");
        assert!(manager.get_client().is_none());
    }
}
