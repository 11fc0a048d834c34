//! The per-account session client.
//!
//! One `SekaiClient` owns one authenticated session against a regional
//! deployment. Every body crosses the envelope codec, and each
//! protocol-level status (session expiry, cookie expiry, forced upgrade,
//! maintenance) gets the recovery action it demands.
//!
//! Callers are expected to serialize calls on one client through the lock
//! handed out by [`SekaiClient::lock_calls`]; the pool does this. Header
//! mutation is protected by its own internal lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use indexmap::IndexMap;
use reqwest::{Method, Response};
use sekai_core::config::ServerConfig;
use sekai_core::{ApiStatus, Result, SekaiError, ServerRegion};
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::account::Account;
use crate::crypto::SekaiCryptor;
use crate::helper::{CookieHelper, VersionHelper};

/// Fields returned by a successful login.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct LoginResponse {
    #[serde(rename = "sessionToken", default)]
    pub session_token: String,
    #[serde(rename = "dataVersion", default)]
    pub data_version: String,
    #[serde(rename = "assetVersion", default)]
    pub asset_version: String,
    #[serde(rename = "assetHash", default)]
    pub asset_hash: String,
    #[serde(rename = "suiteMasterSplitPath", default)]
    pub suite_master_split_path: Vec<String>,
    #[serde(rename = "cdnVersion", default)]
    pub cdn_version: i64,
    #[serde(rename = "userRegistration", default)]
    pub user_registration: Option<UserRegistration>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct UserRegistration {
    /// The server has been observed sending this as a string, an integer
    /// and a float, under two different capitalizations.
    #[serde(alias = "userId", alias = "userID", default)]
    pub user_id: JsonValue,
}

impl UserRegistration {
    /// Coerces the assigned user id into a string, rejecting junk.
    pub fn user_id_string(&self) -> Result<String> {
        match &self.user_id {
            JsonValue::String(s) if !s.is_empty() => Ok(s.clone()),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(i.to_string())
                } else if let Some(u) = n.as_u64() {
                    Ok(u.to_string())
                } else if let Some(f) = n.as_f64() {
                    Ok((f as i64).to_string())
                } else {
                    Err(SekaiError::InvalidLoginResponse(
                        "unrepresentable user id".to_string(),
                    ))
                }
            }
            other => Err(SekaiError::InvalidLoginResponse(format!(
                "unexpected user id value: {}",
                other
            ))),
        }
    }
}

/// One authenticated session per account.
pub struct SekaiClient {
    pub region: ServerRegion,
    pub config: Arc<ServerConfig>,
    pub cryptor: SekaiCryptor,
    account: Mutex<Account>,
    headers: Mutex<HashMap<String, String>>,
    http: reqwest::Client,
    cookie_helper: Option<Arc<CookieHelper>>,
    version_helper: Arc<VersionHelper>,
    proxy: Option<String>,
    call_lock: tokio::sync::Mutex<()>,
}

impl SekaiClient {
    pub fn new(
        region: ServerRegion,
        config: Arc<ServerConfig>,
        account: Account,
        cookie_helper: Option<Arc<CookieHelper>>,
        version_helper: Arc<VersionHelper>,
        proxy: Option<String>,
    ) -> Result<Self> {
        account.validate()?;
        let cryptor = SekaiCryptor::from_hex(&config.aes_key_hex, &config.aes_iv_hex)?;
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .pool_max_idle_per_host(20)
            .tcp_keepalive(Duration::from_secs(60));
        if let Some(ref proxy_url) = proxy
            && !proxy_url.is_empty()
        {
            builder = builder.proxy(
                reqwest::Proxy::all(proxy_url)
                    .map_err(|e| SekaiError::transport(format!("invalid proxy: {}", e)))?,
            );
        }
        let http = builder
            .build()
            .map_err(|e| SekaiError::transport(e.to_string()))?;
        let headers = config.headers.clone();
        Ok(Self {
            region,
            config,
            cryptor,
            account: Mutex::new(account),
            headers: Mutex::new(headers),
            http,
            cookie_helper,
            version_helper,
            proxy,
            call_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Acquires cookies (when the region wants them) and loads the local
    /// version metadata into the session headers. Both failures are fatal.
    pub async fn init(&self) -> Result<()> {
        self.parse_cookies().await?;
        self.parse_version().await?;
        Ok(())
    }

    /// The lock the pool holds while this client executes a call.
    pub async fn lock_calls(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.call_lock.lock().await
    }

    pub fn user_id(&self) -> String {
        self.account.lock().unwrap().user_id().to_string()
    }

    fn is_cp_account(&self) -> bool {
        matches!(*self.account.lock().unwrap(), Account::Cp(_))
    }

    /// Refreshes the CDN cookie header. No-op outside cookie regions.
    pub async fn parse_cookies(&self) -> Result<()> {
        if !self.config.require_cookies {
            return Ok(());
        }
        let Some(ref helper) = self.cookie_helper else {
            return Ok(());
        };
        let cookie = helper.get_cookies(self.proxy.as_deref()).await?;
        self.headers
            .lock()
            .unwrap()
            .insert("Cookie".to_string(), cookie);
        Ok(())
    }

    /// Reloads the version file and refreshes the version headers.
    pub async fn parse_version(&self) -> Result<()> {
        let version = self.version_helper.load().await?;
        let mut headers = self.headers.lock().unwrap();
        headers.insert("X-App-Version".to_string(), version.app_version);
        headers.insert("X-App-Hash".to_string(), version.app_hash);
        headers.insert("X-Data-Version".to_string(), version.data_version);
        headers.insert("X-Asset-Version".to_string(), version.asset_version);
        Ok(())
    }

    /// A copy of the current session headers.
    pub fn headers_snapshot(&self) -> HashMap<String, String> {
        self.headers.lock().unwrap().clone()
    }

    fn prepare_request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.request(method, url);
        {
            let headers = self.headers.lock().unwrap();
            for (k, v) in headers.iter() {
                req = req.header(k.as_str(), v.as_str());
            }
        }
        req.header("X-Request-Id", Uuid::new_v4().to_string())
    }

    /// Opportunistically picks up a rotated session token from a response.
    fn update_session_token(&self, resp: &Response) {
        if let Some(token) = resp.headers().get("x-session-token")
            && let Ok(token) = token.to_str()
        {
            debug!(
                "{} account #{} session token rotated",
                self.region, self.user_id()
            );
            self.headers
                .lock()
                .unwrap()
                .insert("X-Session-Token".to_string(), token.to_string());
        }
    }

    /// Authenticates this client's account against the region.
    ///
    /// On success the session token and both version strings are stored in
    /// the headers; a response missing any of them is a protocol violation.
    pub async fn login(&self) -> Result<LoginResponse> {
        let payload = self.account.lock().unwrap().dump()?;
        let encrypted = self.cryptor.pack_bytes(&payload)?;
        let user_id = self.user_id();
        let (url, method) = if self.is_cp_account() {
            (
                format!(
                    "{}/api/user/{}/auth?refreshUpdatedResources=False",
                    self.config.api_url, user_id
                ),
                Method::PUT,
            )
        } else {
            (format!("{}/api/user/auth", self.config.api_url), Method::POST)
        };
        info!("{} account #{} logging in...", self.region, user_id);
        let resp = self
            .prepare_request(method, &url)
            .timeout(Duration::from_secs(self.config.login_timeout_secs))
            .body(encrypted)
            .send()
            .await
            .map_err(map_transport_error)?;
        self.update_session_token(&resp);

        let status = resp.status().as_u16();
        let parsed = ApiStatus::from_code(status);
        match parsed {
            Ok(ApiStatus::GameUpgrade) => {
                warn!(
                    "{} app version might be outdated (current: {:?})",
                    self.region,
                    self.headers.lock().unwrap().get("X-App-Version")
                );
                Err(SekaiError::UpgradeRequired)
            }
            Ok(ApiStatus::UnderMaintenance) => Err(SekaiError::UnderMaintenance),
            Ok(ApiStatus::Ok) => {
                let body = resp.bytes().await.map_err(map_transport_error)?;
                let login: LoginResponse = self.cryptor.unpack(&body)?;
                if login.session_token.is_empty()
                    || login.data_version.is_empty()
                    || login.asset_version.is_empty()
                {
                    return Err(SekaiError::InvalidLoginResponse(
                        "missing required fields".to_string(),
                    ));
                }
                if !self.is_cp_account() {
                    let registration = login.user_registration.as_ref().ok_or_else(|| {
                        SekaiError::InvalidLoginResponse("missing user registration".to_string())
                    })?;
                    let assigned = registration.user_id_string()?;
                    if assigned != "0" {
                        self.account.lock().unwrap().set_user_id(assigned);
                    }
                }
                {
                    let mut headers = self.headers.lock().unwrap();
                    headers.insert("X-Session-Token".to_string(), login.session_token.clone());
                    headers.insert("X-Data-Version".to_string(), login.data_version.clone());
                    headers.insert("X-Asset-Version".to_string(), login.asset_version.clone());
                }
                info!("{} account #{} logged in", self.region, self.user_id());
                Ok(login)
            }
            _ => {
                let body = resp.bytes().await.unwrap_or_default();
                warn!(
                    "{} account #{} login failed with status {}",
                    self.region, user_id, status
                );
                Err(SekaiError::UnknownStatus {
                    status,
                    body: String::from_utf8_lossy(&body).to_string(),
                })
            }
        }
    }

    /// Generic authenticated call against the game API.
    ///
    /// Up to `max_attempts` attempts; transport errors and statuses >= 500
    /// are retried with a fixed pause between attempts (none after the
    /// last). Protocol statuses trigger their recovery action and abort:
    /// a session error re-logs-in but is still surfaced so the caller can
    /// retry the original request.
    pub async fn call(
        &self,
        path: &str,
        method: Method,
        body: Option<&JsonValue>,
        query: Option<&HashMap<String, String>>,
    ) -> Result<(JsonValue, u16)> {
        let user_id = self.user_id();
        let url = format!("{}/api{}", self.config.api_url, path).replace("{userId}", &user_id);
        info!("{} account #{} {} {}", self.region, user_id, method, path);

        let max_attempts = self.config.max_attempts.max(1);
        let retry_wait = Duration::from_secs(self.config.retry_wait_secs);
        let mut last_transient: Option<SekaiError> = None;

        for attempt in 1..=max_attempts {
            let mut req = self.prepare_request(method.clone(), &url);
            if let Some(params) = query {
                req = req.query(params);
            }
            if let Some(data) = body {
                req = req.body(self.cryptor.pack(data)?);
            }

            match req.send().await {
                Ok(resp) => {
                    self.update_session_token(&resp);
                    match self.handle_response(resp).await {
                        Ok(ok) => return Ok(ok),
                        Err(SekaiError::SessionExpired) => {
                            warn!(
                                "{} account #{} session expired, re-logging in...",
                                self.region, user_id
                            );
                            self.login().await?;
                            // The original request still failed; the caller
                            // owns the retry.
                            return Err(SekaiError::SessionExpired);
                        }
                        Err(SekaiError::CookieExpired) => {
                            warn!("{} cookies expired, re-parsing...", self.region);
                            self.parse_cookies().await?;
                            return Err(SekaiError::CookieExpired);
                        }
                        Err(SekaiError::UpgradeRequired) => {
                            warn!("{} app version might be outdated", self.region);
                            if self.region.is_cp_server() {
                                return Err(SekaiError::UpgradeRequired);
                            }
                            // Nuverse answers 426 when server-side data
                            // advanced; a fresh login picks it up.
                            self.login().await?;
                            return Err(SekaiError::SessionExpired);
                        }
                        Err(SekaiError::UnderMaintenance) => {
                            warn!("{} server is under maintenance", self.region);
                            return Err(SekaiError::UnderMaintenance);
                        }
                        Err(SekaiError::UnknownStatus { status, body }) if status >= 500 => {
                            warn!(
                                "{} account #{} got status {} (attempt {}), retrying...",
                                self.region, user_id, status, attempt
                            );
                            last_transient = Some(SekaiError::UnknownStatus { status, body });
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(e) if e.is_timeout() => {
                    warn!(
                        "{} account #{} request timed out (attempt {}), retrying...",
                        self.region, user_id, attempt
                    );
                    last_transient = Some(SekaiError::Timeout);
                }
                Err(e) => {
                    error!(
                        "{} account #{} request error (attempt {}): {}",
                        self.region, user_id, attempt, e
                    );
                    last_transient = Some(SekaiError::transport(e.to_string()));
                }
            }
            if attempt < max_attempts {
                tokio::time::sleep(retry_wait).await;
            }
        }
        Err(last_transient.unwrap_or(SekaiError::RetriesExhausted))
    }

    pub async fn get(
        &self,
        path: &str,
        query: Option<&HashMap<String, String>>,
    ) -> Result<(JsonValue, u16)> {
        self.call(path, Method::GET, None, query).await
    }

    pub async fn post(
        &self,
        path: &str,
        body: Option<&JsonValue>,
        query: Option<&HashMap<String, String>>,
    ) -> Result<(JsonValue, u16)> {
        self.call(path, Method::POST, body, query).await
    }

    /// Maps a raw upstream response to a decoded payload or the protocol
    /// error its status dictates.
    async fn handle_response(&self, resp: Response) -> Result<(JsonValue, u16)> {
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default()
            .to_lowercase();
        let body = resp.bytes().await.map_err(map_transport_error)?;

        let enveloped =
            content_type.contains("octet-stream") || content_type.contains("binary");
        let parsed = ApiStatus::from_code(status).map_err(|_| SekaiError::UnknownStatus {
            status,
            body: String::from_utf8_lossy(&body).to_string(),
        })?;

        if enveloped {
            match parsed {
                s if s.carries_payload() => Ok((self.cryptor.unpack_value(&body)?, status)),
                ApiStatus::SessionError => Err(SekaiError::SessionExpired),
                ApiStatus::GameUpgrade => Err(SekaiError::UpgradeRequired),
                ApiStatus::UnderMaintenance => Err(SekaiError::UnderMaintenance),
                _ => Err(SekaiError::UnknownStatus {
                    status,
                    body: String::from_utf8_lossy(&body).to_string(),
                }),
            }
        } else {
            match parsed {
                ApiStatus::UnderMaintenance => Err(SekaiError::UnderMaintenance),
                // A 403 with an XML body is the CDN rejecting the signed
                // cookies, not the game rejecting the session.
                ApiStatus::SessionError if content_type.contains("xml") => {
                    Err(SekaiError::CookieExpired)
                }
                _ => Err(SekaiError::UnknownStatus {
                    status,
                    body: String::from_utf8_lossy(&body).to_string(),
                }),
            }
        }
    }

    /// Fetches one Nuverse master-data snapshot and decodes it, preserving
    /// record order.
    pub async fn fetch_master_snapshot(
        &self,
        cdn_version: i64,
    ) -> Result<IndexMap<String, JsonValue>> {
        let url = format!("{}/master-data-{}.info", self.config.master_data_url, cdn_version);
        let host = reqwest::Url::parse(&url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string));
        let mut req = self.prepare_request(Method::GET, &url);
        if let Some(host) = host {
            req = req.header("Host", host);
        }
        let resp = req.send().await.map_err(map_transport_error)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SekaiError::UnknownStatus {
                status: status.as_u16(),
                body: format!("snapshot fetch failed for cdn version {}", cdn_version),
            });
        }
        let body = resp.bytes().await.map_err(map_transport_error)?;
        self.cryptor.unpack_ordered(&body)
    }

    /// Fetches a photo from the CP image endpoint.
    pub async fn get_cp_mysekai_image(&self, path: &str) -> Result<Vec<u8>> {
        let path = path.trim_start_matches('/');
        let url = format!("{}/image/mysekai-photo/{}", self.config.api_url, path);
        let resp = self
            .prepare_request(Method::GET, &url)
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = resp.status().as_u16();
        if status != 200 {
            return Err(SekaiError::UnknownStatus {
                status,
                body: format!("failed to fetch image from {}", url),
            });
        }
        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(map_transport_error)
    }

    /// Fetches a photo through the Nuverse API, which inlines it as base64.
    pub async fn get_nuverse_mysekai_image(&self, user_id: &str, index: &str) -> Result<Vec<u8>> {
        use base64::Engine;
        let path = format!("/user/{}/mysekai/photo/{}", user_id, index);
        let (data, _) = self.get(&path, None).await?;
        let thumbnail = data
            .get("thumbnail")
            .and_then(|v| v.as_str())
            .ok_or_else(|| SekaiError::parse("missing thumbnail in response"))?;
        base64::engine::general_purpose::STANDARD
            .decode(thumbnail)
            .map_err(|e| SekaiError::parse(format!("failed to decode thumbnail: {}", e)))
    }

    /// Releases the session. The HTTP pool drains on drop.
    pub fn close(&self) {
        debug!("{} account #{} client closed", self.region, self.user_id());
    }
}

fn map_transport_error(e: reqwest::Error) -> SekaiError {
    if e.is_timeout() {
        SekaiError::Timeout
    } else {
        SekaiError::transport(e.to_string())
    }
}
