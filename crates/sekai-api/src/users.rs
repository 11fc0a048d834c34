//! File-backed access control for the facade.
//!
//! Downstream consumers authenticate with a bearer token; each token maps
//! to a user with a set of region grants. The store is a JSON array loaded
//! once at startup.

use std::collections::HashMap;
use std::path::Path;

use sekai_core::{Result, SekaiError};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub token: String,
    /// Region names this user may proxy through ("jp", "en", ...).
    #[serde(default)]
    pub servers: Vec<String>,
}

/// The authenticated caller, attached to the request as an extension.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
}

pub struct UserStore {
    by_token: HashMap<String, UserRecord>,
}

impl UserStore {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| {
            SekaiError::config(format!(
                "failed to read user store {}: {}",
                path.display(),
                e
            ))
        })?;
        let records: Vec<UserRecord> = serde_json::from_slice(&data)
            .map_err(|e| SekaiError::config(format!("malformed user store: {}", e)))?;
        let by_token = records
            .into_iter()
            .filter(|r| !r.token.is_empty())
            .map(|r| (r.token.clone(), r))
            .collect();
        Ok(Self { by_token })
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }

    /// Token lookup plus per-server grant check.
    ///
    /// `Ok(None)` means the token is unknown; the error case means the
    /// token is valid but the server is not granted.
    pub fn authorize(&self, token: &str, server: &str) -> Result<Option<AuthUser>> {
        let Some(record) = self.by_token.get(token) else {
            return Ok(None);
        };
        if record.servers.iter().any(|s| s.eq_ignore_ascii_case(server)) {
            Ok(Some(AuthUser {
                id: record.id.clone(),
            }))
        } else {
            Err(SekaiError::config(format!(
                "user {} not authorized for server {}",
                record.id, server
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> UserStore {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(
            &path,
            r#"[
                {"id": "alpha", "token": "token-a", "servers": ["jp", "en"]},
                {"id": "beta", "token": "token-b", "servers": ["tw"]}
            ]"#,
        )
        .unwrap();
        UserStore::load(&path).unwrap()
    }

    #[test]
    fn test_authorize_known_token_and_server() {
        let store = store();
        let user = store.authorize("token-a", "jp").unwrap().unwrap();
        assert_eq!(user.id, "alpha");
        // Region match is case-insensitive like the URL segment.
        assert!(store.authorize("token-a", "EN").unwrap().is_some());
    }

    #[test]
    fn test_authorize_unknown_token() {
        assert!(store().authorize("nope", "jp").unwrap().is_none());
    }

    #[test]
    fn test_authorize_wrong_server() {
        assert!(store().authorize("token-b", "jp").is_err());
    }

    #[test]
    fn test_malformed_store_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(&path, "{broken").unwrap();
        assert!(matches!(
            UserStore::load(&path),
            Err(SekaiError::Config(_))
        ));
    }
}
