//! Account variants and their login payloads.
//!
//! Two account kinds exist, selected by region: CP servers (jp/en) log in
//! with a credential via PUT to a per-user endpoint, Nuverse servers
//! (tw/kr/cn) log in with an access token via POST, and the server assigns
//! the user id on first login. The variants are a closed enum; everything
//! variant-specific is an exhaustive match.

use sekai_core::{Result, SekaiError};
use serde::{Deserialize, Deserializer, Serialize};

fn null_to_empty_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.unwrap_or_default())
}

/// Account files store user ids as either JSON numbers or strings.
pub fn null_or_number_to_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Number(i64),
        Null,
    }
    match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::String(s) => Ok(s),
        StringOrNumber::Number(n) => Ok(n.to_string()),
        StringOrNumber::Null => Ok(String::new()),
    }
}

/// Credential-holding account for the CP servers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpAccount {
    #[serde(
        rename = "userId",
        default,
        deserialize_with = "null_or_number_to_string"
    )]
    pub user_id: String,
    #[serde(
        rename = "deviceId",
        default,
        deserialize_with = "null_to_empty_string"
    )]
    pub device_id: String,
    #[serde(default, deserialize_with = "null_to_empty_string")]
    pub credential: String,
}

/// Token-holding account for the Nuverse servers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NuverseAccount {
    #[serde(
        alias = "userId",
        alias = "userID",
        default,
        deserialize_with = "null_or_number_to_string"
    )]
    pub user_id: String,
    #[serde(
        rename = "deviceId",
        default,
        deserialize_with = "null_to_empty_string"
    )]
    pub device_id: String,
    #[serde(
        rename = "accessToken",
        default,
        deserialize_with = "null_to_empty_string"
    )]
    pub access_token: String,
}

/// A parsed account, one of the two login flows.
#[derive(Debug, Clone)]
pub enum Account {
    Cp(CpAccount),
    Nuverse(NuverseAccount),
}

impl Account {
    pub fn user_id(&self) -> &str {
        match self {
            Account::Cp(a) => &a.user_id,
            Account::Nuverse(a) => &a.user_id,
        }
    }

    /// Overwrites the user id. Only ever done for Nuverse accounts after
    /// the server assigns one on first login.
    pub fn set_user_id(&mut self, user_id: String) {
        match self {
            Account::Cp(a) => a.user_id = user_id,
            Account::Nuverse(a) => a.user_id = user_id,
        }
    }

    pub fn device_id(&self) -> &str {
        match self {
            Account::Cp(a) => &a.device_id,
            Account::Nuverse(a) => &a.device_id,
        }
    }

    /// The credential or access token, depending on the variant.
    pub fn secret(&self) -> &str {
        match self {
            Account::Cp(a) => &a.credential,
            Account::Nuverse(a) => &a.access_token,
        }
    }

    /// Rejects accounts whose secret is missing.
    pub fn validate(&self) -> Result<()> {
        if self.secret().is_empty() {
            return Err(SekaiError::parse("account secret is empty"));
        }
        Ok(())
    }

    /// Serializes the variant-appropriate login payload to msgpack.
    ///
    /// The device id is omitted entirely when absent; the Nuverse payload
    /// carries the user id as an integer.
    pub fn dump(&self) -> Result<Vec<u8>> {
        match self {
            Account::Cp(a) => {
                #[derive(Serialize)]
                struct LoginPayload<'a> {
                    #[serde(rename = "deviceId", skip_serializing_if = "Option::is_none")]
                    device_id: Option<&'a str>,
                    credential: &'a str,
                    #[serde(rename = "authTriggerType")]
                    auth_trigger_type: &'static str,
                }
                let payload = LoginPayload {
                    device_id: if a.device_id.is_empty() {
                        None
                    } else {
                        Some(&a.device_id)
                    },
                    credential: &a.credential,
                    auth_trigger_type: "normal",
                };
                rmp_serde::to_vec_named(&payload).map_err(|e| SekaiError::parse(e.to_string()))
            }
            Account::Nuverse(a) => {
                #[derive(Serialize)]
                struct LoginPayload<'a> {
                    #[serde(rename = "deviceId", skip_serializing_if = "Option::is_none")]
                    device_id: Option<&'a str>,
                    #[serde(rename = "accessToken")]
                    access_token: &'a str,
                    #[serde(rename = "userID")]
                    user_id: i64,
                }
                // A fresh account without a server-assigned id logs in as 0.
                let user_id = if a.user_id.is_empty() {
                    0
                } else {
                    a.user_id.parse().map_err(|_| {
                        SekaiError::parse(format!("invalid user_id: {}", a.user_id))
                    })?
                };
                let payload = LoginPayload {
                    device_id: if a.device_id.is_empty() {
                        None
                    } else {
                        Some(&a.device_id)
                    },
                    access_token: &a.access_token,
                    user_id,
                };
                rmp_serde::to_vec_named(&payload).map_err(|e| SekaiError::parse(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cp_account_numeric_user_id() {
        let account: CpAccount =
            serde_json::from_value(json!({"userId": 12345, "credential": "secret"})).unwrap();
        assert_eq!(account.user_id, "12345");
        assert_eq!(account.device_id, "");
    }

    #[test]
    fn test_nuverse_account_aliases() {
        let a: NuverseAccount =
            serde_json::from_value(json!({"userID": 7, "accessToken": "tok"})).unwrap();
        let b: NuverseAccount =
            serde_json::from_value(json!({"userId": "7", "accessToken": "tok"})).unwrap();
        assert_eq!(a.user_id, b.user_id);
    }

    #[test]
    fn test_null_fields_tolerated() {
        let account: CpAccount = serde_json::from_value(
            json!({"userId": null, "deviceId": null, "credential": "secret"}),
        )
        .unwrap();
        assert_eq!(account.user_id, "");
        assert_eq!(account.device_id, "");
    }

    #[test]
    fn test_validate_rejects_empty_secret() {
        let account = Account::Cp(CpAccount {
            user_id: "1".to_string(),
            device_id: String::new(),
            credential: String::new(),
        });
        assert!(account.validate().is_err());
    }

    #[test]
    fn test_cp_dump_omits_empty_device_id() {
        let account = Account::Cp(CpAccount {
            user_id: "1".to_string(),
            device_id: String::new(),
            credential: "secret".to_string(),
        });
        let bytes = account.dump().unwrap();
        let decoded: serde_json::Value = rmp_serde::from_slice(&bytes).unwrap();
        assert!(decoded.get("deviceId").is_none());
        assert_eq!(decoded["credential"], "secret");
        assert_eq!(decoded["authTriggerType"], "normal");
    }

    #[test]
    fn test_nuverse_dump_carries_integer_user_id() {
        let account = Account::Nuverse(NuverseAccount {
            user_id: "987".to_string(),
            device_id: "device-1".to_string(),
            access_token: "tok".to_string(),
        });
        let bytes = account.dump().unwrap();
        let decoded: serde_json::Value = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded["userID"], 987);
        assert_eq!(decoded["deviceId"], "device-1");
        assert_eq!(decoded["accessToken"], "tok");
    }

    #[test]
    fn test_nuverse_dump_without_assigned_id() {
        let account = Account::Nuverse(NuverseAccount {
            user_id: String::new(),
            device_id: String::new(),
            access_token: "tok".to_string(),
        });
        let bytes = account.dump().unwrap();
        let decoded: serde_json::Value = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded["userID"], 0);
    }
}
