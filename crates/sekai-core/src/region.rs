//! Server regions and the upstream status-code taxonomy.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SekaiError;

/// One of the game's regional deployments.
///
/// Jp and En are operated by the original publisher ("CP" servers) and use
/// the credential login flow; Tw, Kr and Cn are operated by Nuverse and use
/// the access-token flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerRegion {
    Jp,
    En,
    Tw,
    Kr,
    Cn,
}

impl ServerRegion {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerRegion::Jp => "jp",
            ServerRegion::En => "en",
            ServerRegion::Tw => "tw",
            ServerRegion::Kr => "kr",
            ServerRegion::Cn => "cn",
        }
    }

    /// True for the regions using the credential (CP) login flow.
    pub fn is_cp_server(&self) -> bool {
        matches!(self, ServerRegion::Jp | ServerRegion::En)
    }

    pub fn all() -> [ServerRegion; 5] {
        [
            ServerRegion::Jp,
            ServerRegion::En,
            ServerRegion::Tw,
            ServerRegion::Kr,
            ServerRegion::Cn,
        ]
    }
}

impl fmt::Display for ServerRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerRegion {
    type Err = SekaiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "jp" => Ok(ServerRegion::Jp),
            "en" => Ok(ServerRegion::En),
            "tw" => Ok(ServerRegion::Tw),
            "kr" => Ok(ServerRegion::Kr),
            "cn" => Ok(ServerRegion::Cn),
            other => Err(SekaiError::InvalidRegion(other.to_string())),
        }
    }
}

/// The fixed HTTP status taxonomy the game API answers with.
///
/// Anything outside this set is an unknown client error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiStatus {
    Ok,
    ClientError,
    SessionError,
    NotFound,
    Conflict,
    GameUpgrade,
    ServerError,
    UnderMaintenance,
}

impl ApiStatus {
    pub fn from_code(code: u16) -> Result<Self, SekaiError> {
        match code {
            200 => Ok(ApiStatus::Ok),
            400 => Ok(ApiStatus::ClientError),
            403 => Ok(ApiStatus::SessionError),
            404 => Ok(ApiStatus::NotFound),
            409 => Ok(ApiStatus::Conflict),
            426 => Ok(ApiStatus::GameUpgrade),
            500 => Ok(ApiStatus::ServerError),
            503 => Ok(ApiStatus::UnderMaintenance),
            other => Err(SekaiError::InvalidStatus(other)),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            ApiStatus::Ok => 200,
            ApiStatus::ClientError => 400,
            ApiStatus::SessionError => 403,
            ApiStatus::NotFound => 404,
            ApiStatus::Conflict => 409,
            ApiStatus::GameUpgrade => 426,
            ApiStatus::ServerError => 500,
            ApiStatus::UnderMaintenance => 503,
        }
    }

    /// True for statuses whose body is still a decodable envelope.
    pub fn carries_payload(&self) -> bool {
        matches!(
            self,
            ApiStatus::Ok | ApiStatus::ClientError | ApiStatus::NotFound | ApiStatus::Conflict
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_roundtrip() {
        for region in ServerRegion::all() {
            assert_eq!(region.as_str().parse::<ServerRegion>().unwrap(), region);
        }
    }

    #[test]
    fn test_region_rejects_unknown() {
        assert!("us".parse::<ServerRegion>().is_err());
    }

    #[test]
    fn test_cp_servers() {
        assert!(ServerRegion::Jp.is_cp_server());
        assert!(ServerRegion::En.is_cp_server());
        assert!(!ServerRegion::Tw.is_cp_server());
        assert!(!ServerRegion::Kr.is_cp_server());
        assert!(!ServerRegion::Cn.is_cp_server());
    }

    #[test]
    fn test_status_taxonomy() {
        assert_eq!(ApiStatus::from_code(200).unwrap(), ApiStatus::Ok);
        assert_eq!(ApiStatus::from_code(426).unwrap(), ApiStatus::GameUpgrade);
        assert_eq!(
            ApiStatus::from_code(503).unwrap(),
            ApiStatus::UnderMaintenance
        );
        assert!(ApiStatus::from_code(418).is_err());
    }

    #[test]
    fn test_payload_statuses() {
        assert!(ApiStatus::Ok.carries_payload());
        assert!(ApiStatus::Conflict.carries_payload());
        assert!(!ApiStatus::SessionError.carries_payload());
        assert!(!ApiStatus::UnderMaintenance.carries_payload());
    }
}
