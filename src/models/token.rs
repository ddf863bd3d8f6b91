use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::keys::DigestAlgorithm;

pub const DEFAULT_API_LIMIT: i64 = 500;
pub const DEFAULT_WINDOW_SECONDS: i64 = 86_400;
/// Longest accepted quota window (ten years).
pub const MAX_WINDOW_SECONDS: i64 = 10 * 365 * 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Active,
    Inactive,
    Suspended,
}

impl TokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Active => "active",
            TokenStatus::Inactive => "inactive",
            TokenStatus::Suspended => "suspended",
        }
    }

    /// Unknown values never authenticate.
    pub fn parse(s: &str) -> Self {
        match s {
            "active" => TokenStatus::Active,
            "suspended" => TokenStatus::Suspended,
            _ => TokenStatus::Inactive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Limited,
    Unlimited,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Limited => "limited",
            TokenType::Unlimited => "unlimited",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "unlimited" => TokenType::Unlimited,
            _ => TokenType::Limited,
        }
    }
}

/// The persisted counter half of a token: the only fields that change after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCounter {
    pub api_count: i64,
    /// Unix seconds. `0` means no window has been opened yet.
    pub window_start: i64,
}

/// Identity and quota state for one API credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub id: Uuid,
    pub user_id: String,
    pub status: TokenStatus,
    pub token_type: TokenType,
    pub access_token: String,
    pub public_key: String,
    #[serde(skip_serializing)]
    pub private_key: String,
    pub api_limit: i64,
    pub api_count: i64,
    pub window_start: i64,
    pub window_seconds: i64,
    /// Signature digest chosen when the key pair was provisioned.
    pub digest: DigestAlgorithm,
    pub created_at: DateTime<Utc>,
}

impl TokenRecord {
    pub fn counter(&self) -> WindowCounter {
        WindowCounter {
            api_count: self.api_count,
            window_start: self.window_start,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == TokenStatus::Active
    }
}

/// Parameters for provisioning a new token. Keys are filled in by the provisioner.
#[derive(Debug, Clone)]
pub struct NewToken {
    pub user_id: String,
    pub token_type: TokenType,
    pub api_limit: i64,
    pub window_seconds: i64,
    /// Caller-chosen access token; a UUID is generated when absent.
    pub access_token: Option<String>,
}

impl NewToken {
    pub fn limited(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            token_type: TokenType::Limited,
            api_limit: DEFAULT_API_LIMIT,
            window_seconds: DEFAULT_WINDOW_SECONDS,
            access_token: None,
        }
    }

    pub fn unlimited(user_id: impl Into<String>) -> Self {
        Self {
            token_type: TokenType::Unlimited,
            ..Self::limited(user_id)
        }
    }
}

/// Outcome of charging a token's quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaResult {
    pub limit: i64,
    pub remaining: i64,
    pub reset_seconds: i64,
    #[serde(rename = "type")]
    pub token_type: TokenType,
}

impl QuotaResult {
    /// Only limited tokens can run out.
    pub fn is_exceeded(&self) -> bool {
        self.token_type == TokenType::Limited && self.remaining < 0
    }

    /// Response headers advertising this quota. `type` is never exposed.
    pub fn headers(&self) -> [(&'static str, String); 3] {
        [
            ("x-rate-limit-limit", self.limit.to_string()),
            ("x-rate-limit-remaining", self.remaining.to_string()),
            ("x-rate-limit-reset", self.reset_seconds.to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_unknown_is_inactive() {
        assert_eq!(TokenStatus::parse("active"), TokenStatus::Active);
        assert_eq!(TokenStatus::parse("suspended"), TokenStatus::Suspended);
        assert_eq!(TokenStatus::parse("deleted"), TokenStatus::Inactive);
    }

    #[test]
    fn test_quota_exceeded_only_for_limited() {
        let limited = QuotaResult {
            limit: 10,
            remaining: -1,
            reset_seconds: 5,
            token_type: TokenType::Limited,
        };
        assert!(limited.is_exceeded());

        let unlimited = QuotaResult {
            token_type: TokenType::Unlimited,
            ..limited
        };
        assert!(!unlimited.is_exceeded());

        let at_zero = QuotaResult {
            remaining: 0,
            ..limited
        };
        assert!(!at_zero.is_exceeded());
    }

    #[test]
    fn test_quota_headers() {
        let q = QuotaResult {
            limit: 500,
            remaining: 12,
            reset_seconds: 3600,
            token_type: TokenType::Limited,
        };
        let headers = q.headers();
        assert_eq!(headers[0], ("x-rate-limit-limit", "500".to_string()));
        assert_eq!(headers[1], ("x-rate-limit-remaining", "12".to_string()));
        assert_eq!(headers[2], ("x-rate-limit-reset", "3600".to_string()));
    }

    #[test]
    fn test_private_key_not_serialized() {
        let record = TokenRecord {
            id: Uuid::new_v4(),
            user_id: "u1".into(),
            status: TokenStatus::Active,
            token_type: TokenType::Limited,
            access_token: "tok".into(),
            public_key: "PUB".into(),
            private_key: "SECRET".into(),
            api_limit: DEFAULT_API_LIMIT,
            api_count: 0,
            window_start: 0,
            window_seconds: DEFAULT_WINDOW_SECONDS,
            digest: DigestAlgorithm::Sha256,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("private_key").is_none());
        assert_eq!(json["token_type"], "limited");
        assert_eq!(json["digest"], "sha256");
    }
}
