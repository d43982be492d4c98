//! Token record: the provider's JSON shape, persisted verbatim.
//!
//! Only three keys carry meaning here: `access_token`, `refresh_token`, and
//! `expires_at` (absolute Unix seconds). Everything else the provider sends
//! (`token_type`, `scope`, `id_token`, ...) is preserved through a flattened
//! map so a stored record round-trips byte-for-byte in content.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Grace window between the validity check and the moment the token is
/// actually used, guarding against a token expiring mid-request.
pub const DEFAULT_EXPIRY_SKEW_SECS: i64 = 30;

/// An OAuth2 token record as returned by the provider.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// Bearer credential. A record without one does not deserialize and is
    /// treated as absent by the stores.
    pub access_token: String,

    /// Present when the provider allows refreshing without re-authorization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Absolute expiry as Unix seconds. Absent means the provider reported
    /// no expiry; such tokens are treated as non-expiring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,

    /// Remaining provider fields, carried verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Token {
    /// Whether the token can be used right now, with the default skew.
    pub fn is_valid(&self) -> bool {
        self.is_valid_with_skew(DEFAULT_EXPIRY_SKEW_SECS)
    }

    /// Whether the token can be used right now, requiring at least
    /// `skew_secs` of remaining lifetime when an expiry is known.
    pub fn is_valid_with_skew(&self, skew_secs: i64) -> bool {
        if self.access_token.is_empty() {
            return false;
        }
        match self.expires_at {
            Some(expires_at) => Utc::now().timestamp() + skew_secs < expires_at,
            None => true,
        }
    }

    /// Seconds until expiry (negative if already expired), or `None` when
    /// the provider reported no expiry.
    pub fn expires_in_secs(&self) -> Option<i64> {
        self.expires_at.map(|e| e - Utc::now().timestamp())
    }
}

// Credentials stay out of logs and panic messages.
impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"***")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "***"))
            .field("expires_at", &self.expires_at)
            .field("extra_keys", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(expires_at: Option<i64>) -> Token {
        Token {
            access_token: "at-123".into(),
            refresh_token: Some("rt-456".into()),
            expires_at,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_valid_with_future_expiry() {
        let t = token(Some(Utc::now().timestamp() + 3600));
        assert!(t.is_valid());
    }

    #[test]
    fn test_invalid_with_past_expiry() {
        let t = token(Some(Utc::now().timestamp() - 60));
        assert!(!t.is_valid());
    }

    #[test]
    fn test_invalid_inside_skew_window() {
        // Expires in 10s, skew is 30s: too close to use.
        let t = token(Some(Utc::now().timestamp() + 10));
        assert!(!t.is_valid());
        assert!(t.is_valid_with_skew(0));
    }

    #[test]
    fn test_no_expiry_is_treated_as_non_expiring() {
        let t = token(None);
        assert!(t.is_valid());
    }

    #[test]
    fn test_empty_access_token_is_invalid() {
        let mut t = token(None);
        t.access_token = String::new();
        assert!(!t.is_valid());
    }

    #[test]
    fn test_expires_in_secs_tracks_expiry() {
        let t = token(Some(Utc::now().timestamp() + 3600));
        let remaining = t.expires_in_secs().unwrap();
        assert!((3595..=3600).contains(&remaining));

        let t = token(Some(Utc::now().timestamp() - 60));
        assert!(t.expires_in_secs().unwrap() < 0);

        assert_eq!(token(None).expires_in_secs(), None);
    }

    #[test]
    fn test_provider_fields_preserved_verbatim() {
        let raw = serde_json::json!({
            "access_token": "at-123",
            "refresh_token": "rt-456",
            "expires_at": 1_900_000_000_i64,
            "token_type": "Bearer",
            "scope": "section:finance:read"
        });
        let t: Token = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(t.extra.get("token_type"), Some(&Value::from("Bearer")));
        assert_eq!(serde_json::to_value(&t).unwrap(), raw);
    }

    #[test]
    fn test_absent_optionals_not_reemitted() {
        let t: Token = serde_json::from_value(serde_json::json!({
            "access_token": "at-123"
        }))
        .unwrap();
        let out = serde_json::to_value(&t).unwrap();
        assert_eq!(out, serde_json::json!({ "access_token": "at-123" }));
    }

    #[test]
    fn test_record_without_access_token_fails_to_parse() {
        let res: std::result::Result<Token, _> =
            serde_json::from_value(serde_json::json!({ "refresh_token": "rt-456" }));
        assert!(res.is_err());
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let rendered = format!("{:?}", token(Some(0)));
        assert!(!rendered.contains("at-123"));
        assert!(!rendered.contains("rt-456"));
    }
}
