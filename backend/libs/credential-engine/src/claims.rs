use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::engine::EngineConfig;

/// Registered claims plus the caller's extension map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Issuer
    pub iss: String,
    /// Subject (user ID)
    pub sub: String,
    /// Audience
    pub aud: Vec<String>,
    /// Expiration time (seconds since epoch)
    pub exp: i64,
    /// Issued at (seconds since epoch)
    pub iat: i64,
    /// Not before (seconds since epoch)
    pub nbf: i64,
    /// Unique token id, the revocation handle
    pub jti: String,
    /// Caller-supplied claims
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub ext: Map<String, Value>,
}

impl Claims {
    pub(crate) fn issue(config: &EngineConfig, user_id: &str, ext: Map<String, Value>) -> Self {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(config.token_ttl.as_secs()).unwrap_or(i64::MAX);

        Self {
            iss: config.issuer.clone(),
            sub: user_id.to_string(),
            aud: vec![config.audience.clone()],
            exp: now.saturating_add(ttl),
            iat: now,
            nbf: now,
            jti: Uuid::new_v4().to_string(),
            ext,
        }
    }

    pub fn ext_claim(&self, name: &str) -> Option<&Value> {
        self.ext.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_issue_sets_time_window() {
        let config = EngineConfig::default();
        let claims = Claims::issue(&config, "user-1", Map::new());

        assert_eq!(claims.iss, "IAMService.com");
        assert_eq!(claims.aud, vec!["IAMService".to_string()]);
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.iat, claims.nbf);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_fresh_jti_per_token() {
        let config = EngineConfig::default();
        let a = Claims::issue(&config, "user-1", Map::new());
        let b = Claims::issue(&config, "user-1", Map::new());
        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn test_empty_ext_is_omitted() {
        let claims = Claims::issue(&EngineConfig::default(), "user-1", Map::new());
        let json = serde_json::to_value(&claims).unwrap();
        assert!(json.get("ext").is_none());

        let parsed: Claims = serde_json::from_value(json).unwrap();
        assert!(parsed.ext.is_empty());
    }

    #[test]
    fn test_ext_claims_nested_under_ext() {
        let mut ext = Map::new();
        ext.insert("role".to_string(), json!("admin"));
        let claims = Claims::issue(&EngineConfig::default(), "user-1", ext);

        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["ext"]["role"], "admin");
        assert!(json.get("role").is_none());
        assert_eq!(claims.ext_claim("role"), Some(&json!("admin")));
    }
}
