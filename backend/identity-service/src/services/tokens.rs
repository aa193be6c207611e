/// Access and ID token issuance over the credential engine
use crate::config::JwtSettings;
use crate::error::{IdentityError, Result};
use crate::models::User;
use credential_engine::{Algorithm, Claims, CredentialEngine, Key};
use serde_json::{json, Map, Value};
use std::sync::Arc;

pub const ACCESS_TOKEN_SET: &str = "access_token";
pub const ID_TOKEN_SET: &str = "id_token";

const TOKEN_USE_CLAIM: &str = "token_use";

/// Issues access tokens and ID tokens from separate key sets.
#[derive(Clone)]
pub struct TokenService {
    engine: Arc<CredentialEngine>,
    access_algorithm: Algorithm,
    id_algorithm: Algorithm,
}

impl TokenService {
    pub fn new(engine: Arc<CredentialEngine>, settings: &JwtSettings) -> Self {
        Self {
            engine,
            access_algorithm: settings.access_token_algorithm,
            id_algorithm: settings.id_token_algorithm,
        }
    }

    pub async fn issue_access_token(&self, user: &User) -> Result<String> {
        let mut ext = Map::new();
        ext.insert(TOKEN_USE_CLAIM.to_string(), json!("access"));

        let token = self
            .engine
            .sign(
                &user.id.to_string(),
                Some(ext),
                ACCESS_TOKEN_SET,
                self.access_algorithm,
            )
            .await?;
        Ok(token)
    }

    /// ID token carrying the user's name and email.
    pub async fn issue_id_token(&self, user: &User) -> Result<String> {
        let mut ext = Map::new();
        ext.insert(TOKEN_USE_CLAIM.to_string(), json!("id"));
        ext.insert("name".to_string(), json!(user.name));
        ext.insert("email".to_string(), json!(user.email));

        let token = self
            .engine
            .sign(&user.id.to_string(), Some(ext), ID_TOKEN_SET, self.id_algorithm)
            .await?;
        Ok(token)
    }

    /// Verify any token this service issued.
    pub async fn verify(&self, token: &str) -> Result<Claims> {
        Ok(self.engine.verify(token).await?)
    }

    /// Verify a token and require it to be an access token.
    pub async fn verify_access_token(&self, token: &str) -> Result<Claims> {
        let claims = self.verify(token).await?;
        match claims.ext_claim(TOKEN_USE_CLAIM) {
            Some(Value::String(token_use)) if token_use == "access" => Ok(claims),
            _ => {
                tracing::debug!(jti = %claims.jti, "Token is not an access token");
                Err(IdentityError::Unauthorized)
            }
        }
    }

    pub async fn revoke(&self, token: &str) -> Result<()> {
        Ok(self.engine.revoke(token).await?)
    }

    /// Public JWK for `kid`, for a JWKS endpoint.
    pub async fn public_key(&self, kid: &str) -> Result<Key> {
        Ok(self.engine.get_public_key(kid).await?)
    }
}
