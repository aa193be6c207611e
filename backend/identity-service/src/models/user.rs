use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// User model - core identity entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// Input for registration. The password is hashed by the caller.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

const MAX_NAME_CHARS: usize = 32;

impl NewUser {
    /// Trimmed name; letters (any script) and digits, 1 to 32 characters.
    pub fn normalized_name(&self) -> Option<String> {
        let name = self.name.trim();
        let count = name.chars().count();
        if count == 0 || count > MAX_NAME_CHARS || !name.chars().all(char::is_alphanumeric) {
            return None;
        }
        Some(name.to_string())
    }
}
