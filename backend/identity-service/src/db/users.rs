/// User database operations for identity-service
use crate::error::{IdentityError, Result};
use crate::models::User;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

/// Insert a user inside the caller's transaction.
///
/// A duplicate name maps to `UsernameAlreadyExists`.
pub async fn insert_user(
    tx: &mut Transaction<'static, Postgres>,
    name: &str,
    email: &str,
    password_hash: &str,
) -> Result<User> {
    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (id, name, email, password_hash, created_at)
        VALUES ($1, $2, $3, $4, CURRENT_TIMESTAMP)
        RETURNING id, name, email, password_hash, created_at, last_login_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(email)
    .bind(password_hash)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                return IdentityError::UsernameAlreadyExists;
            }
        }
        e.into()
    })?;

    Ok(user)
}

/// Find user by name
pub async fn find_by_name(pool: &PgPool, name: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, name, email, password_hash, created_at, last_login_at FROM users WHERE name = $1",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(user)
}
