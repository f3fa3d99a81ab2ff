//! User administration
//!
//! Registration, sessions and the login surface belong to the HTTP
//! collaborator; what lives here is the users table and the command-line
//! password reset. Passwords are stored as salted SHA-256 digests.

use postwatch_common::db::Migration;
use postwatch_common::{Error, Result};
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tracing::info;

pub const MIGRATIONS: &[Migration] = &[Migration {
    name: "3_users",
    up: &[
        r#"
        CREATE TABLE users (
            id INTEGER PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            salt TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    ],
    down: &["DROP TABLE users"],
}];

pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_salt() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Reset the password of an existing user. Unknown users are an error:
/// account creation belongs to the registration flow.
pub async fn reset_password(pool: &SqlitePool, email: &str, password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(Error::InvalidInput("password must not be empty".into()));
    }

    let user_id: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await?;

    let Some(user_id) = user_id else {
        return Err(Error::NotFound(format!("unknown user {}", email)));
    };

    let salt = generate_salt();
    let hash = hash_password(&salt, password);

    sqlx::query("UPDATE users SET password_hash = ?, salt = ? WHERE id = ?")
        .bind(&hash)
        .bind(&salt)
        .bind(user_id)
        .execute(pool)
        .await?;

    info!(email, "password reset");
    Ok(())
}
