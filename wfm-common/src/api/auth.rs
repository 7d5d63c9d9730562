//! API bearer-token authentication
//!
//! Each user has one API token. Only its SHA-256 digest is stored
//! (`users.api_token_hash`), so a database leak does not leak tokens. The
//! plain token is shown once, when it is issued.
//!
//! # Pure Functions
//!
//! Token generation and hashing have no HTTP framework dependencies; the
//! axum middleware in the service crate wraps [`authenticate`].

use sha2::{Digest, Sha256};

#[cfg(feature = "sqlx")]
use crate::db::models::User;
#[cfg(feature = "sqlx")]
use sqlx::SqlitePool;

/// Prefix that makes toolkit tokens recognisable in logs and secret scanners
pub const TOKEN_PREFIX: &str = "wfm_";

/// Random bytes per token
const TOKEN_BYTES: usize = 32;

/// Authentication error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiAuthError {
    /// No `Authorization` header, or not a bearer token
    MissingToken,

    /// Token does not belong to any user
    InvalidToken,

    /// Database error looking up the token
    DatabaseError(String),
}

impl std::fmt::Display for ApiAuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiAuthError::MissingToken => write!(f, "Missing bearer token"),
            ApiAuthError::InvalidToken => write!(f, "Invalid API token"),
            ApiAuthError::DatabaseError(err) => write!(f, "Database error: {}", err),
        }
    }
}

impl std::error::Error for ApiAuthError {}

/// Generate a fresh random API token
///
/// # Examples
///
/// ```
/// use wfm_common::api::auth::{generate_token, TOKEN_PREFIX};
///
/// let token = generate_token();
/// assert!(token.starts_with(TOKEN_PREFIX));
/// assert_eq!(token.len(), TOKEN_PREFIX.len() + 64);
/// ```
pub fn generate_token() -> String {
    use rand::RngCore;

    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{}{}", TOKEN_PREFIX, to_hex(&bytes))
}

/// SHA-256 hex digest of a token, as stored in the database
///
/// # Examples
///
/// ```
/// use wfm_common::api::auth::hash_token;
///
/// let hash = hash_token("wfm_example");
/// assert_eq!(hash.len(), 64);
/// assert_eq!(hash, hash_token("wfm_example"));
/// ```
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Extract the token from an `Authorization` header value
///
/// The scheme is matched case-insensitively; surrounding whitespace is ignored.
pub fn parse_bearer(header: &str) -> Result<&str, ApiAuthError> {
    let header = header.trim();
    let (scheme, token) = header.split_once(' ').ok_or(ApiAuthError::MissingToken)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(ApiAuthError::MissingToken);
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(ApiAuthError::MissingToken);
    }
    Ok(token)
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Resolve a bearer token to its user
#[cfg(feature = "sqlx")]
pub async fn authenticate(db: &SqlitePool, token: &str) -> Result<User, ApiAuthError> {
    let user: Option<User> = sqlx::query_as(
        "SELECT id, name, email, api_token_hash, created_at, updated_at \
         FROM users WHERE api_token_hash = ?",
    )
    .bind(hash_token(token))
    .fetch_optional(db)
    .await
    .map_err(|e| ApiAuthError::DatabaseError(e.to_string()))?;

    user.ok_or(ApiAuthError::InvalidToken)
}

/// Create a user and return it with its freshly issued token
#[cfg(feature = "sqlx")]
pub async fn create_user(db: &SqlitePool, name: &str, email: &str) -> crate::Result<(User, String)> {
    let name = name.trim();
    let email = email.trim().to_lowercase();
    if name.is_empty() {
        return Err(crate::Error::InvalidInput("name must not be empty".to_string()));
    }
    if !email.contains('@') {
        return Err(crate::Error::InvalidInput(format!("'{}' is not an email address", email)));
    }

    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = ?)")
        .bind(&email)
        .fetch_one(db)
        .await?;
    if exists {
        return Err(crate::Error::Conflict(format!("user {} already exists", email)));
    }

    let token = generate_token();
    let now = chrono::Utc::now();
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO users (name, email, api_token_hash, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(name)
    .bind(&email)
    .bind(hash_token(&token))
    .bind(now)
    .bind(now)
    .fetch_one(db)
    .await?;

    let user = User {
        id,
        name: name.to_string(),
        email,
        api_token_hash: hash_token(&token),
        created_at: now,
        updated_at: now,
    };
    Ok((user, token))
}

/// Replace a user's token; the old token stops working immediately
#[cfg(feature = "sqlx")]
pub async fn rotate_token(db: &SqlitePool, email: &str) -> crate::Result<String> {
    let token = generate_token();
    let result = sqlx::query("UPDATE users SET api_token_hash = ?, updated_at = ? WHERE email = ?")
        .bind(hash_token(&token))
        .bind(chrono::Utc::now())
        .bind(email.trim().to_lowercase())
        .execute(db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(crate::Error::NotFound(format!("user {}", email)));
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique() {
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn test_hash_is_sha256_hex() {
        // SHA-256("abc")
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_parse_bearer() {
        assert_eq!(parse_bearer("Bearer abc").unwrap(), "abc");
        assert_eq!(parse_bearer("  bearer   abc  ").unwrap(), "abc");
        assert_eq!(parse_bearer("Basic abc"), Err(ApiAuthError::MissingToken));
        assert_eq!(parse_bearer("Bearer "), Err(ApiAuthError::MissingToken));
        assert_eq!(parse_bearer("abc"), Err(ApiAuthError::MissingToken));
    }
}
