use std::time::Duration;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;
use jsonwebtoken::{errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Token expired, please log in again")]
    Expired,
    #[error("Invalid token")]
    Invalid,
    #[error("failed to hash password: {0}")]
    Hash(String),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: i32,
    pub iat: i64,
    pub exp: i64,
}

/// Argon2 is CPU-bound, so hashing runs on the blocking pool.
pub async fn hash_password(password: &str) -> Result<String, AuthError> {
    let password = password.to_owned();
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::Hash(e.to_string()))
    })
    .await
    .map_err(|e| AuthError::Hash(e.to_string()))?
}

/// A malformed stored hash verifies as false.
pub async fn verify_password(password: &str, password_hash: &str) -> bool {
    let password = password.to_owned();
    let password_hash = password_hash.to_owned();
    let verified = tokio::task::spawn_blocking(move || match PasswordHash::new(&password_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!("unparseable password hash: {}", e);
            false
        }
    })
    .await;

    verified.unwrap_or_else(|e| {
        tracing::error!("password verification task failed: {}", e);
        false
    })
}

pub fn issue_token(user_id: i32, secret: &str, ttl: Duration) -> Result<String, AuthError> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        user_id,
        iat: now,
        exp: now + ttl.as_secs() as i64,
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        tracing::error!("failed to sign token: {}", e);
        AuthError::Invalid
    })
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, AuthError> {
    let mut validation = Validation::default();
    validation.leeway = 0;

    jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        _ => AuthError::Invalid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[tokio::test]
    async fn test_password_roundtrip() {
        let hash = hash_password("hunter22").await.unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("hunter22", &hash).await);
        assert!(!verify_password("hunter23", &hash).await);
        assert!(!verify_password("hunter22", "not-a-phc-string").await);
    }

    #[test]
    fn test_token_roundtrip() {
        let token = issue_token(42, SECRET, Duration::from_secs(3600)).unwrap();
        let claims = verify_token(&token, SECRET).unwrap();
        assert_eq!(claims.user_id, 42);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_expired_token() {
        let now = Utc::now().timestamp();
        let claims = Claims {
            user_id: 1,
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();
        assert_eq!(verify_token(&token, SECRET).unwrap_err(), AuthError::Expired);
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let token = issue_token(1, "other-secret", Duration::from_secs(60)).unwrap();
        assert_eq!(verify_token(&token, SECRET).unwrap_err(), AuthError::Invalid);
        assert_eq!(verify_token("garbage", SECRET).unwrap_err(), AuthError::Invalid);
    }

    #[test]
    fn test_claims_use_camel_case() {
        let json = serde_json::to_value(Claims {
            user_id: 7,
            iat: 1,
            exp: 2,
        })
        .unwrap();
        assert_eq!(json["userId"], 7);
    }
}
