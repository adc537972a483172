//! Authentication error types

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use warden_db::DbError;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,

    #[error("User not found")]
    UserNotFound,

    #[error("Too many failed login attempts")]
    TooManyAttempts,

    #[error("Invalid password: {0}")]
    InvalidPassword(String),

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Password hashing error: {0}")]
    PasswordHash(String),

    #[error("Token lifetime out of range")]
    InvalidLifetime,

    #[error("Random source failure: {0}")]
    Random(String),

    #[error("Store call timed out")]
    Timeout,

    #[error("Persistence error: {0}")]
    Persistence(#[from] DbError),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

/// Bound a store call by `limit`
pub(crate) async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, AuthError>
where
    F: Future<Output = Result<T, DbError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(AuthError::Timeout),
    }
}
