//! Core error types

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use warden_db::DbError;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Store call timed out")]
    Timeout,
}

/// Bound a store call by `limit`
pub(crate) async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, CoreError>
where
    F: Future<Output = Result<T, DbError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(CoreError::Timeout),
    }
}
