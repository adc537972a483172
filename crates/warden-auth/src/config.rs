//! Authentication settings

use std::time::Duration as StdDuration;

use chrono::Duration;

/// Settings shared by the session and password-reset managers
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub reset_token_ttl: Duration,
    /// Put the user's role names into access tokens
    pub embed_roles: bool,
    /// Revoke every session of a user when a rotated-out refresh token is replayed
    pub revoke_family_on_reuse: bool,
    pub min_password_length: usize,
    /// Upper bound for any single store call
    pub store_timeout: StdDuration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            access_token_ttl: Duration::minutes(15),
            refresh_token_ttl: Duration::days(30),
            reset_token_ttl: Duration::minutes(15),
            embed_roles: true,
            revoke_family_on_reuse: true,
            min_password_length: 8,
            store_timeout: StdDuration::from_secs(5),
        }
    }
}
