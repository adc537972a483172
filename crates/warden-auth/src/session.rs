//! Session lifecycle: login, refresh-token rotation and logout

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use warden_db::{
    AuditAction, AuditEvent, AuditSink, NewRefreshToken, RefreshToken, RefreshTokenStore,
    RoleStore, User, UserStore,
};

use crate::clock::{Clock, expires_after};
use crate::config::AuthConfig;
use crate::error::{AuthError, with_timeout};
use crate::jwt::{AccessClaims, TokenCodec};
use crate::password::{dummy_verify, verify_password};
use crate::throttle::LoginThrottle;
use crate::token::{generate_token, hash_token};

/// Credentials handed back after login or refresh
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    /// Raw refresh token; only its hash is persisted
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

/// Result of a logout; unknown tokens revoke nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogoutOutcome {
    pub revoked: u64,
}

/// Where a request came from, recorded with each refresh token
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientInfo<'a> {
    pub ip: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

pub struct SessionManager {
    users: Arc<dyn UserStore>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    roles: Arc<dyn RoleStore>,
    codec: TokenCodec,
    config: AuthConfig,
    clock: Arc<dyn Clock>,
    throttle: Option<Arc<LoginThrottle>>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl SessionManager {
    pub fn new(
        users: Arc<dyn UserStore>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        roles: Arc<dyn RoleStore>,
        config: AuthConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let codec = TokenCodec::new(&config.jwt_secret, config.access_token_ttl, clock.clone());
        Self {
            users,
            refresh_tokens,
            roles,
            codec,
            config,
            clock,
            throttle: None,
            audit: None,
        }
    }

    pub fn with_throttle(mut self, throttle: Arc<LoginThrottle>) -> Self {
        self.throttle = Some(throttle);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Authenticate with email and password.
    ///
    /// Unknown email, wrong password and inactive account all fail with the
    /// same [`AuthError::InvalidCredentials`], after the same amount of work.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        client: ClientInfo<'_>,
    ) -> Result<TokenPair, AuthError> {
        if let Some(throttle) = &self.throttle {
            throttle.check(client.ip, email)?;
        }

        debug!("Login attempt for: {}", email);

        let user = with_timeout(self.config.store_timeout, self.users.find_by_email(email)).await?;

        let authenticated = match user {
            Some(user) => {
                let password_ok = verify_password(password, &user.password_hash)
                    .unwrap_or_else(|e| {
                        warn!("Stored password hash of user {} is unusable: {}", user.id, e);
                        dummy_verify(password);
                        false
                    });
                (password_ok && user.is_active).then_some(user)
            }
            None => {
                dummy_verify(password);
                None
            }
        };

        let Some(user) = authenticated else {
            if let Some(throttle) = &self.throttle {
                throttle.record_failure(client.ip, email);
            }
            debug!("Login rejected for: {}", email);
            return Err(AuthError::InvalidCredentials);
        };

        if let Some(throttle) = &self.throttle {
            throttle.reset(client.ip, email);
        }

        let now = self.clock.now();
        let access_token = self.mint_access_token(&user).await?;
        let (refresh_token, _) = self.persist_refresh_token(&user.id, client, now).await?;

        self.audit(AuditAction::Login, &user.id);
        info!("User {} logged in", user.id);

        Ok(self.token_pair(access_token, refresh_token))
    }

    /// Exchange a refresh token for a new pair, revoking the old one.
    ///
    /// Of several concurrent calls with the same token at most one succeeds.
    pub async fn refresh(&self, raw: &str, client: ClientInfo<'_>) -> Result<TokenPair, AuthError> {
        let hash = hash_token(raw);
        let now = self.clock.now();

        let active = with_timeout(
            self.config.store_timeout,
            self.refresh_tokens.find_active_by_hash(&hash, now),
        )
        .await?;

        let Some(current) = active else {
            self.detect_reuse(&hash, now).await?;
            return Err(AuthError::InvalidOrExpiredToken);
        };

        let user = with_timeout(self.config.store_timeout, self.users.find_by_id(&current.user_id))
            .await?
            .ok_or(AuthError::UserNotFound)?;
        if !user.is_active {
            debug!("Refresh refused for inactive user {}", user.id);
            return Err(AuthError::InvalidOrExpiredToken);
        }

        let access_token = self.mint_access_token(&user).await?;
        let (refresh_token, successor) = self.persist_refresh_token(&user.id, client, now).await?;

        let rotated = with_timeout(
            self.config.store_timeout,
            self.refresh_tokens
                .revoke(&current.id, Some(&successor.token_hash), now),
        )
        .await;

        match rotated {
            Ok(true) => {}
            Ok(false) => {
                // Another call rotated this token first
                self.discard_successor(&successor, now).await;
                warn!("Concurrent refresh of token {} rejected", current.id);
                return Err(AuthError::InvalidOrExpiredToken);
            }
            Err(e) => {
                self.discard_successor(&successor, now).await;
                return Err(e);
            }
        }

        self.audit(AuditAction::TokenRefresh, &user.id);
        debug!("Rotated refresh token {} -> {}", current.id, successor.id);

        Ok(self.token_pair(access_token, refresh_token))
    }

    /// Revoke one session, or with `all` every session of `user_id`.
    ///
    /// A token that is unknown, expired or already revoked is not an error.
    pub async fn logout(
        &self,
        raw: &str,
        all: bool,
        user_id: Option<&str>,
    ) -> Result<LogoutOutcome, AuthError> {
        let now = self.clock.now();

        if let (true, Some(user_id)) = (all, user_id) {
            let revoked = with_timeout(
                self.config.store_timeout,
                self.refresh_tokens.revoke_all_for_user(user_id, now),
            )
            .await?;
            self.audit(AuditAction::LogoutAll, user_id);
            info!("Revoked {} sessions of user {}", revoked, user_id);
            return Ok(LogoutOutcome { revoked });
        }

        let hash = hash_token(raw);
        let active = with_timeout(
            self.config.store_timeout,
            self.refresh_tokens.find_active_by_hash(&hash, now),
        )
        .await?;

        let Some(token) = active else {
            debug!("Logout with unknown or inactive refresh token");
            return Ok(LogoutOutcome { revoked: 0 });
        };

        if user_id.is_some_and(|id| id != token.user_id) {
            warn!("Refusing to revoke session {} on behalf of another user", token.id);
            return Ok(LogoutOutcome { revoked: 0 });
        }

        let revoked = with_timeout(
            self.config.store_timeout,
            self.refresh_tokens.revoke(&token.id, None, now),
        )
        .await?;

        if revoked {
            self.audit(AuditAction::Logout, &token.user_id);
        }
        Ok(LogoutOutcome {
            revoked: u64::from(revoked),
        })
    }

    /// Validate an access token issued by this manager
    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims, AuthError> {
        self.codec.validate(token)
    }

    /// A rotated-out token presented again means it leaked; cut off every
    /// session of its owner.
    async fn detect_reuse(&self, hash: &str, now: DateTime<Utc>) -> Result<(), AuthError> {
        if !self.config.revoke_family_on_reuse {
            return Ok(());
        }

        let record: Option<RefreshToken> = with_timeout(
            self.config.store_timeout,
            self.refresh_tokens.find_by_hash(hash),
        )
        .await?;

        if let Some(record) = record.filter(RefreshToken::was_rotated) {
            let revoked = with_timeout(
                self.config.store_timeout,
                self.refresh_tokens.revoke_all_for_user(&record.user_id, now),
            )
            .await?;
            warn!(
                "Replay of rotated refresh token {}; revoked {} sessions of user {}",
                record.id, revoked, record.user_id
            );
            self.audit(AuditAction::RefreshTokenReuse, &record.user_id);
        }

        Ok(())
    }

    /// Revoke a successor whose raw value was never handed out
    async fn discard_successor(&self, successor: &RefreshToken, now: DateTime<Utc>) {
        let revoked = with_timeout(
            self.config.store_timeout,
            self.refresh_tokens.revoke(&successor.id, None, now),
        )
        .await;
        if let Err(e) = revoked {
            warn!("Failed to revoke unused refresh token {}: {}", successor.id, e);
        }
    }

    async fn mint_access_token(&self, user: &User) -> Result<String, AuthError> {
        let roles = if self.config.embed_roles {
            with_timeout(self.config.store_timeout, self.roles.roles_for_user(&user.id))
                .await?
                .into_iter()
                .map(|role| role.name)
                .collect()
        } else {
            Vec::new()
        };

        self.codec.issue(&user.id, &user.email, roles)
    }

    async fn persist_refresh_token(
        &self,
        user_id: &str,
        client: ClientInfo<'_>,
        now: DateTime<Utc>,
    ) -> Result<(String, RefreshToken), AuthError> {
        let raw = generate_token()?;
        let expires_at = expires_after(now, self.config.refresh_token_ttl)?;
        let record = with_timeout(
            self.config.store_timeout,
            self.refresh_tokens.create(NewRefreshToken {
                user_id: user_id.to_string(),
                token_hash: hash_token(&raw),
                expires_at,
                ip_address: client.ip.map(str::to_string),
                user_agent: client.user_agent.map(str::to_string),
            }),
        )
        .await?;
        Ok((raw, record))
    }

    fn token_pair(&self, access_token: String, refresh_token: String) -> TokenPair {
        TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.codec.ttl().num_seconds(),
        }
    }

    fn audit(&self, action: AuditAction, user_id: &str) {
        if let Some(audit) = &self.audit {
            audit.record(AuditEvent::user(action, user_id));
        }
    }
}
