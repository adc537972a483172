//! In-process store
//!
//! Implements every store trait over a single mutex-guarded state, so each
//! trait call is atomic with respect to the others. Used for tests and for
//! embedding the core without SQLite. Test hooks allow injecting latency,
//! role-load failures and rotation failures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use uuid::Uuid;

use crate::error::DbError;
use crate::models::{
    AuditEvent, NewPasswordResetToken, NewRefreshToken, NewUser, PasswordResetToken,
    RefreshToken, ResetCompletion, Role, User,
};
use crate::store::{AuditSink, PasswordResetStore, RefreshTokenStore, RoleStore, UserStore};

#[derive(Default)]
struct MemoryState {
    users: HashMap<String, User>,
    refresh_tokens: Vec<RefreshToken>,
    password_resets: Vec<PasswordResetToken>,
    /// role name -> role
    roles: BTreeMap<String, Role>,
    /// user id -> role names
    user_roles: HashMap<String, BTreeSet<String>>,
    audit: Vec<AuditEvent>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    latency: Mutex<Option<Duration>>,
    fail_role_loads: AtomicBool,
    fail_rotations: AtomicBool,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== Seeding ====================

    pub fn add_user(&self, user: NewUser) -> User {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4().to_string(),
            email: user.email,
            password_hash: user.password_hash,
            is_active: user.is_active,
            must_reset_password: user.must_reset_password,
            created_at: now,
            updated_at: now,
        };
        self.state.lock().users.insert(user.id.clone(), user.clone());
        user
    }

    /// Create a role or replace its permission set
    pub fn define_role(&self, name: &str, permissions: &[&str]) -> Role {
        let mut state = self.state.lock();
        let role = state.roles.entry(name.to_string()).or_insert_with(|| Role {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            permissions: BTreeSet::new(),
        });
        role.permissions = permissions.iter().map(|p| p.to_string()).collect();
        role.clone()
    }

    pub fn assign_role(&self, user_id: &str, role_name: &str) {
        self.state
            .lock()
            .user_roles
            .entry(user_id.to_string())
            .or_default()
            .insert(role_name.to_string());
    }

    pub fn unassign_role(&self, user_id: &str, role_name: &str) {
        if let Some(roles) = self.state.lock().user_roles.get_mut(user_id) {
            roles.remove(role_name);
        }
    }

    // ==================== Inspection ====================

    pub fn user(&self, id: &str) -> Option<User> {
        self.state.lock().users.get(id).cloned()
    }

    pub fn refresh_tokens_for(&self, user_id: &str) -> Vec<RefreshToken> {
        self.state
            .lock()
            .refresh_tokens
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn password_resets_for(&self, user_id: &str) -> Vec<PasswordResetToken> {
        self.state
            .lock()
            .password_resets
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.state.lock().audit.clone()
    }

    // ==================== Fault injection ====================

    /// Delay every store call by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Make `find_all_with_permissions` fail until reset
    pub fn fail_role_loads(&self, fail: bool) {
        self.fail_role_loads.store(fail, Ordering::SeqCst);
    }

    /// Make `revoke` fail whenever it would record a successor hash
    pub fn fail_rotations(&self, fail: bool) {
        self.fail_rotations.store(fail, Ordering::SeqCst);
    }

    async fn delay(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn revoke_all_locked(state: &mut MemoryState, user_id: &str, at: DateTime<Utc>) -> u64 {
        let mut count = 0;
        for token in state
            .refresh_tokens
            .iter_mut()
            .filter(|t| t.user_id == user_id && !t.revoked)
        {
            token.revoked = true;
            token.revoked_at = Some(at);
            count += 1;
        }
        count
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, DbError> {
        self.delay().await;
        let state = self.state.lock();
        Ok(state.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, DbError> {
        self.delay().await;
        Ok(self.state.lock().users.get(id).cloned())
    }

    async fn update(&self, user: &User) -> Result<(), DbError> {
        self.delay().await;
        let mut state = self.state.lock();
        let stored = state
            .users
            .get_mut(&user.id)
            .ok_or_else(|| DbError::NotFound(format!("User '{}'", user.id)))?;
        stored.password_hash = user.password_hash.clone();
        stored.is_active = user.is_active;
        stored.must_reset_password = user.must_reset_password;
        stored.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryStore {
    async fn create(&self, token: NewRefreshToken) -> Result<RefreshToken, DbError> {
        self.delay().await;
        let mut state = self.state.lock();
        if state
            .refresh_tokens
            .iter()
            .any(|t| t.token_hash == token.token_hash)
        {
            return Err(DbError::Duplicate("refresh token hash".to_string()));
        }

        let record = RefreshToken {
            id: Uuid::new_v4().to_string(),
            user_id: token.user_id,
            token_hash: token.token_hash,
            expires_at: token.expires_at,
            revoked: false,
            revoked_at: None,
            replaced_by_hash: None,
            ip_address: token.ip_address,
            user_agent: token.user_agent,
            created_at: Utc::now(),
        };
        state.refresh_tokens.push(record.clone());
        Ok(record)
    }

    async fn find_active_by_hash(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshToken>, DbError> {
        self.delay().await;
        let state = self.state.lock();
        Ok(state
            .refresh_tokens
            .iter()
            .find(|t| t.token_hash == token_hash && t.is_active_at(now))
            .cloned())
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>, DbError> {
        self.delay().await;
        let state = self.state.lock();
        Ok(state
            .refresh_tokens
            .iter()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    async fn revoke(
        &self,
        id: &str,
        replaced_by_hash: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        self.delay().await;
        if replaced_by_hash.is_some() && self.fail_rotations.load(Ordering::SeqCst) {
            return Err(DbError::Unavailable("refresh token store offline".to_string()));
        }
        let mut state = self.state.lock();
        match state
            .refresh_tokens
            .iter_mut()
            .find(|t| t.id == id && !t.revoked)
        {
            Some(token) => {
                token.revoked = true;
                token.revoked_at = Some(at);
                token.replaced_by_hash = replaced_by_hash.map(str::to_string);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn revoke_all_for_user(&self, user_id: &str, at: DateTime<Utc>) -> Result<u64, DbError> {
        self.delay().await;
        let mut state = self.state.lock();
        Ok(Self::revoke_all_locked(&mut state, user_id, at))
    }
}

#[async_trait]
impl PasswordResetStore for MemoryStore {
    async fn create(&self, token: NewPasswordResetToken) -> Result<PasswordResetToken, DbError> {
        self.delay().await;
        let record = PasswordResetToken {
            id: Uuid::new_v4().to_string(),
            user_id: token.user_id,
            token_hash: token.token_hash,
            expires_at: token.expires_at,
            used_at: None,
            created_at: Utc::now(),
        };
        self.state.lock().password_resets.push(record.clone());
        Ok(record)
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<PasswordResetToken>, DbError> {
        self.delay().await;
        let state = self.state.lock();
        Ok(state
            .password_resets
            .iter()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    async fn consume(&self, completion: ResetCompletion) -> Result<bool, DbError> {
        self.delay().await;
        let mut state = self.state.lock();

        // Validate everything before the first write
        let Some(reset_idx) = state
            .password_resets
            .iter()
            .position(|t| t.id == completion.reset_id && t.is_usable_at(completion.completed_at))
        else {
            return Ok(false);
        };
        if !state.users.contains_key(&completion.user_id) {
            return Err(DbError::NotFound(format!("User '{}'", completion.user_id)));
        }

        let at = completion.completed_at;
        state.password_resets[reset_idx].used_at = Some(at);
        if let Some(user) = state.users.get_mut(&completion.user_id) {
            user.password_hash = completion.password_hash;
            user.must_reset_password = false;
            user.updated_at = at;
        }
        Self::revoke_all_locked(&mut state, &completion.user_id, at);
        Ok(true)
    }
}

#[async_trait]
impl RoleStore for MemoryStore {
    async fn find_all_with_permissions(&self) -> Result<Vec<Role>, DbError> {
        self.delay().await;
        if self.fail_role_loads.load(Ordering::SeqCst) {
            return Err(DbError::Unavailable("role store offline".to_string()));
        }
        Ok(self.state.lock().roles.values().cloned().collect())
    }

    async fn roles_for_user(&self, user_id: &str) -> Result<Vec<Role>, DbError> {
        self.delay().await;
        let state = self.state.lock();
        let Some(names) = state.user_roles.get(user_id) else {
            return Ok(Vec::new());
        };
        Ok(names
            .iter()
            .filter_map(|name| state.roles.get(name).cloned())
            .collect())
    }
}

impl AuditSink for MemoryStore {
    fn record(&self, event: AuditEvent) {
        self.state.lock().audit.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AuditAction;
    use chrono::Duration as ChronoDuration;

    fn seed_user(store: &MemoryStore) -> User {
        store.add_user(NewUser {
            email: "ada@example.com".to_string(),
            password_hash: "hash".to_string(),
            is_active: true,
            must_reset_password: true,
        })
    }

    #[tokio::test]
    async fn test_consume_applies_every_write() {
        let store = MemoryStore::new();
        let user = seed_user(&store);
        let now = Utc::now();

        RefreshTokenStore::create(
            &store,
            NewRefreshToken {
                user_id: user.id.clone(),
                token_hash: "session".to_string(),
                expires_at: now + ChronoDuration::days(30),
                ip_address: None,
                user_agent: None,
            },
        )
        .await
        .unwrap();
        let reset = PasswordResetStore::create(
            &store,
            NewPasswordResetToken {
                user_id: user.id.clone(),
                token_hash: "reset".to_string(),
                expires_at: now + ChronoDuration::minutes(15),
            },
        )
        .await
        .unwrap();

        let completion = ResetCompletion {
            reset_id: reset.id,
            user_id: user.id.clone(),
            password_hash: "new-hash".to_string(),
            completed_at: now,
        };
        assert!(store.consume(completion.clone()).await.unwrap());
        assert!(!store.consume(completion).await.unwrap());

        let stored = store.user(&user.id).unwrap();
        assert_eq!(stored.password_hash, "new-hash");
        assert!(!stored.must_reset_password);
        assert!(store.refresh_tokens_for(&user.id).iter().all(|t| t.revoked));
    }

    #[tokio::test]
    async fn test_consume_rejects_expired_reset() {
        let store = MemoryStore::new();
        let user = seed_user(&store);
        let issued = Utc::now();

        let reset = PasswordResetStore::create(
            &store,
            NewPasswordResetToken {
                user_id: user.id.clone(),
                token_hash: "reset".to_string(),
                expires_at: issued + ChronoDuration::minutes(15),
            },
        )
        .await
        .unwrap();

        let late = ResetCompletion {
            reset_id: reset.id,
            user_id: user.id.clone(),
            password_hash: "new-hash".to_string(),
            completed_at: issued + ChronoDuration::minutes(16),
        };
        assert!(!store.consume(late).await.unwrap());
        assert_eq!(store.user(&user.id).unwrap().password_hash, "hash");
        assert!(store.password_resets_for(&user.id)[0].used_at.is_none());
    }

    #[tokio::test]
    async fn test_rotation_failure_injection() {
        let store = MemoryStore::new();
        let user = seed_user(&store);
        let now = Utc::now();
        let token = RefreshTokenStore::create(
            &store,
            NewRefreshToken {
                user_id: user.id.clone(),
                token_hash: "session".to_string(),
                expires_at: now + ChronoDuration::days(30),
                ip_address: None,
                user_agent: None,
            },
        )
        .await
        .unwrap();

        store.fail_rotations(true);
        assert!(matches!(
            store.revoke(&token.id, Some("next"), now).await,
            Err(DbError::Unavailable(_))
        ));
        assert!(store.revoke(&token.id, None, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_roles_for_user_skip_undefined_roles() {
        let store = MemoryStore::new();
        store.define_role("EDITOR", &["ARTICLE_WRITE"]);
        store.assign_role("u1", "EDITOR");
        store.assign_role("u1", "GHOST");

        let roles = store.roles_for_user("u1").await.unwrap();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].name, "EDITOR");

        store.unassign_role("u1", "EDITOR");
        assert!(store.roles_for_user("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_role_load_failure_injection() {
        let store = MemoryStore::new();
        store.define_role("EDITOR", &[]);

        store.fail_role_loads(true);
        assert!(matches!(
            store.find_all_with_permissions().await,
            Err(DbError::Unavailable(_))
        ));

        store.fail_role_loads(false);
        assert_eq!(store.find_all_with_permissions().await.unwrap().len(), 1);
    }

    #[test]
    fn test_audit_events_are_kept_in_order() {
        let store = MemoryStore::new();
        store.record(AuditEvent::user(AuditAction::Login, "u1"));
        store.record(AuditEvent::user(AuditAction::Logout, "u1"));

        let events = store.audit_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].action, AuditAction::Logout);
    }
}
