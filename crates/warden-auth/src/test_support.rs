//! Shared fixtures for the manager tests

use std::sync::{Arc, LazyLock};

use chrono::Utc;
use warden_db::{MemoryStore, NewUser, User};

use crate::clock::ManualClock;
use crate::config::AuthConfig;
use crate::password::hash_password;

pub const PASSWORD: &str = "correct horse battery";

// Argon2 is slow in debug builds; hash once
static PASSWORD_HASH: LazyLock<String> = LazyLock::new(|| hash_password(PASSWORD).unwrap());

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub config: AuthConfig,
    pub user: User,
}

fn seed_user(store: &MemoryStore, email: &str, is_active: bool) -> User {
    store.add_user(NewUser {
        email: email.to_string(),
        password_hash: PASSWORD_HASH.clone(),
        is_active,
        must_reset_password: true,
    })
}

impl Fixture {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let user = seed_user(&store, "ada@example.com", true);
        Self {
            store,
            clock: Arc::new(ManualClock::new(Utc::now())),
            config: AuthConfig {
                jwt_secret: "test-secret-key".to_string(),
                ..AuthConfig::default()
            },
            user,
        }
    }

    pub fn add_user(&self, email: &str, is_active: bool) -> User {
        seed_user(&self.store, email, is_active)
    }
}
