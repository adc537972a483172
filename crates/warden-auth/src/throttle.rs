//! Failed-login throttling

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::warn;

use crate::clock::Clock;
use crate::error::AuthError;

#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    pub max_attempts: u32,
    pub lockout: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lockout: Duration::minutes(15),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Attempts {
    failures: u32,
    window_start: DateTime<Utc>,
}

/// Counts failed logins per (ip, email) and refuses further attempts once
/// `max_attempts` failures land inside one `lockout` window.
pub struct LoginThrottle {
    config: ThrottleConfig,
    clock: Arc<dyn Clock>,
    attempts: Mutex<HashMap<(String, String), Attempts>>,
}

impl LoginThrottle {
    pub fn new(config: ThrottleConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    fn key(ip: Option<&str>, email: &str) -> (String, String) {
        (ip.unwrap_or("-").to_string(), email.to_lowercase())
    }

    /// Fail with `TooManyAttempts` while the key is locked
    pub fn check(&self, ip: Option<&str>, email: &str) -> Result<(), AuthError> {
        let now = self.clock.now();
        let key = Self::key(ip, email);
        let mut attempts = self.attempts.lock();

        let Some(entry) = attempts.get(&key).copied() else {
            return Ok(());
        };
        if now - entry.window_start >= self.config.lockout {
            attempts.remove(&key);
            return Ok(());
        }
        if entry.failures >= self.config.max_attempts {
            return Err(AuthError::TooManyAttempts);
        }
        Ok(())
    }

    pub fn record_failure(&self, ip: Option<&str>, email: &str) {
        let now = self.clock.now();
        let lockout = self.config.lockout;
        let mut attempts = self.attempts.lock();

        let entry = attempts.entry(Self::key(ip, email)).or_insert(Attempts {
            failures: 0,
            window_start: now,
        });
        if now - entry.window_start >= lockout {
            *entry = Attempts {
                failures: 0,
                window_start: now,
            };
        }
        entry.failures += 1;

        if entry.failures == self.config.max_attempts {
            warn!(
                "Locking logins for {} from {} after {} failures",
                email,
                ip.unwrap_or("unknown address"),
                entry.failures
            );
        }
    }

    /// Forget failures after a successful login
    pub fn reset(&self, ip: Option<&str>, email: &str) {
        self.attempts.lock().remove(&Self::key(ip, email));
    }

    /// Drop entries whose window has passed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let lockout = self.config.lockout;
        let mut attempts = self.attempts.lock();
        let before = attempts.len();
        attempts.retain(|_, entry| now - entry.window_start < lockout);
        before - attempts.len()
    }
}
