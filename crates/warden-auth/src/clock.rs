//! Time source

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::error::AuthError;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Expiry `ttl` after `now`; a non-positive or out-of-range lifetime is an error
pub(crate) fn expires_after(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, AuthError> {
    if ttl <= Duration::zero() {
        return Err(AuthError::InvalidLifetime);
    }
    now.checked_add_signed(ttl).ok_or(AuthError::InvalidLifetime)
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
