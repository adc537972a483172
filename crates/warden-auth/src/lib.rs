//! Warden Authentication
//!
//! Password verification, access-token issuance, refresh-token rotation and
//! the password-reset flow, written against the store traits of `warden-db`.

pub mod clock;
pub mod config;
pub mod error;
pub mod jwt;
pub mod password;
pub mod reset;
pub mod session;
pub mod throttle;
pub mod token;

#[cfg(test)]
mod test_support;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AuthConfig;
pub use error::AuthError;
pub use jwt::{AccessClaims, TokenCodec};
pub use password::{hash_password, verify_password};
pub use reset::{PasswordResetManager, ResetRequested};
pub use session::{ClientInfo, LogoutOutcome, SessionManager, TokenPair};
pub use throttle::{LoginThrottle, ThrottleConfig};
