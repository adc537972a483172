//! Configuration loading

use std::path::Path;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result, ensure};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::info;
use warden_auth::AuthConfig;
use warden_core::RbacConfig;

/// Secret shipped in the default config; `run` refuses to start with it
pub const PLACEHOLDER_JWT_SECRET: &str = "change-me-in-production";

/// Upper bound for settings given in minutes (one day)
const MAX_MINUTES_SETTING: i64 = 24 * 60;

const MAX_REFRESH_TOKEN_DAYS: i64 = 3650;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub rbac: RbacSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

/// Token and password settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSection {
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    #[serde(default = "default_access_token_minutes")]
    pub access_token_minutes: i64,
    #[serde(default = "default_refresh_token_days")]
    pub refresh_token_days: i64,
    #[serde(default = "default_reset_token_minutes")]
    pub reset_token_minutes: i64,
    #[serde(default = "default_true")]
    pub embed_roles: bool,
    #[serde(default = "default_true")]
    pub revoke_family_on_reuse: bool,
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,
    #[serde(default = "default_store_timeout_secs")]
    pub store_timeout_secs: u64,
}

/// Permission cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RbacSection {
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default)]
    pub super_admin_satisfies_any_role: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            access_token_minutes: default_access_token_minutes(),
            refresh_token_days: default_refresh_token_days(),
            reset_token_minutes: default_reset_token_minutes(),
            embed_roles: true,
            revoke_family_on_reuse: true,
            min_password_length: default_min_password_length(),
            store_timeout_secs: default_store_timeout_secs(),
        }
    }
}

impl Default for RbacSection {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
            super_admin_satisfies_any_role: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_db_path() -> String {
    "./data/warden.db".to_string()
}

fn default_jwt_secret() -> String {
    PLACEHOLDER_JWT_SECRET.to_string()
}

fn default_access_token_minutes() -> i64 {
    15
}

fn default_refresh_token_days() -> i64 {
    30
}

fn default_reset_token_minutes() -> i64 {
    15
}

fn default_true() -> bool {
    true
}

fn default_min_password_length() -> usize {
    8
}

fn default_store_timeout_secs() -> u64 {
    5
}

fn default_refresh_interval_secs() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Load configuration from a file; a missing file yields the defaults
    pub fn load(path: &str) -> Result<Self> {
        let config_path = Path::new(path);

        if !config_path.exists() {
            info!("Config file not found at {}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path))?;

        info!("Loaded configuration from {}", path);
        Ok(config)
    }

    /// Reject lifetimes and intervals the managers cannot work with
    pub fn validate(&self) -> Result<()> {
        let auth = &self.auth;
        ensure!(
            (1..=MAX_MINUTES_SETTING).contains(&auth.access_token_minutes),
            "auth.access_token_minutes must be between 1 and {}",
            MAX_MINUTES_SETTING
        );
        ensure!(
            (1..=MAX_REFRESH_TOKEN_DAYS).contains(&auth.refresh_token_days),
            "auth.refresh_token_days must be between 1 and {}",
            MAX_REFRESH_TOKEN_DAYS
        );
        ensure!(
            (1..=MAX_MINUTES_SETTING).contains(&auth.reset_token_minutes),
            "auth.reset_token_minutes must be between 1 and {}",
            MAX_MINUTES_SETTING
        );
        ensure!(auth.store_timeout_secs > 0, "auth.store_timeout_secs must be positive");
        ensure!(
            self.rbac.refresh_interval_secs > 0,
            "rbac.refresh_interval_secs must be positive"
        );
        Ok(())
    }

    /// sqlx connection URL for the configured database file
    pub fn database_url(&self) -> String {
        format!("sqlite:{}?mode=rwc", self.database.path)
    }

    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            jwt_secret: self.auth.jwt_secret.clone(),
            access_token_ttl: Duration::minutes(self.auth.access_token_minutes),
            refresh_token_ttl: Duration::days(self.auth.refresh_token_days),
            reset_token_ttl: Duration::minutes(self.auth.reset_token_minutes),
            embed_roles: self.auth.embed_roles,
            revoke_family_on_reuse: self.auth.revoke_family_on_reuse,
            min_password_length: self.auth.min_password_length,
            store_timeout: StdDuration::from_secs(self.auth.store_timeout_secs),
        }
    }

    pub fn rbac_config(&self) -> RbacConfig {
        RbacConfig {
            refresh_interval: StdDuration::from_secs(self.rbac.refresh_interval_secs),
            store_timeout: StdDuration::from_secs(self.auth.store_timeout_secs),
            super_admin_satisfies_any_role: self.rbac.super_admin_satisfies_any_role,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = Config::load(path.to_str().unwrap()).unwrap();

        assert_eq!(config.database.path, "./data/warden.db");
        assert_eq!(config.auth.jwt_secret, PLACEHOLDER_JWT_SECRET);
        assert_eq!(config.rbac.refresh_interval_secs, 300);
        assert!(!config.rbac.super_admin_satisfies_any_role);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[auth]
jwt_secret = "s3cret"
access_token_minutes = 5

[rbac]
super_admin_satisfies_any_role = true
"#
        )
        .unwrap();

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        let auth = config.auth_config();
        assert_eq!(auth.jwt_secret, "s3cret");
        assert_eq!(auth.access_token_ttl, Duration::minutes(5));
        assert_eq!(auth.refresh_token_ttl, Duration::days(30));
        assert!(auth.revoke_family_on_reuse);
        assert!(config.rbac_config().super_admin_satisfies_any_role);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[auth]\naccess_token_minutes = \"soon\"\n").unwrap();

        let err = Config::load(file.path().to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_zero_refresh_interval_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[rbac]\nrefresh_interval_secs = 0\n").unwrap();

        let err = Config::load(file.path().to_str().unwrap()).unwrap_err();
        assert!(format!("{:#}", err).contains("rbac.refresh_interval_secs"));
    }

    #[test]
    fn test_out_of_range_lifetimes_are_rejected() {
        for section in [
            "[auth]\nrefresh_token_days = 100000000\n",
            "[auth]\naccess_token_minutes = 0\n",
            "[auth]\nreset_token_minutes = -5\n",
        ] {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            write!(file, "{}", section).unwrap();
            let err = Config::load(file.path().to_str().unwrap()).unwrap_err();
            assert!(
                format!("{:#}", err).contains("must be between"),
                "accepted {:?}",
                section
            );
        }
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_shipped_config_parses() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/default.toml");
        let config = Config::load(path).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.database_url(), "sqlite:./data/warden.db?mode=rwc");
    }
}
