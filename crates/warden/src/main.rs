//! Warden - authentication and authorization core

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use config::{Config, LoggingConfig, PLACEHOLDER_JWT_SECRET};
use warden_auth::{Clock, PasswordResetManager, SessionManager, SystemClock, hash_password};
use warden_core::{RbacCache, TokioScheduler};
use warden_db::{AuditAction, AuditEvent, Database, NewUser, SUPER_ADMIN};

/// Warden - authentication and authorization core
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Token signing secret (overrides the config file)
    #[arg(long, env = "WARDEN_JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Keep the permission cache warm until interrupted (default)
    Run,
    /// Create the super admin account, or reset its password
    SeedAdmin {
        #[arg(long)]
        email: String,
        #[arg(long, env = "WARDEN_ADMIN_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Resolve a permission for a user
    Check {
        #[arg(long)]
        email: String,
        #[arg(long)]
        permission: String,
    },
    /// Revoke every refresh token of a user
    RevokeSessions {
        #[arg(long)]
        email: String,
    },
    /// Issue a password reset token and print it
    RequestReset {
        #[arg(long)]
        email: String,
    },
    /// Show recent audit log entries
    Audit {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)?;
    if let Some(secret) = args.jwt_secret {
        config.auth.jwt_secret = secret;
    }

    init_logging(&config.logging);

    info!("Starting Warden v{}", env!("CARGO_PKG_VERSION"));

    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create data directory {:?}", parent))?;
    }
    let db = Database::new(&config.database_url())
        .await
        .context("Failed to open database")?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(&config, db).await,
        Command::SeedAdmin { email, password } => seed_admin(&config, &db, &email, &password).await,
        Command::Check { email, permission } => check(&config, db, &email, &permission).await,
        Command::RevokeSessions { email } => revoke_sessions(&config, db, &email).await,
        Command::RequestReset { email } => request_reset(&config, db, &email).await,
        Command::Audit { limit } => audit(&db, limit).await,
    }
}

/// Initialize logging
fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Managers wired to one database
struct Services {
    sessions: SessionManager,
    resets: PasswordResetManager,
    rbac: Arc<RbacCache>,
}

impl Services {
    fn build(config: &Config, db: &Database) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = Arc::new(db.clone());

        let sessions = SessionManager::new(
            store.clone(),
            store.clone(),
            store.clone(),
            config.auth_config(),
            clock.clone(),
        );
        let resets = PasswordResetManager::new(store.clone(), store.clone(), config.auth_config(), clock);
        let rbac = Arc::new(RbacCache::new(
            store,
            config.rbac_config(),
            Arc::new(TokioScheduler::new()),
        ));

        Self {
            sessions,
            resets,
            rbac,
        }
    }
}

async fn run(config: &Config, db: Database) -> Result<()> {
    if config.auth.jwt_secret == PLACEHOLDER_JWT_SECRET {
        bail!("Refusing to start with the placeholder JWT secret; set WARDEN_JWT_SECRET");
    }
    if !db.has_users().await? {
        warn!("No users exist yet; create one with `warden seed-admin`");
    }

    let rbac = Services::build(config, &db).rbac;
    rbac.start().await;

    info!(
        "Warden ready ({} roles cached, refresh every {}s)",
        rbac.snapshot().role_count(),
        config.rbac.refresh_interval_secs
    );

    shutdown_signal().await;
    rbac.stop();

    info!("Warden stopped");
    Ok(())
}

async fn seed_admin(config: &Config, db: &Database, email: &str, password: &str) -> Result<()> {
    if password.chars().count() < config.auth.min_password_length {
        bail!(
            "Password must be at least {} characters",
            config.auth.min_password_length
        );
    }
    let password_hash = hash_password(password)?;

    let user = match db.get_user_by_email(email).await? {
        Some(mut user) => {
            user.password_hash = password_hash;
            user.is_active = true;
            user.must_reset_password = false;
            db.update_user(&user).await?;
            info!("Reset password of existing user {}", email);
            user
        }
        None => {
            let user = db
                .insert_user(NewUser {
                    email: email.to_string(),
                    password_hash,
                    is_active: true,
                    must_reset_password: false,
                })
                .await?;
            info!("Created user {}", email);
            user
        }
    };

    let role = match db.get_role_by_name(SUPER_ADMIN).await? {
        Some(role) => role,
        None => db.insert_role(SUPER_ADMIN).await?,
    };
    db.assign_role(&user.id, &role.id).await?;
    db.insert_audit_log(AuditEvent::user(AuditAction::AdminSeeded, &user.id))
        .await?;

    println!("{} is a {}", email, SUPER_ADMIN);
    Ok(())
}

async fn check(config: &Config, db: Database, email: &str, permission: &str) -> Result<()> {
    let user = db
        .get_user_by_email(email)
        .await?
        .with_context(|| format!("No user with email {}", email))?;

    let services = Services::build(config, &db);
    let rbac = &services.rbac;
    rbac.refresh().await?;

    let allowed = rbac.has_permission(&user.id, permission).await?;
    let permissions = rbac.permissions_for(&user.id).await?;

    println!(
        "{} {} {}",
        email,
        if allowed { "has" } else { "lacks" },
        permission
    );
    if !permissions.is_empty() {
        println!(
            "granted: {}",
            permissions.into_iter().collect::<Vec<_>>().join(", ")
        );
    }
    Ok(())
}

async fn revoke_sessions(config: &Config, db: Database, email: &str) -> Result<()> {
    let user = db
        .get_user_by_email(email)
        .await?
        .with_context(|| format!("No user with email {}", email))?;

    let services = Services::build(config, &db);
    let outcome = services.sessions.logout("", true, Some(&user.id)).await?;
    db.insert_audit_log(AuditEvent::user(AuditAction::LogoutAll, &user.id))
        .await?;

    println!("Revoked {} sessions of {}", outcome.revoked, email);
    Ok(())
}

async fn request_reset(config: &Config, db: Database, email: &str) -> Result<()> {
    let services = Services::build(config, &db);
    let requested = services.resets.request_reset(email).await?;
    if !requested.issued {
        bail!("No active user with email {}", email);
    }

    if let Some(user) = db.get_user_by_email(email).await? {
        db.insert_audit_log(AuditEvent::user(AuditAction::PasswordResetRequest, &user.id))
            .await?;
    }

    println!(
        "Reset token (valid for {} minutes): {}",
        config.auth.reset_token_minutes, requested.token
    );
    Ok(())
}

async fn audit(db: &Database, limit: i64) -> Result<()> {
    for entry in db.list_audit_logs(limit).await? {
        println!(
            "{}  {:<24} {}:{}",
            entry.created_at.to_rfc3339(),
            entry.action.as_str(),
            entry.entity_type,
            entry.entity_id
        );
    }
    Ok(())
}
