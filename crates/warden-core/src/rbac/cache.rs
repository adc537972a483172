//! Permission cache with periodic refresh

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::RwLock;
use tracing::{debug, info, warn};
use warden_db::{Role, RoleStore, SUPER_ADMIN};

use crate::error::{CoreError, with_timeout};
use crate::rbac::snapshot::PermissionSnapshot;
use crate::scheduler::{ScheduledTask, Scheduler};

/// Source of the `loaded_at` timestamp of each snapshot
pub type TimeSource = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RbacConfig {
    pub refresh_interval: Duration,
    /// Upper bound for any single store call
    pub store_timeout: Duration,
    /// Let `SUPER_ADMIN` pass every `has_role` check
    pub super_admin_satisfies_any_role: bool,
}

impl Default for RbacConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(300),
            store_timeout: Duration::from_secs(5),
            super_admin_satisfies_any_role: false,
        }
    }
}

/// Answers permission and role checks.
///
/// Role definitions (role -> permissions) come from a snapshot reloaded every
/// `refresh_interval`, so a definition change can lag by one interval. A
/// user's role assignments are read from the store on every check.
pub struct RbacCache {
    roles: Arc<dyn RoleStore>,
    config: RbacConfig,
    scheduler: Arc<dyn Scheduler>,
    now: TimeSource,
    snapshot: RwLock<Arc<PermissionSnapshot>>,
}

impl RbacCache {
    pub fn new(roles: Arc<dyn RoleStore>, config: RbacConfig, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            roles,
            config,
            scheduler,
            now: Arc::new(Utc::now),
            snapshot: RwLock::new(Arc::new(PermissionSnapshot::empty())),
        }
    }

    pub fn with_time_source(mut self, now: TimeSource) -> Self {
        self.now = now;
        self
    }

    /// Load once now, then keep reloading on the scheduler.
    ///
    /// A failed initial load is logged; checks see an empty snapshot until a
    /// later refresh succeeds.
    pub async fn start(self: &Arc<Self>) {
        if let Err(e) = self.refresh().await {
            warn!("Initial permission load failed: {}", e);
        }

        let cache = Arc::downgrade(self);
        let task: ScheduledTask = Arc::new(move || {
            let cache = cache.clone();
            async move {
                let Some(cache) = cache.upgrade() else {
                    return;
                };
                if let Err(e) = cache.refresh().await {
                    warn!("Permission refresh failed, keeping previous snapshot: {}", e);
                }
            }
            .boxed()
        });

        self.scheduler.start(self.config.refresh_interval, task);
        info!(
            "Permission cache started (refresh interval: {:?})",
            self.config.refresh_interval
        );
    }

    pub fn stop(&self) {
        self.scheduler.stop();
    }

    /// Reload every role from the store and swap in the new snapshot.
    ///
    /// On error the current snapshot stays in place.
    pub async fn refresh(&self) -> Result<usize, CoreError> {
        let roles = with_timeout(
            self.config.store_timeout,
            self.roles.find_all_with_permissions(),
        )
        .await?;

        let next = Arc::new(PermissionSnapshot::from_roles(roles, (self.now)()));
        let count = next.role_count();

        let previous = std::mem::replace(&mut *self.snapshot.write(), next);
        drop(previous);

        debug!("Permission snapshot refreshed ({} roles)", count);
        Ok(count)
    }

    /// Current snapshot; stays valid after later refreshes
    pub fn snapshot(&self) -> Arc<PermissionSnapshot> {
        self.snapshot.read().clone()
    }

    pub fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        self.snapshot().loaded_at()
    }

    /// True if any of the user's roles grants `permission`, or the user is
    /// `SUPER_ADMIN`. Lacking the permission is `Ok(false)`.
    pub async fn has_permission(&self, user_id: &str, permission: &str) -> Result<bool, CoreError> {
        let roles = self.user_roles(user_id).await?;
        if roles.iter().any(Role::is_super_admin) {
            return Ok(true);
        }

        let snapshot = self.snapshot();
        Ok(roles
            .iter()
            .any(|role| snapshot.grants(&role.name, permission)))
    }

    /// True if the user holds a role named exactly `role_name`
    pub async fn has_role(&self, user_id: &str, role_name: &str) -> Result<bool, CoreError> {
        let roles = self.user_roles(user_id).await?;
        Ok(roles.iter().any(|role| {
            role.name == role_name
                || (self.config.super_admin_satisfies_any_role && role.name == SUPER_ADMIN)
        }))
    }

    /// Union of the cached permissions of the user's roles
    pub async fn permissions_for(&self, user_id: &str) -> Result<BTreeSet<String>, CoreError> {
        let roles = self.user_roles(user_id).await?;
        let snapshot = self.snapshot();

        Ok(roles
            .iter()
            .filter_map(|role| snapshot.permissions(&role.name))
            .flatten()
            .cloned()
            .collect())
    }

    async fn user_roles(&self, user_id: &str) -> Result<Vec<Role>, CoreError> {
        with_timeout(self.config.store_timeout, self.roles.roles_for_user(user_id)).await
    }
}

impl Drop for RbacCache {
    fn drop(&mut self) {
        self.scheduler.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;
    use warden_db::MemoryStore;

    struct Harness {
        store: Arc<MemoryStore>,
        scheduler: Arc<ManualScheduler>,
        cache: Arc<RbacCache>,
    }

    async fn started(config: RbacConfig) -> Harness {
        let store = Arc::new(MemoryStore::new());
        store.define_role("EDITOR", &["ARTICLE_WRITE"]);
        store.define_role(SUPER_ADMIN, &[]);
        store.assign_role("u1", "EDITOR");

        let scheduler = Arc::new(ManualScheduler::new());
        let cache = Arc::new(RbacCache::new(store.clone(), config, scheduler.clone()));
        cache.start().await;

        Harness {
            store,
            scheduler,
            cache,
        }
    }

    #[tokio::test]
    async fn test_editor_permissions() {
        let h = started(RbacConfig::default()).await;

        assert!(h.cache.has_permission("u1", "ARTICLE_WRITE").await.unwrap());
        assert!(!h.cache.has_permission("u1", "ARTICLE_DELETE").await.unwrap());
        assert!(!h.cache.has_permission("nobody", "ARTICLE_WRITE").await.unwrap());
        assert_eq!(
            h.scheduler.interval(),
            Some(Duration::from_secs(300))
        );
    }

    #[tokio::test]
    async fn test_super_admin_has_every_permission() {
        let h = started(RbacConfig::default()).await;
        h.store.assign_role("root", SUPER_ADMIN);

        assert!(h.cache.has_permission("root", "ANYTHING_AT_ALL").await.unwrap());
        assert!(h.cache.has_permission("root", "").await.unwrap());
    }

    #[tokio::test]
    async fn test_definition_changes_wait_for_refresh() {
        let h = started(RbacConfig::default()).await;
        h.store.define_role("EDITOR", &["ARTICLE_WRITE", "ARTICLE_PUBLISH"]);

        assert!(!h.cache.has_permission("u1", "ARTICLE_PUBLISH").await.unwrap());

        assert!(h.scheduler.tick().await);
        assert!(h.cache.has_permission("u1", "ARTICLE_PUBLISH").await.unwrap());
    }

    #[tokio::test]
    async fn test_assignment_changes_apply_immediately() {
        let h = started(RbacConfig::default()).await;
        h.store.assign_role("u2", "EDITOR");
        assert!(h.cache.has_permission("u2", "ARTICLE_WRITE").await.unwrap());

        h.store.unassign_role("u1", "EDITOR");
        assert!(!h.cache.has_permission("u1", "ARTICLE_WRITE").await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let h = started(RbacConfig::default()).await;
        let before = h.cache.last_refreshed();
        assert!(before.is_some());

        h.store.fail_role_loads(true);
        h.store.define_role("EDITOR", &[]);
        assert!(h.cache.refresh().await.is_err());
        assert!(h.scheduler.tick().await);

        assert!(h.cache.has_permission("u1", "ARTICLE_WRITE").await.unwrap());
        assert_eq!(h.cache.last_refreshed(), before);

        h.store.fail_role_loads(false);
        h.scheduler.tick().await;
        assert!(!h.cache.has_permission("u1", "ARTICLE_WRITE").await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_initial_load_serves_empty_snapshot() {
        let store = Arc::new(MemoryStore::new());
        store.define_role("EDITOR", &["ARTICLE_WRITE"]);
        store.assign_role("u1", "EDITOR");
        store.fail_role_loads(true);

        let scheduler = Arc::new(ManualScheduler::new());
        let cache = Arc::new(RbacCache::new(
            store.clone(),
            RbacConfig::default(),
            scheduler.clone(),
        ));
        cache.start().await;

        assert!(cache.last_refreshed().is_none());
        assert!(!cache.has_permission("u1", "ARTICLE_WRITE").await.unwrap());

        store.fail_role_loads(false);
        scheduler.tick().await;
        assert!(cache.has_permission("u1", "ARTICLE_WRITE").await.unwrap());
    }

    #[tokio::test]
    async fn test_has_role_is_exact_by_default() {
        let h = started(RbacConfig::default()).await;
        h.store.assign_role("root", SUPER_ADMIN);

        assert!(h.cache.has_role("u1", "EDITOR").await.unwrap());
        assert!(!h.cache.has_role("u1", "VIEWER").await.unwrap());
        assert!(h.cache.has_role("root", SUPER_ADMIN).await.unwrap());
        assert!(!h.cache.has_role("root", "EDITOR").await.unwrap());
    }

    #[tokio::test]
    async fn test_has_role_super_admin_bypass_when_enabled() {
        let h = started(RbacConfig {
            super_admin_satisfies_any_role: true,
            ..RbacConfig::default()
        })
        .await;
        h.store.assign_role("root", SUPER_ADMIN);

        assert!(h.cache.has_role("root", "EDITOR").await.unwrap());
        assert!(h.cache.has_role("root", "NOT_A_ROLE").await.unwrap());
        assert!(!h.cache.has_role("u1", "VIEWER").await.unwrap());
    }

    #[tokio::test]
    async fn test_permissions_for_unions_roles() {
        let h = started(RbacConfig::default()).await;
        h.store.define_role("VIEWER", &["ARTICLE_READ"]);
        h.store.assign_role("u1", "VIEWER");

        // VIEWER is assigned but not in the snapshot yet
        let before = h.cache.permissions_for("u1").await.unwrap();
        assert_eq!(before.into_iter().collect::<Vec<_>>(), vec!["ARTICLE_WRITE"]);

        h.scheduler.tick().await;
        let after = h.cache.permissions_for("u1").await.unwrap();
        assert_eq!(
            after.into_iter().collect::<Vec<_>>(),
            vec!["ARTICLE_READ", "ARTICLE_WRITE"]
        );
    }

    #[tokio::test]
    async fn test_loaded_at_comes_from_time_source() {
        let store = Arc::new(MemoryStore::new());
        store.define_role("EDITOR", &["ARTICLE_WRITE"]);
        let fixed = Utc::now() - chrono::Duration::hours(1);

        let cache = RbacCache::new(
            store,
            RbacConfig::default(),
            Arc::new(ManualScheduler::new()),
        )
        .with_time_source(Arc::new(move || fixed));
        cache.refresh().await.unwrap();

        assert_eq!(cache.last_refreshed(), Some(fixed));
    }

    #[tokio::test]
    async fn test_snapshot_survives_swap() {
        let h = started(RbacConfig::default()).await;
        let held = h.cache.snapshot();

        h.store.define_role("EDITOR", &[]);
        h.cache.refresh().await.unwrap();

        assert!(held.grants("EDITOR", "ARTICLE_WRITE"));
        assert!(!h.cache.snapshot().grants("EDITOR", "ARTICLE_WRITE"));
    }

    #[tokio::test]
    async fn test_slow_role_lookup_times_out() {
        let h = started(RbacConfig {
            store_timeout: Duration::from_millis(10),
            ..RbacConfig::default()
        })
        .await;

        h.store.set_latency(Some(Duration::from_millis(200)));
        assert!(matches!(
            h.cache.has_permission("u1", "ARTICLE_WRITE").await,
            Err(CoreError::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_stop_cancels_refresh() {
        let h = started(RbacConfig::default()).await;
        assert!(h.scheduler.is_running());

        h.cache.stop();
        assert!(!h.scheduler.is_running());
        assert!(!h.scheduler.tick().await);
    }
}
