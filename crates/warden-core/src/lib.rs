//! Warden Core
//!
//! Role-based access control backed by a periodically refreshed
//! in-memory permission snapshot, and the scheduler that drives the refresh.

pub mod error;
pub mod rbac;
pub mod scheduler;

pub use error::CoreError;
pub use rbac::{PermissionSnapshot, RbacCache, RbacConfig, TimeSource};
pub use scheduler::{MIN_INTERVAL, ManualScheduler, ScheduledTask, Scheduler, TokioScheduler};
