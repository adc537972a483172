//! Role-based access control

mod cache;
mod snapshot;

pub use cache::{RbacCache, RbacConfig, TimeSource};
pub use snapshot::PermissionSnapshot;
