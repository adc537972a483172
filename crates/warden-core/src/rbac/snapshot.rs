use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use warden_db::Role;

/// Immutable role name -> permissions map, replaced wholesale on refresh
#[derive(Debug, Clone)]
pub struct PermissionSnapshot {
    permissions: HashMap<String, BTreeSet<String>>,
    loaded_at: Option<DateTime<Utc>>,
}

impl PermissionSnapshot {
    /// Snapshot that grants nothing; served until the first load succeeds
    pub fn empty() -> Self {
        Self {
            permissions: HashMap::new(),
            loaded_at: None,
        }
    }

    pub fn from_roles(roles: Vec<Role>, loaded_at: DateTime<Utc>) -> Self {
        Self {
            permissions: roles
                .into_iter()
                .map(|role| (role.name, role.permissions))
                .collect(),
            loaded_at: Some(loaded_at),
        }
    }

    pub fn grants(&self, role: &str, permission: &str) -> bool {
        self.permissions
            .get(role)
            .is_some_and(|set| set.contains(permission))
    }

    pub fn permissions(&self, role: &str) -> Option<&BTreeSet<String>> {
        self.permissions.get(role)
    }

    pub fn role_count(&self) -> usize {
        self.permissions.len()
    }

    /// When the data was read from the store; `None` before the first load
    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }
}

impl Default for PermissionSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(name: &str, permissions: &[&str]) -> Role {
        Role {
            id: format!("{}-id", name),
            name: name.to_string(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn test_grants() {
        let now = Utc::now();
        let snapshot = PermissionSnapshot::from_roles(
            vec![
                role("EDITOR", &["ARTICLE_WRITE", "ARTICLE_READ"]),
                role("VIEWER", &["ARTICLE_READ"]),
            ],
            now,
        );

        assert_eq!(snapshot.role_count(), 2);
        assert_eq!(snapshot.loaded_at(), Some(now));
        assert!(snapshot.grants("EDITOR", "ARTICLE_WRITE"));
        assert!(!snapshot.grants("VIEWER", "ARTICLE_WRITE"));
        assert!(!snapshot.grants("MISSING", "ARTICLE_READ"));
        assert_eq!(snapshot.permissions("VIEWER").map(|p| p.len()), Some(1));
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = PermissionSnapshot::empty();
        assert_eq!(snapshot.role_count(), 0);
        assert!(snapshot.loaded_at().is_none());
        assert!(!snapshot.grants("EDITOR", "ARTICLE_WRITE"));
    }
}
