//! Per-role revision tokens, the freshness signal behind cache keys.

use std::sync::Arc;

use dashmap::DashMap;

use crate::store::{RbacSource, RoleChangeHandler, RoleEvent};

/// (namespace, name); namespace is empty for cluster roles.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
struct RoleKey {
    namespace: String,
    name: String,
}

impl RoleKey {
    fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

/// Tracks the latest observed resource version of every role.
///
/// Kept current by the role-change feed; reads are lock-free.
#[derive(Debug, Default)]
pub struct RoleRevisionIndex {
    revisions: DashMap<RoleKey, String>,
}

impl RoleRevisionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an index and subscribe it to `source`'s role-change feed.
    pub fn subscribe(source: &dyn RbacSource) -> Arc<Self> {
        let index = Arc::new(Self::new());
        source.subscribe_roles(index.clone());
        index
    }

    /// Revision of a role, or `""` when the role has never been observed.
    pub fn role_revision(&self, namespace: &str, name: &str) -> String {
        self.revisions
            .get(&RoleKey::new(namespace, name))
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    /// Number of roles with a recorded revision.
    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }
}

impl RoleChangeHandler for RoleRevisionIndex {
    fn on_role_event(&self, event: &RoleEvent) {
        match event {
            RoleEvent::ClusterRoleChanged(cr) => {
                self.revisions.insert(
                    RoleKey::new("", &cr.metadata.name),
                    cr.metadata.resource_version.clone(),
                );
            }
            RoleEvent::ClusterRoleDeleted { name } => {
                self.revisions.remove(&RoleKey::new("", name));
            }
            RoleEvent::RoleChanged(role) => {
                self.revisions.insert(
                    RoleKey::new(&role.metadata.namespace, &role.metadata.name),
                    role.metadata.resource_version.clone(),
                );
            }
            RoleEvent::RoleDeleted { namespace, name } => {
                self.revisions.remove(&RoleKey::new(namespace, name));
            }
        }
        tracing::trace!(?event, "role revision updated");
    }
}
