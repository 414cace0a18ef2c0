//! Contracts of the role and binding caches the resolver reads from.
//!
//! In production these are watch-backed informer caches kept fresh by the
//! API server; [`MemoryRbacStore`] is the in-process implementation used by
//! embedders that push objects themselves, and by the tests.

mod indexed;
mod memory;

use std::sync::Arc;

use crate::error::Result;
use crate::types::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};

pub use indexed::IndexedCache;
pub use memory::MemoryRbacStore;

/// Index function: object → index keys it should be found under.
pub type Indexer<T> = Arc<dyn Fn(&T) -> Vec<String> + Send + Sync>;

/// Lookup of roles and cluster roles by key.
pub trait RoleLookup: Send + Sync {
    fn cluster_role(&self, name: &str) -> Result<Arc<ClusterRole>>;
    fn role(&self, namespace: &str, name: &str) -> Result<Arc<Role>>;
}

/// A binding cache that supports named secondary indexes.
pub trait BindingIndex<B>: Send + Sync {
    /// Register `indexer` under `name`. Objects already present are indexed immediately.
    fn add_indexer(&self, name: &str, indexer: Indexer<B>);

    /// Objects indexed under `key` by the indexer `name`, in no particular order.
    fn by_index(&self, name: &str, key: &str) -> Result<Vec<Arc<B>>>;
}

/// Role create/update/delete notifications.
#[derive(Debug, Clone)]
pub enum RoleEvent {
    ClusterRoleChanged(Arc<ClusterRole>),
    ClusterRoleDeleted { name: String },
    RoleChanged(Arc<Role>),
    RoleDeleted { namespace: String, name: String },
}

/// Subscriber to the role-change feed.
pub trait RoleChangeHandler: Send + Sync {
    fn on_role_event(&self, event: &RoleEvent);
}

/// Everything the access store needs from the RBAC caches.
pub trait RbacSource: Send + Sync {
    fn roles(&self) -> Arc<dyn RoleLookup>;
    fn cluster_role_bindings(&self) -> Arc<dyn BindingIndex<ClusterRoleBinding>>;
    fn role_bindings(&self) -> Arc<dyn BindingIndex<RoleBinding>>;

    /// Deliver every future role event to `handler`.
    fn subscribe_roles(&self, handler: Arc<dyn RoleChangeHandler>);
}
