//! In-memory RBAC caches with a synchronous role-change feed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{BindingIndex, IndexedCache, RbacSource, RoleChangeHandler, RoleEvent, RoleLookup};
use crate::error::{AccessError, Result};
use crate::types::{ClusterRole, ClusterRoleBinding, ObjectMeta, Role, RoleBinding};

/// Cache key of an object: `name` when cluster-scoped, `namespace/name` otherwise.
pub fn object_key(meta: &ObjectMeta) -> String {
    namespaced_key(&meta.namespace, &meta.name)
}

fn namespaced_key(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}/{name}")
    }
}

#[derive(Default)]
struct RoleCaches {
    cluster_roles: IndexedCache<ClusterRole>,
    roles: IndexedCache<Role>,
}

impl RoleLookup for RoleCaches {
    fn cluster_role(&self, name: &str) -> Result<Arc<ClusterRole>> {
        self.cluster_roles
            .get(name)
            .ok_or_else(|| AccessError::not_found("ClusterRole", name))
    }

    fn role(&self, namespace: &str, name: &str) -> Result<Arc<Role>> {
        let key = namespaced_key(namespace, name);
        self.roles
            .get(&key)
            .ok_or_else(|| AccessError::not_found("Role", key))
    }
}

/// Role, cluster role and binding caches fed by direct upserts.
///
/// Role writes and their notifications happen under one feed lock, so
/// subscribers observe updates to the same role in write order. As on the
/// API server, every role write is assigned a new store-wide increasing
/// `resource_version`; a version supplied by the caller is replaced.
#[derive(Default)]
pub struct MemoryRbacStore {
    roles: Arc<RoleCaches>,
    cluster_role_bindings: Arc<IndexedCache<ClusterRoleBinding>>,
    role_bindings: Arc<IndexedCache<RoleBinding>>,
    handlers: Mutex<Vec<Arc<dyn RoleChangeHandler>>>,
    last_version: AtomicU64,
}

impl MemoryRbacStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_cluster_role(&self, mut cluster_role: ClusterRole) {
        let handlers = self.handlers.lock();
        self.stamp(&mut cluster_role.metadata);
        let key = object_key(&cluster_role.metadata);
        self.roles.cluster_roles.upsert(&key, cluster_role);
        if let Some(stored) = self.roles.cluster_roles.get(&key) {
            notify(&handlers, &RoleEvent::ClusterRoleChanged(stored));
        }
    }

    pub fn delete_cluster_role(&self, name: &str) {
        let handlers = self.handlers.lock();
        if self.roles.cluster_roles.delete(name).is_some() {
            notify(
                &handlers,
                &RoleEvent::ClusterRoleDeleted {
                    name: name.to_string(),
                },
            );
        }
    }

    pub fn upsert_role(&self, mut role: Role) {
        let handlers = self.handlers.lock();
        self.stamp(&mut role.metadata);
        let key = object_key(&role.metadata);
        self.roles.roles.upsert(&key, role);
        if let Some(stored) = self.roles.roles.get(&key) {
            notify(&handlers, &RoleEvent::RoleChanged(stored));
        }
    }

    pub fn delete_role(&self, namespace: &str, name: &str) {
        let handlers = self.handlers.lock();
        if self
            .roles
            .roles
            .delete(&namespaced_key(namespace, name))
            .is_some()
        {
            notify(
                &handlers,
                &RoleEvent::RoleDeleted {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                },
            );
        }
    }

    pub fn upsert_cluster_role_binding(&self, binding: ClusterRoleBinding) {
        let key = object_key(&binding.metadata);
        self.cluster_role_bindings.upsert(&key, binding);
    }

    pub fn delete_cluster_role_binding(&self, name: &str) {
        self.cluster_role_bindings.delete(name);
    }

    pub fn upsert_role_binding(&self, binding: RoleBinding) {
        let key = object_key(&binding.metadata);
        self.role_bindings.upsert(&key, binding);
    }

    pub fn delete_role_binding(&self, namespace: &str, name: &str) {
        self.role_bindings.delete(&namespaced_key(namespace, name));
    }

    /// Callers hold the feed lock, so versions are handed out in notification order.
    fn stamp(&self, meta: &mut ObjectMeta) {
        let version = self.last_version.fetch_add(1, Ordering::Relaxed) + 1;
        meta.resource_version = version.to_string();
    }
}

fn notify(handlers: &[Arc<dyn RoleChangeHandler>], event: &RoleEvent) {
    for handler in handlers {
        handler.on_role_event(event);
    }
}

impl RbacSource for MemoryRbacStore {
    fn roles(&self) -> Arc<dyn RoleLookup> {
        self.roles.clone()
    }

    fn cluster_role_bindings(&self) -> Arc<dyn BindingIndex<ClusterRoleBinding>> {
        self.cluster_role_bindings.clone()
    }

    fn role_bindings(&self) -> Arc<dyn BindingIndex<RoleBinding>> {
        self.role_bindings.clone()
    }

    /// Registers `handler` and replays every role currently cached, the way
    /// an informer's initial list does.
    fn subscribe_roles(&self, handler: Arc<dyn RoleChangeHandler>) {
        let mut handlers = self.handlers.lock();
        for cluster_role in self.roles.cluster_roles.list() {
            handler.on_role_event(&RoleEvent::ClusterRoleChanged(cluster_role));
        }
        for role in self.roles.roles.list() {
            handler.on_role_event(&RoleEvent::RoleChanged(role));
        }
        handlers.push(handler);
    }
}
