//! Subject → bindings → roles → expanded grants.
//!
//! One index is built per subject kind. Both register secondary indexers on
//! the binding caches that map a binding to the subject names it targets, and
//! differ only in the kind they match and the index names they register.

use std::sync::Arc;

use crate::access_set::{Access, AccessSet};
use crate::role_revision::RoleRevisionIndex;
use crate::store::{BindingIndex, RbacSource, RoleLookup};
use crate::types::{
    ClusterRoleBinding, GroupResource, PolicyRule, RoleBinding, RoleRef, RoleRefKind, Subject,
};
use crate::{ALL, RBAC_GROUP};

/// Separator written after every hashed field.
const NULL: &[u8] = &[0];

/// Kind of subject an index matches bindings against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubjectKind {
    User,
    Group,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::User => "User",
            SubjectKind::Group => "Group",
        }
    }
}

/// Index names an instance contributes to a binding cache for a kind.
fn index_names(kind: SubjectKind) -> (String, String) {
    (format!("crb{}", kind.as_str()), format!("rb{}", kind.as_str()))
}

/// Names under which `subjects` are indexed for `kind`.
///
/// Service accounts are users for binding purposes and are keyed as
/// `serviceaccount:<namespace>:<name>`.
fn subject_names(kind: SubjectKind, subjects: &[Subject]) -> Vec<String> {
    let mut result = Vec::new();
    for subject in subjects {
        if subject.api_group == RBAC_GROUP && subject.kind == kind.as_str() {
            result.push(subject.name.clone());
        } else if subject.api_group.is_empty()
            && kind == SubjectKind::User
            && subject.kind == "ServiceAccount"
        {
            if let Some(namespace) = subject.namespace.as_deref().filter(|ns| !ns.is_empty()) {
                result.push(format!("serviceaccount:{}:{}", namespace, subject.name));
            }
        }
    }
    result
}

fn cluster_role_binding_subjects(kind: SubjectKind, crb: &ClusterRoleBinding) -> Vec<String> {
    if crb.role_ref.kind != RoleRefKind::ClusterRole {
        return Vec::new();
    }
    subject_names(kind, &crb.subjects)
}

fn role_binding_subjects(kind: SubjectKind, rb: &RoleBinding) -> Vec<String> {
    subject_names(kind, &rb.subjects)
}

/// Resolves the grants and the role fingerprint of one subject kind.
pub struct PolicyRuleIndex {
    kind: SubjectKind,
    roles: Arc<dyn RoleLookup>,
    cluster_role_bindings: Arc<dyn BindingIndex<ClusterRoleBinding>>,
    role_bindings: Arc<dyn BindingIndex<RoleBinding>>,
    revisions: Arc<RoleRevisionIndex>,
    cluster_role_index_key: String,
    role_index_key: String,
}

impl PolicyRuleIndex {
    /// Build an index for `kind` and register its indexers on `source`'s binding caches.
    pub fn new(kind: SubjectKind, revisions: Arc<RoleRevisionIndex>, source: &dyn RbacSource) -> Self {
        let (cluster_role_index_key, role_index_key) = index_names(kind);
        let cluster_role_bindings = source.cluster_role_bindings();
        let role_bindings = source.role_bindings();

        cluster_role_bindings.add_indexer(
            &cluster_role_index_key,
            Arc::new(move |crb: &ClusterRoleBinding| cluster_role_binding_subjects(kind, crb)),
        );
        role_bindings.add_indexer(
            &role_index_key,
            Arc::new(move |rb: &RoleBinding| role_binding_subjects(kind, rb)),
        );

        Self {
            kind,
            roles: source.roles(),
            cluster_role_bindings,
            role_bindings,
            revisions,
            cluster_role_index_key,
            role_index_key,
        }
    }

    pub fn kind(&self) -> SubjectKind {
        self.kind
    }

    /// Freshly built grants for `subject_name`.
    ///
    /// Role bindings grant within their own namespace; cluster role bindings
    /// grant everywhere (`*`). Dangling role references grant nothing.
    pub fn get(&self, subject_name: &str) -> AccessSet {
        let mut result = AccessSet::new();

        for binding in self.role_bindings_for(subject_name) {
            self.add_access(&mut result, &binding.metadata.namespace, &binding.role_ref);
        }

        for binding in self.cluster_role_bindings_for(subject_name) {
            self.add_access(&mut result, ALL, &binding.role_ref);
        }

        result
    }

    /// Feed every role bound to `subject_name`, with its revision, into `digest`.
    ///
    /// Cluster role bindings come first ordered by name, then role bindings
    /// ordered by uid. Every field is followed by a NUL byte. Returns the
    /// `name/revision` or `namespace/name/revision` descriptor of each role
    /// hashed, in hashing order.
    pub fn add_roles_to_hash(&self, digest: &mut blake3::Hasher, subject_name: &str) -> Vec<String> {
        let mut role_info = Vec::new();

        for crb in self.cluster_role_bindings_for(subject_name) {
            let name = &crb.role_ref.name;
            let revision = self.revisions.role_revision("", name);

            digest.update(name.as_bytes());
            digest.update(NULL);
            digest.update(revision.as_bytes());
            digest.update(NULL);

            role_info.push(format!("{name}/{revision}"));
        }

        for rb in self.role_bindings_for(subject_name) {
            let name = &rb.role_ref.name;
            let namespace = &rb.metadata.namespace;
            let revision = match rb.role_ref.kind {
                RoleRefKind::ClusterRole => self.revisions.role_revision("", name),
                RoleRefKind::Role => self.revisions.role_revision(namespace, name),
                RoleRefKind::Unknown => String::new(),
            };

            digest.update(name.as_bytes());
            digest.update(NULL);
            digest.update(namespace.as_bytes());
            digest.update(NULL);
            digest.update(revision.as_bytes());
            digest.update(NULL);

            role_info.push(format!("{namespace}/{name}/{revision}"));
        }

        role_info
    }

    fn add_access(&self, access_set: &mut AccessSet, namespace: &str, role_ref: &RoleRef) {
        for rule in self.rules(namespace, role_ref) {
            expand_rule(access_set, namespace, &rule);
        }
    }

    fn rules(&self, namespace: &str, role_ref: &RoleRef) -> Vec<PolicyRule> {
        let rules = match role_ref.kind {
            RoleRefKind::ClusterRole => self
                .roles
                .cluster_role(&role_ref.name)
                .map(|cr| cr.rules.clone()),
            RoleRefKind::Role => self
                .roles
                .role(namespace, &role_ref.name)
                .map(|r| r.rules.clone()),
            RoleRefKind::Unknown => {
                tracing::debug!(name = %role_ref.name, "role reference of unknown kind grants nothing");
                return Vec::new();
            }
        };
        rules.unwrap_or_else(|e| {
            tracing::debug!(kind = self.kind.as_str(), error = %e, "role reference grants nothing");
            Vec::new()
        })
    }

    fn cluster_role_bindings_for(&self, subject_name: &str) -> Vec<Arc<ClusterRoleBinding>> {
        let mut result = self
            .cluster_role_bindings
            .by_index(&self.cluster_role_index_key, subject_name)
            .unwrap_or_else(|e| {
                tracing::debug!(error = %e, subject = subject_name, "cluster role binding lookup failed");
                Vec::new()
            });
        result.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        result
    }

    fn role_bindings_for(&self, subject_name: &str) -> Vec<Arc<RoleBinding>> {
        let mut result = self
            .role_bindings
            .by_index(&self.role_index_key, subject_name)
            .unwrap_or_else(|e| {
                tracing::debug!(error = %e, subject = subject_name, "role binding lookup failed");
                Vec::new()
            });
        result.sort_by(|a, b| {
            (&a.metadata.uid, &a.metadata.namespace, &a.metadata.name).cmp(&(
                &b.metadata.uid,
                &b.metadata.namespace,
                &b.metadata.name,
            ))
        });
        result
    }
}

/// Add `api_groups × resources × resource_names × verbs` of `rule` to `access_set`.
/// An empty `resource_names` list means `*`.
fn expand_rule(access_set: &mut AccessSet, namespace: &str, rule: &PolicyRule) {
    let all = [ALL.to_string()];
    let names: &[String] = if rule.resource_names.is_empty() {
        &all
    } else {
        &rule.resource_names
    };

    for group in &rule.api_groups {
        for resource in &rule.resources {
            for resource_name in names {
                for verb in &rule.verbs {
                    access_set.add(
                        verb,
                        GroupResource::new(group, resource),
                        Access::new(namespace, resource_name),
                    );
                }
            }
        }
    }
}
