//! RBAC object model consumed by the resolver.
//!
//! Field names follow the Kubernetes `rbac.authorization.k8s.io/v1` JSON
//! encoding so fixtures and watch payloads deserialize directly.

use serde::{Deserialize, Serialize};

use crate::RBAC_GROUP;

/// A (group, resource) pair, e.g. `("apps", "deployments")`.
#[derive(Debug, Clone, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct GroupResource {
    pub group: String,
    pub resource: String,
}

impl GroupResource {
    pub fn new(group: &str, resource: &str) -> Self {
        Self {
            group: group.to_string(),
            resource: resource.to_string(),
        }
    }
}

/// The subset of object metadata the resolver reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    /// Empty for cluster-scoped objects.
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub uid: String,
    /// Opaque version token, bumped on every write.
    #[serde(default)]
    pub resource_version: String,
}

impl ObjectMeta {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn namespaced(namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            ..Default::default()
        }
    }

    pub fn with_uid(mut self, uid: &str) -> Self {
        self.uid = uid.to_string();
        self
    }

    pub fn with_resource_version(mut self, resource_version: &str) -> Self {
        self.resource_version = resource_version.to_string();
        self
    }
}

/// A grant template: `api_groups × resources × resource_names × verbs`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    #[serde(default)]
    pub api_groups: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
    /// Empty means every resource name.
    #[serde(default)]
    pub resource_names: Vec<String>,
    #[serde(default)]
    pub verbs: Vec<String>,
}

impl PolicyRule {
    pub fn new(api_groups: &[&str], resources: &[&str], verbs: &[&str]) -> Self {
        Self {
            api_groups: to_strings(api_groups),
            resources: to_strings(resources),
            resource_names: Vec::new(),
            verbs: to_strings(verbs),
        }
    }

    pub fn with_resource_names(mut self, names: &[&str]) -> Self {
        self.resource_names = to_strings(names);
        self
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRole {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

impl ClusterRole {
    pub fn new(name: &str, rules: Vec<PolicyRule>) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
            rules,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

impl Role {
    pub fn new(namespace: &str, name: &str, rules: Vec<PolicyRule>) -> Self {
        Self {
            metadata: ObjectMeta::namespaced(namespace, name),
            rules,
        }
    }
}

/// Kind of role a binding points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoleRefKind {
    Role,
    ClusterRole,
    /// Any other kind; resolves to no rules.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleRef {
    #[serde(default)]
    pub api_group: String,
    pub kind: RoleRefKind,
    pub name: String,
}

impl RoleRef {
    pub fn cluster_role(name: &str) -> Self {
        Self {
            api_group: RBAC_GROUP.to_string(),
            kind: RoleRefKind::ClusterRole,
            name: name.to_string(),
        }
    }

    pub fn role(name: &str) -> Self {
        Self {
            api_group: RBAC_GROUP.to_string(),
            kind: RoleRefKind::Role,
            name: name.to_string(),
        }
    }
}

/// A principal targeted by a binding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    /// `rbac.authorization.k8s.io` for users and groups, empty for service accounts.
    #[serde(default)]
    pub api_group: String,
    /// `User`, `Group` or `ServiceAccount`.
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

impl Subject {
    pub fn user(name: &str) -> Self {
        Self {
            api_group: RBAC_GROUP.to_string(),
            kind: "User".to_string(),
            name: name.to_string(),
            namespace: None,
        }
    }

    pub fn group(name: &str) -> Self {
        Self {
            api_group: RBAC_GROUP.to_string(),
            kind: "Group".to_string(),
            name: name.to_string(),
            namespace: None,
        }
    }

    pub fn service_account(namespace: &str, name: &str) -> Self {
        Self {
            api_group: String::new(),
            kind: "ServiceAccount".to_string(),
            name: name.to_string(),
            namespace: Some(namespace.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRoleBinding {
    pub metadata: ObjectMeta,
    pub role_ref: RoleRef,
    #[serde(default)]
    pub subjects: Vec<Subject>,
}

impl ClusterRoleBinding {
    pub fn new(name: &str, role_ref: RoleRef, subjects: Vec<Subject>) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
            role_ref,
            subjects,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleBinding {
    pub metadata: ObjectMeta,
    pub role_ref: RoleRef,
    #[serde(default)]
    pub subjects: Vec<Subject>,
}

impl RoleBinding {
    pub fn new(namespace: &str, name: &str, role_ref: RoleRef, subjects: Vec<Subject>) -> Self {
        Self {
            metadata: ObjectMeta::namespaced(namespace, name).with_uid(&format!("{namespace}/{name}")),
            role_ref,
            subjects,
        }
    }
}
