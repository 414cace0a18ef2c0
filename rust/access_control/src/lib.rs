//! `access_control`: RBAC permission resolution for the API gateway.
//!
//! Answers "what is this subject allowed to do" for every inbound request by
//! resolving the identity's role bindings into an [`AccessSet`], and caches the
//! result under a content hash of the bound roles and their revisions.
//!
//! Modules:
//! - `types`              RBAC objects (roles, bindings, subjects, rules)
//! - `access_set`         mergeable permission set and grant queries
//! - `store`              role/binding cache contracts + in-memory implementation
//! - `role_revision`      per-role revision tokens fed by change notifications
//! - `policy_rule_index`  subject → bindings → rules → grants
//! - `cache`              fixed-capacity LRU with per-entry TTL
//! - `access_store`       cached facade with per-identity invalidation
//! - `identity`           principal name + groups
//! - `config`             store configuration

pub mod access_set;
pub mod access_store;
pub mod cache;
pub mod config;
pub mod error;
pub mod identity;
pub mod policy_rule_index;
pub mod role_revision;
pub mod store;
pub mod types;

pub use access_set::{Access, AccessList, AccessSet, AccessSetPretty};
pub use access_store::{AccessSetLookup, AccessStore};
pub use config::AccessStoreConfig;
pub use error::{AccessError, Result};
pub use identity::{Identity, UserInfo};
pub use policy_rule_index::{PolicyRuleIndex, SubjectKind};
pub use role_revision::RoleRevisionIndex;
pub use store::{MemoryRbacStore, RbacSource, RoleEvent};
pub use types::GroupResource;

/// Wildcard value for verbs, groups, resources, namespaces and resource names.
pub const ALL: &str = "*";

/// API group of RBAC subjects.
pub const RBAC_GROUP: &str = "rbac.authorization.k8s.io";
