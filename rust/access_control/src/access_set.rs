//! Resolved, mergeable permission set for one identity.

use std::collections::BTreeSet;

use ahash::{AHashMap, AHashSet};
use serde::Serialize;

use crate::types::GroupResource;
use crate::ALL;

/// Scope of a grant: a namespace and a resource name, either of which may be `*`.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Access {
    pub namespace: String,
    pub resource_name: String,
}

impl Access {
    pub fn new(namespace: &str, resource_name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            resource_name: resource_name.to_string(),
        }
    }

    /// Whether this scope covers `name` in `namespace`.
    pub fn grants(&self, namespace: &str, name: &str) -> bool {
        self.namespace_ok(namespace) && self.name_ok(name)
    }

    fn namespace_ok(&self, namespace: &str) -> bool {
        self.namespace == ALL || self.namespace == namespace
    }

    fn name_ok(&self, name: &str) -> bool {
        self.resource_name == ALL || self.resource_name == name
    }
}

/// Flattened scopes for one (verb, group/resource) query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessList(pub Vec<Access>);

impl AccessList {
    pub fn grants(&self, namespace: &str, name: &str) -> bool {
        self.0.iter().any(|a| a.grants(namespace, name))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
struct SetKey {
    verb: String,
    gr: GroupResource,
}

/// Mapping of (verb, group/resource) to the scopes it is granted on.
///
/// Built once by the resolving call, then published behind an `Arc` and never
/// mutated again. A key is only present if at least one [`Access`] was added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessSet {
    /// Cache key this set was stored under; empty until cached.
    pub id: String,
    set: AHashMap<SetKey, AHashSet<Access>>,
}

impl AccessSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `access` for `(verb, gr)`. Adding the same triple twice is a no-op.
    pub fn add(&mut self, verb: &str, gr: GroupResource, access: Access) {
        self.set
            .entry(SetKey {
                verb: verb.to_string(),
                gr,
            })
            .or_default()
            .insert(access);
    }

    /// Union `other` into `self`. `other` is left untouched.
    pub fn merge(&mut self, other: &AccessSet) {
        for (key, accesses) in &other.set {
            let target = self.set.entry(key.clone()).or_default();
            for access in accesses {
                if !target.contains(access) {
                    target.insert(access.clone());
                }
            }
        }
    }

    /// Union of `self` and `other` as a new set; neither input changes.
    pub fn merged(&self, other: &AccessSet) -> AccessSet {
        let mut result = AccessSet {
            id: String::new(),
            set: self.set.clone(),
        };
        result.merge(other);
        result
    }

    /// Whether `verb` on `gr` is permitted for `name` in `namespace`,
    /// honouring `*` in the verb, group and resource of stored keys.
    pub fn grants(&self, verb: &str, gr: &GroupResource, namespace: &str, name: &str) -> bool {
        self.matching(verb, gr)
            .any(|accesses| accesses.iter().any(|a| a.grants(namespace, name)))
    }

    /// All scopes under which `verb` on `gr` is granted, deduplicated.
    pub fn access_list_for(&self, verb: &str, gr: &GroupResource) -> AccessList {
        let mut dedup: AHashSet<&Access> = AHashSet::new();
        for accesses in self.matching(verb, gr) {
            dedup.extend(accesses.iter());
        }
        let mut list: Vec<Access> = dedup.into_iter().cloned().collect();
        list.sort();
        AccessList(list)
    }

    /// Concrete namespaces reachable through `get` or `list` grants, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        let mut result = BTreeSet::new();
        for (key, accesses) in &self.set {
            if key.verb != "get" && key.verb != "list" {
                continue;
            }
            for access in accesses {
                if access.namespace != ALL {
                    result.insert(access.namespace.clone());
                }
            }
        }
        result.into_iter().collect()
    }

    fn matching<'a>(
        &'a self,
        verb: &'a str,
        gr: &'a GroupResource,
    ) -> impl Iterator<Item = &'a AHashSet<Access>> + 'a {
        [ALL, verb].into_iter().flat_map(move |v| {
            [ALL, gr.group.as_str()].into_iter().flat_map(move |g| {
                [ALL, gr.resource.as_str()].into_iter().filter_map(move |r| {
                    self.set.get(&SetKey {
                        verb: v.to_string(),
                        gr: GroupResource::new(g, r),
                    })
                })
            })
        })
    }

    /// Iterate `(verb, group/resource, scopes)` entries in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &GroupResource, &AHashSet<Access>)> {
        self.set
            .iter()
            .map(|(key, accesses)| (key.verb.as_str(), &key.gr, accesses))
    }

    /// Number of (verb, group/resource) keys.
    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Compare grant content, ignoring `id`.
    pub fn same_grants(&self, other: &AccessSet) -> bool {
        self.set == other.set
    }

    /// Deterministic, serializable snapshot for logging.
    pub fn to_pretty(&self) -> AccessSetPretty {
        let mut set: Vec<SetEntry> = self
            .set
            .iter()
            .map(|(key, accesses)| {
                let mut resource_access_set: Vec<Access> = accesses.iter().cloned().collect();
                resource_access_set.sort();
                SetEntry {
                    key: PrettyKey {
                        verb: key.verb.clone(),
                        group_resource: key.gr.clone(),
                    },
                    resource_access_set,
                }
            })
            .collect();
        set.sort_by(|a, b| {
            (&a.key.verb, &a.key.group_resource).cmp(&(&b.key.verb, &b.key.group_resource))
        });
        AccessSetPretty {
            id: self.id.clone(),
            set,
        }
    }
}

/// Sorted view of an [`AccessSet`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessSetPretty {
    pub id: String,
    pub set: Vec<SetEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetEntry {
    pub key: PrettyKey,
    pub resource_access_set: Vec<Access>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrettyKey {
    pub verb: String,
    pub group_resource: GroupResource,
}
