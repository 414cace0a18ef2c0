//! Cached AccessSet resolution with per-identity invalidation.
//!
//! # Flow
//!
//! ```text
//!   access_for(identity)
//!     ├── cache_key = blake3(user roles ‖ sorted group roles, with revisions)
//!     ├── hit  → shared Arc<AccessSet>
//!     └── miss → users.get(name) ∪ groups.get(g) for each group
//!                → stamp id, cache, evict the identity's previous key
//! ```
//!
//! The LRU/TTL cache cannot tell that an identity's old entry is stale once
//! its roles change (the new state hashes to a different key), so the store
//! also remembers the last key computed per identity and evicts the old one.
//! Each lookup takes a ticket before computing its key; a lookup that
//! finishes after a later-started one for the same identity leaves the map
//! and the cache alone. Keys leaving the cache through LRU pressure or
//! expiry are dropped from the map.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::access_set::AccessSet;
use crate::cache::ExpiringLruCache;
use crate::config::AccessStoreConfig;
use crate::identity::UserInfo;
use crate::policy_rule_index::{PolicyRuleIndex, SubjectKind};
use crate::role_revision::RoleRevisionIndex;
use crate::store::RbacSource;

/// Resolve the permissions of an identity.
pub trait AccessSetLookup: Send + Sync {
    fn access_for(&self, user: &dyn UserInfo) -> Arc<AccessSet>;
}

/// Key recorded for an identity, and the ticket of the resolution that recorded it.
#[derive(Debug)]
struct Tracked {
    key: String,
    ticket: u64,
}

/// Outcome of [`InvalidationMap::record`].
#[derive(Debug, PartialEq, Eq)]
enum Recorded {
    /// The identity now points at the key; carries its previous key if no
    /// identity refers to that one any more.
    Current(Option<String>),
    /// A resolution that started later was already recorded.
    Superseded,
}

/// identity → latest key, plus the identities pointing at each key.
///
/// Identities with identical bound roles share a key, so a key is only
/// evicted once no identity refers to it any more. Tickets order
/// resolutions by when they started computing their key.
#[derive(Debug, Default)]
struct InvalidationMap {
    last_ticket: u64,
    latest: HashMap<String, Tracked>,
    holders: HashMap<String, HashSet<String>>,
}

impl InvalidationMap {
    fn ticket(&mut self) -> u64 {
        self.last_ticket += 1;
        self.last_ticket
    }

    fn record(&mut self, identity: &str, key: &str, ticket: u64) -> Recorded {
        if self.latest.get(identity).is_some_and(|t| t.ticket > ticket) {
            return Recorded::Superseded;
        }
        let tracked = Tracked {
            key: key.to_string(),
            ticket,
        };
        let previous = self.latest.insert(identity.to_string(), tracked);
        self.holders
            .entry(key.to_string())
            .or_default()
            .insert(identity.to_string());

        let Some(previous) = previous.filter(|p| p.key != key) else {
            return Recorded::Current(None);
        };
        let unreferenced = match self.holders.get_mut(&previous.key) {
            Some(identities) => {
                identities.remove(identity);
                identities.is_empty()
            }
            None => true,
        };
        if unreferenced {
            self.holders.remove(&previous.key);
            Recorded::Current(Some(previous.key))
        } else {
            Recorded::Current(None)
        }
    }

    /// Drop every identity still pointing at `key` once it has left the cache.
    fn forget(&mut self, key: &str) {
        let Some(identities) = self.holders.remove(key) else {
            return;
        };
        for identity in identities {
            if self.latest.get(&identity).is_some_and(|t| t.key == key) {
                self.latest.remove(&identity);
            }
        }
    }
}

/// Shared, cached permission resolver.
pub struct AccessStore {
    users: PolicyRuleIndex,
    groups: PolicyRuleIndex,
    revisions: Arc<RoleRevisionIndex>,
    cache: Option<ExpiringLruCache<Arc<AccessSet>>>,
    cache_ttl: Duration,
    invalidation: Mutex<InvalidationMap>,
}

impl AccessStore {
    /// Wire a store onto `source`: subscribes a revision index to its role
    /// feed and registers the user and group indexers on its binding caches.
    pub fn new(config: &AccessStoreConfig, source: &dyn RbacSource) -> Self {
        let revisions = RoleRevisionIndex::subscribe(source);
        let users = PolicyRuleIndex::new(SubjectKind::User, revisions.clone(), source);
        let groups = PolicyRuleIndex::new(SubjectKind::Group, revisions.clone(), source);
        let cache = config
            .cache_results
            .then(|| ExpiringLruCache::new(config.cache_capacity));

        tracing::debug!(
            cache_results = config.cache_results,
            capacity = config.cache_capacity.get(),
            ttl_secs = config.cache_ttl.as_secs(),
            "access store initialized"
        );

        Self {
            users,
            groups,
            revisions,
            cache,
            cache_ttl: config.cache_ttl,
            invalidation: Mutex::new(InvalidationMap::default()),
        }
    }

    /// Permissions of `user`, served from cache when its roles are unchanged.
    pub fn access_for(&self, user: &dyn UserInfo) -> Arc<AccessSet> {
        let Some(cache) = &self.cache else {
            let result = Arc::new(self.compute(user));
            log_access_set(&result);
            return result;
        };

        let ticket = self.invalidation.lock().ticket();
        let cache_key = self.cache_key(user);
        match cache.get(&cache_key) {
            Some(hit) if hit.id == cache_key => {
                tracing::trace!(identity = user.name(), key = %cache_key, "access set cache hit");
                self.track(cache, user.name(), &cache_key, ticket, None);
                return hit;
            }
            Some(_) => {
                tracing::debug!(key = %cache_key, "cached access set under foreign key, recomputing");
            }
            None => {
                tracing::trace!(identity = user.name(), key = %cache_key, "access set cache miss");
            }
        }

        let mut result = self.compute(user);
        result.id = cache_key.clone();
        let result = Arc::new(result);
        self.track(cache, user.name(), &cache_key, ticket, Some(result.clone()));
        log_access_set(&result);
        result
    }

    /// Hex digest over every role bound to `user` directly or through its
    /// groups, with each role's current revision.
    pub fn cache_key(&self, user: &dyn UserInfo) -> String {
        let mut digest = blake3::Hasher::new();
        let mut roles = self.users.add_roles_to_hash(&mut digest, user.name());

        let mut groups: Vec<&str> = user.groups().iter().map(String::as_str).collect();
        groups.sort_unstable();
        for group in groups {
            roles.extend(self.groups.add_roles_to_hash(&mut digest, group));
        }

        let key = digest.finalize().to_hex().to_string();
        tracing::trace!(identity = user.name(), key = %key, ?roles, "computed access cache key");
        key
    }

    /// Number of cached AccessSets (0 when caching is disabled).
    pub fn cache_len(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| c.len())
    }

    /// Cached AccessSet for `key`, without refreshing its LRU position.
    pub fn cached(&self, key: &str) -> Option<Arc<AccessSet>> {
        self.cache.as_ref().and_then(|c| c.peek(key))
    }

    /// Drop expired AccessSets; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let Some(cache) = &self.cache else {
            return 0;
        };
        let mut invalidation = self.invalidation.lock();
        let expired = cache.purge_expired();
        for key in &expired {
            invalidation.forget(key);
        }
        expired.len()
    }

    pub fn revisions(&self) -> &Arc<RoleRevisionIndex> {
        &self.revisions
    }

    fn compute(&self, user: &dyn UserInfo) -> AccessSet {
        let mut result = self.users.get(user.name());
        for group in user.groups() {
            result.merge(&self.groups.get(group));
        }
        result
    }

    /// Point `identity` at `key`, inserting `fresh` when given, and evict the
    /// key it held before once no identity refers to it. A resolution whose
    /// `ticket` predates the one already recorded for the identity changes
    /// nothing. Runs as one critical section; lock order is invalidation map,
    /// then cache.
    fn track(
        &self,
        cache: &ExpiringLruCache<Arc<AccessSet>>,
        identity: &str,
        key: &str,
        ticket: u64,
        fresh: Option<Arc<AccessSet>>,
    ) {
        let mut invalidation = self.invalidation.lock();
        let stale = match invalidation.record(identity, key, ticket) {
            Recorded::Current(stale) => stale,
            Recorded::Superseded => {
                tracing::debug!(identity, key, "newer resolution already recorded, skipping");
                return;
            }
        };
        if let Some(result) = fresh {
            if let Some(evicted) = cache.add(key, result, self.cache_ttl) {
                invalidation.forget(&evicted);
            }
        }
        if let Some(stale) = stale {
            cache.remove(&stale);
            tracing::debug!(identity, stale = %stale, key, "evicted superseded access set");
        }
    }
}

impl AccessSetLookup for AccessStore {
    fn access_for(&self, user: &dyn UserInfo) -> Arc<AccessSet> {
        AccessStore::access_for(self, user)
    }
}

fn log_access_set(set: &AccessSet) {
    if tracing::enabled!(tracing::Level::TRACE) {
        match serde_json::to_string(&set.to_pretty()) {
            Ok(json) => tracing::trace!(access_set = %json, "resolved access set"),
            Err(e) => tracing::trace!(error = %e, "failed to render access set"),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_set::Access;
    use crate::identity::Identity;
    use crate::store::MemoryRbacStore;
    use crate::types::{
        ClusterRole, ClusterRoleBinding, GroupResource, PolicyRule, Role, RoleBinding, RoleRef,
        Subject,
    };
    use rayon::prelude::*;

    fn editor(verbs: &[&str]) -> ClusterRole {
        ClusterRole::new("editor", vec![PolicyRule::new(&[""], &["configmaps"], verbs)])
    }

    fn configmaps() -> GroupResource {
        GroupResource::new("", "configmaps")
    }

    /// alice → Role team-a/viewer; group devs → ClusterRole editor.
    fn seeded_store() -> MemoryRbacStore {
        let store = MemoryRbacStore::new();
        store.upsert_role(Role::new(
            "team-a",
            "viewer",
            vec![PolicyRule::new(&[""], &["pods"], &["get"])],
        ));
        store.upsert_cluster_role(editor(&["update"]));
        store.upsert_role_binding(RoleBinding::new(
            "team-a",
            "alice-view",
            RoleRef::role("viewer"),
            vec![Subject::user("alice")],
        ));
        store.upsert_cluster_role_binding(ClusterRoleBinding::new(
            "devs-edit",
            RoleRef::cluster_role("editor"),
            vec![Subject::group("devs")],
        ));
        store
    }

    fn grants_of(set: &AccessSet) -> Vec<(String, GroupResource, Vec<Access>)> {
        let mut out: Vec<_> = set
            .iter()
            .map(|(verb, gr, accesses)| {
                let mut accesses: Vec<Access> = accesses.iter().cloned().collect();
                accesses.sort();
                (verb.to_string(), gr.clone(), accesses)
            })
            .collect();
        out.sort();
        out
    }

    fn tracked_identities(store: &AccessStore) -> usize {
        store.invalidation.lock().latest.len()
    }

    // ============================================================================
    // Resolution and cache keys
    // ============================================================================

    #[test]
    fn alice_resolves_own_and_group_grants() {
        let source = seeded_store();
        let store = AccessStore::new(&AccessStoreConfig::default(), &source);

        let set = store.access_for(&Identity::new("alice", &["devs"]));
        assert_eq!(
            grants_of(&set),
            vec![
                (
                    "get".to_string(),
                    GroupResource::new("", "pods"),
                    vec![Access::new("team-a", "*")]
                ),
                ("update".to_string(), configmaps(), vec![Access::new("*", "*")]),
            ]
        );
    }

    #[test]
    fn repeated_lookup_is_served_from_cache() {
        let source = seeded_store();
        let store = AccessStore::new(&AccessStoreConfig::default(), &source);
        let alice = Identity::new("alice", &["devs"]);

        let first = store.access_for(&alice);
        let second = store.access_for(&alice);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.id, store.cache_key(&alice));
        assert_eq!(store.cache_len(), 1);
    }

    #[test]
    fn cache_key_ignores_group_order() {
        let source = seeded_store();
        source.upsert_cluster_role_binding(ClusterRoleBinding::new(
            "ops-edit",
            RoleRef::cluster_role("editor"),
            vec![Subject::group("ops")],
        ));
        let store = AccessStore::new(&AccessStoreConfig::default(), &source);

        assert_eq!(
            store.cache_key(&Identity::new("alice", &["devs", "ops"])),
            store.cache_key(&Identity::new("alice", &["ops", "devs"]))
        );
        assert_ne!(
            store.cache_key(&Identity::new("alice", &["devs"])),
            store.cache_key(&Identity::new("alice", &["devs", "ops"]))
        );
    }

    #[test]
    fn cache_key_tracks_bound_role_revisions_only() {
        let source = seeded_store();
        source.upsert_cluster_role(ClusterRole::new("unrelated", vec![]));
        let store = AccessStore::new(&AccessStoreConfig::default(), &source);
        let alice = Identity::new("alice", &["devs"]);
        let before = store.cache_key(&alice);

        source.upsert_cluster_role(ClusterRole::new("unrelated", vec![]));
        assert_eq!(store.cache_key(&alice), before);

        source.upsert_cluster_role(editor(&["update", "patch"]));
        assert_ne!(store.cache_key(&alice), before);
    }

    #[test]
    fn revoked_rule_is_not_served_from_cache() {
        let source = seeded_store();
        let store = AccessStore::new(&AccessStoreConfig::default(), &source);
        let alice = Identity::new("alice", &["devs"]);
        assert!(store.access_for(&alice).grants("update", &configmaps(), "x", "y"));

        // no resource version set by the writer
        source.upsert_cluster_role(ClusterRole::new("editor", vec![]));
        assert!(!store.access_for(&alice).grants("update", &configmaps(), "x", "y"));
    }

    // ============================================================================
    // Invalidation
    // ============================================================================

    #[test]
    fn role_change_evicts_only_that_identitys_entry() {
        let source = seeded_store();
        source.upsert_cluster_role(ClusterRole::new(
            "auditor",
            vec![PolicyRule::new(&[""], &["events"], &["list"])],
        ));
        source.upsert_cluster_role_binding(ClusterRoleBinding::new(
            "bob-audit",
            RoleRef::cluster_role("auditor"),
            vec![Subject::user("bob")],
        ));
        let store = AccessStore::new(&AccessStoreConfig::default(), &source);
        let alice = Identity::new("alice", &["devs"]);
        let bob = Identity::new("bob", &[]);

        let old_alice = store.access_for(&alice);
        let old_bob = store.access_for(&bob);
        assert_eq!(store.cache_len(), 2);

        source.upsert_cluster_role(editor(&["update", "patch"]));
        let new_alice = store.access_for(&alice);

        assert_ne!(new_alice.id, old_alice.id);
        assert!(new_alice.grants("patch", &configmaps(), "x", "y"));
        assert!(store.cached(&old_alice.id).is_none());
        assert!(store.cached(&old_bob.id).is_some());
        assert_eq!(store.cache_len(), 2);
    }

    #[test]
    fn identities_with_identical_roles_share_an_entry() {
        let source = seeded_store();
        let store = AccessStore::new(&AccessStoreConfig::default(), &source);

        let carol = store.access_for(&Identity::new("carol", &["devs"]));
        let dave = store.access_for(&Identity::new("dave", &["devs"]));
        assert!(Arc::ptr_eq(&carol, &dave));
        assert_eq!(store.cache_len(), 1);

        // carol moving on must not evict dave's entry
        source.upsert_cluster_role_binding(ClusterRoleBinding::new(
            "carol-edit",
            RoleRef::cluster_role("editor"),
            vec![Subject::user("carol")],
        ));
        store.access_for(&Identity::new("carol", &["devs"]));
        assert!(store.cached(&dave.id).is_some());
    }

    #[test]
    fn late_stale_hit_keeps_fresh_entry() {
        let source = seeded_store();
        let store = AccessStore::new(&AccessStoreConfig::default(), &source);
        let cache = store.cache.as_ref().unwrap();
        let alice = Identity::new("alice", &["devs"]);
        let old = store.access_for(&alice);

        // a lookup takes its ticket and hits the old key, then stalls
        let slow_ticket = store.invalidation.lock().ticket();
        let slow_key = store.cache_key(&alice);
        assert_eq!(slow_key, old.id);

        source.upsert_cluster_role(editor(&["update", "patch"]));
        let fresh = store.access_for(&alice);
        assert_ne!(fresh.id, old.id);

        store.track(cache, "alice", &slow_key, slow_ticket, None);
        assert!(store.cached(&fresh.id).is_some());
        assert!(Arc::ptr_eq(&store.access_for(&alice), &fresh));
    }

    #[test]
    fn late_stale_miss_is_not_published() {
        let source = seeded_store();
        let store = AccessStore::new(&AccessStoreConfig::default(), &source);
        let cache = store.cache.as_ref().unwrap();
        let alice = Identity::new("alice", &["devs"]);

        let slow_ticket = store.invalidation.lock().ticket();
        let slow_key = store.cache_key(&alice);
        let mut slow = store.compute(&alice);
        slow.id = slow_key.clone();

        source.upsert_cluster_role(editor(&["update", "patch"]));
        let fresh = store.access_for(&alice);

        store.track(cache, "alice", &slow_key, slow_ticket, Some(Arc::new(slow)));
        assert!(store.cached(&slow_key).is_none());
        assert!(store.cached(&fresh.id).is_some());
        assert_eq!(store.cache_len(), 1);
    }

    #[test]
    fn lru_eviction_prunes_tracked_identities() {
        let source = seeded_store();
        let config = AccessStoreConfig {
            cache_capacity: std::num::NonZeroUsize::MIN,
            ..Default::default()
        };
        let store = AccessStore::new(&config, &source);

        store.access_for(&Identity::new("alice", &["devs"]));
        store.access_for(&Identity::new("bob", &[]));
        assert_eq!(store.cache_len(), 1);
        assert_eq!(tracked_identities(&store), 1);
        assert!(!store.invalidation.lock().latest.contains_key("alice"));
    }

    #[test]
    fn purge_expired_prunes_tracked_identities() {
        let source = seeded_store();
        let config = AccessStoreConfig {
            cache_ttl: Duration::ZERO,
            ..Default::default()
        };
        let store = AccessStore::new(&config, &source);

        store.access_for(&Identity::new("alice", &["devs"]));
        store.access_for(&Identity::new("bob", &[]));
        assert_eq!(store.purge_expired(), 2);
        assert_eq!(store.cache_len(), 0);
        assert_eq!(tracked_identities(&store), 0);
    }

    // ============================================================================
    // Modes and concurrency
    // ============================================================================

    #[test]
    fn uncached_store_recomputes_every_time() {
        let source = seeded_store();
        let store = AccessStore::new(&AccessStoreConfig::uncached(), &source);
        let alice = Identity::new("alice", &["devs"]);

        let first = store.access_for(&alice);
        let second = store.access_for(&alice);
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(first.same_grants(&second));
        assert!(first.id.is_empty());
        assert_eq!(store.cache_len(), 0);
        assert_eq!(store.purge_expired(), 0);
        assert!(store.cached(&store.cache_key(&alice)).is_none());
    }

    #[test]
    fn unknown_identity_gets_empty_set() {
        let source = seeded_store();
        let store = AccessStore::new(&AccessStoreConfig::default(), &source);
        let lookup: &dyn AccessSetLookup = &store;

        let set = lookup.access_for(&Identity::new("mallory", &["strangers"]));
        assert!(set.is_empty());
        assert!(!set.id.is_empty());
    }

    #[test]
    fn concurrent_lookups_agree() {
        let source = seeded_store();
        let store = AccessStore::new(&AccessStoreConfig::default(), &source);
        let expected = store.access_for(&Identity::new("alice", &["devs"]));

        let results: Vec<Arc<AccessSet>> = (0..64)
            .into_par_iter()
            .map(|i| {
                let groups: &[&str] = if i % 2 == 0 { &["devs"] } else { &["devs", "devs"] };
                store.access_for(&Identity::new("alice", groups))
            })
            .collect();

        assert!(results.iter().all(|r| r.same_grants(&expected)));
        assert!(store.cache_len() <= 2);
    }

    #[test]
    fn concurrent_lookups_during_role_change_settle_on_fresh_entry() {
        let source = seeded_store();
        let store = AccessStore::new(&AccessStoreConfig::default(), &source);
        let alice = Identity::new("alice", &["devs"]);
        store.access_for(&alice);

        (0..64).into_par_iter().for_each(|i| {
            if i == 32 {
                source.upsert_cluster_role(editor(&["update", "patch"]));
            }
            store.access_for(&alice);
        });

        let settled = store.access_for(&alice);
        assert!(settled.grants("patch", &configmaps(), "x", "y"));
        assert!(store.cached(&settled.id).is_some());
        assert_eq!(store.cache_len(), 1);
    }

    // ============================================================================
    // InvalidationMap
    // ============================================================================

    #[test]
    fn record_first_key_evicts_nothing() {
        let mut map = InvalidationMap::default();
        assert_eq!(map.record("alice", "k1", 1), Recorded::Current(None));
        assert_eq!(map.record("alice", "k1", 2), Recorded::Current(None));
        assert_eq!(map.holders["k1"].len(), 1);
    }

    #[test]
    fn record_new_key_returns_previous() {
        let mut map = InvalidationMap::default();
        map.record("alice", "k1", 1);
        assert_eq!(map.record("alice", "k2", 2), Recorded::Current(Some("k1".to_string())));
        assert!(!map.holders.contains_key("k1"));
    }

    #[test]
    fn older_ticket_is_superseded() {
        let mut map = InvalidationMap::default();
        map.record("alice", "k2", 5);
        assert_eq!(map.record("alice", "k1", 4), Recorded::Superseded);
        assert_eq!(map.latest["alice"].key, "k2");
    }

    #[test]
    fn shared_key_survives_until_last_holder_moves() {
        let mut map = InvalidationMap::default();
        map.record("alice", "shared", 1);
        map.record("bob", "shared", 2);

        assert_eq!(map.record("alice", "a2", 3), Recorded::Current(None));
        assert_eq!(map.record("bob", "b2", 4), Recorded::Current(Some("shared".to_string())));
    }

    #[test]
    fn forget_drops_every_holder() {
        let mut map = InvalidationMap::default();
        map.record("alice", "shared", 1);
        map.record("bob", "shared", 2);
        map.record("carol", "other", 3);

        map.forget("shared");
        assert_eq!(map.latest.len(), 1);
        assert!(map.latest.contains_key("carol"));
        assert!(!map.holders.contains_key("shared"));
    }
}
