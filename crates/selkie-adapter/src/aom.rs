//! Active object map
//!
//! TigerStyle: One owner, no internal locking. Every method takes
//! `&mut self`; the owning adapter's mutex serializes all access.
//!
//! The map maintains consistent views over one set of facts:
//! - identity → entry (many-to-one under the multiple-identity policy)
//! - entry → servant (a servant is associated with at most one entry)
//! - servant → entry (pointer-identity reverse view)
//! - entry → canonical identity (unique policy) or identity set (multiple)
//!
//! The identity index variant is selected once, at construction, from the
//! owning adapter's uniqueness policy; the two variants are mutually
//! exclusive implementations of the same contract.

use crate::entry::ObjectEntry;
use selkie_core::error::{Error, Result};
use selkie_core::object_id::ObjectId;
use selkie_core::policy::IdUniqueness;
use selkie_core::servant::{ServantHandle, ServantKey};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Opaque handle to one entry in the map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entry-{}", self.0)
    }
}

/// Identity bookkeeping, selected by the uniqueness policy
enum IdentityIndex {
    /// Canonical identity per entry
    Unique(HashMap<EntryId, ObjectId>),
    /// Identity set per entry
    Multiple(HashMap<EntryId, HashSet<ObjectId>>),
}

/// What `unbind` removed
pub struct Unbound {
    /// The entry the identity pointed at
    pub entry: EntryId,
    /// The servant bound at the time, if any
    pub servant: Option<ServantHandle>,
    /// Whether the removed identity was the entry's last one
    /// (always true under the unique policy)
    pub last_identity: bool,
}

/// What `detach_identity` released
pub struct Detached {
    /// The entry the identity points at
    pub entry: EntryId,
    /// The servant that was bound, if any
    pub servant: Option<ServantHandle>,
    /// Whether the detached identity was the entry's last one
    pub last_identity: bool,
}

/// The adapter's identity/servant registry
pub struct ActiveObjectMap {
    entries: HashMap<EntryId, ObjectEntry>,
    by_id: HashMap<ObjectId, EntryId>,
    servants: HashMap<EntryId, ServantHandle>,
    by_servant: HashMap<ServantKey, EntryId>,
    index: IdentityIndex,
    next_entry: u64,
}

impl ActiveObjectMap {
    /// Create an empty map for the given uniqueness policy
    pub fn new(uniqueness: IdUniqueness) -> Self {
        let index = match uniqueness {
            IdUniqueness::Unique => IdentityIndex::Unique(HashMap::new()),
            IdUniqueness::Multiple => IdentityIndex::Multiple(HashMap::new()),
        };
        Self {
            entries: HashMap::new(),
            by_id: HashMap::new(),
            servants: HashMap::new(),
            by_servant: HashMap::new(),
            index,
            next_entry: 0,
        }
    }

    /// Look up the entry for an identity
    pub fn lookup(&self, id: &ObjectId) -> Option<EntryId> {
        self.by_id.get(id).copied()
    }

    /// Look up the entry for an identity, creating a fresh `Invalid` entry
    /// if none exists. Never returns absent.
    pub fn lookup_or_create(&mut self, id: &ObjectId) -> EntryId {
        if let Some(eid) = self.by_id.get(id) {
            return *eid;
        }

        let eid = EntryId(self.next_entry);
        self.next_entry += 1;
        self.entries.insert(eid, ObjectEntry::new(id.clone()));
        self.by_id.insert(id.clone(), eid);
        eid
    }

    /// Borrow an entry
    pub fn entry(&self, eid: EntryId) -> Option<&ObjectEntry> {
        self.entries.get(&eid)
    }

    /// Mutably borrow an entry
    pub fn entry_mut(&mut self, eid: EntryId) -> Option<&mut ObjectEntry> {
        self.entries.get_mut(&eid)
    }

    /// Mutably borrow an entry that is expected to exist
    pub fn expect_entry_mut(&mut self, eid: EntryId) -> Result<&mut ObjectEntry> {
        self.entries
            .get_mut(&eid)
            .ok_or_else(|| Error::internal(format!("{} vanished from the map", eid)))
    }

    /// Record the identity↔servant association in every view
    ///
    /// Under the unique policy the identity becomes the entry's canonical
    /// one; under the multiple policy it joins the entry's identity set.
    pub fn bind_servant(&mut self, eid: EntryId, id: &ObjectId, servant: ServantHandle) {
        debug_assert!(self.entries.contains_key(&eid), "binding unknown {}", eid);
        debug_assert_eq!(self.by_id.get(id), Some(&eid), "identity not mapped to {}", eid);

        self.by_servant.insert(ServantKey::of(&servant), eid);
        self.servants.insert(eid, servant);

        match &mut self.index {
            IdentityIndex::Unique(canonical) => {
                let previous = canonical.insert(eid, id.clone());
                debug_assert!(previous.is_none(), "canonical identity rebound for {}", eid);
            }
            IdentityIndex::Multiple(sets) => {
                sets.entry(eid).or_default().insert(id.clone());
            }
        }
    }

    /// Attach an additional identity to an entry that already has a servant
    ///
    /// Multiple-identity policy only.
    pub fn attach_identity(&mut self, eid: EntryId, id: &ObjectId) -> Result<()> {
        match &mut self.index {
            IdentityIndex::Unique(_) => Err(Error::wrong_policy("attach_identity")),
            IdentityIndex::Multiple(sets) => {
                debug_assert!(self.servants.contains_key(&eid), "no servant on {}", eid);
                self.by_id.insert(id.clone(), eid);
                sets.entry(eid).or_default().insert(id.clone());
                Ok(())
            }
        }
    }

    /// Remove an identity mapping
    ///
    /// Always removes the identity→entry view. The servant views go away
    /// only when the entry's last identity goes away (immediately under
    /// the unique policy); until then the servant stays bound. Unbinding
    /// an identity whose entry never had a servant still removes the
    /// identity mapping.
    pub fn unbind(&mut self, id: &ObjectId) -> Option<Unbound> {
        let eid = self.by_id.remove(id)?;

        let last_identity = match &mut self.index {
            IdentityIndex::Unique(canonical) => {
                canonical.remove(&eid);
                true
            }
            IdentityIndex::Multiple(sets) => match sets.get_mut(&eid) {
                Some(set) => {
                    set.remove(id);
                    let empty = set.is_empty();
                    if empty {
                        sets.remove(&eid);
                    }
                    empty
                }
                // No servant was ever bound, so no identity set either.
                None => true,
            },
        };

        let servant = if last_identity {
            let servant = self.servants.remove(&eid);
            if let Some(ref servant) = servant {
                self.by_servant.remove(&ServantKey::of(servant));
            }
            servant
        } else {
            self.servants.get(&eid).cloned()
        };

        Some(Unbound {
            entry: eid,
            servant,
            last_identity,
        })
    }

    /// Release an identity's servant bindings for deactivation
    ///
    /// Unlike [`ActiveObjectMap::unbind`], the identity→entry view of the
    /// entry's *last* identity is kept: the draining entry must stay
    /// reachable by key so that activations keep raising "already active"
    /// and arriving invocations park, until etherealization destroys the
    /// entry and [`ActiveObjectMap::remove_identity_mapping`] drops the
    /// key. A non-last identity (multiple policy) is removed outright; the
    /// servant stays bound for the remaining ones.
    pub fn detach_identity(&mut self, id: &ObjectId) -> Option<Detached> {
        let eid = *self.by_id.get(id)?;

        let last_identity = match &mut self.index {
            IdentityIndex::Unique(canonical) => {
                canonical.remove(&eid);
                true
            }
            IdentityIndex::Multiple(sets) => match sets.get_mut(&eid) {
                Some(set) => {
                    set.remove(id);
                    let empty = set.is_empty();
                    if empty {
                        sets.remove(&eid);
                    }
                    empty
                }
                None => true,
            },
        };

        let servant = if last_identity {
            let servant = self.servants.remove(&eid);
            if let Some(ref servant) = servant {
                self.by_servant.remove(&ServantKey::of(servant));
            }
            servant
        } else {
            self.by_id.remove(id);
            self.servants.get(&eid).cloned()
        };

        Some(Detached {
            entry: eid,
            servant,
            last_identity,
        })
    }

    /// Drop the identity→entry view left behind by `detach_identity`
    ///
    /// No-op if the identity has since been rebound to a different entry.
    pub fn remove_identity_mapping(&mut self, id: &ObjectId, eid: EntryId) {
        if self.by_id.get(id) == Some(&eid) {
            self.by_id.remove(id);
        }
    }

    /// Reverse lookup: the servant bound to an entry, if any
    pub fn get_servant(&self, eid: EntryId) -> Option<ServantHandle> {
        self.servants.get(&eid).cloned()
    }

    /// Reverse lookup: the entry a servant is bound to, if any
    pub fn entry_for_servant(&self, servant: &ServantHandle) -> Option<EntryId> {
        self.by_servant.get(&ServantKey::of(servant)).copied()
    }

    /// Whether the entry currently serves more than one identity
    ///
    /// Always false under the unique policy.
    pub fn has_multiple_identities(&self, eid: EntryId) -> bool {
        match &self.index {
            IdentityIndex::Unique(_) => false,
            IdentityIndex::Multiple(sets) => sets.get(&eid).map(|s| s.len()).unwrap_or(0) > 1,
        }
    }

    /// The canonical identity of an entry
    ///
    /// Fails with `WrongPolicy` under the multiple-identity policy: a
    /// multi-identity entry has no single canonical identity.
    pub fn key_for_entry(&self, eid: EntryId) -> Result<ObjectId> {
        match &self.index {
            IdentityIndex::Unique(canonical) => canonical.get(&eid).cloned().ok_or_else(|| {
                Error::internal(format!("no canonical identity recorded for {}", eid))
            }),
            IdentityIndex::Multiple(_) => Err(Error::wrong_policy("key_for_entry")),
        }
    }

    /// Drop an entry whose lifecycle has completed
    pub fn remove_entry(&mut self, eid: EntryId) {
        debug_assert!(
            !self.servants.contains_key(&eid),
            "removing {} with a servant still bound",
            eid
        );
        self.entries.remove(&eid);
    }

    /// Snapshot of every mapped identity
    ///
    /// Teardown walks iterate this snapshot so nothing externally-triggered
    /// runs while the map is borrowed.
    pub fn active_ids(&self) -> Vec<ObjectId> {
        self.by_id.keys().cloned().collect()
    }

    /// Number of mapped identities, including those parked on draining entries
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Number of identities with a bound servant
    pub fn bound_len(&self) -> usize {
        match &self.index {
            IdentityIndex::Unique(canonical) => canonical.len(),
            IdentityIndex::Multiple(sets) => sets.values().map(|s| s.len()).sum(),
        }
    }

    /// Whether no identities are mapped
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Number of live entries (including those still etherealizing)
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Drop all mappings (adapter teardown)
    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_id.clear();
        self.servants.clear();
        self.by_servant.clear();
        match &mut self.index {
            IdentityIndex::Unique(canonical) => canonical.clear(),
            IdentityIndex::Multiple(sets) => sets.clear(),
        }
    }
}

impl fmt::Debug for ActiveObjectMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveObjectMap")
            .field("identities", &self.by_id.len())
            .field("entries", &self.entries.len())
            .field("servants", &self.servants.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Applied, EntryEvent};
    use async_trait::async_trait;
    use bytes::Bytes;
    use selkie_core::servant::Servant;
    use std::sync::Arc;

    struct NullServant;

    #[async_trait]
    impl Servant for NullServant {
        async fn dispatch(
            &self,
            _id: &ObjectId,
            _operation: &str,
            payload: Bytes,
        ) -> Result<Bytes> {
            Ok(payload)
        }
    }

    fn servant() -> ServantHandle {
        Arc::new(NullServant)
    }

    fn oid(s: &str) -> ObjectId {
        ObjectId::try_from(s).unwrap()
    }

    fn activate(map: &mut ActiveObjectMap, id: &ObjectId, servant: ServantHandle) -> EntryId {
        let eid = map.lookup_or_create(id);
        match map.entry_mut(eid).unwrap().apply(EntryEvent::Activate) {
            Ok(Applied::Complete) => {}
            other => panic!("activate failed: {:?}", other),
        }
        map.bind_servant(eid, id, servant);
        eid
    }

    #[test]
    fn test_lookup_or_create_never_absent() {
        let mut map = ActiveObjectMap::new(IdUniqueness::Unique);
        let id = oid("obj-1");

        let a = map.lookup_or_create(&id);
        let b = map.lookup_or_create(&id);
        assert_eq!(a, b);
        assert_eq!(map.entry_count(), 1);

        // Structurally equal identity from a different allocation hits the
        // same slot.
        let same_bytes = ObjectId::try_from(&b"obj-1"[..]).unwrap();
        assert_eq!(map.lookup_or_create(&same_bytes), a);
    }

    #[test]
    fn test_bind_round_trips() {
        let mut map = ActiveObjectMap::new(IdUniqueness::Unique);
        let id = oid("obj-2");
        let s = servant();

        let eid = activate(&mut map, &id, s.clone());

        let resolved = map.get_servant(eid).expect("servant bound");
        assert!(Arc::ptr_eq(&resolved, &s));
        assert_eq!(map.entry_for_servant(&s), Some(eid));
        assert_eq!(map.key_for_entry(eid).unwrap(), id);
    }

    #[test]
    fn test_unbind_leaves_no_dangling_reverse_entries() {
        let mut map = ActiveObjectMap::new(IdUniqueness::Unique);
        let id = oid("obj-3");
        let s = servant();
        let eid = activate(&mut map, &id, s.clone());

        let unbound = map.unbind(&id).expect("identity was mapped");
        assert_eq!(unbound.entry, eid);
        assert!(unbound.last_identity);
        assert!(Arc::ptr_eq(&unbound.servant.unwrap(), &s));

        assert!(map.lookup(&id).is_none());
        assert!(map.get_servant(eid).is_none());
        assert!(map.entry_for_servant(&s).is_none());
        assert!(map.unbind(&id).is_none());
    }

    #[test]
    fn test_unbind_without_servant_still_removes_identity() {
        let mut map = ActiveObjectMap::new(IdUniqueness::Unique);
        let id = oid("never-bound");
        map.lookup_or_create(&id);

        let unbound = map.unbind(&id).expect("identity was mapped");
        assert!(unbound.servant.is_none());
        assert!(unbound.last_identity);
        assert!(map.lookup(&id).is_none());
    }

    #[test]
    fn test_key_for_entry_wrong_policy_under_multiple() {
        let mut map = ActiveObjectMap::new(IdUniqueness::Multiple);
        let id = oid("multi-1");
        let eid = activate(&mut map, &id, servant());

        let err = map.key_for_entry(eid).unwrap_err();
        assert!(matches!(err, Error::WrongPolicy { .. }));
    }

    #[test]
    fn test_multiple_identity_flag_tracks_set_size() {
        let mut map = ActiveObjectMap::new(IdUniqueness::Multiple);
        let first = oid("alias-1");
        let second = oid("alias-2");
        let s = servant();

        let eid = activate(&mut map, &first, s.clone());
        assert!(!map.has_multiple_identities(eid));

        map.attach_identity(eid, &second).unwrap();
        assert!(map.has_multiple_identities(eid));
        assert_eq!(map.lookup(&second), Some(eid));

        // Removing back down to one identity reverts the flag; the servant
        // stays bound.
        let unbound = map.unbind(&second).unwrap();
        assert!(!unbound.last_identity);
        assert!(unbound.servant.is_some());
        assert!(!map.has_multiple_identities(eid));
        assert_eq!(map.entry_for_servant(&s), Some(eid));

        // The last identity takes the servant views with it.
        let unbound = map.unbind(&first).unwrap();
        assert!(unbound.last_identity);
        assert!(map.entry_for_servant(&s).is_none());
    }

    #[test]
    fn test_attach_identity_is_unique_policy_error() {
        let mut map = ActiveObjectMap::new(IdUniqueness::Unique);
        let id = oid("solo");
        let eid = activate(&mut map, &id, servant());

        let err = map.attach_identity(eid, &oid("alias")).unwrap_err();
        assert!(matches!(err, Error::WrongPolicy { .. }));
    }

    #[test]
    fn test_detach_keeps_last_identity_parked_on_entry() {
        let mut map = ActiveObjectMap::new(IdUniqueness::Unique);
        let id = oid("draining");
        let s = servant();
        let eid = activate(&mut map, &id, s.clone());

        let detached = map.detach_identity(&id).expect("identity was mapped");
        assert_eq!(detached.entry, eid);
        assert!(detached.last_identity);
        assert!(Arc::ptr_eq(&detached.servant.unwrap(), &s));

        // Servant views are gone, but the key still reaches the entry.
        assert!(map.get_servant(eid).is_none());
        assert!(map.entry_for_servant(&s).is_none());
        assert_eq!(map.lookup(&id), Some(eid));
        assert_eq!(map.bound_len(), 0);
        assert_eq!(map.len(), 1);

        // Destruction drops the parked key.
        map.remove_identity_mapping(&id, eid);
        map.remove_entry(eid);
        assert!(map.lookup(&id).is_none());
        assert!(map.is_empty());
    }

    #[test]
    fn test_detach_non_last_identity_removes_alias_only() {
        let mut map = ActiveObjectMap::new(IdUniqueness::Multiple);
        let first = oid("alias-a");
        let second = oid("alias-b");
        let s = servant();
        let eid = activate(&mut map, &first, s.clone());
        map.attach_identity(eid, &second).unwrap();

        let detached = map.detach_identity(&second).unwrap();
        assert!(!detached.last_identity);
        assert!(detached.servant.is_some());

        assert!(map.lookup(&second).is_none());
        assert_eq!(map.lookup(&first), Some(eid));
        assert_eq!(map.entry_for_servant(&s), Some(eid));
        assert_eq!(map.bound_len(), 1);
    }

    #[test]
    fn test_clear_drops_everything() {
        let mut map = ActiveObjectMap::new(IdUniqueness::Unique);
        let s = servant();
        activate(&mut map, &oid("a"), s.clone());
        activate(&mut map, &oid("b"), servant());

        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.entry_count(), 0);
        assert!(map.entry_for_servant(&s).is_none());
    }

    #[test]
    fn test_active_ids_snapshot() {
        let mut map = ActiveObjectMap::new(IdUniqueness::Unique);
        activate(&mut map, &oid("a"), servant());
        activate(&mut map, &oid("b"), servant());

        let mut ids: Vec<String> = map.active_ids().iter().map(|i| i.to_string()).collect();
        ids.sort();
        assert_eq!(ids.len(), 2);
    }
}
