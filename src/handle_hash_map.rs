//! HandleHashMap: structural layer with stable generational handles.
//!
//! Entries live in a `SlotMap`; a `HashTable` indexes them by key. A
//! `Handle` names one particular entry, not a key: once that entry is removed
//! or replaced, the handle never resolves again even if the slot is reused.
//! The weak layer relies on this to tell stale reclamation notifications
//! apart from live ones.

use crate::reentrancy::DebugReentrancy;
use core::borrow::Borrow;
use core::hash::{BuildHasher, Hash};
use hashbrown::hash_table::Entry as TableEntry;
use hashbrown::HashTable;
use slotmap::{DefaultKey, SlotMap};
use std::collections::hash_map::RandomState;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) struct Handle(DefaultKey);

#[derive(Debug)]
struct Entry<K, V> {
    key: K,
    value: V,
    hash: u64,
}

pub(crate) struct HandleHashMap<K, V, S = RandomState> {
    hasher: S,
    index: HashTable<DefaultKey>,
    slots: SlotMap<DefaultKey, Entry<K, V>>,
    reentrancy: DebugReentrancy,
}

/// Outcome of `HandleHashMap::upsert`.
pub(crate) struct Upserted<V> {
    pub(crate) handle: Handle,
    /// The entry that held the key before, if any. Its handle is dead.
    pub(crate) replaced: Option<(Handle, V)>,
}

impl<K, V, S> HandleHashMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    pub(crate) fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        Self {
            hasher,
            index: HashTable::with_capacity(capacity),
            slots: SlotMap::with_capacity_and_key(capacity),
            reentrancy: DebugReentrancy::new(),
        }
    }

    fn make_hash<Q>(&self, q: &Q) -> u64
    where
        Q: ?Sized + Hash,
    {
        self.hasher.hash_one(q)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn find<Q>(&self, q: &Q) -> Option<Handle>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.reentrancy.enter("find");
        let hash = self.make_hash(q);
        self.index
            .find(hash, |&k| {
                self.slots
                    .get(k)
                    .map(|e| e.key.borrow() == q)
                    .unwrap_or(false)
            })
            .map(|&k| Handle(k))
    }

    /// Insert `key`, replacing any entry already stored under an equal key.
    ///
    /// A replacement always allocates a fresh handle; the previous handle is
    /// returned alongside the previous value and no longer resolves.
    pub(crate) fn upsert(&mut self, key: K, value: V) -> Upserted<V> {
        let _g = self.reentrancy.enter("upsert");
        let hash = self.make_hash(&key);
        let slots = &mut self.slots;
        match self.index.entry(
            hash,
            |&kk| slots.get(kk).map(|e| e.key == key).unwrap_or(false),
            |&kk| slots.get(kk).map(|e| e.hash).unwrap_or(0),
        ) {
            TableEntry::Occupied(mut o) => {
                let old = *o.get();
                let prev = slots.remove(old);
                let fresh = slots.insert(Entry { key, value, hash });
                *o.get_mut() = fresh;
                Upserted {
                    handle: Handle(fresh),
                    replaced: prev.map(|e| (Handle(old), e.value)),
                }
            }
            TableEntry::Vacant(v) => {
                let fresh = slots.insert(Entry { key, value, hash });
                let _ = v.insert(fresh);
                Upserted {
                    handle: Handle(fresh),
                    replaced: None,
                }
            }
        }
    }

    pub(crate) fn remove(&mut self, handle: Handle) -> Option<(K, V)> {
        let _g = self.reentrancy.enter("remove");
        let k = handle.0;
        let entry = self.slots.remove(k)?;
        match self.index.find_entry(entry.hash, |&kk| kk == k) {
            Ok(o) => {
                let _ = o.remove();
            }
            Err(_) => debug_assert!(false, "slot present without an index entry"),
        }
        Some((entry.key, entry.value))
    }

    pub(crate) fn get(&self, h: Handle) -> Option<&V> {
        self.slots.get(h.0).map(|e| &e.value)
    }

    pub(crate) fn get_mut(&mut self, h: Handle) -> Option<&mut V> {
        self.slots.get_mut(h.0).map(|e| &mut e.value)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (Handle, &K, &V)> {
        self.slots.iter().map(|(k, e)| (Handle(k), &e.key, &e.value))
    }
}

impl<K, V, S> HandleHashMap<K, V, S> {
    /// Remove every entry, yielding them with their (now dead) handles.
    pub(crate) fn drain(&mut self) -> Vec<(Handle, K, V)> {
        let _g = self.reentrancy.enter("drain");
        self.index.clear();
        self.slots
            .drain()
            .map(|(k, e)| (Handle(k), e.key, e.value))
            .collect()
    }
}

impl<K, V, S> Default for HandleHashMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher + Default,
{
    fn default() -> Self {
        Self::with_capacity_and_hasher(0, S::default())
    }
}
