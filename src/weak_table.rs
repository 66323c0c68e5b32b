//! WeakTable: the reconciliation core shared by both map flavors.
//!
//! Each entry stores either an inline value or a weak slot. The entry's
//! `Handle` doubles as its reclamation token: a notification names a handle,
//! never a key, so a notice about a value that was since deleted or replaced
//! finds no entry and is dropped on the floor.
//!
//! The table is generic over the weak slot type; the maps plug in their
//! tracked handles and the unit tests plug in a scripted fake.

use crate::handle_hash_map::{Handle, HandleHashMap};
use crate::value::Value;
use core::borrow::Borrow;
use core::hash::{BuildHasher, Hash};
use log::{debug, trace};
use std::collections::hash_map::RandomState;

/// A weak reference as seen by the table.
pub(crate) trait WeakSlot {
    type Strong;

    fn upgrade(&self) -> Option<Self::Strong>;

    /// Whether the referent is still strongly reachable. Must agree with
    /// `upgrade().is_some()` but need not materialize the value.
    fn is_live(&self) -> bool;

    /// Withdraw the reclamation registration made under `token`. No-op once
    /// the referent is gone.
    fn release(&self, token: Handle);
}

pub(crate) enum Slot<W, P> {
    Weak(W),
    Plain(P),
}

struct Stored<W, P> {
    slot: Slot<W, P>,
    // insertion position; kept across replacement
    seq: u64,
}

impl<W: WeakSlot, P> Stored<W, P> {
    fn is_live(&self) -> bool {
        match &self.slot {
            Slot::Weak(w) => w.is_live(),
            Slot::Plain(_) => true,
        }
    }
}

/// An entry taken out of the table by `insert`, `remove` or `clear`.
///
/// Dropping it withdraws the entry's registration and then drops the stored
/// value. Callers hold on to it until the table borrow or lock is released,
/// so value destructors may use the map again.
pub(crate) struct Retired<W: WeakSlot, P> {
    token: Handle,
    slot: Slot<W, P>,
}

impl<W: WeakSlot, P> Drop for Retired<W, P> {
    fn drop(&mut self) {
        if let Slot::Weak(w) = &self.slot {
            w.release(self.token);
        }
    }
}

pub(crate) struct WeakTable<C, W, P, S = RandomState> {
    entries: HandleHashMap<C, Stored<W, P>, S>,
    next_seq: u64,
}

impl<C, W, P, S> WeakTable<C, W, P, S>
where
    C: Eq + Hash,
    W: WeakSlot,
    S: BuildHasher,
{
    pub(crate) fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        Self {
            entries: HandleHashMap::with_capacity_and_hasher(capacity, hasher),
            next_seq: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Store `slot` under `key`. Returns the new entry's token, which the
    /// caller registers reclamation with, and the entry it replaced.
    pub(crate) fn insert(&mut self, key: C, slot: Slot<W, P>) -> (Handle, Option<Retired<W, P>>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let up = self.entries.upsert(key, Stored { slot, seq });
        let retired = up.replaced.map(|(old, prev)| {
            if let Some(fresh) = self.entries.get_mut(up.handle) {
                fresh.seq = prev.seq;
            }
            Retired {
                token: old,
                slot: prev.slot,
            }
        });
        (up.handle, retired)
    }

    /// Resolve `key`. A weak slot whose referent is gone is purged here and
    /// reported as absent.
    pub(crate) fn get<Q>(&mut self, key: &Q) -> Option<Value<W::Strong, P>>
    where
        C: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
        P: Clone,
    {
        let handle = self.entries.find(key)?;
        match &self.entries.get(handle)?.slot {
            Slot::Plain(p) => return Some(Value::Plain(p.clone())),
            Slot::Weak(w) => {
                if let Some(strong) = w.upgrade() {
                    return Some(Value::Ref(strong));
                }
            }
        }
        self.purge(handle, "lookup");
        None
    }

    /// Like `get` without materializing the value.
    pub(crate) fn contains<Q>(&mut self, key: &Q) -> bool
    where
        C: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let Some(handle) = self.entries.find(key) else {
            return false;
        };
        let live = self
            .entries
            .get(handle)
            .map(Stored::is_live)
            .unwrap_or(false);
        if !live {
            self.purge(handle, "lookup");
        }
        live
    }

    pub(crate) fn remove<Q>(&mut self, key: &Q) -> Option<Retired<W, P>>
    where
        C: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let handle = self.entries.find(key)?;
        let (_, stored) = self.entries.remove(handle)?;
        Some(Retired {
            token: handle,
            slot: stored.slot,
        })
    }

    /// Apply one reclamation notice. Returns whether an entry was purged.
    ///
    /// The notice only takes effect if `token` still names a current entry
    /// whose referent is gone. Notices for deleted or replaced entries, and
    /// repeated notices, are discarded.
    pub(crate) fn reconcile(&mut self, token: Handle) -> bool {
        match self.entries.get(token) {
            None => {
                debug!("discarding reclamation notice for a retired entry");
                false
            }
            Some(stored) if stored.is_live() => {
                debug!("discarding reclamation notice for a live entry");
                false
            }
            Some(_) => {
                self.purge(token, "notification");
                true
            }
        }
    }

    /// Purge every entry whose referent is gone, regardless of notices.
    pub(crate) fn purge_dead(&mut self) -> usize {
        let dead: Vec<Handle> = self
            .entries
            .iter()
            .filter(|(_, _, stored)| !stored.is_live())
            .map(|(h, _, _)| h)
            .collect();
        for &h in &dead {
            self.purge(h, "sweep");
        }
        dead.len()
    }

    /// Live entries in insertion order.
    pub(crate) fn entries(&self) -> Vec<(C, Value<W::Strong, P>)>
    where
        C: Clone,
        P: Clone,
    {
        let mut live: Vec<(u64, C, Value<W::Strong, P>)> = self
            .entries
            .iter()
            .filter_map(|(_, key, stored)| {
                let value = match &stored.slot {
                    Slot::Plain(p) => Value::Plain(p.clone()),
                    Slot::Weak(w) => Value::Ref(w.upgrade()?),
                };
                Some((stored.seq, key.clone(), value))
            })
            .collect();
        live.sort_unstable_by_key(|(seq, _, _)| *seq);
        live.into_iter().map(|(_, k, v)| (k, v)).collect()
    }

    fn purge(&mut self, handle: Handle, path: &str) {
        if self.entries.remove(handle).is_some() {
            trace!(
                "purged reclaimed entry via {path}; {} entries remain",
                self.entries.len()
            );
        }
    }
}

impl<C, W: WeakSlot, P, S> WeakTable<C, W, P, S> {
    /// Take every entry out of the table.
    pub(crate) fn clear(&mut self) -> Vec<Retired<W, P>> {
        self.entries
            .drain()
            .into_iter()
            .map(|(token, _, stored)| Retired {
                token,
                slot: stored.slot,
            })
            .collect()
    }
}

impl<C, W, P, S> Default for WeakTable<C, W, P, S>
where
    C: Eq + Hash,
    W: WeakSlot,
    S: BuildHasher + Default,
{
    fn default() -> Self {
        Self::with_capacity_and_hasher(0, S::default())
    }
}
