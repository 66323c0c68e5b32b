//! WeakValueMap: the single-threaded public map.

use crate::key::NormalizeKey;
use crate::tracked::{NoticeQueue, Tracked, WeakTracked};
use crate::value::Value;
use crate::weak_table::{Slot, WeakTable};
use core::cell::RefCell;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use std::collections::hash_map::RandomState;
use std::rc::Rc;

/// When posted reclamation notices are applied to the table.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Delivery {
    /// At the start of every map operation, `len` included.
    #[default]
    Eager,
    /// Only on an explicit `process_notifications` call. Lookups still
    /// purge dead entries they run into.
    Deferred,
}

/// Construction options shared by both map flavors.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct MapOptions {
    pub capacity: usize,
    pub delivery: Delivery,
}

impl MapOptions {
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn delivery(mut self, delivery: Delivery) -> Self {
        self.delivery = delivery;
        self
    }
}

/// A map from normalized keys to weakly held values.
///
/// `Value::Ref` entries disappear once every `Tracked` handle to their value
/// is dropped; `Value::Plain` entries stay until deleted or overwritten. All
/// key-taking methods normalize the key first and return the key's own error
/// untouched, with the map unchanged, if that fails.
///
/// Single-threaded; see `SyncWeakValueMap` for the shareable flavor.
pub struct WeakValueMap<T, P, C = String, S = RandomState> {
    table: RefCell<WeakTable<C, WeakTracked<T>, P, S>>,
    queue: Rc<NoticeQueue>,
    delivery: Delivery,
}

impl<T, P> WeakValueMap<T, P> {
    /// An empty map with eager delivery and the default hasher.
    pub fn new() -> Self {
        Self::with_options(MapOptions::default(), RandomState::new())
    }

    /// An empty map applying notices on the given schedule.
    pub fn with_delivery(delivery: Delivery) -> Self {
        Self::with_options(MapOptions::default().delivery(delivery), RandomState::new())
    }
}

impl<T, P> Default for WeakValueMap<T, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, P, C, S> WeakValueMap<T, P, C, S>
where
    C: Eq + Hash,
    S: BuildHasher,
{
    /// An empty map using `hasher` for its canonical keys.
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_options(MapOptions::default(), hasher)
    }

    /// Like `with_hasher`, with room for `capacity` entries.
    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        Self::with_options(MapOptions::default().capacity(capacity), hasher)
    }

    /// An empty map built from `options`.
    pub fn with_options(options: MapOptions, hasher: S) -> Self {
        Self {
            table: RefCell::new(WeakTable::with_capacity_and_hasher(
                options.capacity,
                hasher,
            )),
            queue: Rc::new(NoticeQueue::default()),
            delivery: options.delivery,
        }
    }

    /// The schedule on which this map applies notices.
    pub fn delivery(&self) -> Delivery {
        self.delivery
    }

    fn deliver(&self) {
        if self.delivery == Delivery::Eager {
            self.process_notifications();
        }
    }

    /// Store `value` under `key`, replacing any current entry. Returns the
    /// map so calls can be chained.
    pub fn set<Q>(&self, key: &Q, value: impl Into<Value<Tracked<T>, P>>) -> Result<&Self, Q::Error>
    where
        Q: NormalizeKey<C> + ?Sized,
    {
        let key = key.normalize()?;
        let value = value.into();
        self.deliver();
        match value {
            Value::Plain(p) => {
                let (_, retired) = self.table.borrow_mut().insert(key, Slot::Plain(p));
                drop(retired);
            }
            Value::Ref(tracked) => {
                let weak = tracked.downgrade(&self.queue);
                let (token, retired) = self.table.borrow_mut().insert(key, Slot::Weak(weak));
                tracked.register(&self.queue, token);
                drop(retired);
                // If `tracked` was the last handle, dropping it here posts a
                // notice for the entry just made; the table is not borrowed.
            }
        }
        Ok(self)
    }

    /// Shorthand for `set(key, Value::Plain(value))`.
    pub fn set_plain<Q>(&self, key: &Q, value: P) -> Result<&Self, Q::Error>
    where
        Q: NormalizeKey<C> + ?Sized,
    {
        self.set(key, Value::Plain(value))
    }

    /// The value stored under `key`, if it is still alive.
    pub fn get<Q>(&self, key: &Q) -> Result<Option<Value<Tracked<T>, P>>, Q::Error>
    where
        Q: NormalizeKey<C> + ?Sized,
        P: Clone,
    {
        let key = key.normalize()?;
        self.deliver();
        Ok(self.table.borrow_mut().get(&key))
    }

    /// Whether `key` maps to a live value.
    pub fn has<Q>(&self, key: &Q) -> Result<bool, Q::Error>
    where
        Q: NormalizeKey<C> + ?Sized,
    {
        let key = key.normalize()?;
        self.deliver();
        Ok(self.table.borrow_mut().contains(&key))
    }

    /// Remove the entry for `key`. Returns whether one existed.
    pub fn delete<Q>(&self, key: &Q) -> Result<bool, Q::Error>
    where
        Q: NormalizeKey<C> + ?Sized,
    {
        let key = key.normalize()?;
        self.deliver();
        let retired = self.table.borrow_mut().remove(&key);
        Ok(retired.is_some())
    }

    /// Entry count as of the last applied notice.
    pub fn len(&self) -> usize {
        self.deliver();
        self.table.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply every notice posted so far; returns how many entries it purged.
    pub fn process_notifications(&self) -> usize {
        let batch = self.queue.take();
        if batch.is_empty() {
            return 0;
        }
        let mut table = self.table.borrow_mut();
        batch.into_iter().filter(|&t| table.reconcile(t)).count()
    }

    /// Notices posted but not yet applied.
    pub fn pending_notifications(&self) -> usize {
        self.queue.len()
    }

    /// Purge every entry whose value is gone without waiting for notices.
    pub fn purge_dead(&self) -> usize {
        self.table.borrow_mut().purge_dead()
    }

    /// Remove every entry and discard queued notices.
    pub fn clear(&self) {
        let retired = self.table.borrow_mut().clear();
        // Anything still queued names a retired entry now.
        self.queue.take();
        drop(retired);
    }

    /// Snapshot of live entries in insertion order.
    pub fn entries(&self) -> Vec<(C, Value<Tracked<T>, P>)>
    where
        C: Clone,
        P: Clone,
    {
        self.deliver();
        self.table.borrow().entries()
    }

    pub fn keys(&self) -> Vec<C>
    where
        C: Clone,
        P: Clone,
    {
        self.entries().into_iter().map(|(k, _)| k).collect()
    }
}

impl<T, P, C, S> Drop for WeakValueMap<T, P, C, S> {
    fn drop(&mut self) {
        // Values outliving the map stop carrying its registrations.
        let retired = self.table.get_mut().clear();
        drop(retired);
    }
}

impl<T, P, C, S> fmt::Debug for WeakValueMap<T, P, C, S>
where
    C: Eq + Hash,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.table.try_borrow().map(|t| t.len()).ok();
        f.debug_struct("WeakValueMap")
            .field("len", &len)
            .field("pending", &self.queue.len())
            .field("delivery", &self.delivery)
            .finish()
    }
}
