//! Thread-safe flavor: `SyncTracked<T>` and `SyncWeakValueMap`.
//!
//! Same reconciliation core as the single-threaded map. The table and its
//! size live behind one `parking_lot::Mutex`; a value's final drop may happen
//! on any thread and only touches the notice queue, which has its own lock.
//! Lock order is table, then value registrations, then queue.
//!
//! Entries displaced by `set`, `delete` and `clear` are dropped after the
//! table lock is released, so value destructors may use the map.

use crate::handle_hash_map::Handle;
use crate::key::NormalizeKey;
use crate::value::Value;
use crate::weak_table::{Slot, WeakSlot, WeakTable};
use crate::weak_value_map::{Delivery, MapOptions};
use core::fmt;
use core::hash::{BuildHasher, Hash};
use core::ops::Deref;
use parking_lot::Mutex;
use std::collections::hash_map::RandomState;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};

#[derive(Default)]
struct SyncNoticeQueue {
    pending: Mutex<VecDeque<Handle>>,
}

impl SyncNoticeQueue {
    fn post(&self, token: Handle) {
        self.pending.lock().push_back(token);
    }

    fn len(&self) -> usize {
        self.pending.lock().len()
    }

    fn take(&self) -> VecDeque<Handle> {
        core::mem::take(&mut *self.pending.lock())
    }
}

struct Registration {
    queue: Weak<SyncNoticeQueue>,
    token: Handle,
}

struct SyncBox<T> {
    value: T,
    registrations: Mutex<Vec<Registration>>,
}

impl<T> Drop for SyncBox<T> {
    fn drop(&mut self) {
        for reg in self.registrations.get_mut().drain(..) {
            if let Some(queue) = reg.queue.upgrade() {
                queue.post(reg.token);
            }
        }
    }
}

/// `Send + Sync` counterpart of `Tracked<T>`, backed by `Arc`.
pub struct SyncTracked<T>(Arc<SyncBox<T>>);

impl<T> SyncTracked<T> {
    pub fn new(value: T) -> Self {
        SyncTracked(Arc::new(SyncBox {
            value,
            registrations: Mutex::new(Vec::new()),
        }))
    }

    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.0, &other.0)
    }

    pub fn strong_count(this: &Self) -> usize {
        Arc::strong_count(&this.0)
    }

    fn downgrade(&self, queue: &Arc<SyncNoticeQueue>) -> SyncWeakTracked<T> {
        SyncWeakTracked {
            value: Arc::downgrade(&self.0),
            queue: Arc::downgrade(queue),
        }
    }

    fn register(&self, queue: &Arc<SyncNoticeQueue>, token: Handle) {
        let mut registrations = self.0.registrations.lock();
        registrations.retain(|r| r.queue.strong_count() > 0);
        registrations.push(Registration {
            queue: Arc::downgrade(queue),
            token,
        });
    }
}

impl<T> Clone for SyncTracked<T> {
    fn clone(&self) -> Self {
        SyncTracked(Arc::clone(&self.0))
    }
}

impl<T> Deref for SyncTracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0.value
    }
}

impl<T> PartialEq for SyncTracked<T> {
    fn eq(&self, other: &Self) -> bool {
        SyncTracked::ptr_eq(self, other)
    }
}

impl<T> Eq for SyncTracked<T> {}

impl<T: fmt::Debug> fmt::Debug for SyncTracked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SyncTracked").field(&self.0.value).finish()
    }
}

struct SyncWeakTracked<T> {
    value: Weak<SyncBox<T>>,
    queue: Weak<SyncNoticeQueue>,
}

impl<T> WeakSlot for SyncWeakTracked<T> {
    type Strong = SyncTracked<T>;

    fn upgrade(&self) -> Option<SyncTracked<T>> {
        self.value.upgrade().map(SyncTracked)
    }

    fn is_live(&self) -> bool {
        self.value.strong_count() > 0
    }

    fn release(&self, token: Handle) {
        let Some(value) = self.value.upgrade() else {
            return;
        };
        value
            .registrations
            .lock()
            .retain(|r| !(r.token == token && Weak::ptr_eq(&r.queue, &self.queue)));
        // `value` may be the last handle if another thread dropped its own
        // meanwhile; the registration guard is already released and the
        // table lock is not held.
        drop(value);
    }
}

/// Thread-safe weak-value map. Every table mutation, purges included, runs
/// under a single mutex.
pub struct SyncWeakValueMap<T, P, C = String, S = RandomState> {
    table: Mutex<WeakTable<C, SyncWeakTracked<T>, P, S>>,
    queue: Arc<SyncNoticeQueue>,
    delivery: Delivery,
}

impl<T, P> SyncWeakValueMap<T, P> {
    /// An empty map with eager delivery and the default hasher.
    pub fn new() -> Self {
        Self::with_options(MapOptions::default(), RandomState::new())
    }

    /// An empty map applying notices on the given schedule.
    pub fn with_delivery(delivery: Delivery) -> Self {
        Self::with_options(MapOptions::default().delivery(delivery), RandomState::new())
    }
}

impl<T, P> Default for SyncWeakValueMap<T, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, P, C, S> SyncWeakValueMap<T, P, C, S>
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
            table: Mutex::new(WeakTable::with_capacity_and_hasher(
                options.capacity,
                hasher,
            )),
            queue: Arc::new(SyncNoticeQueue::default()),
            delivery: options.delivery,
        }
    }

    /// The schedule on which this map applies notices.
    pub fn delivery(&self) -> Delivery {
        self.delivery
    }

    fn apply(&self, table: &mut WeakTable<C, SyncWeakTracked<T>, P, S>) -> usize {
        self.queue
            .take()
            .into_iter()
            .filter(|&t| table.reconcile(t))
            .count()
    }

    /// Run `f` on the locked table, after applying notices when eager.
    fn with_table<R>(&self, f: impl FnOnce(&mut WeakTable<C, SyncWeakTracked<T>, P, S>) -> R) -> R {
        let mut table = self.table.lock();
        if self.delivery == Delivery::Eager {
            self.apply(&mut table);
        }
        f(&mut table)
    }

    pub fn set<Q>(
        &self,
        key: &Q,
        value: impl Into<Value<SyncTracked<T>, P>>,
    ) -> Result<&Self, Q::Error>
    where
        Q: NormalizeKey<C> + ?Sized,
    {
        let key = key.normalize()?;
        let retired = match value.into() {
            Value::Plain(p) => self.with_table(|t| t.insert(key, Slot::Plain(p)).1),
            Value::Ref(tracked) => {
                // Registering under the table lock keeps a concurrent notice
                // pass from seeing the entry before its registration exists.
                self.with_table(|t| {
                    let (token, retired) =
                        t.insert(key, Slot::Weak(tracked.downgrade(&self.queue)));
                    tracked.register(&self.queue, token);
                    retired
                })
            }
        };
        drop(retired);
        Ok(self)
    }

    pub fn set_plain<Q>(&self, key: &Q, value: P) -> Result<&Self, Q::Error>
    where
        Q: NormalizeKey<C> + ?Sized,
    {
        self.set(key, Value::Plain(value))
    }

    /// The value stored under `key`, if it is still alive.
    pub fn get<Q>(&self, key: &Q) -> Result<Option<Value<SyncTracked<T>, P>>, Q::Error>
    where
        Q: NormalizeKey<C> + ?Sized,
        P: Clone,
    {
        let key = key.normalize()?;
        Ok(self.with_table(|t| t.get(&key)))
    }

    /// Whether `key` maps to a live value.
    pub fn has<Q>(&self, key: &Q) -> Result<bool, Q::Error>
    where
        Q: NormalizeKey<C> + ?Sized,
    {
        let key = key.normalize()?;
        Ok(self.with_table(|t| t.contains(&key)))
    }

    /// Remove the entry for `key`. Returns whether one existed.
    pub fn delete<Q>(&self, key: &Q) -> Result<bool, Q::Error>
    where
        Q: NormalizeKey<C> + ?Sized,
    {
        let key = key.normalize()?;
        let retired = self.with_table(|t| t.remove(&key));
        Ok(retired.is_some())
    }

    pub fn len(&self) -> usize {
        self.with_table(|t| t.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn process_notifications(&self) -> usize {
        let mut table = self.table.lock();
        self.apply(&mut table)
    }

    pub fn pending_notifications(&self) -> usize {
        self.queue.len()
    }

    pub fn purge_dead(&self) -> usize {
        self.table.lock().purge_dead()
    }

    /// Remove every entry and discard queued notices.
    pub fn clear(&self) {
        let retired = {
            let mut table = self.table.lock();
            let retired = table.clear();
            self.queue.take();
            retired
        };
        drop(retired);
    }

    pub fn entries(&self) -> Vec<(C, Value<SyncTracked<T>, P>)>
    where
        C: Clone,
        P: Clone,
    {
        self.with_table(|t| t.entries())
    }

    pub fn keys(&self) -> Vec<C>
    where
        C: Clone,
        P: Clone,
    {
        self.entries().into_iter().map(|(k, _)| k).collect()
    }
}

impl<T, P, C, S> Drop for SyncWeakValueMap<T, P, C, S> {
    fn drop(&mut self) {
        let retired = self.table.get_mut().clear();
        drop(retired);
    }
}

impl<T, P, C, S> fmt::Debug for SyncWeakValueMap<T, P, C, S>
where
    C: Eq + Hash,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.table.try_lock().map(|t| t.len());
        f.debug_struct("SyncWeakValueMap")
            .field("len", &len)
            .field("pending", &self.queue.len())
            .field("delivery", &self.delivery)
            .finish()
    }
}
