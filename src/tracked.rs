//! Reclaimable handles for the single-threaded map.
//!
//! A `Tracked<T>` is a strong, clonable handle to a shared `T`. The map only
//! ever holds a weak reference to it. Each time a tracked value is stored, it
//! records a registration: the storing map's notice queue plus the entry's
//! token. When the last strong handle drops, the allocation's destructor
//! posts every outstanding registration's token to its queue; the map applies
//! those notices on its own schedule.

use crate::handle_hash_map::Handle;
use crate::weak_table::WeakSlot;
use core::cell::RefCell;
use core::fmt;
use core::ops::Deref;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

/// Notices posted by dropped values, awaiting the owning map.
#[derive(Default)]
pub(crate) struct NoticeQueue {
    pending: RefCell<VecDeque<Handle>>,
}

impl NoticeQueue {
    fn post(&self, token: Handle) {
        self.pending.borrow_mut().push_back(token);
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Take everything posted so far. The borrow ends before the caller
    /// processes the batch, so drops during processing can post again.
    pub(crate) fn take(&self) -> VecDeque<Handle> {
        core::mem::take(&mut *self.pending.borrow_mut())
    }
}

struct Registration {
    queue: Weak<NoticeQueue>,
    token: Handle,
}

struct TrackedBox<T> {
    value: T,
    registrations: RefCell<Vec<Registration>>,
}

impl<T> Drop for TrackedBox<T> {
    fn drop(&mut self) {
        for reg in self.registrations.get_mut().drain(..) {
            // The map may already be gone.
            if let Some(queue) = reg.queue.upgrade() {
                queue.post(reg.token);
            }
        }
    }
}

/// Strong handle to a value that weak-value maps can hold weakly.
///
/// Clones share one allocation. Equality is identity: two handles are equal
/// iff they point at the same allocation.
pub struct Tracked<T>(Rc<TrackedBox<T>>);

impl<T> Tracked<T> {
    pub fn new(value: T) -> Self {
        Tracked(Rc::new(TrackedBox {
            value,
            registrations: RefCell::new(Vec::new()),
        }))
    }

    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Rc::ptr_eq(&this.0, &other.0)
    }

    pub fn strong_count(this: &Self) -> usize {
        Rc::strong_count(&this.0)
    }

    pub(crate) fn downgrade(&self, queue: &Rc<NoticeQueue>) -> WeakTracked<T> {
        WeakTracked {
            value: Rc::downgrade(&self.0),
            queue: Rc::downgrade(queue),
        }
    }

    pub(crate) fn register(&self, queue: &Rc<NoticeQueue>, token: Handle) {
        let mut registrations = self.0.registrations.borrow_mut();
        // Registrations for maps that no longer exist.
        registrations.retain(|r| r.queue.strong_count() > 0);
        registrations.push(Registration {
            queue: Rc::downgrade(queue),
            token,
        });
    }

    #[cfg(test)]
    pub(crate) fn registration_count(&self) -> usize {
        self.0.registrations.borrow().len()
    }
}

impl<T> Clone for Tracked<T> {
    fn clone(&self) -> Self {
        Tracked(Rc::clone(&self.0))
    }
}

impl<T> Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0.value
    }
}

impl<T> PartialEq for Tracked<T> {
    fn eq(&self, other: &Self) -> bool {
        Tracked::ptr_eq(self, other)
    }
}

impl<T> Eq for Tracked<T> {}

impl<T: fmt::Debug> fmt::Debug for Tracked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Tracked").field(&self.0.value).finish()
    }
}

/// The weak side stored in the map's table.
pub(crate) struct WeakTracked<T> {
    value: Weak<TrackedBox<T>>,
    queue: Weak<NoticeQueue>,
}

impl<T> WeakSlot for WeakTracked<T> {
    type Strong = Tracked<T>;

    fn upgrade(&self) -> Option<Tracked<T>> {
        self.value.upgrade().map(Tracked)
    }

    fn is_live(&self) -> bool {
        self.value.strong_count() > 0
    }

    fn release(&self, token: Handle) {
        if let Some(tracked) = self.value.upgrade() {
            tracked
                .registrations
                .borrow_mut()
                .retain(|r| !(r.token == token && Weak::ptr_eq(&r.queue, &self.queue)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle_hash_map::HandleHashMap;
    use crate::WeakValueMap;

    fn tokens(n: usize) -> Vec<Handle> {
        let mut m: HandleHashMap<usize, ()> = HandleHashMap::default();
        (0..n).map(|i| m.upsert(i, ()).handle).collect()
    }

    #[test]
    fn last_drop_posts_every_registration() {
        let q = Rc::new(NoticeQueue::default());
        let t = tokens(2);
        let v = Tracked::new("v");
        v.register(&q, t[0]);
        v.register(&q, t[1]);

        let extra = v.clone();
        drop(v);
        assert_eq!(q.len(), 0, "a clone still holds the value");
        drop(extra);
        assert_eq!(q.take(), VecDeque::from(vec![t[0], t[1]]));
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn release_withdraws_only_the_matching_registration() {
        let q = Rc::new(NoticeQueue::default());
        let other = Rc::new(NoticeQueue::default());
        let t = tokens(2);
        let v = Tracked::new(1u8);
        v.register(&q, t[0]);
        v.register(&q, t[1]);
        // same token, different map
        v.register(&other, t[0]);

        v.downgrade(&q).release(t[0]);
        drop(v);
        assert_eq!(q.take(), VecDeque::from(vec![t[1]]));
        assert_eq!(other.take(), VecDeque::from(vec![t[0]]));
    }

    #[test]
    fn notices_to_a_dropped_queue_are_skipped() {
        let q = Rc::new(NoticeQueue::default());
        let v = Tracked::new(());
        v.register(&q, tokens(1)[0]);
        drop(q);
        drop(v);
    }

    #[test]
    fn weak_side_tracks_liveness() {
        let q = Rc::new(NoticeQueue::default());
        let v = Tracked::new(5);
        let w = v.downgrade(&q);
        assert!(w.is_live());
        assert_eq!(w.upgrade().as_deref(), Some(&5));
        drop(v);
        assert!(!w.is_live());
        assert!(w.upgrade().is_none());
    }

    #[test]
    fn equality_is_identity() {
        let a = Tracked::new(1);
        let b = Tracked::new(1);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(Tracked::strong_count(&a), 1);
    }

    #[test]
    fn registering_drops_registrations_of_dead_maps() {
        let gone = Rc::new(NoticeQueue::default());
        let live = Rc::new(NoticeQueue::default());
        let t = tokens(2);
        let v = Tracked::new(0u8);
        v.register(&gone, t[0]);
        drop(gone);
        v.register(&live, t[1]);
        assert_eq!(v.registration_count(), 1);
    }

    #[test]
    fn dropped_maps_withdraw_their_registrations() {
        let v = Tracked::new(3u32);
        for _ in 0..1000 {
            let m: WeakValueMap<u32, ()> = WeakValueMap::new();
            m.set(&1, v.clone()).unwrap().set(&2, v.clone()).unwrap();
            assert_eq!(v.registration_count(), 2);
        }
        assert_eq!(v.registration_count(), 0);
        assert_eq!(Tracked::strong_count(&v), 1);
    }
}
