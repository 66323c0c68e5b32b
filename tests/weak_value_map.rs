// WeakValueMap integration suite.
//
// Core invariants exercised:
// - Liveness: a `Ref` entry stays until its value's last `Tracked` drops and
//   the resulting notice is applied (or a lookup trips over it).
// - Identity: a notice about an old value never removes the entry that
//   replaced it.
// - Counting: every purge path decrements `len` exactly once.
// - Keys: equal canonical forms address one entry; a failing normalization
//   leaves the map untouched and surfaces the original error.
use std::cell::RefCell;
use std::convert::Infallible;
use std::fmt;
use std::rc::{Rc, Weak};
use weak_value_map::{Delivery, Displayed, KeyError, NormalizeKey, Tracked, Value, WeakValueMap};

#[derive(Clone, Debug, PartialEq)]
enum Prim {
    Str(&'static str),
    Num(f64),
    Bool(bool),
}

#[derive(Debug, Default)]
struct Obj {
    a: u32,
}

type Map = WeakValueMap<Obj, Prim>;

/// A key whose conversion yields the number 5.
struct LooksLikeFive;

impl NormalizeKey for LooksLikeFive {
    type Error = Infallible;

    fn normalize(&self) -> Result<String, Infallible> {
        5i32.normalize()
    }
}

/// A key whose conversion always fails with 42.
struct Throws;

impl NormalizeKey for Throws {
    type Error = i32;

    fn normalize(&self) -> Result<String, i32> {
        Err(42)
    }
}

fn plain(p: Prim) -> Value<Tracked<Obj>, Prim> {
    Value::Plain(p)
}

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// Test: mixed inline and tracked values, overwrite, and key coercion.
// Verifies: chaining, replace-keeps-size, equal canonical keys alias.
#[test]
fn map_basics_with_mixed_values() {
    init_logs();
    let m = Map::new();
    m.set(&1, plain(Prim::Str("one")))
        .unwrap()
        .set(&2, plain(Prim::Num(2.0)))
        .unwrap()
        .set(&3, plain(Prim::Bool(true)))
        .unwrap()
        .set(&4, plain(Prim::Bool(false)))
        .unwrap();
    let obj = Tracked::new(Obj { a: 1 });
    assert_eq!(m.len(), 4);
    assert!(!m.has(&5).unwrap());
    assert!(!m.has("5").unwrap());
    assert_eq!(m.get(&5).unwrap(), None);

    let empty = Tracked::new(Obj::default());
    m.set(&5, empty.clone()).unwrap();
    assert_eq!(m.len(), 5);
    assert!(m.has(&5).unwrap());

    m.set(&5, obj.clone()).unwrap();
    assert_eq!(m.len(), 5);
    assert!(m.has(&5).unwrap());

    assert_eq!(m.get(&1).unwrap(), Some(plain(Prim::Str("one"))));
    assert_eq!(m.get(&2).unwrap(), Some(plain(Prim::Num(2.0))));
    assert_eq!(m.get(&3).unwrap(), Some(plain(Prim::Bool(true))));
    assert_eq!(m.get(&4).unwrap(), Some(plain(Prim::Bool(false))));
    assert_eq!(m.get(&5).unwrap(), Some(Value::Ref(obj.clone())));
    assert_eq!(m.get("5").unwrap(), Some(Value::Ref(obj.clone())));
    assert_eq!(m.get(&LooksLikeFive).unwrap(), Some(Value::Ref(obj.clone())));
    assert_eq!(m.get(&5.0f64).unwrap(), Some(Value::Ref(obj.clone())));

    // The replaced value's registration was withdrawn; its death is silent.
    drop(empty);
    assert_eq!(m.pending_notifications(), 0);
    assert_eq!(m.len(), 5);

    m.set(&1, plain(Prim::Str("changed"))).unwrap();
    assert_eq!(m.get(&1).unwrap(), Some(plain(Prim::Str("changed"))));
    assert_eq!(m.len(), 5);

    assert!(m.delete(&1).unwrap());
    assert!(!m.has(&1).unwrap());
    assert_eq!(m.get(&1).unwrap(), None);
    assert_eq!(m.len(), 4);
}

// Test: reclamation of tracked values as their holders go away.
// Verifies: live values survive notice processing; each death removes
// exactly its own entry.
#[test]
fn values_vanish_when_released() {
    let m = Map::new();
    let obj1 = Tracked::new(Obj { a: 1234 });
    let obj2 = Tracked::new(Obj { a: 1234 });
    m.set(&1, obj1.clone()).unwrap();
    m.set(&2, obj2.clone()).unwrap();
    assert_eq!(m.get(&1).unwrap(), Some(Value::Ref(obj1.clone())));
    assert_eq!(m.get(&2).unwrap(), Some(Value::Ref(obj2.clone())));

    assert_eq!(m.process_notifications(), 0);
    assert_eq!(m.purge_dead(), 0);
    assert_eq!(m.len(), 2);

    drop(obj2);
    assert_eq!(m.get(&1).unwrap(), Some(Value::Ref(obj1.clone())));
    assert_eq!(m.get(&2).unwrap(), None);
    assert_eq!(m.len(), 1);

    drop(obj1);
    assert_eq!(m.get(&1).unwrap(), None);
    assert_eq!(m.get(&2).unwrap(), None);
    assert_eq!(m.len(), 0);
    assert!(m.is_empty());
}

#[test]
fn value_with_no_other_holder_is_gone_immediately() {
    let m = Map::new();
    m.set(&"tmp", Tracked::new(Obj::default())).unwrap();
    assert!(!m.has(&"tmp").unwrap());
    assert_eq!(m.len(), 0);
}

#[test]
fn plain_values_are_never_reclaimed() {
    let m = Map::with_delivery(Delivery::Deferred);
    m.set_plain(&1, Prim::Num(1.0)).unwrap();
    m.set_plain(&2, Prim::Bool(false)).unwrap();
    assert_eq!(m.process_notifications(), 0);
    assert_eq!(m.purge_dead(), 0);
    assert_eq!(m.len(), 2);
    assert_eq!(m.get(&2).unwrap(), Some(plain(Prim::Bool(false))));
}

// Test: failing key normalization on every key-taking operation.
// Verifies: original error value surfaces; size and entries unchanged.
#[test]
fn failing_key_leaves_map_untouched() {
    let m = Map::new();
    let obj = Tracked::new(Obj::default());
    m.set(&"kept", obj.clone()).unwrap();

    assert_eq!(m.set(&Throws, obj.clone()).err(), Some(42));
    assert_eq!(m.set_plain(&Throws, Prim::Num(0.0)).err(), Some(42));
    assert_eq!(m.get(&Throws).err(), Some(42));
    assert_eq!(m.has(&Throws).err(), Some(42));
    assert_eq!(m.delete(&Throws).err(), Some(42));

    assert_eq!(m.len(), 1);
    assert_eq!(m.get(&"kept").unwrap(), Some(Value::Ref(obj.clone())));
    // No registration leaked onto the value.
    assert_eq!(Tracked::strong_count(&obj), 1);
    drop(obj);
    assert_eq!(m.pending_notifications(), 1);
}

#[test]
fn failing_key_on_empty_map_keeps_size_zero() {
    let m = Map::new();
    let err = m.set(&Throws, Tracked::new(Obj::default())).err();
    assert_eq!(err, Some(42));
    assert_eq!(m.len(), 0);
}

struct BrokenDisplay;

impl fmt::Display for BrokenDisplay {
    fn fmt(&self, _f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Err(fmt::Error)
    }
}

#[test]
fn displayed_keys_normalize_through_format() {
    let m = Map::new();
    m.set_plain(&Displayed(7u8), Prim::Num(7.0)).unwrap();
    assert!(m.has("7").unwrap());
    assert_eq!(
        m.set_plain(&Displayed(BrokenDisplay), Prim::Num(0.0)).err(),
        Some(KeyError::Format)
    );
    assert_eq!(m.len(), 1);
}

#[test]
fn delete_reports_presence_and_is_idempotent() {
    let m = Map::new();
    assert!(!m.delete(&1).unwrap());
    assert_eq!(m.len(), 0);

    m.set_plain(&1, Prim::Num(1.0)).unwrap();
    m.set_plain(&2, Prim::Num(2.0)).unwrap();
    assert!(m.delete("1").unwrap());
    assert_eq!(m.len(), 1);
    assert!(!m.delete(&1).unwrap());
    assert_eq!(m.len(), 1);
}

// Test: a notice arrives (and is applied) before the key is reused.
#[test]
fn notice_applied_before_key_reuse() {
    let m = Map::with_delivery(Delivery::Deferred);
    let a = Tracked::new(Obj { a: 1 });
    m.set(&"k", a.clone()).unwrap();
    drop(a);
    assert_eq!(m.pending_notifications(), 1);
    assert_eq!(m.process_notifications(), 1);
    assert_eq!(m.len(), 0);

    let b = Tracked::new(Obj { a: 2 });
    m.set(&"k", b.clone()).unwrap();
    assert_eq!(m.len(), 1);
    assert_eq!(m.get(&"k").unwrap(), Some(Value::Ref(b)));
}

// Test: the old value's notice is still queued when the key is reused.
// Verifies: the stale notice is discarded and the new entry survives.
#[test]
fn stale_notice_applied_after_key_reuse() {
    let m = Map::with_delivery(Delivery::Deferred);
    let a = Tracked::new(Obj { a: 1 });
    m.set(&"k", a.clone()).unwrap();
    drop(a);
    assert_eq!(m.len(), 1, "deferred: size is the last reconciled view");

    let b = Tracked::new(Obj { a: 2 });
    m.set(&"k", b.clone()).unwrap();
    assert_eq!(m.len(), 1);

    assert_eq!(m.process_notifications(), 0);
    assert_eq!(m.len(), 1);
    assert_eq!(m.get(&"k").unwrap(), Some(Value::Ref(b.clone())));
    assert_eq!(m.get(&"k").unwrap().and_then(|v| v.into_ref()).map(|t| t.a), Some(2));
}

#[test]
fn eager_delivery_applies_notice_before_reuse() {
    let m = Map::new();
    let a = Tracked::new(Obj { a: 1 });
    m.set(&"k", a.clone()).unwrap();
    m.set_plain(&"other", Prim::Num(0.0)).unwrap();
    drop(a);

    let b = Tracked::new(Obj { a: 2 });
    m.set(&"k", b.clone()).unwrap();
    assert_eq!(m.pending_notifications(), 0);
    assert_eq!(m.len(), 2);
    assert_eq!(m.get(&"k").unwrap(), Some(Value::Ref(b)));
}

// Test: lookup self-heals a dead entry before its notice is applied.
// Verifies: the later notice does not decrement a second time.
#[test]
fn lookup_purge_and_notice_agree() {
    let m = Map::with_delivery(Delivery::Deferred);
    let a = Tracked::new(Obj::default());
    m.set(&1, a.clone()).unwrap();
    m.set_plain(&2, Prim::Num(2.0)).unwrap();
    drop(a);

    assert_eq!(m.len(), 2);
    assert!(!m.has(&1).unwrap());
    assert_eq!(m.len(), 1);
    assert_eq!(m.get(&1).unwrap(), None);
    assert_eq!(m.len(), 1);

    assert_eq!(m.pending_notifications(), 1);
    assert_eq!(m.process_notifications(), 0);
    assert_eq!(m.len(), 1);
}

#[test]
fn purge_dead_sweeps_without_notices() {
    let m = Map::with_delivery(Delivery::Deferred);
    let a = Tracked::new(Obj::default());
    let b = Tracked::new(Obj::default());
    m.set(&1, a.clone()).unwrap().set(&2, b.clone()).unwrap();
    drop(a);
    drop(b);
    assert_eq!(m.len(), 2);
    assert_eq!(m.purge_dead(), 2);
    assert_eq!(m.len(), 0);
    assert_eq!(m.process_notifications(), 0);
}

#[test]
fn one_value_under_several_keys() {
    let m = Map::with_delivery(Delivery::Deferred);
    let v = Tracked::new(Obj { a: 3 });
    m.set(&1, v.clone()).unwrap().set(&2, v.clone()).unwrap().set(&3, v.clone()).unwrap();
    assert!(m.delete(&2).unwrap());
    drop(v);

    assert_eq!(m.pending_notifications(), 2);
    assert_eq!(m.process_notifications(), 2);
    assert_eq!(m.len(), 0);
}

#[test]
fn clear_discards_entries_and_queued_notices() {
    let m = Map::with_delivery(Delivery::Deferred);
    let a = Tracked::new(Obj::default());
    let b = Tracked::new(Obj::default());
    m.set(&1, a.clone()).unwrap().set(&2, b.clone()).unwrap();
    drop(a);
    m.clear();
    assert_eq!(m.len(), 0);
    assert_eq!(m.pending_notifications(), 0);
    drop(b);
    assert_eq!(m.pending_notifications(), 0);
}

#[test]
fn entries_keep_insertion_order() {
    let m = Map::new();
    let held = Tracked::new(Obj { a: 9 });
    m.set_plain(&"x", Prim::Num(1.0)).unwrap();
    m.set(&"y", held.clone()).unwrap();
    m.set(&"gone", Tracked::new(Obj::default())).unwrap();
    m.set_plain(&"z", Prim::Num(3.0)).unwrap();
    m.set_plain(&"x", Prim::Num(10.0)).unwrap();

    assert_eq!(m.keys(), vec!["x".to_string(), "y".to_string(), "z".to_string()]);
    let entries = m.entries();
    assert_eq!(entries[0].1, plain(Prim::Num(10.0)));
    assert_eq!(entries[1].1, Value::Ref(held));
}

#[test]
fn values_outliving_the_map_drop_quietly() {
    let m = Map::new();
    let v = Tracked::new(Obj::default());
    m.set(&1, v.clone()).unwrap();
    drop(m);
    drop(v);
}

#[test]
fn debug_output_names_the_map() {
    let m = Map::with_delivery(Delivery::Deferred);
    m.set_plain(&1, Prim::Num(1.0)).unwrap();
    let s = format!("{m:?}");
    assert!(s.contains("WeakValueMap"), "{s}");
    assert!(s.contains("len: Some(1)"), "{s}");
    assert!(s.contains("Deferred"), "{s}");
}

/// Inline value that reads the map's size from its destructor.
struct ReadsLenOnDrop {
    map: Weak<WeakValueMap<Obj, ReadsLenOnDrop>>,
    seen: Rc<RefCell<Vec<usize>>>,
}

impl Drop for ReadsLenOnDrop {
    fn drop(&mut self) {
        if let Some(m) = self.map.upgrade() {
            self.seen.borrow_mut().push(m.len());
        }
    }
}

// Test: displaced values are dropped after the map lets go of its table.
// Verifies: overwrite, delete and clear each let the destructor use the map
// and observe the post-operation size.
#[test]
fn displaced_values_may_use_the_map_while_dropping() {
    let m = Rc::new(WeakValueMap::<Obj, ReadsLenOnDrop>::new());
    let seen = Rc::new(RefCell::new(Vec::new()));
    let value = || ReadsLenOnDrop {
        map: Rc::downgrade(&m),
        seen: Rc::clone(&seen),
    };

    m.set_plain(&1, value()).unwrap();
    m.set_plain(&1, value()).unwrap();
    assert_eq!(*seen.borrow(), vec![1]);

    assert!(m.delete(&1).unwrap());
    assert_eq!(*seen.borrow(), vec![1, 0]);

    m.set_plain(&2, value()).unwrap().set_plain(&3, value()).unwrap();
    m.clear();
    assert_eq!(*seen.borrow(), vec![1, 0, 0, 0]);
    assert!(m.is_empty());
}
