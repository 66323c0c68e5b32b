//! weak-value-map: a HashMap whose values are weakly held and vanish once
//! nothing else keeps them alive.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: keep `len`/`has`/`get` consistent with reclamation that happens
//!   outside the map's control, at arbitrary times, without double counting.
//! - Layers:
//!   - HandleHashMap<K, V, S>: structural map handing out stable
//!     generational handles; a replaced or removed entry's handle never
//!     resolves again. Debug-only reentrancy guard around probes.
//!   - WeakTable<C, W, P, S>: stores inline values or weak slots, resolves
//!     lookups, and applies reclamation notices by handle.
//!   - WeakValueMap / SyncWeakValueMap: public maps. Normalize keys, own the
//!     notice queue, and decide when notices are applied.
//!
//! Reclamation
//! - Values are stored as `Tracked<T>` (or `SyncTracked<T>`). Storing one
//!   records a registration (queue, entry handle) on the value. When the last
//!   strong handle drops, the value posts every registration's handle to its
//!   map's queue.
//! - Deleting or overwriting an entry, or dropping the map, withdraws its
//!   registrations while the value is alive. Displaced entries are unlinked
//!   first and dropped once the table is no longer borrowed, so `Drop` for
//!   stored values may use the map again. Notices that still slip through (the value died first)
//!   name a retired handle and are discarded: invalidation is by entry
//!   identity, never by key.
//! - `get`/`has` also purge a dead entry they resolve. Because both paths
//!   remove by handle, whichever runs second finds nothing to do.
//!
//! Delivery
//! - `Delivery::Eager` applies queued notices at the start of every
//!   operation. `Delivery::Deferred` waits for `process_notifications`, so
//!   `len` reports the last reconciled view.
//!
//! Keys
//! - `NormalizeKey<C>` converts any key to the canonical table key `C`
//!   (default `String`). Failures abort the operation before any mutation and
//!   surface as the key's own error type.
//!
//! Notes and non-goals
//! - No eviction policy; reachability is the only reason entries vanish.
//! - Inline (`Value::Plain`) values are owned by the map and never reclaimed.
//! - Enumeration (`entries`/`keys`) lists live entries in insertion order; an
//!   overwrite keeps the key's original position.

mod handle_hash_map;
mod key;
mod reentrancy;
mod sync;
mod tracked;
mod value;
mod weak_table;
mod weak_value_map;

// Public surface
pub use key::{Displayed, KeyError, NormalizeKey};
pub use sync::{SyncTracked, SyncWeakValueMap};
pub use tracked::Tracked;
pub use value::Value;
pub use weak_value_map::{Delivery, MapOptions, WeakValueMap};
