//! Pending-request register: de-duplicates concurrent reads of the same key.
//!
//! The first caller for a key registers a shared handle to its in-flight
//! computation; later callers await the same handle instead of issuing a second
//! request. The entry is dropped from the register exactly once, when the
//! computation settles, whether it succeeded, failed, or panicked.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::debug;

/// Cloneable handle to an in-flight computation. Every clone resolves to the
/// same result.
pub type PendingHandle<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

struct Slot<T, E> {
    generation: u64,
    handle: PendingHandle<T, E>,
}

type SlotMap<T, E> = Arc<Mutex<HashMap<String, Slot<T, E>>>>;

/// Register of in-flight computations keyed by cache key.
pub struct PendingRequests<T, E> {
    slots: SlotMap<T, E>,
    next_generation: Arc<AtomicU64>,
}

impl<T, E> Clone for PendingRequests<T, E> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
            next_generation: Arc::clone(&self.next_generation),
        }
    }
}

impl<T, E> Default for PendingRequests<T, E> {
    fn default() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl<T, E> PendingRequests<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// The in-flight handle for `key`, if one is registered.
    pub fn get_pending(&self, key: &str) -> Option<PendingHandle<T, E>> {
        self.slots.lock().get(key).map(|slot| slot.handle.clone())
    }

    /// Register `operation` under `key` and return its shared handle.
    ///
    /// Replaces any handle already registered for `key`; callers wanting
    /// de-duplication should use [`join_or_start`](Self::join_or_start),
    /// which performs the lookup and the registration atomically.
    pub fn register_pending<F>(&self, key: impl Into<String>, operation: F) -> PendingHandle<T, E>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        let key = key.into();
        let slot = self.new_slot(&key, operation);
        let handle = slot.handle.clone();

        let replaced = self.slots.lock().insert(key, slot);
        // Dropped outside the lock: releasing the last reference to a handle
        // runs its settle guard, which locks the register.
        drop(replaced);

        Self::drive(&handle);
        handle
    }

    /// Join the computation in flight for `key`, or start one with `start`.
    ///
    /// Returns the handle and whether this call started it. `start` runs
    /// while the register is locked and must not call back into it.
    pub fn join_or_start<F, Fut>(&self, key: &str, start: F) -> (PendingHandle<T, E>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get(key) {
            metrics::counter!("singleflight.joined").increment(1);
            debug!(key = key, "Joined in-flight request");
            return (slot.handle.clone(), false);
        }

        let slot = self.new_slot(key, start());
        let handle = slot.handle.clone();
        slots.insert(key.to_string(), slot);
        drop(slots);

        Self::drive(&handle);
        (handle, true)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    fn new_slot<F>(&self, key: &str, operation: F) -> Slot<T, E>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let guard = SettleGuard {
            slots: Arc::clone(&self.slots),
            key: key.to_string(),
            generation,
        };
        let handle = async move {
            let _guard = guard;
            operation.await
        }
        .boxed()
        .shared();
        Slot { generation, handle }
    }

    /// Poll the handle to completion in the background so the slot is
    /// released even if every caller stops awaiting it.
    fn drive(handle: &PendingHandle<T, E>) {
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(handle.clone());
        }
    }
}

/// Removes its slot when the wrapped computation finishes or is dropped.
struct SettleGuard<T, E> {
    slots: SlotMap<T, E>,
    key: String,
    generation: u64,
}

impl<T, E> Drop for SettleGuard<T, E> {
    fn drop(&mut self) {
        let mut slots = self.slots.lock();
        let ours = slots
            .get(&self.key)
            .is_some_and(|slot| slot.generation == self.generation);
        if ours {
            let removed = slots.remove(&self.key);
            drop(slots);
            drop(removed);
        }
    }
}
