//! Grow-on-demand pool of reusable fixed-size objects.
//!
//! Every acquired object is handed out wrapped in a [`Pooled`] guard that
//! returns it to the free set when dropped, so release happens on every exit
//! path of the acquiring code. Once the pool has grown to the working-set
//! size, acquire/release never allocate.
//!
//! ```rust,ignore
//! let pool = BufferPool::new("mask", move || ImagePlane::<u8>::gray(geometry));
//! let mut mask = pool.acquire();
//! mask.data.fill(0);
//! drop(mask); // back in the free set
//! ```

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{error, trace};

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

/// Snapshot of pool usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Objects ever created by the pool.
    pub capacity: usize,
    /// Objects currently in the free set.
    pub available: usize,
    /// Objects currently handed out.
    pub in_use: usize,
    /// Total successful acquisitions.
    pub acquisitions: u64,
    /// Total releases.
    pub releases: u64,
}

struct Slot<T> {
    id: usize,
    value: T,
}

struct PoolState<T> {
    free: Vec<Slot<T>>,
    /// Indexed by slot id; `true` while the slot is handed out.
    used: Vec<bool>,
    acquisitions: u64,
    releases: u64,
}

struct PoolInner<T> {
    name: String,
    factory: Factory<T>,
    state: Mutex<PoolState<T>>,
}

impl<T> PoolInner<T> {
    fn lock(&self) -> MutexGuard<'_, PoolState<T>> {
        // The state is plain bookkeeping that is never left half-updated.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn give_back(&self, slot: Slot<T>) {
        let mut state = self.lock();
        let in_use = state.used.get(slot.id).copied().unwrap_or(false);
        if !in_use {
            error!(pool = %self.name, slot = slot.id, "released a slot that is not in use");
            debug_assert!(in_use, "pool '{}': slot {} released twice", self.name, slot.id);
            return;
        }
        state.used[slot.id] = false;
        state.releases += 1;
        state.free.push(slot);
    }
}

/// Thread-safe pool handle. Cloning shares the same pool.
pub struct BufferPool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for BufferPool<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T: Send + 'static> BufferPool<T> {
    /// Creates an empty pool; objects are built by `factory` on first demand.
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                factory: Box::new(factory),
                state: Mutex::new(PoolState {
                    free: Vec::new(),
                    used: Vec::new(),
                    acquisitions: 0,
                    releases: 0,
                }),
            }),
        }
    }

    /// Grows the pool until it holds at least `count` objects.
    pub fn preallocate(&self, count: usize) {
        let mut state = self.inner.lock();
        while state.used.len() < count {
            let id = state.used.len();
            state.used.push(false);
            let value = (self.inner.factory)();
            state.free.push(Slot { id, value });
        }
    }

    /// Takes a free object, growing the pool by one when none is free.
    pub fn acquire(&self) -> Pooled<T> {
        let mut state = self.inner.lock();
        let slot = match state.free.pop() {
            Some(slot) => slot,
            None => {
                let id = state.used.len();
                state.used.push(false);
                trace!(pool = %self.inner.name, capacity = id + 1, "growing pool");
                Slot { id, value: (self.inner.factory)() }
            }
        };
        state.used[slot.id] = true;
        state.acquisitions += 1;
        drop(state);

        Pooled {
            slot: Some(slot),
            pool: Arc::clone(&self.inner),
        }
    }

    /// Explicitly returns `item`. Equivalent to dropping it, but also checks
    /// that it was acquired from this pool.
    pub fn release(&self, item: Pooled<T>) {
        let same_pool = Arc::ptr_eq(&self.inner, &item.pool);
        if !same_pool {
            error!(
                pool = %self.inner.name,
                owner = %item.pool.name,
                "released an object acquired from a different pool"
            );
        }
        debug_assert!(same_pool, "object released to the wrong pool");
        drop(item);
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock();
        let in_use = state.used.iter().filter(|&&u| u).count();
        PoolStats {
            capacity: state.used.len(),
            available: state.free.len(),
            in_use,
            acquisitions: state.acquisitions,
            releases: state.releases,
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

/// An object on loan from a [`BufferPool`]; returns itself when dropped.
pub struct Pooled<T> {
    slot: Option<Slot<T>>,
    pool: Arc<PoolInner<T>>,
}

impl<T> Pooled<T> {
    /// Slot identity inside the owning pool.
    pub fn slot_id(&self) -> usize {
        self.slot.as_ref().map(|s| s.id).unwrap_or(usize::MAX)
    }
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.slot {
            Some(slot) => &slot.value,
            None => unreachable!("pooled object accessed after release"),
        }
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.slot {
            Some(slot) => &mut slot.value,
            None => unreachable!("pooled object accessed after release"),
        }
    }
}

impl<T> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.give_back(slot);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("pool", &self.pool.name)
            .field("slot", &self.slot_id())
            .field("value", &**self)
            .finish()
    }
}
