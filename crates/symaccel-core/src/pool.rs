//! Session Pool.
//!
//! Fixed-capacity arena of session slots addressed by generation-checked
//! handles. Reclaimed indices sit on a free vector, so allocate and free are
//! O(1) pointer-free updates under one lock.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Stable handle of a live session.
///
/// A handle goes stale once its session is destroyed; the slot may be reused
/// but the generation no longer matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    index: u32,
    generation: u32,
}

impl SessionHandle {
    /// Slot index.
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Opaque 64-bit representation.
    #[must_use]
    pub fn to_u64(&self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.to_u64())
    }
}

/// Occupancy snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Reserved or live slots
    pub in_use: usize,
    /// Slots on the free list
    pub free: usize,
    /// Total slots
    pub capacity: usize,
}

enum Slot<T> {
    Free,
    Reserved,
    Live(Arc<T>),
}

struct Entry<T> {
    generation: u32,
    slot: Slot<T>,
}

struct Inner<T> {
    entries: Vec<Entry<T>>,
    free: Vec<u32>,
}

impl<T> Inner<T> {
    fn reclaim(&mut self, index: u32) -> Option<Arc<T>> {
        let entry = &mut self.entries[index as usize];
        let old = std::mem::replace(&mut entry.slot, Slot::Free);
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(index);
        match old {
            Slot::Live(value) => Some(value),
            Slot::Free | Slot::Reserved => None,
        }
    }
}

/// Fixed-capacity session arena.
pub struct SessionPool<T> {
    inner: Mutex<Inner<T>>,
    capacity: usize,
}

impl<T> SessionPool<T> {
    /// Create a pool with `capacity` free slots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let entries = (0..capacity)
            .map(|_| Entry {
                generation: 0,
                slot: Slot::Free,
            })
            .collect();
        // Popped from the back: lowest index first.
        let free = (0..capacity as u32).rev().collect();
        Self {
            inner: Mutex::new(Inner { entries, free }),
            capacity,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Detach a slot from the free list.
    ///
    /// The slot returns to the free list when the reservation is dropped
    /// without being committed.
    pub fn reserve(&self) -> Option<Reservation<'_, T>> {
        let mut inner = self.lock();
        let index = inner.free.pop()?;
        inner.entries[index as usize].slot = Slot::Reserved;
        Some(Reservation {
            pool: self,
            index,
            committed: false,
        })
    }

    /// Look up a live session.
    pub fn get(&self, handle: SessionHandle) -> Option<Arc<T>> {
        let inner = self.lock();
        let entry = inner.entries.get(handle.index as usize)?;
        match &entry.slot {
            Slot::Live(value) if entry.generation == handle.generation => Some(Arc::clone(value)),
            _ => None,
        }
    }

    /// Remove a live session and return its slot to the free list.
    pub fn release(&self, handle: SessionHandle) -> Option<Arc<T>> {
        let mut inner = self.lock();
        let entry = inner.entries.get(handle.index as usize)?;
        if entry.generation != handle.generation || !matches!(entry.slot, Slot::Live(_)) {
            return None;
        }
        inner.reclaim(handle.index)
    }

    /// Number of slots, live or free.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current occupancy.
    pub fn stats(&self) -> PoolStats {
        let inner = self.lock();
        PoolStats {
            in_use: self.capacity - inner.free.len(),
            free: inner.free.len(),
            capacity: self.capacity,
        }
    }
}

/// A slot taken off the free list but not yet holding a session.
pub struct Reservation<'a, T> {
    pool: &'a SessionPool<T>,
    index: u32,
    committed: bool,
}

impl<T> Reservation<'_, T> {
    /// Install the session and hand out its handle.
    pub fn commit(mut self, value: T) -> SessionHandle {
        let mut inner = self.pool.lock();
        let entry = &mut inner.entries[self.index as usize];
        entry.slot = Slot::Live(Arc::new(value));
        self.committed = true;
        SessionHandle {
            index: self.index,
            generation: entry.generation,
        }
    }
}

impl<T> Drop for Reservation<'_, T> {
    fn drop(&mut self) {
        if !self.committed {
            self.pool.lock().reclaim(self.index);
        }
    }
}
