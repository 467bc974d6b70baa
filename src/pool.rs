//! Fixed-capacity object pool backed by a [`BoundedQueue`] free list.

use crate::queue::{BoundedQueue, CapacityError};
use std::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};
use tracing::{debug, trace};

/// Hands out pre-allocated boxed instances and takes them back for reuse.
///
/// When the free list runs dry, [`get`](Self::get) allocates a fresh instance
/// instead of failing. Instances handed back by [`put`](Self::put) while the
/// pool already holds `capacity` free instances are dropped.
pub struct ObjectPool<T> {
    free: BoundedQueue<Box<T>>,
    /// Reserved before an enqueue and released after a dequeue, so it never
    /// undercounts the free list.
    free_count: AtomicUsize,
    capacity: usize,
}

impl<T: Default> ObjectPool<T> {
    pub fn new(capacity: usize) -> Result<Self, CapacityError> {
        let slots = capacity
            .checked_next_power_of_two()
            .ok_or(CapacityError(capacity))?
            .max(2);
        let free = BoundedQueue::new(slots)?;
        for _ in 0..capacity {
            // Cannot fail: the free list is at least `capacity` long.
            let _ = free.enqueue(Box::default());
        }
        Ok(Self {
            free,
            free_count: AtomicUsize::new(capacity),
            capacity,
        })
    }

    pub fn get(&self) -> Box<T> {
        match self.free.try_dequeue() {
            Some(instance) => {
                self.free_count.fetch_sub(1, Ordering::AcqRel);
                instance
            }
            None => {
                debug!(capacity = self.capacity, "object pool exhausted, allocating");
                Box::default()
            }
        }
    }
}

impl<T> ObjectPool<T> {
    pub fn put(&self, instance: Box<T>) {
        let reserved = self
            .free_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .is_ok();
        if !reserved {
            trace!(capacity = self.capacity, "object pool full, releasing instance");
            return;
        }
        if self.free.enqueue(instance).is_err() {
            // Unreachable while the free list is at least `capacity` long.
            self.free_count.fetch_sub(1, Ordering::AcqRel);
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Approximate number of instances waiting in the free list. Never
    /// exceeds [`capacity`](Self::capacity).
    pub fn available(&self) -> usize {
        self.free_count.load(Ordering::Acquire)
    }
}

impl<T> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}
