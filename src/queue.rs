//! Bounded lock-free MPMC queue.
//!
//! Every slot carries a sequence number. A producer may write slot `pos & mask`
//! once its sequence equals `pos`; a consumer may read it once the sequence
//! equals `pos + 1`. After reading, the consumer bumps the sequence by the
//! capacity so the slot becomes writable for the next lap.

use std::{
    cell::UnsafeCell,
    cmp::Ordering as Cmp,
    fmt,
    mem::MaybeUninit,
    ops::Deref,
    sync::atomic::{AtomicUsize, Ordering},
};
use thiserror::Error;

/// Keeps the producer and consumer positions on separate cache lines.
#[repr(align(64))]
struct CachePadded<T>(T);

impl<T> Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

struct Slot<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("queue capacity must be a power of two and at least 2, got {0}")]
pub struct CapacityError(pub usize);

/// A fixed-capacity queue that any number of threads may push to and pop from
/// without taking a lock.
///
/// Operations are lock-free but not wait-free: under contention a thread
/// retries its compare-and-swap until it claims a position.
pub struct BoundedQueue<T> {
    slots: Box<[Slot<T>]>,
    mask: usize,
    enqueue_pos: CachePadded<AtomicUsize>,
    dequeue_pos: CachePadded<AtomicUsize>,
}

// SAFETY: a slot's value is only touched by the single thread that won the
// position CAS for it, and hand-off between threads is ordered by the
// release store / acquire load on the slot sequence.
unsafe impl<T: Send> Send for BoundedQueue<T> {}
unsafe impl<T: Send> Sync for BoundedQueue<T> {}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Result<Self, CapacityError> {
        if capacity < 2 || !capacity.is_power_of_two() {
            return Err(CapacityError(capacity));
        }
        let slots = (0..capacity)
            .map(|i| Slot {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();
        Ok(Self {
            slots,
            mask: capacity - 1,
            enqueue_pos: CachePadded(AtomicUsize::new(0)),
            dequeue_pos: CachePadded(AtomicUsize::new(0)),
        })
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Pushes `item` onto the back of the queue.
    ///
    /// Returns the item back if the queue is full. Never blocks.
    pub fn enqueue(&self, item: T) -> Result<(), T> {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        let slot = loop {
            let slot = &self.slots[pos & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            match (seq.wrapping_sub(pos) as isize).cmp(&0) {
                Cmp::Equal => {
                    match self.enqueue_pos.compare_exchange_weak(
                        pos,
                        pos.wrapping_add(1),
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => break slot,
                        Err(current) => pos = current,
                    }
                }
                // The slot still holds an item from the previous lap.
                Cmp::Less => return Err(item),
                Cmp::Greater => pos = self.enqueue_pos.load(Ordering::Relaxed),
            }
        };

        // SAFETY: winning the CAS for `pos` grants exclusive write access to
        // this slot until the sequence store below.
        unsafe { (*slot.value.get()).write(item) };
        slot.sequence.store(pos.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Pops the item at the front of the queue, if any.
    pub fn try_dequeue(&self) -> Option<T> {
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
        let slot = loop {
            let slot = &self.slots[pos & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            match (seq.wrapping_sub(pos.wrapping_add(1)) as isize).cmp(&0) {
                Cmp::Equal => {
                    match self.dequeue_pos.compare_exchange_weak(
                        pos,
                        pos.wrapping_add(1),
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => break slot,
                        Err(current) => pos = current,
                    }
                }
                Cmp::Less => return None,
                Cmp::Greater => pos = self.dequeue_pos.load(Ordering::Relaxed),
            }
        };

        // SAFETY: the acquire load observed `pos + 1`, so the producer's write
        // is visible, and winning the CAS makes this thread the only reader.
        let item = unsafe { (*slot.value.get()).assume_init_read() };
        slot.sequence
            .store(pos.wrapping_add(self.mask + 1), Ordering::Release);
        Some(item)
    }

    /// Best-effort number of queued items. Racy by nature; never exceeds
    /// the capacity.
    pub fn approx_size(&self) -> usize {
        let first = self.dequeue_pos.load(Ordering::Relaxed);
        let last = self.enqueue_pos.load(Ordering::Relaxed);
        let size = last.wrapping_sub(first) as isize;
        if size <= 0 {
            0
        } else {
            (size as usize).min(self.capacity())
        }
    }

    pub fn is_empty(&self) -> bool {
        self.approx_size() == 0
    }
}

impl<T> Drop for BoundedQueue<T> {
    fn drop(&mut self) {
        while self.try_dequeue().is_some() {}
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("capacity", &self.capacity())
            .field("approx_size", &self.approx_size())
            .finish()
    }
}
