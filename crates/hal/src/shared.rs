// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! State shared between interrupt handlers and application code.
//!
//! Handlers are `Send + 'static` closures, so shared state lives behind an
//! `Arc` and is only touched through atomics or a lock.

use std::sync::atomic::{AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::Mutex;

/// A single word written by one side (usually the handler) and read by the other.
#[derive(Debug, Default)]
pub struct SharedCounter {
    value: AtomicU32,
}

impl SharedCounter {
    pub const fn new(value: u32) -> Self {
        Self {
            value: AtomicU32::new(value),
        }
    }

    /// Add one, wrapping. Returns the new value.
    pub fn increment(&self) -> u32 {
        self.value.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    pub fn load(&self) -> u32 {
        self.value.load(Ordering::Acquire)
    }

    pub fn store(&self, value: u32) {
        self.value.store(value, Ordering::Release);
    }

    pub fn reset(&self) {
        self.store(0);
    }
}

/// Single-producer / single-consumer byte ring.
///
/// The producer only moves `head`, the consumer only moves `tail`. One slot
/// stays free to tell full from empty, so `N` slots hold `N - 1` bytes.
/// Fewer than two slots is rejected at compile time:
///
/// ```compile_fail
/// let ring = regbench_hal::shared::SpscRing::<1>::new();
/// ```
#[derive(Debug)]
pub struct SpscRing<const N: usize> {
    buf: [AtomicU8; N],
    head: AtomicUsize,
    tail: AtomicUsize,
}

impl<const N: usize> Default for SpscRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> SpscRing<N> {
    const MIN_SLOTS: () = assert!(N >= 2, "SpscRing needs at least two slots");

    pub fn new() -> Self {
        let () = Self::MIN_SLOTS;
        Self {
            buf: std::array::from_fn(|_| AtomicU8::new(0)),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    pub const fn capacity(&self) -> usize {
        N - 1
    }

    /// Append one byte. Fails when full.
    pub fn push(&self, byte: u8) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        let next = (head + 1) % N;
        if next == self.tail.load(Ordering::Acquire) {
            return false;
        }
        self.buf[head].store(byte, Ordering::Relaxed);
        self.head.store(next, Ordering::Release);
        true
    }

    /// Take the oldest byte. `None` when empty.
    pub fn pop(&self) -> Option<u8> {
        let tail = self.tail.load(Ordering::Relaxed);
        if tail == self.head.load(Ordering::Acquire) {
            return None;
        }
        let byte = self.buf[tail].load(Ordering::Relaxed);
        self.tail.store((tail + 1) % N, Ordering::Release);
        Some(byte)
    }

    /// Push as many of `bytes` as fit. Returns how many were taken.
    pub fn write(&self, bytes: &[u8]) -> usize {
        bytes.iter().take_while(|&&b| self.push(b)).count()
    }

    /// Pop into `out` until it is full or the ring is empty. Returns the count.
    pub fn read(&self, out: &mut [u8]) -> usize {
        let mut n = 0;
        for slot in out.iter_mut() {
            match self.pop() {
                Some(byte) => {
                    *slot = byte;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (head + N - tail) % N
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }
}

/// Multi-word state accessed whole, inside a critical section.
#[derive(Debug, Default)]
pub struct Guarded<T> {
    inner: Mutex<T>,
}

impl<T: Clone> Guarded<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    pub fn load(&self) -> T {
        self.lock().clone()
    }

    pub fn store(&self, value: T) {
        *self.lock() = value;
    }

    /// Read-modify-write under the lock. Returns the closure's result.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.lock())
    }

    // Poisoning is ignored.
    fn lock(&self) -> std::sync::MutexGuard<'_, T> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counter_wraps() {
        let counter = SharedCounter::new(u32::MAX);
        assert_eq!(counter.increment(), 0);
        assert_eq!(counter.increment(), 1);
        counter.reset();
        assert_eq!(counter.load(), 0);
    }

    #[test]
    fn test_ring_full_and_empty() {
        let ring = SpscRing::<4>::new();
        assert_eq!(ring.capacity(), 3);
        assert!(ring.pop().is_none());
        assert_eq!(ring.write(b"abcd"), 3);
        assert!(ring.is_full());
        assert!(!ring.push(b'x'));

        assert_eq!(ring.pop(), Some(b'a'));
        assert!(ring.push(b'd'));
        let mut out = [0u8; 8];
        assert_eq!(ring.read(&mut out), 3);
        assert_eq!(&out[..3], b"bcd");
        assert!(ring.is_empty());
    }

    #[test]
    fn test_smallest_ring_holds_one_byte() {
        let ring = SpscRing::<2>::new();
        assert_eq!(ring.capacity(), 1);
        assert!(ring.push(b'a'));
        assert!(ring.is_full());
        assert!(!ring.push(b'b'));
        assert_eq!(ring.pop(), Some(b'a'));
        assert!(ring.push(b'b'));
        assert_eq!(ring.pop(), Some(b'b'));
    }

    #[test]
    fn test_ring_across_threads() {
        let ring = Arc::new(SpscRing::<16>::new());
        let producer = {
            let ring = ring.clone();
            std::thread::spawn(move || {
                for i in 0..=255u8 {
                    while !ring.push(i) {
                        std::thread::yield_now();
                    }
                }
            })
        };

        let mut received = Vec::new();
        while received.len() < 256 {
            match ring.pop() {
                Some(b) => received.push(b),
                None => std::thread::yield_now(),
            }
        }
        producer.join().unwrap();
        assert!(received.iter().enumerate().all(|(i, &b)| b == i as u8));
    }

    #[test]
    fn test_guarded_update() {
        let stamp = Guarded::new((0u32, 0u32));
        let next = stamp.update(|(secs, ms)| {
            *ms += 1500;
            *secs += *ms / 1000;
            *ms %= 1000;
            *secs
        });
        assert_eq!(next, 1);
        assert_eq!(stamp.load(), (1, 500));
        stamp.store((7, 0));
        assert_eq!(stamp.load(), (7, 0));
    }
}
