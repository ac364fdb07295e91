//! Lock-free single-producer single-consumer ring
//!
//! # Design
//! The ring holds up to `N` elements in `N + 1` slots. One slot always stays unused so that
//! `read == write` unambiguously means empty. Each cursor is written by exactly one side: the
//! producer owns `write`, the consumer owns `read`. A slot is filled before `write` is published
//! with `Release` and read only after the consumer observes `write` with `Acquire`, and vice versa
//! for `read`.
//!
//! No locks and no interrupt masking are involved. This allows an interrupt handler to push while
//! the main loop pops, or the reverse. Two producers (or two consumers) are not supported; when
//! several interrupts feed one ring they must run at the same priority so they never preempt each
//! other.
use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicUsize, Ordering};

#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Ring is full")]
    Full,
    #[error("Ring is empty")]
    Empty,
}

/// A fixed capacity SPSC ring of `N` copyable elements.
pub struct Ring<T, const N: usize> {
    slots: [UnsafeCell<MaybeUninit<T>>; N],
    // The `N + 1`th slot.
    spare: UnsafeCell<MaybeUninit<T>>,
    write: AtomicUsize,
    read: AtomicUsize,
}

// Note(unsafe): Each slot is accessed by at most one side at any time, as arbitrated by the
// cursors. Values cross contexts, hence `T: Send`.
unsafe impl<T: Copy + Send, const N: usize> Sync for Ring<T, N> {}

impl<T: Copy, const N: usize> Default for Ring<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy, const N: usize> Ring<T, N> {
    const SLOTS: usize = N + 1;

    /// Construct an empty ring, usable in a `static`.
    pub const fn new() -> Self {
        assert!(N > 0);
        Self {
            // Note(unsafe): An array of `MaybeUninit` needs no initialization.
            slots: unsafe {
                MaybeUninit::<[UnsafeCell<MaybeUninit<T>>; N]>::uninit()
                    .assume_init()
            },
            spare: UnsafeCell::new(MaybeUninit::uninit()),
            write: AtomicUsize::new(0),
            read: AtomicUsize::new(0),
        }
    }

    fn slot(&self, index: usize) -> *mut MaybeUninit<T> {
        match self.slots.get(index) {
            Some(slot) => slot.get(),
            None => self.spare.get(),
        }
    }

    fn next(index: usize) -> usize {
        let next = index + 1;
        if next == Self::SLOTS {
            0
        } else {
            next
        }
    }

    /// Append an element. Producer side only.
    ///
    /// # Returns
    /// [Error::Full] if `N` elements are pending. The ring is left unchanged.
    pub fn put(&self, value: T) -> Result<(), Error> {
        let write = self.write.load(Ordering::Relaxed);
        let next = Self::next(write);
        if next == self.read.load(Ordering::Acquire) {
            return Err(Error::Full);
        }
        // Note(unsafe): The consumer does not touch the slot at `write` until it is published.
        unsafe { (*self.slot(write)).write(value) };
        self.write.store(next, Ordering::Release);
        Ok(())
    }

    /// Remove the oldest element. Consumer side only.
    ///
    /// # Returns
    /// [Error::Empty] if nothing is pending.
    pub fn get(&self) -> Result<T, Error> {
        let read = self.read.load(Ordering::Relaxed);
        if read == self.write.load(Ordering::Acquire) {
            return Err(Error::Empty);
        }
        // Note(unsafe): The slot at `read` was published by the producer and is not reused until
        // `read` advances past it.
        let value = unsafe { (*self.slot(read)).assume_init_read() };
        self.read.store(Self::next(read), Ordering::Release);
        Ok(value)
    }

    /// Number of pending elements. Only a snapshot when the other side is active.
    pub fn len(&self) -> usize {
        let write = self.write.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);
        (write + Self::SLOTS - read) % Self::SLOTS
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == N
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand_core::{RngCore, SeedableRng};
    use rand_xorshift::XorShiftRng;

    #[test]
    fn capacity() {
        let ring = Ring::<u8, 5>::new();
        assert_eq!(ring.get(), Err(Error::Empty));
        for i in 0..5 {
            ring.put(i).unwrap();
        }
        assert!(ring.is_full());
        assert_eq!(ring.put(5), Err(Error::Full));
        assert_eq!(ring.len(), 5);
        for i in 0..5 {
            assert_eq!(ring.get(), Ok(i));
        }
        assert!(ring.is_empty());
        assert_eq!(ring.get(), Err(Error::Empty));
    }

    #[test]
    fn single() {
        let ring = Ring::<u32, 1>::new();
        for i in 0..10 {
            ring.put(i).unwrap();
            assert_eq!(ring.put(i), Err(Error::Full));
            assert_eq!(ring.get(), Ok(i));
        }
    }

    #[test]
    fn random_occupancy() {
        let mut rng = XorShiftRng::from_seed([0x11; 16]);
        let ring = Ring::<u32, 7>::new();
        let (mut head, mut tail) = (0u32, 0u32);
        for _ in 0..10_000 {
            if rng.next_u32() & 1 == 0 {
                match ring.put(head) {
                    Ok(()) => head += 1,
                    Err(e) => {
                        assert_eq!(e, Error::Full);
                        assert_eq!(head - tail, 7);
                    }
                }
            } else {
                match ring.get() {
                    Ok(v) => {
                        assert_eq!(v, tail);
                        tail += 1;
                    }
                    Err(e) => {
                        assert_eq!(e, Error::Empty);
                        assert_eq!(head, tail);
                    }
                }
            }
            assert_eq!(ring.len(), (head - tail) as usize);
        }
    }

    #[test]
    fn threaded() {
        const COUNT: u64 = 200_000;
        let ring = Ring::<u64, 16>::new();
        std::thread::scope(|s| {
            s.spawn(|| {
                let mut i = 0;
                while i < COUNT {
                    if ring.put(i).is_ok() {
                        i += 1;
                    }
                }
            });
            s.spawn(|| {
                let mut expect = 0;
                while expect < COUNT {
                    if let Ok(v) = ring.get() {
                        assert_eq!(v, expect);
                        expect += 1;
                    }
                }
            });
        });
        assert!(ring.is_empty());
    }
}
