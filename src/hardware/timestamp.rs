//! PPS edge timestamping
//!
//! # Design
//! The PPS input is captured by a timer channel with a 16-bit free-running counter. Rising edges
//! load one capture register, falling edges another. The only interrupt source is the counter
//! overflow: its handler counts overflows into the upper 16 bits and extends any capture loaded
//! since the previous overflow to a 32-bit [Timestamp].
//!
//! The handler reads status, then the counter, then the capture registers. A loaded capture value
//! that is not larger than the counter value read in the handler was taken after the overflow that
//! raised the interrupt, so it belongs to the next (not yet counted) overflow period. This resolves
//! the race between the overflow and the capture without stopping the counter.
//!
//! Extended edges are handed to the poll loop through an [EdgeLatch]. There is at most one pending
//! edge of each kind. A second edge before the poll loop runs overwrites the first, which is
//! harmless at a 1 Hz input rate.
use bitbybit::bitfield;
use core::cell::Cell;
use critical_section::Mutex;

/// A 32-bit capture timestamp: `(overflows << 16) | capture`.
pub type Timestamp = u32;

/// Capture timer status. Reading it clears all flags.
#[bitfield(u32, default = 0)]
#[derive(Debug, PartialEq)]
pub struct CaptureStatus {
    #[bit(0, rw)]
    pub counter_overflow: bool,
    #[bit(5, rw)]
    pub rising_loaded: bool,
    #[bit(6, rw)]
    pub falling_loaded: bool,
}

/// Register access to the capture timer channel.
pub trait CaptureTimer {
    /// Read and clear the status flags.
    fn status(&mut self) -> CaptureStatus;
    /// The current counter value.
    fn counter(&mut self) -> u16;
    /// The latched rising edge capture.
    fn rising(&mut self) -> u16;
    /// The latched falling edge capture.
    fn falling(&mut self) -> u16;
}

/// Edges captured since the last poll.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CaptureEvent {
    pub rising: Option<Timestamp>,
    pub falling: Option<Timestamp>,
}

impl CaptureEvent {
    pub fn is_empty(&self) -> bool {
        self.rising.is_none() && self.falling.is_none()
    }

    /// Combine with a newer event. Newer edges replace older ones of the same kind.
    pub fn merge(self, newer: Self) -> Self {
        Self {
            rising: newer.rising.or(self.rising),
            falling: newer.falling.or(self.falling),
        }
    }
}

/// Extend a 16-bit capture to a [Timestamp].
///
/// # Args
/// * `overflows` - Overflows counted before the current one is handled.
/// * `counter` - The counter value read in the overflow handler.
/// * `capture` - The latched capture value.
pub fn extend(overflows: u16, counter: u16, capture: u16) -> Timestamp {
    let msb = if capture <= counter {
        overflows.wrapping_add(1)
    } else {
        overflows
    };
    ((msb as u32) << 16) | capture as u32
}

/// Single event mailbox between the overflow interrupt and the poll loop.
pub struct EdgeLatch(Mutex<Cell<CaptureEvent>>);

impl Default for EdgeLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl EdgeLatch {
    pub const fn new() -> Self {
        Self(Mutex::new(Cell::new(CaptureEvent {
            rising: None,
            falling: None,
        })))
    }

    fn publish(&self, event: CaptureEvent) {
        critical_section::with(|cs| {
            let cell = self.0.borrow(cs);
            cell.set(cell.get().merge(event));
        });
    }

    /// Take all edges captured since the last poll.
    pub fn poll(&self) -> CaptureEvent {
        critical_section::with(|cs| self.0.borrow(cs).take())
    }
}

/// Overflow counting and capture extension for one timer channel.
pub struct TimestampCapture<'a, C> {
    timer: C,
    overflows: u16,
    latch: &'a EdgeLatch,
}

impl<'a, C: CaptureTimer> TimestampCapture<'a, C> {
    /// Construct the capture.
    ///
    /// # Args
    /// * `timer` - The capture timer channel, already counting with only the overflow interrupt
    ///   enabled.
    /// * `latch` - Where extended edges are published for the poll loop.
    pub fn new(timer: C, latch: &'a EdgeLatch) -> Self {
        Self {
            timer,
            overflows: 0,
            latch,
        }
    }

    /// Overflows counted so far, modulo 2^16.
    pub fn overflows(&self) -> u16 {
        self.overflows
    }

    /// Handle the counter overflow interrupt.
    pub fn on_overflow(&mut self) {
        let status = self.timer.status();
        let counter = self.timer.counter();

        if !status.counter_overflow() {
            return;
        }

        let mut event = CaptureEvent::default();
        if status.rising_loaded() {
            event.rising = Some(extend(self.overflows, counter, self.timer.rising()));
        }
        if status.falling_loaded() {
            event.falling = Some(extend(self.overflows, counter, self.timer.falling()));
        }
        if !event.is_empty() {
            self.latch.publish(event);
        }

        self.overflows = self.overflows.wrapping_add(1);
    }
}
