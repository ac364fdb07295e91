//! Continuous E1 double-frame exchange over the synchronous serial interface
//!
//! # Design
//! The serial peripheral moves one [DoubleFrame] per DMA transfer in each direction. The DMA
//! engine holds two descriptors per direction, "current" and "next". When current completes, next
//! becomes current and the engine keeps running without CPU intervention. The completion interrupt
//! must then arm a new next descriptor before the new current completes, so two descriptors are
//! always queued.
//!
//! Each direction cycles through a [FrameRing] of `N` slots. On completion of slot `i`:
//! * `i` is published as the last completed slot,
//! * `i + 1` is now current,
//! * `i + 2` is armed as next.
//!
//! If the interrupt was serviced too late and both descriptors were exhausted, the peripheral
//! flags a buffer-full (receive) or buffer-empty (transmit) condition. The ring is then restarted
//! from slot 0 and the data for that window is lost.
//!
//! The completed slot is passed to a [FrameHandler] in interrupt context: received frames for
//! consumption, transmitted slots for refilling before they are armed again.
use bitbybit::bitfield;
use core::cell::UnsafeCell;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};
use g704::DoubleFrame;

use crate::statistics::ExchangeCounters;

#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Receive ring overrun")]
    RingOverrun,
    #[error("Transmit ring underrun")]
    RingUnderrun,
}

/// Serial peripheral status. Reading it clears the end-of-transfer flags.
#[bitfield(u32, default = 0)]
#[derive(Debug, PartialEq)]
pub struct SerialStatus {
    /// The current transmit descriptor completed.
    #[bit(2, rw)]
    pub tx_end: bool,
    /// Both transmit descriptors are exhausted.
    #[bit(3, rw)]
    pub tx_buffer_empty: bool,
    /// The current receive descriptor completed.
    #[bit(6, rw)]
    pub rx_end: bool,
    /// Both receive descriptors are exhausted.
    #[bit(7, rw)]
    pub rx_buffer_full: bool,
}

/// DMA descriptor access of the serial peripheral.
///
/// # Note
/// The buffers passed in are slots of a [FrameRing] that outlives the exchange. The implementation
/// only hands the addresses to the DMA engine.
pub trait SerialDma {
    /// Read and clear the status.
    fn status(&mut self) -> SerialStatus;
    /// Arm the next receive descriptor.
    fn queue_rx(&mut self, next: NonNull<DoubleFrame>);
    /// Arm the next transmit descriptor.
    fn queue_tx(&mut self, next: NonNull<DoubleFrame>);
    /// Reprogram both receive descriptors and (re)enable reception.
    fn restart_rx(&mut self, current: NonNull<DoubleFrame>, next: NonNull<DoubleFrame>);
    /// Reprogram both transmit descriptors and (re)enable transmission.
    fn restart_tx(&mut self, current: NonNull<DoubleFrame>, next: NonNull<DoubleFrame>);
}

/// Consumer of completed slots, called from the serial interrupt.
pub trait FrameHandler {
    /// A double-frame was received into `slot`.
    fn received(&mut self, slot: usize, frame: &DoubleFrame);
    /// Transmit `slot` completed. Fill in the contents to send the next time it is armed.
    fn refill(&mut self, slot: usize, frame: &mut DoubleFrame);
}

/// `N` DMA double-frame slots and the index of the last completed one.
pub struct FrameRing<const N: usize> {
    slots: [UnsafeCell<DoubleFrame>; N],
    last: AtomicUsize,
}

// Note(unsafe): Slot contents are only accessed through volatile copies. The published index is
// the only synchronization between the interrupt writing slots and the poll loop reading them.
unsafe impl<const N: usize> Sync for FrameRing<N> {}

impl<const N: usize> Default for FrameRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> FrameRing<N> {
    const SLOT: UnsafeCell<DoubleFrame> = UnsafeCell::new(DoubleFrame::ZERO);
    const NONE: usize = usize::MAX;

    pub const fn new() -> Self {
        assert!(N >= 2);
        Self {
            slots: [Self::SLOT; N],
            last: AtomicUsize::new(Self::NONE),
        }
    }

    pub const fn len(&self) -> usize {
        N
    }

    /// The DMA address of a slot.
    pub fn slot(&self, index: usize) -> NonNull<DoubleFrame> {
        // Note(unsafe): `UnsafeCell::get` never returns null.
        unsafe { NonNull::new_unchecked(self.slots[index].get()) }
    }

    /// Copy a slot.
    pub fn read(&self, index: usize) -> DoubleFrame {
        // Note(unsafe): The slot is valid and aligned. A concurrent DMA or interrupt write yields
        // a mixed but well-formed frame.
        unsafe { self.slot(index).as_ptr().read_volatile() }
    }

    /// Overwrite a slot. Only the single producer of the ring may call this.
    pub(crate) fn write(&self, index: usize, frame: &DoubleFrame) {
        // Note(unsafe): See `read()`.
        unsafe { self.slot(index).as_ptr().write_volatile(*frame) }
    }

    /// Mark a fully written slot as the last completed one.
    pub(crate) fn publish(&self, index: usize) {
        self.last.store(index, Ordering::Release);
    }

    /// The last completed slot, if any.
    pub fn last_completed(&self) -> Option<usize> {
        let last = self.last.load(Ordering::Acquire);
        (last != Self::NONE).then_some(last)
    }

    pub(crate) fn reset(&self) {
        self.last.store(Self::NONE, Ordering::Release);
    }

    /// Copies of all slots in ring order.
    pub fn frames(&self) -> impl Iterator<Item = DoubleFrame> + '_ {
        (0..N).map(move |i| self.read(i))
    }
}

/// What one serial interrupt did.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    pub received: Option<usize>,
    pub transmitted: Option<usize>,
    pub rx_fault: Option<Error>,
    pub tx_fault: Option<Error>,
}

pub struct SerialFrameExchange<'a, D, const RX: usize, const TX: usize> {
    dma: D,
    rx: &'a FrameRing<RX>,
    tx: &'a FrameRing<TX>,
    rx_current: usize,
    tx_current: usize,
    counters: &'a ExchangeCounters,
}

impl<'a, D: SerialDma, const RX: usize, const TX: usize>
    SerialFrameExchange<'a, D, RX, TX>
{
    /// Construct the exchange.
    ///
    /// # Args
    /// * `dma` - The serial peripheral DMA, with transfers stopped.
    /// * `rx` - The raw receive ring the DMA engine writes.
    /// * `tx` - The transmit ring the DMA engine reads.
    /// * `counters` - Exchange event counters.
    pub fn new(
        dma: D,
        rx: &'a FrameRing<RX>,
        tx: &'a FrameRing<TX>,
        counters: &'a ExchangeCounters,
    ) -> Self {
        Self {
            dma,
            rx,
            tx,
            rx_current: 0,
            tx_current: 0,
            counters,
        }
    }

    fn refill(&self, handler: &mut impl FrameHandler, slot: usize) {
        let mut frame = self.tx.read(slot);
        handler.refill(slot, &mut frame);
        self.tx.write(slot, &frame);
    }

    fn restart_rx(&mut self) {
        self.rx_current = 0;
        self.dma.restart_rx(self.rx.slot(0), self.rx.slot(1));
    }

    fn restart_tx(&mut self) {
        self.tx_current = 0;
        self.dma.restart_tx(self.tx.slot(0), self.tx.slot(1));
    }

    /// Fill all transmit slots and start both directions at slot 0.
    pub fn start(&mut self, handler: &mut impl FrameHandler) {
        for slot in 0..TX {
            self.refill(handler, slot);
        }
        self.rx.reset();
        self.tx.reset();
        self.restart_rx();
        self.restart_tx();
    }

    /// Handle the serial interrupt.
    ///
    /// # Args
    /// * `handler` - Called with the completed receive slot and the completed transmit slot.
    pub fn on_interrupt(&mut self, handler: &mut impl FrameHandler) -> Outcome {
        let status = self.dma.status();
        let mut outcome = Outcome::default();

        if status.rx_end() {
            let done = self.rx_current;
            self.rx.publish(done);
            self.counters.rx_frame();
            // Copy out before a restart may re-arm this slot.
            let frame = self.rx.read(done);
            if status.rx_buffer_full() {
                self.counters.rx_overrun();
                self.restart_rx();
                outcome.rx_fault = Some(Error::RingOverrun);
            } else {
                self.rx_current = (done + 1) % RX;
                self.dma.queue_rx(self.rx.slot((done + 2) % RX));
            }
            handler.received(done, &frame);
            outcome.received = Some(done);
        }

        if status.tx_end() {
            let done = self.tx_current;
            self.tx.publish(done);
            self.counters.tx_frame();
            self.refill(handler, done);
            if status.tx_buffer_empty() {
                self.counters.tx_underrun();
                self.restart_tx();
                outcome.tx_fault = Some(Error::RingUnderrun);
            } else {
                self.tx_current = (done + 1) % TX;
                self.dma.queue_tx(self.tx.slot((done + 2) % TX));
            }
            outcome.transmitted = Some(done);
        }

        outcome
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use g704::DOUBLE_FRAME_WORDS;

    #[derive(Debug, PartialEq)]
    enum Op {
        QueueRx(usize),
        QueueTx(usize),
        RestartRx(usize, usize),
        RestartTx(usize, usize),
    }

    struct Dma<'a> {
        rx: &'a FrameRing<4>,
        tx: &'a FrameRing<4>,
        status: SerialStatus,
        ops: Vec<Op>,
    }

    fn index<const N: usize>(ring: &FrameRing<N>, p: NonNull<DoubleFrame>) -> usize {
        (0..N).find(|&i| ring.slot(i) == p).unwrap()
    }

    impl SerialDma for Dma<'_> {
        fn status(&mut self) -> SerialStatus {
            core::mem::take(&mut self.status)
        }
        fn queue_rx(&mut self, next: NonNull<DoubleFrame>) {
            self.ops.push(Op::QueueRx(index(self.rx, next)));
        }
        fn queue_tx(&mut self, next: NonNull<DoubleFrame>) {
            self.ops.push(Op::QueueTx(index(self.tx, next)));
        }
        fn restart_rx(&mut self, current: NonNull<DoubleFrame>, next: NonNull<DoubleFrame>) {
            self.ops
                .push(Op::RestartRx(index(self.rx, current), index(self.rx, next)));
        }
        fn restart_tx(&mut self, current: NonNull<DoubleFrame>, next: NonNull<DoubleFrame>) {
            self.ops
                .push(Op::RestartTx(index(self.tx, current), index(self.tx, next)));
        }
    }

    #[derive(Default)]
    struct Handler {
        received: Vec<(usize, u32)>,
        refills: Vec<usize>,
        seq: u32,
    }

    impl FrameHandler for Handler {
        fn received(&mut self, slot: usize, frame: &DoubleFrame) {
            self.received.push((slot, frame.0[1]));
        }
        fn refill(&mut self, slot: usize, frame: &mut DoubleFrame) {
            self.refills.push(slot);
            frame.0[1] = self.seq;
            self.seq += 1;
        }
    }

    #[test]
    fn keeps_two_armed() {
        let (rx, tx) = (FrameRing::<4>::new(), FrameRing::<4>::new());
        let counters = ExchangeCounters::new();
        let dma = Dma {
            rx: &rx,
            tx: &tx,
            status: SerialStatus::default(),
            ops: vec![],
        };
        let mut exchange = SerialFrameExchange::new(dma, &rx, &tx, &counters);
        let mut handler = Handler::default();
        exchange.start(&mut handler);
        assert_eq!(handler.refills, [0, 1, 2, 3]);
        assert_eq!(exchange.dma.ops, [Op::RestartRx(0, 1), Op::RestartTx(0, 1)]);
        assert_eq!(rx.last_completed(), None);
        exchange.dma.ops.clear();

        for i in 0..10 {
            // The DMA engine fills the current slot.
            rx.write(i % 4, &DoubleFrame([100 + i as u32; DOUBLE_FRAME_WORDS]));
            exchange.dma.status = SerialStatus::default().with_rx_end(true);
            let outcome = exchange.on_interrupt(&mut handler);
            assert_eq!(outcome.received, Some(i % 4));
            assert_eq!(outcome.rx_fault, None);
            assert_eq!(rx.last_completed(), Some(i % 4));
            assert_eq!(exchange.dma.ops.pop(), Some(Op::QueueRx((i + 2) % 4)));
            assert_eq!(handler.received.pop(), Some((i % 4, 100 + i as u32)));
        }
        assert_eq!(counters.snapshot().rx_frames, 10);

        for i in 0..6 {
            exchange.dma.status = SerialStatus::default().with_tx_end(true);
            let outcome = exchange.on_interrupt(&mut handler);
            assert_eq!(outcome.transmitted, Some(i % 4));
            assert_eq!(exchange.dma.ops.pop(), Some(Op::QueueTx((i + 2) % 4)));
            assert_eq!(handler.refills.pop(), Some(i % 4));
            // Refilled contents are in the ring.
            assert_eq!(tx.read(i % 4).0[1], 4 + i as u32);
        }
        assert_eq!(tx.last_completed(), Some(1));
    }

    #[test]
    fn overrun_restarts() {
        let (rx, tx) = (FrameRing::<4>::new(), FrameRing::<4>::new());
        let counters = ExchangeCounters::new();
        let dma = Dma {
            rx: &rx,
            tx: &tx,
            status: SerialStatus::default(),
            ops: vec![],
        };
        let mut exchange = SerialFrameExchange::new(dma, &rx, &tx, &counters);
        let mut handler = Handler::default();
        exchange.start(&mut handler);
        exchange.dma.ops.clear();

        for _ in 0..2 {
            exchange.dma.status = SerialStatus::default().with_rx_end(true);
            exchange.on_interrupt(&mut handler);
        }
        exchange.dma.status = SerialStatus::default()
            .with_rx_end(true)
            .with_rx_buffer_full(true)
            .with_tx_end(true)
            .with_tx_buffer_empty(true);
        let outcome = exchange.on_interrupt(&mut handler);
        assert_eq!(outcome.received, Some(2));
        assert_eq!(outcome.rx_fault, Some(Error::RingOverrun));
        assert_eq!(outcome.transmitted, Some(0));
        assert_eq!(outcome.tx_fault, Some(Error::RingUnderrun));
        assert_eq!(
            &exchange.dma.ops[2..],
            [Op::RestartRx(0, 1), Op::RestartTx(0, 1)]
        );

        exchange.dma.status = SerialStatus::default().with_rx_end(true);
        let outcome = exchange.on_interrupt(&mut handler);
        assert_eq!(outcome.received, Some(0));

        let stats = counters.snapshot();
        assert_eq!(stats.rx_overruns, 1);
        assert_eq!(stats.tx_underruns, 1);
        assert_eq!(stats.rx_frames, 4);
        assert_eq!(stats.tx_frames, 1);
    }
}
