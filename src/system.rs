//! Execution contexts of the synchronization core
//!
//! # Design
//! Three interrupts feed one cooperative poll loop:
//! * PPS capture overflow: [TimestampCapture] publishes extended edges into the [EdgeLatch].
//! * Serial DMA completion: [SerialInterrupt] keeps the DMA armed, bit-realigns each received
//!   double-frame into the visible receive ring, stamps G.704 alignment into each transmit refill,
//!   and queues the completed receive slot.
//! * Frame clock period match: [FrameClockInterrupt] applies and restores phase nudges.
//!
//! The serial and frame clock interrupts push into the same [Ring]s and must therefore run at the
//! same priority. Interrupts never log. Whatever the poll loop should report is pushed as an
//! [Event] and logged when [PollLoop::step] drains it.
//!
//! All state shared between contexts lives in [Shared], which the board places in a `static`.
use core::sync::atomic::{AtomicU32, Ordering};
use g704::{BitRealigner, DoubleFrame, DOUBLE_FRAME_BYTES};

use crate::{
    alignment::{self, FrameAlignmentDetector},
    hardware::{
        frame_clock::{self, Direction, FrameClockPhaseAdjuster, Nudge, WaveformTimer},
        serial::{self, FrameHandler, FrameRing, SerialDma, SerialFrameExchange},
        timestamp::{CaptureTimer, EdgeLatch, TimestampCapture},
        Dac,
    },
    ring::Ring,
    settings::Settings,
    statistics::ExchangeCounters,
    steering::{Calibration, OscillatorSteering, Report},
    telemetry::TelemetryBuffer,
};

/// Completed receive slots not yet checked by the poll loop.
pub const COMPLETED_DEPTH: usize = 8;

/// Diagnostic events not yet logged by the poll loop.
pub const EVENT_DEPTH: usize = 16;

const TELEMETRY_LENGTH: usize = 384;

/// Something an interrupt wants the poll loop to report.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Exchange(serial::Error),
    PhaseNudge(Direction),
    PhaseRestored,
    /// A completed receive slot could not be queued for alignment checking.
    CompletionDropped,
}

/// State shared between the interrupts and the poll loop.
pub struct Shared<const RX: usize, const TX: usize> {
    pub edges: EdgeLatch,
    /// Receive slots as written by the DMA engine.
    pub rx_raw: FrameRing<RX>,
    /// Realigned receive slots.
    pub rx: FrameRing<RX>,
    pub tx: FrameRing<TX>,
    pub completed: Ring<usize, COMPLETED_DEPTH>,
    pub events: Ring<Event, EVENT_DEPTH>,
    pub counters: ExchangeCounters,
    rx_alignment: AtomicU32,
}

impl<const RX: usize, const TX: usize> Default for Shared<RX, TX> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const RX: usize, const TX: usize> Shared<RX, TX> {
    const NO_ALIGNMENT: u32 = u32::MAX;

    pub const fn new() -> Self {
        Self {
            edges: EdgeLatch::new(),
            rx_raw: FrameRing::new(),
            rx: FrameRing::new(),
            tx: FrameRing::new(),
            completed: Ring::new(),
            events: Ring::new(),
            counters: ExchangeCounters::new(),
            rx_alignment: AtomicU32::new(Self::NO_ALIGNMENT),
        }
    }

    /// Request a new receive bit alignment. It is applied before the next received double-frame
    /// is realigned. A newer request replaces a pending one.
    pub fn request_rx_alignment(&self, bits: u32) {
        self.rx_alignment.store(
            bits % g704::DOUBLE_FRAME_BITS as u32,
            Ordering::Release,
        );
    }

    fn take_rx_alignment(&self) -> Option<u32> {
        let bits = self.rx_alignment.swap(Self::NO_ALIGNMENT, Ordering::Acquire);
        (bits != Self::NO_ALIGNMENT).then_some(bits)
    }

    fn report(&self, event: Event) {
        // Events are diagnostics only. Drop them if the poll loop is behind.
        self.events.put(event).ok();
    }

    /// Split into the interrupt handlers and the poll loop.
    ///
    /// # Args
    /// * `capture` - The PPS capture timer channel.
    /// * `dma` - The serial peripheral DMA, stopped.
    /// * `dac` - The steering DAC.
    /// * `adjuster` - The frame clock phase adjuster, shared by its interrupt and the poll loop.
    /// * `settings` - Initial settings.
    /// * `now` - The current wall clock tick.
    pub fn split<'a, C, D, A, T>(
        &'a self,
        capture: C,
        dma: D,
        mut dac: A,
        adjuster: &'a FrameClockPhaseAdjuster<T>,
        settings: Settings,
        now: u32,
    ) -> (Interrupts<'a, C, D, T, RX, TX>, PollLoop<'a, A, T, RX, TX>)
    where
        C: CaptureTimer,
        D: SerialDma,
        A: Dac,
        T: WaveformTimer,
    {
        let steering = OscillatorSteering::new(settings.steering, &mut dac, now);
        let interrupts = Interrupts {
            capture: TimestampCapture::new(capture, &self.edges),
            serial: SerialInterrupt {
                exchange: SerialFrameExchange::new(dma, &self.rx_raw, &self.tx, &self.counters),
                line: LinePath {
                    shared: self,
                    realigner: BitRealigner::default(),
                },
            },
            frame_clock: FrameClockInterrupt {
                adjuster,
                shared: self,
            },
        };
        let poll = PollLoop {
            shared: self,
            adjuster,
            dac,
            steering,
            detector: FrameAlignmentDetector::new(settings.alignment),
            telemetry: TelemetryBuffer::default(),
            telemetry_pulses: *settings.telemetry_pulses,
        };
        (interrupts, poll)
    }
}

/// Receive realignment and transmit framing, run from the serial interrupt.
pub struct LinePath<'a, const RX: usize, const TX: usize> {
    shared: &'a Shared<RX, TX>,
    realigner: BitRealigner<DOUBLE_FRAME_BYTES>,
}

impl<const RX: usize, const TX: usize> LinePath<'_, RX, TX> {
    /// The receive bit alignment currently applied.
    pub fn alignment(&self) -> usize {
        self.realigner.alignment()
    }
}

impl<const RX: usize, const TX: usize> FrameHandler for LinePath<'_, RX, TX> {
    fn received(&mut self, slot: usize, frame: &DoubleFrame) {
        if let Some(bits) = self.shared.take_rx_alignment() {
            self.realigner.set_alignment(bits as usize);
        }
        let bytes = self.realigner.realign_frame(&frame.to_bytes());
        self.shared.rx.write(slot, &DoubleFrame::from_bytes(&bytes));
        self.shared.rx.publish(slot);

        if self.shared.completed.put(slot).is_err() {
            self.shared.counters.dropped();
            self.shared.report(Event::CompletionDropped);
        }
    }

    fn refill(&mut self, _slot: usize, frame: &mut DoubleFrame) {
        frame.stamp_alignment();
    }
}

pub struct SerialInterrupt<'a, D, const RX: usize, const TX: usize> {
    exchange: SerialFrameExchange<'a, D, RX, TX>,
    line: LinePath<'a, RX, TX>,
}

impl<'a, D: SerialDma, const RX: usize, const TX: usize> SerialInterrupt<'a, D, RX, TX> {
    /// Frame all transmit slots and start the exchange.
    pub fn start(&mut self) {
        self.exchange.start(&mut self.line);
    }

    pub fn line(&self) -> &LinePath<'a, RX, TX> {
        &self.line
    }

    /// Handle the serial DMA interrupt.
    pub fn on_interrupt(&mut self) -> serial::Outcome {
        let outcome = self.exchange.on_interrupt(&mut self.line);
        for fault in [outcome.rx_fault, outcome.tx_fault].into_iter().flatten() {
            self.line.shared.report(Event::Exchange(fault));
        }
        outcome
    }
}

pub struct FrameClockInterrupt<'a, T, const RX: usize, const TX: usize> {
    adjuster: &'a FrameClockPhaseAdjuster<T>,
    shared: &'a Shared<RX, TX>,
}

impl<T: WaveformTimer, const RX: usize, const TX: usize> FrameClockInterrupt<'_, T, RX, TX> {
    /// Handle the frame clock period-match interrupt.
    pub fn on_interrupt(&mut self) {
        match self.adjuster.on_period_match() {
            Some(Nudge::Applied(direction)) => self.shared.report(Event::PhaseNudge(direction)),
            Some(Nudge::Restored) => self.shared.report(Event::PhaseRestored),
            None => {}
        }
    }
}

/// The interrupt handlers. Each field is moved into its own interrupt context.
pub struct Interrupts<'a, C, D, T, const RX: usize, const TX: usize> {
    pub capture: TimestampCapture<'a, C>,
    pub serial: SerialInterrupt<'a, D, RX, TX>,
    pub frame_clock: FrameClockInterrupt<'a, T, RX, TX>,
}

pub struct PollLoop<'a, A, T, const RX: usize, const TX: usize> {
    shared: &'a Shared<RX, TX>,
    adjuster: &'a FrameClockPhaseAdjuster<T>,
    dac: A,
    steering: OscillatorSteering,
    detector: FrameAlignmentDetector,
    telemetry: TelemetryBuffer,
    telemetry_pulses: u32,
}

impl<A: Dac, T: WaveformTimer, const RX: usize, const TX: usize> PollLoop<'_, A, T, RX, TX> {
    /// Run one iteration of the poll loop.
    ///
    /// # Args
    /// * `now` - The current wall clock tick.
    ///
    /// # Returns
    /// The steering report if an edge was accepted in this iteration.
    pub fn step(&mut self, now: u32) -> Option<Report> {
        let report = self.steer(now);
        self.check_alignment();
        self.drain_events();
        report
    }

    fn steer(&mut self, now: u32) -> Option<Report> {
        let edges = self.shared.edges.poll();
        let report = match self.steering.update(&mut self.dac, edges.rising, now) {
            Ok(report) => report?,
            Err(err) => {
                log::warn!("Steering reset: {err}");
                return None;
            }
        };

        let state: &'static str = report.state.into();
        log::info!(
            "{state} {} {} {} {}",
            report.count,
            report.offset,
            report.dac,
            report.dac_from_center()
        );

        self.telemetry.update(&report);
        if self.telemetry_pulses != 0 && self.telemetry.pulses() >= self.telemetry_pulses {
            self.publish_telemetry();
        }
        Some(report)
    }

    fn publish_telemetry(&mut self) {
        let telemetry = core::mem::take(&mut self.telemetry)
            .finalize(self.shared.counters.snapshot(), self.detector.nudges());
        match telemetry.render::<TELEMETRY_LENGTH>() {
            Ok(json) => log::info!("{json}"),
            Err(err) => log::warn!("Telemetry serialization failed: {err:?}"),
        }
    }

    fn check_alignment(&mut self) {
        while self.shared.completed.get().is_ok() {
            match self.detector.on_double_frame(&self.shared.rx, self.adjuster) {
                Ok(_) => {}
                Err(err @ alignment::Error::Desync { .. }) => log::info!("{err}"),
                Err(err) => log::debug!("{err}"),
            }
        }
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.shared.events.get() {
            match event {
                Event::Exchange(err) => log::warn!("{err}"),
                Event::CompletionDropped => log::warn!("Receive completion dropped"),
                Event::PhaseNudge(direction) => log::debug!("Frame phase nudge {direction:?}"),
                Event::PhaseRestored => log::trace!("Frame period restored"),
            }
        }
    }

    /// Request a one bit frame phase shift.
    pub fn nudge(&self, direction: Direction) -> Result<(), frame_clock::Error> {
        self.adjuster.request(direction)
    }

    /// Request a new receive bit alignment, applied from the next received double-frame.
    pub fn set_rx_alignment(&self, bits: u32) {
        self.shared.request_rx_alignment(bits);
    }

    /// Apply new settings. Steering restarts from `Init` and the alignment window restarts.
    pub fn set_settings(&mut self, settings: Settings, now: u32) {
        self.steering.set_settings(settings.steering, now);
        self.detector.set_settings(settings.alignment);
        self.telemetry_pulses = *settings.telemetry_pulses;
    }

    /// The current settings, including the current DAC calibration if there is one.
    pub fn settings(&self) -> Settings {
        let mut steering = self.steering.settings().clone();
        *steering.calibration = self.steering.calibration().or(*steering.calibration);
        Settings {
            steering,
            alignment: self.detector.settings().clone(),
            telemetry_pulses: self.telemetry_pulses.into(),
        }
    }

    /// The DAC calibration to persist, if the loop is calibrated.
    pub fn calibration(&self) -> Option<Calibration> {
        self.steering.calibration()
    }

    pub fn steering(&self) -> &OscillatorSteering {
        &self.steering
    }

    pub fn detector(&self) -> &FrameAlignmentDetector {
        &self.detector
    }

    pub fn dac(&self) -> &A {
        &self.dac
    }
}
