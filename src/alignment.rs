//! G.704 frame alignment supervision
//!
//! # Design
//! After each received double-frame the detector counts towards a settle window. Once the window
//! has elapsed, every slot of the receive ring is checked for FAS in the even frame and NFAS in
//! the odd frame. The scan stops at the first misaligned slot: one phase nudge is requested and
//! the window restarts, giving the nudge time to take effect before the next check. While all
//! slots are aligned the window is not restarted and every following double-frame is checked.
//!
//! A single misaligned slot triggers exactly one nudge per window regardless of how many slots are
//! misaligned. The frame phase converges one bit clock per window.
use miniconf::{Leaf, Tree};
use serde::{Deserialize, Serialize};

use crate::hardware::{
    frame_clock::{self, Direction, FrameClockPhaseAdjuster, WaveformTimer},
    serial::FrameRing,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Slot {slot} misaligned: even {even:#010x} odd {odd:#010x}")]
    Desync { slot: usize, even: u32, odd: u32 },
    #[error("Phase adjustment busy")]
    PhaseAdjustBusy,
}

impl From<frame_clock::Error> for Error {
    fn from(_: frame_clock::Error) -> Self {
        Self::PhaseAdjustBusy
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Tree)]
pub struct AlignmentSettings {
    /// Request frame clock phase nudges on misalignment. Misalignment is reported either way.
    pub enabled: Leaf<bool>,

    /// Received double-frames between a nudge and the next check.
    pub window: Leaf<u32>,
}

impl Default for AlignmentSettings {
    fn default() -> Self {
        Self {
            enabled: true.into(),
            window: 200.into(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Check {
    /// Waiting for the settle window to elapse.
    Settling,
    /// All slots carry the alignment pattern.
    Locked,
}

#[derive(Debug, Default)]
pub struct FrameAlignmentDetector {
    settings: AlignmentSettings,
    frames: u32,
    nudges: u32,
}

impl FrameAlignmentDetector {
    pub fn new(settings: AlignmentSettings) -> Self {
        Self {
            settings,
            frames: 0,
            nudges: 0,
        }
    }

    pub fn settings(&self) -> &AlignmentSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: AlignmentSettings) {
        self.settings = settings;
        self.frames = 0;
    }

    /// Phase nudges requested so far.
    pub fn nudges(&self) -> u32 {
        self.nudges
    }

    /// Process one received double-frame.
    ///
    /// # Args
    /// * `ring` - The receive ring to scan.
    /// * `adjuster` - The frame clock to nudge on misalignment.
    ///
    /// # Returns
    /// The check result, or [Error::Desync] with the first misaligned slot. If the nudge could
    /// not be requested, [Error::PhaseAdjustBusy]; the next window retries.
    pub fn on_double_frame<const N: usize, T: WaveformTimer>(
        &mut self,
        ring: &FrameRing<N>,
        adjuster: &FrameClockPhaseAdjuster<T>,
    ) -> Result<Check, Error> {
        self.frames = self.frames.saturating_add(1);
        if self.frames <= *self.settings.window {
            return Ok(Check::Settling);
        }

        let Some((slot, frame)) = ring.frames().enumerate().find(|(_, f)| !f.is_aligned()) else {
            return Ok(Check::Locked);
        };

        self.frames = 0;
        if *self.settings.enabled {
            adjuster.request(Direction::Increase)?;
            self.nudges += 1;
        }
        Err(Error::Desync {
            slot,
            even: frame.even_word(),
            odd: frame.odd_word(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use core::cell::Cell;
    use g704::DoubleFrame;

    #[derive(Default)]
    struct Timer {
        listens: Cell<u32>,
    }

    impl WaveformTimer for &Timer {
        fn set_top(&self, _top: u16) {}
        fn listen(&self) {
            self.listens.set(self.listens.get() + 1);
        }
        fn unlisten(&self) {}
    }

    fn aligned() -> DoubleFrame {
        let mut frame = DoubleFrame::ZERO;
        frame.stamp_alignment();
        frame
    }

    fn ring(corrupt: Option<usize>) -> FrameRing<4> {
        let ring = FrameRing::new();
        for i in 0..4 {
            let mut frame = aligned();
            if corrupt == Some(i) {
                frame.0[0] = 0xdead_beef;
            }
            ring.write(i, &frame);
        }
        ring
    }

    /// Run `frames` double-frames, completing every nudge immediately.
    fn run(
        detector: &mut FrameAlignmentDetector,
        ring: &FrameRing<4>,
        adjuster: &FrameClockPhaseAdjuster<&Timer>,
        frames: u32,
    ) -> Vec<Result<Check, Error>> {
        (0..frames)
            .map(|_| {
                let result = detector.on_double_frame(ring, adjuster);
                adjuster.on_period_match();
                adjuster.on_period_match();
                result
            })
            .collect()
    }

    #[test]
    fn one_nudge_per_window() {
        let timer = Timer::default();
        let adjuster = FrameClockPhaseAdjuster::new(&timer, 512);
        let mut detector = FrameAlignmentDetector::default();
        detector.set_settings(AlignmentSettings::default());
        let ring = ring(Some(2));

        let results = run(&mut detector, &ring, &adjuster, 201);
        assert!(results[..200].iter().all(|r| *r == Ok(Check::Settling)));
        assert_eq!(
            results[200],
            Err(Error::Desync {
                slot: 2,
                even: 0xdead_beef,
                odd: aligned().odd_word(),
            })
        );
        assert_eq!(timer.listens.get(), 1);

        run(&mut detector, &ring, &adjuster, 3 * 201);
        assert_eq!(timer.listens.get(), 4);
        assert_eq!(detector.nudges(), 4);
    }

    #[test]
    fn locked() {
        let timer = Timer::default();
        let adjuster = FrameClockPhaseAdjuster::new(&timer, 512);
        let mut detector = FrameAlignmentDetector::new(AlignmentSettings::default());
        let ring = ring(None);
        let results = run(&mut detector, &ring, &adjuster, 1000);
        assert!(results[200..].iter().all(|r| *r == Ok(Check::Locked)));
        assert_eq!(timer.listens.get(), 0);
    }

    #[test]
    fn disabled_reports_only() {
        let timer = Timer::default();
        let adjuster = FrameClockPhaseAdjuster::new(&timer, 512);
        let mut detector = FrameAlignmentDetector::new(AlignmentSettings {
            enabled: false.into(),
            window: 10.into(),
        });
        let ring = ring(Some(0));
        let results = run(&mut detector, &ring, &adjuster, 22);
        assert!(matches!(results[10], Err(Error::Desync { slot: 0, .. })));
        assert!(matches!(results[21], Err(Error::Desync { slot: 0, .. })));
        assert_eq!(timer.listens.get(), 0);
    }

    #[test]
    fn busy() {
        let timer = Timer::default();
        let adjuster = FrameClockPhaseAdjuster::new(&timer, 512);
        adjuster.request(Direction::Decrease).unwrap();
        let mut detector = FrameAlignmentDetector::new(AlignmentSettings {
            enabled: true.into(),
            window: 0.into(),
        });
        let ring = ring(Some(3));
        assert_eq!(
            detector.on_double_frame(&ring, &adjuster),
            Err(Error::PhaseAdjustBusy)
        );
        assert_eq!(detector.nudges(), 0);
    }
}
