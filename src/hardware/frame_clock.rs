//! E1 frame clock phase adjustment
//!
//! # Design
//! The frame clock is generated by a timer channel in waveform mode counting serial bit clocks up
//! to a top value of one double-frame. Lengthening or shortening a single period by one bit clock
//! shifts the frame phase by one bit without a lasting frequency error.
//!
//! A nudge takes two period-match interrupts. A new top value written in the interrupt takes
//! effect for the following period. The first match after a request writes `nominal ± 1`, the
//! second writes `nominal` back and disarms the interrupt. Only one nudge can be in flight: the
//! request mailbox is a single atomic state and a request while it is not idle fails.
use core::sync::atomic::{AtomicU8, Ordering};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error,
)]
pub enum Error {
    #[error("A phase adjustment is already in progress")]
    Busy,
}

/// Direction of a one bit frame phase shift.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Lengthen one period by one bit clock.
    Increase,
    /// Shorten one period by one bit clock.
    Decrease,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
enum Mailbox {
    Idle = 0,
    Increase = 1,
    Decrease = 2,
    Applied = 3,
}

impl From<Direction> for Mailbox {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Increase => Self::Increase,
            Direction::Decrease => Self::Decrease,
        }
    }
}

/// What a period-match interrupt did.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Nudge {
    /// The modified period was armed.
    Applied(Direction),
    /// The nominal period was restored, the nudge is complete.
    Restored,
}

/// The frame clock timer channel.
///
/// # Note
/// Methods take `&self`: the channel is shared between the poll loop (arming) and its own
/// interrupt. Each method is a single register write.
pub trait WaveformTimer {
    /// Set the top value of the next period.
    fn set_top(&self, top: u16);
    /// Enable the period-match interrupt.
    fn listen(&self);
    /// Disable the period-match interrupt.
    fn unlisten(&self);
}

pub struct FrameClockPhaseAdjuster<T> {
    timer: T,
    nominal: u16,
    state: AtomicU8,
}

impl<T: WaveformTimer> FrameClockPhaseAdjuster<T> {
    /// Construct the adjuster and program the nominal period.
    ///
    /// # Args
    /// * `timer` - The frame clock timer channel.
    /// * `nominal` - The top value for one double-frame in bit clocks.
    pub fn new(timer: T, nominal: u16) -> Self {
        timer.set_top(nominal);
        timer.unlisten();
        Self {
            timer,
            nominal,
            state: AtomicU8::new(Mailbox::Idle.into()),
        }
    }

    /// Whether a nudge is in flight.
    pub fn is_busy(&self) -> bool {
        self.state.load(Ordering::Acquire) != u8::from(Mailbox::Idle)
    }

    /// Request a one bit clock phase shift.
    ///
    /// # Returns
    /// [Error::Busy] if a previous nudge has not completed. It is not queued.
    pub fn request(&self, direction: Direction) -> Result<(), Error> {
        self.state
            .compare_exchange(
                Mailbox::Idle.into(),
                Mailbox::from(direction).into(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| Error::Busy)?;
        self.timer.listen();
        Ok(())
    }

    /// Handle the period-match interrupt.
    pub fn on_period_match(&self) -> Option<Nudge> {
        let state = Mailbox::try_from(self.state.load(Ordering::Acquire));
        let (top, direction) = match state {
            Ok(Mailbox::Increase) => (self.nominal + 1, Direction::Increase),
            Ok(Mailbox::Decrease) => (self.nominal - 1, Direction::Decrease),
            Ok(Mailbox::Applied) => {
                self.timer.set_top(self.nominal);
                self.state.store(Mailbox::Idle.into(), Ordering::Release);
                self.timer.unlisten();
                return Some(Nudge::Restored);
            }
            Ok(Mailbox::Idle) | Err(_) => {
                self.timer.unlisten();
                return None;
            }
        };
        self.timer.set_top(top);
        self.state.store(Mailbox::Applied.into(), Ordering::Release);
        Some(Nudge::Applied(direction))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use core::sync::atomic::{AtomicBool, AtomicU16};

    #[derive(Default)]
    struct Timer {
        top: AtomicU16,
        armed: AtomicBool,
    }

    impl WaveformTimer for &Timer {
        fn set_top(&self, top: u16) {
            self.top.store(top, Ordering::Relaxed);
        }
        fn listen(&self) {
            self.armed.store(true, Ordering::Relaxed);
        }
        fn unlisten(&self) {
            self.armed.store(false, Ordering::Relaxed);
        }
    }

    impl Timer {
        fn top(&self) -> u16 {
            self.top.load(Ordering::Relaxed)
        }
        fn armed(&self) -> bool {
            self.armed.load(Ordering::Relaxed)
        }
    }

    #[test]
    fn one_period() {
        let timer = Timer::default();
        let adjuster = FrameClockPhaseAdjuster::new(&timer, 512);
        assert_eq!(timer.top(), 512);
        assert!(!timer.armed());

        adjuster.request(Direction::Increase).unwrap();
        assert!(timer.armed());
        assert_eq!(adjuster.request(Direction::Decrease), Err(Error::Busy));

        assert_eq!(
            adjuster.on_period_match(),
            Some(Nudge::Applied(Direction::Increase))
        );
        assert_eq!(timer.top(), 513);
        assert!(adjuster.is_busy());
        assert_eq!(adjuster.request(Direction::Increase), Err(Error::Busy));

        assert_eq!(adjuster.on_period_match(), Some(Nudge::Restored));
        assert_eq!(timer.top(), 512);
        assert!(!timer.armed());
        assert!(!adjuster.is_busy());

        adjuster.request(Direction::Decrease).unwrap();
        adjuster.on_period_match();
        assert_eq!(timer.top(), 511);
        adjuster.on_period_match();
        assert_eq!(timer.top(), 512);
    }

    #[test]
    fn spurious_match() {
        let timer = Timer::default();
        let adjuster = FrameClockPhaseAdjuster::new(&timer, 512);
        (&timer).listen();
        assert_eq!(adjuster.on_period_match(), None);
        assert!(!timer.armed());
        assert_eq!(timer.top(), 512);
    }
}
