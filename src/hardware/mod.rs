//! Peripheral-facing components of the synchronization core
//!
//! Register access is abstracted by small traits ([CaptureTimer], [WaveformTimer], [SerialDma],
//! [Dac]) implemented by the board support. Everything above them is host-testable.
pub mod dac;
pub mod design_parameters;
pub mod frame_clock;
pub mod serial;
pub mod timestamp;

pub use dac::{Dac, DacChannel};
pub use frame_clock::{Direction, FrameClockPhaseAdjuster, WaveformTimer};
pub use serial::{FrameHandler, FrameRing, SerialDma, SerialFrameExchange};
pub use timestamp::{CaptureTimer, EdgeLatch, TimestampCapture};
