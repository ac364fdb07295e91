//! VCXO steering DAC
//!
//! The steering loop works on a control variable with [OVERSAMPLING_SHIFT] more bits than the
//! DAC. Only the top [DAC_BITS] are written to the hardware.
use arbitrary_int::u12;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::design_parameters::{DAC_BITS, OVERSAMPLING_SHIFT, STEERING_RANGE};

/// Largest steering control value.
pub const STEERING_MAX: i32 = STEERING_RANGE - 1;

/// DAC channel assignment. The channel number is written into the data register tag.
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum DacChannel {
    /// VCXO tuning voltage.
    Vcxo = 0,
}

/// A DAC that can be written one channel at a time.
///
/// # Note
/// Implementations wait until the converter is ready and do not queue.
pub trait Dac {
    fn set(&mut self, channel: DacChannel, value: u12);
}

/// Clamp a steering control value to the valid range.
pub fn clamp_steering(value: i64) -> i32 {
    value.clamp(0, STEERING_MAX as i64) as i32
}

/// Convert a steering control value to a DAC code.
///
/// # Args
/// * `value` - The oversampled steering value. Out of range values are clamped.
pub fn steering_code(value: i64) -> u12 {
    let code = clamp_steering(value) >> OVERSAMPLING_SHIFT;
    u12::new(code as u16 & ((1 << DAC_BITS) - 1))
}
