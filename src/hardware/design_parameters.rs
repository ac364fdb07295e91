use fugit::HertzU32 as Hertz;

/// The master clock, derived from the steered VCXO. All timing below is referenced to it.
pub const MCK: Hertz = Hertz::Hz(110_592_000);

/// The capture timer counts at half the master clock.
pub const CAPTURE_CLOCK: Hertz = Hertz::Hz(MCK.raw() / 2);

/// Capture timer ticks between two PPS edges when the VCXO is exactly on frequency.
pub const NOMINAL_INTERVAL: u32 = CAPTURE_CLOCK.raw();

/// The E1 line rate.
pub const E1_BIT_CLOCK: Hertz = Hertz::Hz(2_048_000);

/// The serial peripheral divides the master clock by twice this value to get the bit clock.
pub const SSC_DIVIDER: u32 = MCK.raw() / (2 * E1_BIT_CLOCK.raw());

/// The wall clock tick used to validate the PPS interval.
pub const SYSTEM_TICK: Hertz = Hertz::Hz(100);

/// Serial bit clocks per double-frame. This is the nominal top value of the frame clock timer.
pub const DOUBLE_FRAME_BIT_CLOCKS: u16 = g704::DOUBLE_FRAME_BITS as u16;

// Serial DMA ring depths. Both must be at least 2 to always keep two descriptors armed.
pub const RX_SLOTS: usize = 4;
pub const TX_SLOTS: usize = 4;

/// Native resolution of the VCXO steering DAC.
pub const DAC_BITS: u32 = 12;

/// Additional resolution of the steering control variable over the DAC code.
pub const OVERSAMPLING_SHIFT: u32 = 10;

/// Range of the oversampled steering control variable.
pub const STEERING_RANGE: i32 = 1 << (DAC_BITS + OVERSAMPLING_SHIFT);
