//! VCXO steering from PPS timestamps
//!
//! # Design
//! Each accepted PPS edge yields an offset: the number of capture ticks between the edge and the
//! reference timestamp, minus the nominal number of ticks per second. The capture clock is derived
//! from the VCXO, so the offset measures the VCXO frequency error (or phase error, see below).
//!
//! The loop runs through these states:
//! * `Init`: discard the first two edges, their intervals are not meaningful.
//! * `CalibrateMin`, `CalibrateMax`: with the DAC at either end of its range, let the VCXO settle
//!   for two edges, then sum the offsets over `periods` edges. This yields the tuning slope (DAC
//!   counts per tick of offset) and the center value that zeroes the frequency error.
//! * `FreqDiscipline`: the reference snaps to each measured edge, so the offset is the frequency
//!   error of the last second. After `settle_pulses` consecutive edges within the lock threshold
//!   the loop moves on.
//! * `PhaseDiscipline`: the reference advances by exactly the nominal interval, so the offset is
//!   the accumulated phase error. If it exceeds the unlock threshold, frequency disciplining
//!   restarts.
//!
//! Both disciplining states apply a PI correction: a quarter of the correction is integrated into
//! the DAC center, three quarters are applied proportionally to the current output only.
//!
//! The edge interval is checked against the wall clock tick before anything else. An interval
//! outside the window, or no edge within its upper bound, resets to `Init`.
use miniconf::{Leaf, Tree};
use num_enum::IntoPrimitive;
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::hardware::{
    dac::{clamp_steering, steering_code, STEERING_MAX},
    design_parameters::{NOMINAL_INTERVAL, STEERING_RANGE, SYSTEM_TICK},
    timestamp::Timestamp,
    Dac, DacChannel,
};

/// Edges discarded after a reset.
const INIT_PULSES: u32 = 2;

#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("No valid PPS: {ticks} ticks since the last edge")]
    LossOfPps { ticks: u32 },
    #[error("DAC calibration offsets do not straddle zero: min {min}, max {max}")]
    CalibrationPrecondition { min: i64, max: i64 },
}

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr, IntoPrimitive,
)]
#[repr(u8)]
pub enum State {
    #[strum(serialize = "INIT")]
    #[serde(rename = "INIT")]
    Init,
    #[strum(serialize = "DAC_MIN")]
    #[serde(rename = "DAC_MIN")]
    CalibrateMin,
    #[strum(serialize = "DAC_MAX")]
    #[serde(rename = "DAC_MAX")]
    CalibrateMax,
    #[strum(serialize = "FREQ")]
    #[serde(rename = "FREQ")]
    FreqDiscipline,
    #[strum(serialize = "PHASE")]
    #[serde(rename = "PHASE")]
    PhaseDiscipline,
}

/// Result of a DAC calibration.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calibration {
    /// DAC steering counts per capture tick of offset.
    pub slope: i64,
    /// Steering value with zero frequency error at calibration time.
    pub center: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Tree)]
pub struct SteeringSettings {
    /// Capture ticks per second at the nominal VCXO frequency.
    pub nominal_interval: Leaf<u32>,

    /// Number of edges summed per calibration point.
    pub periods: Leaf<u32>,

    /// Largest absolute offset in ticks counted as frequency locked.
    pub freq_lock_threshold: Leaf<u32>,

    /// Largest absolute phase offset in ticks before lock is considered lost.
    pub phase_unlock_threshold: Leaf<u32>,

    /// Consecutive frequency locked edges required before phase disciplining.
    pub settle_pulses: Leaf<u32>,

    /// Shortest accepted edge interval in wall clock ticks.
    pub min_pulse_ticks: Leaf<u32>,

    /// Longest accepted edge interval in wall clock ticks.
    pub max_pulse_ticks: Leaf<u32>,

    /// A known DAC calibration. Calibration is skipped if present.
    pub calibration: Leaf<Option<Calibration>>,
}

impl Default for SteeringSettings {
    fn default() -> Self {
        Self {
            nominal_interval: NOMINAL_INTERVAL.into(),
            periods: 4.into(),
            freq_lock_threshold: 5.into(),
            phase_unlock_threshold: 50.into(),
            settle_pulses: 30.into(),
            // One second +- 25%.
            min_pulse_ticks: (SYSTEM_TICK.raw() * 3 / 4).into(),
            max_pulse_ticks: (SYSTEM_TICK.raw() * 5 / 4).into(),
            calibration: None.into(),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Parameters {
    /// Current steering value.
    pub dac: i32,
    /// Integrated steering value.
    pub center: i64,
    pub slope: i64,
    pub last_reference: Timestamp,
    pub last_tick: u32,
}

/// Status after an accepted edge.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Report {
    pub state: State,
    pub count: u32,
    /// Offset of this edge in capture ticks.
    pub offset: i32,
    pub dac: i32,
    pub center: i64,
}

impl Report {
    pub fn dac_from_center(&self) -> i64 {
        self.dac as i64 - self.center
    }
}

pub struct OscillatorSteering {
    settings: SteeringSettings,
    calibrated: bool,
    state: State,
    count: u32,
    params: Parameters,
    min_offset: i64,
    max_offset: i64,
}

impl OscillatorSteering {
    /// Construct the loop and park the DAC mid-range.
    ///
    /// # Args
    /// * `settings` - Loop settings.
    /// * `dac` - The VCXO steering DAC.
    /// * `now` - The current wall clock tick.
    pub fn new(settings: SteeringSettings, dac: &mut impl Dac, now: u32) -> Self {
        let mut steering = Self {
            calibrated: false,
            settings,
            state: State::Init,
            count: INIT_PULSES,
            params: Parameters::default(),
            min_offset: 0,
            max_offset: 0,
        };
        steering.set_dac(dac, STEERING_RANGE as i64 / 2);
        if let Some(calibration) = *steering.settings.calibration {
            steering.load(calibration);
        }
        steering.reset(now);
        steering
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    /// The current DAC calibration with the integrated center, for persisting.
    pub fn calibration(&self) -> Option<Calibration> {
        self.calibrated.then_some(Calibration {
            slope: self.params.slope,
            center: self.params.center,
        })
    }

    fn load(&mut self, calibration: Calibration) {
        self.params.slope = calibration.slope;
        self.params.center = calibration.center;
        self.calibrated = true;
    }

    pub fn settings(&self) -> &SteeringSettings {
        &self.settings
    }

    /// Apply new settings. The loop restarts from `Init`.
    pub fn set_settings(&mut self, settings: SteeringSettings, now: u32) {
        if let Some(calibration) = *settings.calibration {
            self.load(calibration);
        }
        self.settings = settings;
        self.reset(now);
    }

    fn reset(&mut self, now: u32) {
        self.state = State::Init;
        self.count = INIT_PULSES;
        self.params.last_tick = now;
        self.params.last_reference = 0;
    }

    fn set_dac(&mut self, dac: &mut impl Dac, value: i64) {
        self.params.dac = clamp_steering(value);
        dac.set(DacChannel::Vcxo, steering_code(value));
    }

    fn enter_freq_discipline(&mut self, dac: &mut impl Dac) {
        self.set_dac(dac, self.params.center);
        self.state = State::FreqDiscipline;
    }

    fn steer(&mut self, dac: &mut impl Dac, offset: i32) {
        let correction = offset as i64 * self.params.slope;
        self.params.center -= correction / 4;
        self.set_dac(dac, self.params.center - correction * 3 / 4);
    }

    fn calibrate(&mut self) -> Result<Calibration, Error> {
        let (min, max) = (self.min_offset, self.max_offset);
        if !(min < 0 && 0 < max) {
            return Err(Error::CalibrationPrecondition { min, max });
        }
        let periods = *self.settings.periods as i64;
        let slope = periods * STEERING_RANGE as i64 / (max - min);
        let center = slope * -min / periods;
        log::info!(
            "Calibration over {periods} edges: offset sum {min} at DAC min, {max} at DAC max"
        );
        log::info!("Slope {slope} DAC counts per tick, center {center}");
        Ok(Calibration { slope, center })
    }

    /// Process a poll of the PPS capture.
    ///
    /// # Args
    /// * `dac` - The VCXO steering DAC.
    /// * `pulse` - The rising edge timestamp, if a new edge was captured.
    /// * `now` - The current wall clock tick.
    ///
    /// # Returns
    /// A report if an edge was accepted outside `Init`. An error if the edge interval is outside
    /// the window, or if calibration produced unusable results. Both reset the loop to `Init`.
    pub fn update(
        &mut self,
        dac: &mut impl Dac,
        pulse: Option<Timestamp>,
        now: u32,
    ) -> Result<Option<Report>, Error> {
        let ticks = now.wrapping_sub(self.params.last_tick);

        let Some(capture) = pulse else {
            if ticks > *self.settings.max_pulse_ticks {
                self.reset(now);
                return Err(Error::LossOfPps { ticks });
            }
            return Ok(None);
        };

        let window = *self.settings.min_pulse_ticks..=*self.settings.max_pulse_ticks;
        if !window.contains(&ticks) {
            self.reset(now);
            return Err(Error::LossOfPps { ticks });
        }

        self.count = self.count.saturating_sub(1);

        let nominal = *self.settings.nominal_interval;
        let offset = (capture.wrapping_sub(self.params.last_reference) as i32)
            .wrapping_sub(nominal as i32);

        self.params.last_reference = if self.state == State::PhaseDiscipline {
            self.params.last_reference.wrapping_add(nominal)
        } else {
            capture
        };
        self.params.last_tick = now;

        let periods = *self.settings.periods;
        match self.state {
            State::Init => {
                if self.count == 0 {
                    if self.calibrated {
                        self.enter_freq_discipline(dac);
                    } else {
                        self.state = State::CalibrateMin;
                        self.count = periods + 2;
                    }
                }
                return Ok(None);
            }
            State::CalibrateMin => {
                if self.count >= periods {
                    self.set_dac(dac, 0);
                    self.min_offset = 0;
                } else {
                    self.min_offset += offset as i64;
                    if self.count == 0 {
                        self.state = State::CalibrateMax;
                        self.count = periods + 2;
                    }
                }
            }
            State::CalibrateMax => {
                if self.count >= periods {
                    self.set_dac(dac, STEERING_MAX as i64);
                    self.max_offset = 0;
                } else {
                    self.max_offset += offset as i64;
                    if self.count == 0 {
                        let calibration = self.calibrate().inspect_err(|_| {
                            self.reset(now);
                        })?;
                        self.load(calibration);
                        self.enter_freq_discipline(dac);
                    }
                }
            }
            State::FreqDiscipline => {
                if offset.unsigned_abs() > *self.settings.freq_lock_threshold {
                    self.count = *self.settings.settle_pulses;
                }
                self.steer(dac, offset);
                if self.count == 0 {
                    self.state = State::PhaseDiscipline;
                }
            }
            State::PhaseDiscipline => {
                if offset.unsigned_abs() > *self.settings.phase_unlock_threshold {
                    self.state = State::FreqDiscipline;
                    self.count = *self.settings.settle_pulses;
                } else {
                    self.steer(dac, offset);
                }
            }
        }

        Ok(Some(Report {
            state: self.state,
            count: self.count,
            offset,
            dac: self.params.dac,
            center: self.params.center,
        }))
    }
}
