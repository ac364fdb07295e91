//! Run-time settings
//!
//! # Design
//! All settings form a [miniconf::Tree] so that a console or host interface can read and write
//! them by path (e.g. `/steering/settle_pulses`), as JSON. The defaults reproduce the loop
//! constants the board was tuned with.
//!
//! Changed settings take effect through [crate::system::PollLoop::set_settings].
use miniconf::{Leaf, Tree};

use crate::{alignment::AlignmentSettings, steering::SteeringSettings};

#[derive(Clone, Debug, PartialEq, Tree)]
pub struct Settings {
    /// PPS steering loop.
    pub steering: SteeringSettings,

    /// Frame alignment supervision.
    pub alignment: AlignmentSettings,

    /// Accepted PPS edges between telemetry reports. Zero disables telemetry.
    pub telemetry_pulses: Leaf<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            steering: SteeringSettings::default(),
            alignment: AlignmentSettings::default(),
            telemetry_pulses: 10.into(),
        }
    }
}
