use heapless::String;
use serde::Serialize;

use crate::statistics::{self, ExchangeStatistics, Statistics};
use crate::steering::{Report, State};

/// The telemetry buffer accumulates steering reports between telemetry publications.
///
/// # Note
/// Only integer bookkeeping is done per pulse. Statistics are computed when the buffer is
/// finalized.
#[derive(Clone, Default)]
pub struct TelemetryBuffer {
    /// The latest accepted pulse report.
    pub latest: Option<Report>,
    /// Offsets of all accepted pulses since the last publication.
    pub offsets: statistics::State,
}

/// The telemetry structure is reported as a single JSON line.
#[derive(Serialize)]
pub struct Telemetry {
    /// Steering loop state at the latest accepted pulse.
    pub state: Option<State>,

    /// Steering DAC control value.
    pub dac: i32,

    /// Integrated steering DAC control value.
    pub center: i64,

    /// PPS offsets in capture ticks.
    pub offsets: Statistics,

    /// Serial exchange counters since startup.
    pub exchange: ExchangeStatistics,

    /// Frame phase nudges requested since startup.
    pub nudges: u32,
}

impl TelemetryBuffer {
    pub fn update(&mut self, report: &Report) {
        self.offsets.update(report.offset);
        self.latest = Some(*report);
    }

    /// Accepted pulses since the buffer was created.
    pub fn pulses(&self) -> u32 {
        self.offsets.count()
    }

    /// Convert the buffer to telemetry for reporting.
    ///
    /// # Args
    /// * `exchange` - A snapshot of the serial exchange counters.
    /// * `nudges` - The number of frame phase nudges requested.
    pub fn finalize(self, exchange: ExchangeStatistics, nudges: u32) -> Telemetry {
        let (dac, center) = self
            .latest
            .map(|report| (report.dac, report.center))
            .unwrap_or_default();
        Telemetry {
            state: self.latest.map(|report| report.state),
            dac,
            center,
            offsets: self.offsets.get(),
            exchange,
            nudges,
        }
    }
}

impl Telemetry {
    /// Serialize as a JSON line of at most `N` bytes.
    pub fn render<const N: usize>(&self) -> Result<String<N>, serde_json_core::ser::Error> {
        serde_json_core::to_string(self)
    }
}
