use core::sync::atomic::{AtomicU32, Ordering};
use serde::Serialize;

/// Running min/max/mean/variance of PPS offsets in capture ticks.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize)]
pub struct State {
    x0: i32,
    count: u32,
    min: i32,
    max: i32,
    m1: i64,
    // Note: Data is taken relative to the first sample to extend the dynamic range of the naive
    // variance computation. `m2` overflows if `sum((x-x0)**2) > u64::MAX`.
    m2: u64,
}

impl Default for State {
    fn default() -> Self {
        Self {
            x0: 0,
            count: 0,
            max: i32::MIN,
            min: i32::MAX,
            m1: 0,
            m2: 0,
        }
    }
}

impl State {
    pub fn update(&mut self, x: i32) {
        if self.count == 0 {
            self.x0 = x;
        }
        let x64 = x as i64 - self.x0 as i64;
        self.count += 1;
        self.m1 += x64;
        self.m2 = self.m2.wrapping_add(x64.unsigned_abs().pow(2));
        self.max = self.max.max(x);
        self.min = self.min.min(x);
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn get(&self) -> Statistics {
        let mut stat = Statistics {
            count: self.count,
            mean: 0,
            var: 0,
            max: self.max,
            min: self.min,
        };
        if self.count != 0 {
            let mean = self.m1 / self.count as i64;
            stat.mean = (mean + self.x0 as i64) as i32;
            let mean2 = mean.unsigned_abs().pow(2);
            stat.var = (self.m2 / self.count as u64).saturating_sub(mean2);
        }
        stat
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, Serialize)]
pub struct Statistics {
    pub count: u32,
    pub min: i32,
    pub max: i32,
    pub mean: i32,
    pub var: u64,
}

/// Serial exchange event counters.
///
/// # Note
/// Each counter is incremented from the serial interrupt only. The poll loop reads a coherent
/// snapshot of all of them under a critical section.
#[derive(Default)]
pub struct ExchangeCounters {
    rx_frames: AtomicU32,
    tx_frames: AtomicU32,
    rx_overruns: AtomicU32,
    tx_underruns: AtomicU32,
    dropped: AtomicU32,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, Serialize)]
pub struct ExchangeStatistics {
    pub rx_frames: u32,
    pub tx_frames: u32,
    pub rx_overruns: u32,
    pub tx_underruns: u32,
    /// Completed receive slots not delivered to the poll loop.
    pub dropped: u32,
}

fn bump(counter: &AtomicU32) {
    // Only the serial interrupt writes.
    counter.store(
        counter.load(Ordering::Relaxed).wrapping_add(1),
        Ordering::Relaxed,
    );
}

impl ExchangeCounters {
    pub const fn new() -> Self {
        Self {
            rx_frames: AtomicU32::new(0),
            tx_frames: AtomicU32::new(0),
            rx_overruns: AtomicU32::new(0),
            tx_underruns: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
        }
    }

    pub fn rx_frame(&self) {
        bump(&self.rx_frames)
    }

    pub fn tx_frame(&self) {
        bump(&self.tx_frames)
    }

    pub fn rx_overrun(&self) {
        bump(&self.rx_overruns)
    }

    pub fn tx_underrun(&self) {
        bump(&self.tx_underruns)
    }

    pub fn dropped(&self) {
        bump(&self.dropped)
    }

    pub fn snapshot(&self) -> ExchangeStatistics {
        critical_section::with(|_| ExchangeStatistics {
            rx_frames: self.rx_frames.load(Ordering::Relaxed),
            tx_frames: self.tx_frames.load(Ordering::Relaxed),
            rx_overruns: self.rx_overruns.load(Ordering::Relaxed),
            tx_underruns: self.tx_underruns.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn offsets() {
        let mut state = State::default();
        assert_eq!(state.get().count, 0);
        for x in [-3, 1, 5, -3, 0] {
            state.update(x);
        }
        let stat = state.get();
        assert_eq!(stat.min, -3);
        assert_eq!(stat.max, 5);
        assert_eq!(stat.mean, 0);
        // Relative to x0 = -3: [0, 4, 8, 0, 3], m1 = 15, m2 = 89
        assert_eq!(stat.var, 89 / 5 - 9);
    }

    #[test]
    fn extreme_offsets() {
        let mut state = State::default();
        state.update(i32::MIN);
        state.update(i32::MAX);
        let stat = state.get();
        assert_eq!(stat.min, i32::MIN);
        assert_eq!(stat.max, i32::MAX);
        assert_eq!(stat.mean, -1);
    }

    #[test]
    fn large_mean() {
        let mut state = State::default();
        state.update(i32::MIN);
        for _ in 0..4 {
            state.update(i32::MAX);
        }
        let stat = state.get();
        assert_eq!(stat.count, 5);
        assert_eq!(stat.min, i32::MIN);
        assert_eq!(stat.max, i32::MAX);
        assert_eq!(stat.mean, 1_288_490_188);
    }

    #[test]
    fn counters() {
        let counters = ExchangeCounters::new();
        counters.rx_frame();
        counters.rx_frame();
        counters.tx_underrun();
        let snap = counters.snapshot();
        assert_eq!(snap.rx_frames, 2);
        assert_eq!(snap.tx_underruns, 1);
        assert_eq!(snap.rx_overruns, 0);
    }
}
