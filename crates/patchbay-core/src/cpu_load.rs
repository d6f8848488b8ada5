//! Rolling CPU-load estimate (spec.md §4.4 post-process).
//!
//! Keeps the last N cycle durations, periodically takes their maximum to
//! derive `spare_usecs`, and smooths `cpu_load` with a half-life filter.

use std::time::Duration;

const WINDOW: usize = 32;

pub struct CpuLoad {
    durations: [Duration; WINDOW],
    cursor: usize,
    filled: usize,
    period_usecs: u64,
    spare_usecs: i64,
    load_pct: f64,
}

impl CpuLoad {
    pub fn new(period_usecs: u64) -> Self {
        Self {
            durations: [Duration::ZERO; WINDOW],
            cursor: 0,
            filled: 0,
            period_usecs,
            spare_usecs: period_usecs as i64,
            load_pct: 0.0,
        }
    }

    pub fn record(&mut self, cycle_duration: Duration) {
        self.durations[self.cursor] = cycle_duration;
        self.cursor = (self.cursor + 1) % WINDOW;
        self.filled = (self.filled + 1).min(WINDOW);

        if self.cursor == 0 {
            let max = self.durations[..self.filled]
                .iter()
                .max()
                .copied()
                .unwrap_or(Duration::ZERO);
            self.spare_usecs = self.period_usecs as i64 - max.as_micros() as i64;

            let period = self.period_usecs as f64;
            let used_frac = if period > 0.0 {
                1.0 - (self.spare_usecs as f64 / period)
            } else {
                0.0
            };
            self.load_pct = used_frac.clamp(0.0, 1.0) * 50.0 + self.load_pct * 0.5;
        }
    }

    pub fn spare_usecs(&self) -> i64 {
        self.spare_usecs
    }

    pub fn load_pct(&self) -> f64 {
        self.load_pct
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_cycles_leave_most_of_the_period_spare() {
        let mut load = CpuLoad::new(1_000);
        for _ in 0..WINDOW {
            load.record(Duration::from_micros(10));
        }
        assert!(load.spare_usecs() > 900);
        assert!(load.load_pct() < 10.0);
    }
}
