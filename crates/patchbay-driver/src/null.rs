//! A software-clocked driver with no real hardware behind it.
//!
//! Used for tests, for `--driver null` operation, and as the clock source
//! while the engine is in freewheel mode (SPEC_FULL.md §2) — `wait()`
//! returns immediately instead of sleeping.

use std::time::{Duration, Instant};

use crate::{AudioDriver, CycleSignal, Result};

pub struct NullDriver {
    period_usecs: u64,
    buffer_frames: u32,
    last_wake: Option<Instant>,
    running: bool,
    /// When set, `wait()` never sleeps — used for freewheel mode.
    pub freewheel: bool,
}

impl NullDriver {
    pub fn new(sample_rate: u32, buffer_frames: u32) -> Self {
        let period_usecs = (buffer_frames as u64 * 1_000_000) / sample_rate.max(1) as u64;
        Self {
            period_usecs,
            buffer_frames,
            last_wake: None,
            running: false,
            freewheel: false,
        }
    }
}

impl AudioDriver for NullDriver {
    fn start(&mut self) -> Result<()> {
        self.running = true;
        self.last_wake = Some(Instant::now());
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.running = false;
        Ok(())
    }

    fn wait(&mut self) -> Result<CycleSignal> {
        let period = Duration::from_micros(self.period_usecs);
        let now = Instant::now();
        let last = self.last_wake.unwrap_or(now);
        let target = last + period;

        let delayed_usecs = if self.freewheel {
            0
        } else if target > now {
            std::thread::sleep(target - now);
            0
        } else {
            (now - target).as_micros() as i64
        };

        self.last_wake = Some(Instant::now());
        Ok(CycleSignal {
            nframes: self.buffer_frames,
            delayed_usecs,
        })
    }

    fn read(&mut self, _nframes: u32) -> Result<()> {
        Ok(())
    }

    fn write(&mut self, _nframes: u32) -> Result<()> {
        Ok(())
    }

    fn null_cycle(&mut self, _nframes: u32) -> Result<()> {
        Ok(())
    }

    fn period_usecs(&self) -> u64 {
        self.period_usecs
    }

    fn set_freewheel(&mut self, enabled: bool) {
        self.freewheel = enabled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_usecs_matches_sample_rate_and_buffer() {
        let driver = NullDriver::new(48_000, 64);
        assert_eq!(driver.period_usecs(), (64 * 1_000_000) / 48_000);
    }

    #[test]
    fn freewheel_wait_never_sleeps() {
        let mut driver = NullDriver::new(48_000, 64);
        driver.freewheel = true;
        driver.start().unwrap();
        let start = Instant::now();
        for _ in 0..1000 {
            driver.wait().unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
