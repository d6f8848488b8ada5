//! Watchdog: an independent high-priority thread that SIGKILLs the
//! process group if the audio thread stalls (spec.md §2, §5, §7).

use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub struct Watchdog {
    last_heartbeat: Mutex<Instant>,
    timeout: Duration,
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            last_heartbeat: Mutex::new(Instant::now()),
            timeout,
        }
    }

    /// Called once per cycle by the audio thread (spec.md §4.4: "Stamp
    /// watchdog heartbeat").
    pub fn stamp(&self) {
        *self.last_heartbeat.lock() = Instant::now();
    }

    pub fn is_stale(&self) -> bool {
        self.last_heartbeat.lock().elapsed() > self.timeout
    }

    /// Blocks the calling thread, waking periodically to check staleness;
    /// returns when it should kill the process group. Intended to run on
    /// its own dedicated thread.
    pub fn watch_until_stale(&self, poll_interval: Duration) {
        while !self.is_stale() {
            std::thread::sleep(poll_interval);
        }
    }

    /// SIGKILL the whole process group (spec.md §5: "the whole server
    /// dies rather than produce unbounded latency"). Unrecoverable by
    /// design — never returns on success.
    pub fn kill_process_group() {
        unsafe {
            libc::kill(0, libc::SIGKILL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_stamp_is_not_stale() {
        let wd = Watchdog::new(Duration::from_secs(5));
        assert!(!wd.is_stale());
    }

    #[test]
    fn stamp_resets_staleness() {
        let wd = Watchdog::new(Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(30));
        assert!(wd.is_stale());
        wd.stamp();
        assert!(!wd.is_stale());
    }
}
