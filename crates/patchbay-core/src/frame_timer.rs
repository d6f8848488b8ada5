//! Lock-free frame timer, published via paired guard counters
//! (spec.md §4.4, §5: "readers retry if the guards disagree").
//!
//! This resolves Open Question (a) in spec.md §9 by extending the same
//! guarded-counter pattern the original used only for the frame timer to
//! the `pending_time` → `current_time` handoff as well (see
//! `crate::transport`).

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTime {
    pub frames: u64,
    pub stamp_usecs: u64,
}

pub struct FrameTimer {
    guard1: AtomicU32,
    frames: AtomicU64,
    stamp_usecs: AtomicU64,
    guard2: AtomicU32,
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self {
            guard1: AtomicU32::new(0),
            frames: AtomicU64::new(0),
            stamp_usecs: AtomicU64::new(0),
            guard2: AtomicU32::new(0),
        }
    }
}

impl FrameTimer {
    /// Single writer (the audio thread). Increment guard1, publish the
    /// new values, increment guard2 — a reader observing matching guards
    /// either side of its read saw a consistent snapshot.
    pub fn advance(&self, frames: u64, stamp_usecs: u64) {
        self.guard1.fetch_add(1, Ordering::AcqRel);
        self.frames.store(frames, Ordering::Release);
        self.stamp_usecs.store(stamp_usecs, Ordering::Release);
        self.guard2.fetch_add(1, Ordering::AcqRel);
    }

    /// Many readers, lock-free. Retries until guard1 == guard2 both before
    /// and after the read, i.e. no writer was mid-update.
    pub fn read(&self) -> FrameTime {
        loop {
            let g1 = self.guard1.load(Ordering::Acquire);
            let frames = self.frames.load(Ordering::Acquire);
            let stamp_usecs = self.stamp_usecs.load(Ordering::Acquire);
            let g2 = self.guard2.load(Ordering::Acquire);
            if g1 == g2 {
                return FrameTime { frames, stamp_usecs };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_after_advance_sees_latest_values() {
        let timer = FrameTimer::default();
        timer.advance(64, 1_000);
        timer.advance(128, 2_000);
        let snap = timer.read();
        assert_eq!(snap.frames, 128);
        assert_eq!(snap.stamp_usecs, 2_000);
    }
}
