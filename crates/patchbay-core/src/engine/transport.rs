//! Transport/timebase state (spec.md §3 invariant: at most one timebase
//! client; reverting to Stopped/frame-0 when it disappears).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Stopped,
    Rolling,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ValidFlags: u32 {
        const STATE    = 0b01;
        const POSITION = 0b10;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportState {
    pub frame: u64,
    pub state: PlayState,
    pub valid: ValidFlags,
    pub usecs: u64,
    pub frame_rate: u32,
}

impl TransportState {
    pub fn stopped_at_zero(frame_rate: u32) -> Self {
        Self {
            frame: 0,
            state: PlayState::Stopped,
            valid: ValidFlags::STATE | ValidFlags::POSITION,
            usecs: 0,
            frame_rate,
        }
    }
}

/// Promote `pending` into `current`, preserving `usecs`/`frame_rate`
/// (spec.md §4.4 post-process: "which only the server sets").
pub fn promote(current: &mut TransportState, pending: &TransportState) {
    let usecs = current.usecs;
    let frame_rate = current.frame_rate;
    *current = *pending;
    current.usecs = usecs;
    current.frame_rate = frame_rate;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promote_preserves_server_owned_fields() {
        let mut current = TransportState {
            frame: 0,
            state: PlayState::Stopped,
            valid: ValidFlags::STATE,
            usecs: 555,
            frame_rate: 48_000,
        };
        let pending = TransportState {
            frame: 64,
            state: PlayState::Rolling,
            valid: ValidFlags::STATE | ValidFlags::POSITION,
            usecs: 0,
            frame_rate: 0,
        };
        promote(&mut current, &pending);
        assert_eq!(current.frame, 64);
        assert_eq!(current.state, PlayState::Rolling);
        assert_eq!(current.usecs, 555);
        assert_eq!(current.frame_rate, 48_000);
    }
}
