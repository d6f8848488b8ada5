//! Engine-facing configuration (SPEC_FULL.md §1 Configuration). The
//! owning process parses CLI flags and environment into this struct and
//! hands it to [`crate::engine::Engine::new`]; the core never reads
//! `std::env` or `clap` itself.

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub port_max: u32,
    pub sample_rate: u32,
    pub buffer_frames: u32,
    pub realtime: bool,
    pub rt_priority: i32,
    /// Dispatch timeout for external clients when `realtime` is false
    /// (spec.md §4.4, §5). Ignored in real-time mode, where the bound is
    /// derived from `period_usecs`.
    pub client_timeout_msecs: u32,
    pub verbose: bool,
    /// Consecutive excessive-delay cycles tolerated before the audio
    /// thread aborts (spec.md §4.4: "Ten consecutive such delays").
    pub max_excessive_delays: u32,
    /// Watchdog heartbeat staleness before SIGKILL (spec.md §5: "~5 s").
    pub watchdog_timeout: std::time::Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            port_max: 2048,
            sample_rate: 48_000,
            buffer_frames: 128,
            realtime: false,
            rt_priority: 10,
            client_timeout_msecs: 500,
            verbose: false,
            max_excessive_delays: 10,
            watchdog_timeout: std::time::Duration::from_secs(5),
        }
    }
}
