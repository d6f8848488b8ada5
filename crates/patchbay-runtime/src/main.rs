//! The server binary: parses CLI flags, wires up the driver and the
//! three threads (audio, request, watchdog), and tears down the server
//! directory on exit (spec.md §6).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use patchbay_core::{Engine, EngineConfig};
use patchbay_driver::null::NullDriver;
use patchbay_driver::AudioDriver;
use patchbay_ipc::socket;

mod logging;

#[derive(Parser)]
#[command(name = "patchbayd")]
#[command(author, version, about = "Real-time audio connection server", long_about = None)]
struct Args {
    /// Run the audio thread at real-time priority.
    #[arg(long)]
    realtime: bool,

    /// SCHED_FIFO priority to request when `--realtime` is set.
    #[arg(long, default_value = "10")]
    rt_priority: i32,

    /// Log per-cycle timing at debug level.
    #[arg(short, long)]
    verbose: bool,

    /// Non-realtime external-client dispatch timeout, in milliseconds.
    #[arg(long, default_value = "500")]
    timeout: u32,

    /// Suffix identifying this server instance's socket family.
    #[arg(long, default_value_t = default_server_name())]
    server_name: String,

    /// Directory for the rolling log file (defaults to the platform temp dir).
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Hardware buffer size, in frames.
    #[arg(long, default_value = "128")]
    period_frames: u32,

    /// Sample rate, in Hz.
    #[arg(long, default_value = "48000")]
    sample_rate: u32,

    /// Which `AudioDriver` implementation to use.
    #[arg(long, value_enum, default_value = "null")]
    driver: DriverKind,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum DriverKind {
    Null,
    Cpal,
}

fn default_server_name() -> String {
    std::env::var("USER").unwrap_or_else(|_| "default".to_string())
}

fn server_dir(server_name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("patchbay-{}", server_name))
}

fn build_driver(args: &Args) -> Result<Box<dyn AudioDriver>> {
    match args.driver {
        DriverKind::Null => Ok(Box::new(NullDriver::new(args.sample_rate, args.period_frames))),
        DriverKind::Cpal => {
            #[cfg(feature = "cpal-backend")]
            {
                let driver = patchbay_driver::cpal_backend::CpalDriver::open_default_output(
                    args.period_frames,
                )
                .context("failed to open default audio device")?;
                Ok(Box::new(driver))
            }
            #[cfg(not(feature = "cpal-backend"))]
            {
                anyhow::bail!("built without the cpal-backend feature; pass --driver null or rebuild with --features cpal-backend")
            }
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let dir = server_dir(&args.server_name);

    logging::init(args.log_dir.clone(), args.verbose)?;
    tracing::info!(server_name = %args.server_name, dir = %dir.display(), "starting patchbayd");

    let sockets = socket::bind_first_free(&dir).context("failed to bind server sockets")?;
    tracing::info!(slot = sockets.index, "bound socket pair");

    let driver = build_driver(&args)?;
    let period_usecs = driver.period_usecs();

    let config = EngineConfig {
        realtime: args.realtime,
        rt_priority: args.rt_priority,
        client_timeout_msecs: args.timeout,
        verbose: args.verbose,
        sample_rate: args.sample_rate,
        buffer_frames: args.period_frames,
        ..EngineConfig::default()
    };

    let mut engine = Engine::new(config, driver, dir.clone(), std::process::id());
    engine
        .add_port_type("audio", (args.period_frames as usize) * std::mem::size_of::<f32>(), Some(mix_audio))
        .context("failed to size the audio port-type arena")?;
    let engine = Arc::new(engine);

    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, shutdown.clone())
        .context("failed to install SIGINT handler")?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, shutdown.clone())
        .context("failed to install SIGTERM handler")?;

    let watchdog_engine = engine.clone();
    std::thread::spawn(move || {
        watchdog_engine
            .watchdog()
            .watch_until_stale(std::time::Duration::from_millis(200));
        tracing::error!("watchdog stale, killing process group");
        patchbay_core::engine::watchdog::Watchdog::kill_process_group();
    });

    let request_engine = engine.clone();
    let mut request_server = patchbay_core::engine::request_server::RequestServer::new(
        sockets,
        std::process::id(),
    );
    let request_shutdown = shutdown.clone();
    let request_thread = std::thread::spawn(move || {
        while !request_shutdown.load(Ordering::Relaxed) {
            if let Err(e) = request_server.run_once(&request_engine) {
                tracing::warn!(error = %e, "request-server iteration failed");
            }
        }
    });

    engine.start_driver().context("failed to start driver")?;
    tracing::info!(period_usecs, "entering audio loop");
    let audio_engine = engine.clone();
    while !shutdown.load(Ordering::Relaxed) {
        let signal = audio_engine.wait_for_driver().context("driver wait() failed")?;
        match audio_engine.run_cycle(signal.nframes, signal.delayed_usecs) {
            Ok(report) if report.xrun => tracing::debug!("xrun"),
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "audio cycle aborted");
                break;
            }
        }
    }

    tracing::info!("shutting down");
    request_thread.join().ok();
    socket::cleanup_server_dir(&dir);
    Ok(())
}

/// The `audio` port type's mixdown: sum connected sources in place
/// (spec.md §4.1's mixdown hook). Buffers are always a whole number of
/// `f32` samples, enforced by `--period-frames` sizing the arena.
fn mix_audio(dest: &mut [u8], sources: &[&[u8]]) {
    let dest_samples = as_f32_slice_mut(dest);
    for sample in dest_samples.iter_mut() {
        *sample = 0.0;
    }
    for source in sources {
        let source_samples = as_f32_slice(source);
        for (d, s) in dest_samples.iter_mut().zip(source_samples) {
            *d += *s;
        }
    }
}

fn as_f32_slice(bytes: &[u8]) -> &[f32] {
    let ptr = bytes.as_ptr() as *const f32;
    let len = bytes.len() / std::mem::size_of::<f32>();
    unsafe { std::slice::from_raw_parts(ptr, len) }
}

fn as_f32_slice_mut(bytes: &mut [u8]) -> &mut [f32] {
    let ptr = bytes.as_mut_ptr() as *mut f32;
    let len = bytes.len() / std::mem::size_of::<f32>();
    unsafe { std::slice::from_raw_parts_mut(ptr, len) }
}
