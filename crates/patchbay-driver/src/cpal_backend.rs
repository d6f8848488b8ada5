//! Real hardware I/O via `cpal`.
//!
//! The cpal callback runs on its own thread and only ever touches a pair
//! of SPSC channels; `wait()`/`read()`/`write()` run on the engine's audio
//! thread and never call into cpal directly, keeping the two worlds from
//! sharing a lock.

use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream};
use crossbeam_channel::{bounded, Receiver, Sender};

use crate::{AudioDriver, CycleSignal, DriverError, Result};

pub struct CpalDriver {
    _stream: Stream,
    to_device: Sender<Vec<f32>>,
    from_device: Receiver<Vec<f32>>,
    sample_rate: u32,
    buffer_frames: u32,
    channels: u16,
    period_usecs: u64,
    last_wake: Option<Instant>,
    captured: Vec<f32>,
    pending_output: Vec<f32>,
}

impl CpalDriver {
    pub fn open_default_output(buffer_frames: u32) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| DriverError::Start("no default output device".into()))?;
        let config = device
            .default_output_config()
            .map_err(|e| DriverError::Start(e.to_string()))?;

        let sample_rate = config.sample_rate().0;
        let channels = config.channels();
        let period_usecs = (buffer_frames as u64 * 1_000_000) / sample_rate.max(1) as u64;

        let (to_device, device_rx) = bounded::<Vec<f32>>(4);
        let (device_tx, from_device) = bounded::<Vec<f32>>(4);

        let stream_config: cpal::StreamConfig = config.clone().into();
        let err_fn = |e| tracing::error!("cpal stream error: {e}");

        let stream = match config.sample_format() {
            SampleFormat::F32 => device
                .build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _| {
                        if let Ok(block) = device_rx.try_recv() {
                            let n = data.len().min(block.len());
                            data[..n].copy_from_slice(&block[..n]);
                            for sample in &mut data[n..] {
                                *sample = 0.0;
                            }
                        } else {
                            for sample in data.iter_mut() {
                                *sample = 0.0;
                            }
                        }
                        let _ = device_tx.try_send(data.to_vec());
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| DriverError::Start(e.to_string()))?,
            other => return Err(DriverError::Start(format!("unsupported sample format: {other:?}"))),
        };

        Ok(Self {
            _stream: stream,
            to_device,
            from_device,
            sample_rate,
            buffer_frames,
            channels,
            period_usecs,
            last_wake: None,
            captured: vec![0.0; (buffer_frames * channels as u32) as usize],
            pending_output: vec![0.0; (buffer_frames * channels as u32) as usize],
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Buffer the engine's mixed output for the next device callback.
    pub fn stage_output(&mut self, samples: &[f32]) {
        self.pending_output.clear();
        self.pending_output.extend_from_slice(samples);
    }

    /// Most recently captured block from the device (loopback/input tap).
    pub fn captured(&self) -> &[f32] {
        &self.captured
    }
}

impl AudioDriver for CpalDriver {
    fn start(&mut self) -> Result<()> {
        self._stream
            .play()
            .map_err(|e| DriverError::Start(e.to_string()))?;
        self.last_wake = Some(Instant::now());
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self._stream
            .pause()
            .map_err(|e| DriverError::Stop(e.to_string()))
    }

    fn wait(&mut self) -> Result<CycleSignal> {
        let period = Duration::from_micros(self.period_usecs);
        let now = Instant::now();
        let last = self.last_wake.unwrap_or(now);
        let target = last + period;
        let delayed_usecs = if target > now {
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
        if let Ok(block) = self.from_device.try_recv() {
            self.captured = block;
        }
        Ok(())
    }

    fn write(&mut self, _nframes: u32) -> Result<()> {
        let _ = self.to_device.try_send(self.pending_output.clone());
        Ok(())
    }

    fn null_cycle(&mut self, _nframes: u32) -> Result<()> {
        Ok(())
    }

    fn period_usecs(&self) -> u64 {
        self.period_usecs
    }
}
