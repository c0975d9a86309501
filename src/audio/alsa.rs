//! ALSA-backed output sink and microphone capture.
//!
//! Both directions run on dedicated OS threads (not tokio tasks) and talk to
//! the async side over mpsc channels, keeping the blocking `readi`/`writei`
//! calls off the control loop. The playback sink keeps a wall-clock epoch as
//! its audio clock and turns scheduler gaps into explicit silence frames
//! ahead of each submitted buffer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::pcm::DecodedBuffer;
use super::scheduler::{AudioSink, DeviceQueue};
use super::MicSource;
use crate::error::{EmoBotError, Result};

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
struct AlsaParams {
    sample_rate: u32,
    channels: u32,
    period_size: usize,
}

fn open_pcm(
    device: &str,
    direction: Direction,
    sample_rate: u32,
    channels: u32,
    dir_name: &str,
) -> anyhow::Result<(PCM, AlsaParams)> {
    let pcm = PCM::new(device, direction, false)
        .with_context(|| format!("failed to open PCM device '{device}' for {dir_name}"))?;

    {
        let hwp = HwParams::any(&pcm).context("failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(channels)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        pcm.hw_params(&hwp)?;
    }

    let (actual_rate, actual_channels, period_size) = {
        let hwp = pcm.hw_params_current()?;
        (
            hwp.get_rate()?,
            hwp.get_channels()?,
            hwp.get_period_size()? as usize,
        )
    };

    let params = AlsaParams {
        sample_rate: actual_rate,
        channels: actual_channels,
        period_size,
    };

    info!(
        device,
        direction = dir_name,
        rate = actual_rate,
        channels = actual_channels,
        period = period_size,
        "ALSA device opened"
    );

    Ok((pcm, params))
}

/// Output sink playing scheduler-submitted buffers on an ALSA device.
///
/// The blocking `writei` calls run on a dedicated playback thread, the same
/// way capture does; `submit` only queues samples over a channel and returns,
/// so the control loop never waits on the device ring buffer.
pub struct AlsaSink {
    tx: Option<mpsc::UnboundedSender<Vec<i16>>>,
    epoch: Instant,
    sample_rate: u32,
    channels: usize,
    queue: DeviceQueue,
    frames_dropped: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AlsaSink {
    pub fn open(device: &str, sample_rate: u32) -> Result<Self> {
        let (pcm, params) = open_pcm(device, Direction::Playback, sample_rate, 1, "playback")?;
        let (tx, rx) = mpsc::unbounded_channel::<Vec<i16>>();
        let frames_dropped = Arc::new(AtomicBool::new(false));

        let channels = params.channels as usize;
        let drop_flag = frames_dropped.clone();
        let handle = thread::spawn(move || {
            playback_loop(pcm, channels, rx, drop_flag);
        });

        Ok(Self {
            tx: Some(tx),
            epoch: Instant::now(),
            sample_rate: params.sample_rate,
            channels,
            queue: DeviceQueue::default(),
            frames_dropped,
            handle: Some(handle),
        })
    }
}

/// Drains the sample channel into the device. Writes with XRUN recovery:
/// retry a short number of times, then drop the remainder to break a dead
/// loop, raising `frames_dropped` so queue accounting restarts from the
/// clock.
fn playback_loop(
    pcm: PCM,
    channels: usize,
    mut rx: mpsc::UnboundedReceiver<Vec<i16>>,
    frames_dropped: Arc<AtomicBool>,
) {
    let io = match pcm.io_i16() {
        Ok(io) => io,
        Err(e) => {
            error!("failed to get playback IO: {e}");
            return;
        }
    };

    while let Some(samples) = rx.blocking_recv() {
        let total_frames = samples.len() / channels;
        let mut frames_written = 0;
        let mut retry_count = 0u32;

        while frames_written < total_frames {
            let offset = frames_written * channels;
            match io.writei(&samples[offset..]) {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    warn!("ALSA XRUN or error: {e}, recovering...");
                    retry_count += 1;
                    if let Err(e2) = pcm.prepare() {
                        error!("failed to recover PCM playback: {e2}");
                        frames_dropped.store(true, Ordering::Relaxed);
                        return;
                    }
                    if retry_count >= 3 {
                        error!(
                            dropped = total_frames - frames_written,
                            "max recovery retries reached, dropping unwritten frames"
                        );
                        frames_dropped.store(true, Ordering::Relaxed);
                        break;
                    }
                }
            }
        }
    }

    info!("playback stopped");
}

impl AudioSink for AlsaSink {
    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn submit(&mut self, buffer: DecodedBuffer, start_at: f64) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(EmoBotError::DeviceNotReady)?;
        if buffer.sample_rate() != self.sample_rate {
            warn!(
                buffer_rate = buffer.sample_rate(),
                device_rate = self.sample_rate,
                "sample rate mismatch, playback will be pitched"
            );
        }

        // Lead-in silence covers the distance between the end of the device
        // queue and where the scheduler pinned this buffer.
        let dropped = self.frames_dropped.swap(false, Ordering::Relaxed);
        let lead_in = self.queue.lead_in(self.now(), start_at, dropped);
        let gap_frames = (lead_in * self.sample_rate as f64).round() as usize;
        if gap_frames > 0 {
            let silence = vec![0i16; gap_frames * self.channels];
            tx.send(silence).map_err(|_| EmoBotError::DeviceNotReady)?;
        }

        // Mono buffers fan out to every device channel.
        let duration = buffer.duration();
        let mono = buffer.to_interleaved_i16();
        let samples = if self.channels == 1 || buffer.channels() > 1 {
            mono
        } else {
            let mut fanned = Vec::with_capacity(mono.len() * self.channels);
            for s in mono {
                for _ in 0..self.channels {
                    fanned.push(s);
                }
            }
            fanned
        };
        tx.send(samples).map_err(|_| EmoBotError::DeviceNotReady)?;
        self.queue.advance(start_at, duration);
        Ok(())
    }
}

impl Drop for AlsaSink {
    fn drop(&mut self) {
        // Closing the channel ends the playback thread after it drains what
        // was already queued.
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Microphone capture on a dedicated thread, surfaced as normalized mono
/// frames over a channel.
pub struct AlsaMic {
    rx: mpsc::Receiver<Vec<f32>>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AlsaMic {
    pub fn open(device: &str, sample_rate: u32) -> Result<Self> {
        let (pcm, params) = open_pcm(device, Direction::Capture, sample_rate, 1, "capture")?;
        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel::<Vec<f32>>(32);

        let thread_flag = running.clone();
        let handle = thread::spawn(move || {
            capture_loop(pcm, params, tx, thread_flag);
        });

        Ok(Self {
            rx,
            running,
            handle: Some(handle),
        })
    }
}

fn capture_loop(
    pcm: PCM,
    params: AlsaParams,
    tx: mpsc::Sender<Vec<f32>>,
    running: Arc<AtomicBool>,
) {
    let channels = params.channels as usize;
    let mut read_buf = vec![0i16; params.period_size * channels];
    let io = match pcm.io_i16() {
        Ok(io) => io,
        Err(e) => {
            error!("failed to get capture IO: {e}");
            return;
        }
    };

    info!(
        rate = params.sample_rate,
        channels, period = params.period_size, "recording started"
    );

    while running.load(Ordering::Relaxed) {
        match io.readi(&mut read_buf) {
            Ok(frames) => {
                // Keep channel 0 only; the realtime input path is mono.
                let frame: Vec<f32> = (0..frames)
                    .map(|i| read_buf[i * channels] as f32 / 32768.0)
                    .collect();
                if tx.blocking_send(frame).is_err() {
                    // Receiver dropped, session is closing.
                    break;
                }
            }
            Err(e) => {
                warn!("ALSA capture error: {e}, recovering...");
                if let Err(e2) = pcm.prepare() {
                    error!("failed to recover PCM capture: {e2}");
                    break;
                }
            }
        }
    }

    info!("recording stopped");
}

#[async_trait]
impl MicSource for AlsaMic {
    async fn next_frame(&mut self) -> Option<Vec<f32>> {
        self.rx.recv().await
    }
}

impl Drop for AlsaMic {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
