//! Backends for running a core without a window or sound device.

use retrorun_engine::abi::PixelFormat;
use retrorun_engine::audio::{AudioFormat, AudioReader};
use retrorun_engine::backend::{AudioOutput, Frame, VideoBackend};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info};

/// Counts frames and logs mode changes and on-screen messages.
#[derive(Debug, Default)]
pub struct LogVideo {
    frames: Arc<AtomicU64>,
    dupes: u64,
    skipped: u64,
    skip: bool,
    size: (u32, u32),
}

impl LogVideo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared counter of presented frames, excluding dupes and skipped frames.
    pub fn frame_counter(&self) -> Arc<AtomicU64> {
        self.frames.clone()
    }
}

impl VideoBackend for LogVideo {
    fn resolution_changed(&mut self, width: u32, height: u32, format: PixelFormat) {
        if self.size != (width, height) {
            info!("Video mode {width}x{height} {format:?}");
        }
        self.size = (width, height);
    }

    fn render(&mut self, frame: Frame<'_>) {
        match frame {
            Frame::Dupe => self.dupes += 1,
            Frame::Hardware { .. } | Frame::Pixels { .. } if self.skip => {
                self.skip = false;
                self.skipped += 1;
            }
            Frame::Hardware { .. } | Frame::Pixels { .. } => {
                self.frames.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn set_message(&mut self, text: &str, frames: u32) {
        info!("{text} ({frames} frames)");
    }

    fn skip_next_frame(&mut self) {
        self.skip = true;
    }
}

impl Drop for LogVideo {
    fn drop(&mut self) {
        if self.skipped > 0 || self.dupes > 0 {
            debug!("Skipped {} late frame(s), {} dupe(s)", self.skipped, self.dupes);
        }
    }
}

/// Pulls samples off the ring at the device rate and discards them, standing
/// in for a sound card so the ring neither fills nor starves.
#[derive(Debug, Default)]
pub struct DrainingAudio {
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    consumed: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl DrainingAudio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total samples taken from the ring.
    pub fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::Relaxed)
    }
}

impl AudioOutput for DrainingAudio {
    fn open(&mut self, format: AudioFormat, reader: AudioReader) -> Result<(), String> {
        self.close();
        if format.sample_rate == 0 || format.period == 0 {
            return Err(format!("unusable audio format {format:?}"));
        }
        let period = Duration::from_secs_f64(format.period as f64 / format.sample_rate as f64);
        let mut buf = vec![0i16; format.period * format.channels as usize];
        let running = self.running.clone();
        let paused = self.paused.clone();
        let consumed = self.consumed.clone();
        running.store(true, Ordering::Release);
        let worker = std::thread::Builder::new()
            .name("audio-drain".to_string())
            .spawn(move || {
                while running.load(Ordering::Acquire) {
                    if !paused.load(Ordering::Acquire) {
                        let n = reader.read(&mut buf);
                        consumed.fetch_add(n as u64, Ordering::Relaxed);
                    }
                    std::thread::sleep(period);
                }
            })
            .map_err(|e| e.to_string())?;
        debug!(
            "Audio drain at {} Hz, {} channel(s), period {}",
            format.sample_rate, format.channels, format.period
        );
        self.worker = Some(worker);
        Ok(())
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            error!("Audio drain thread panicked");
        }
    }

    fn pause(&mut self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }
}

impl Drop for DrainingAudio {
    fn drop(&mut self) {
        self.close();
    }
}
