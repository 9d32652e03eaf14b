pub mod resampler;
pub mod ring;

use parking_lot::Mutex;
use resampler::StreamResampler;
use ring::SampleRing;
use std::sync::Arc;
use tracing::{info, warn};

/// Upper bound of the integer-divided output rate.
pub const MAX_OUTPUT_RATE: u32 = 48000;
pub const MAX_DIVIDER: u32 = 16;
/// Samples pushed into the ring per batch.
pub const CHUNK_SAMPLES: usize = 128;
/// Ring capacity, in periods.
pub const RING_PERIODS: usize = 8;

/// Negotiated output stream parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per device period.
    pub period: usize,
}

/// Smallest divider in `1..=16` that evenly divides `rate` and brings it to
/// 48 kHz or below. Without such a divisor, the smallest divider meeting the
/// ceiling, capped at 16.
pub fn divider_for(rate: u32) -> u32 {
    if rate == 0 {
        return 1;
    }
    (1..=MAX_DIVIDER)
        .find(|d| rate % d == 0 && rate / d <= MAX_OUTPUT_RATE)
        .or_else(|| (1..=MAX_DIVIDER).find(|d| rate / d <= MAX_OUTPUT_RATE))
        .unwrap_or(MAX_DIVIDER)
}

/// Frames per period for a stream at `rate` driven at `fps` frames per second.
pub fn period_for(rate: u32, fps: f64) -> usize {
    let fps = if fps > 0.0 { fps } else { 60.0 };
    ((rate as f64 / fps).ceil() as usize).max(1).next_power_of_two()
}

#[derive(Debug, Default)]
enum Conversion {
    #[default]
    Stopped,
    Direct,
    Divided {
        divider: u32,
        sums: [i32; 2],
        frames: u32,
    },
    Resampled(StreamResampler),
}

/// Core-facing audio sink: reduces the core's sample rate, optionally folds
/// to mono and queues the result for the output device.
#[derive(Debug)]
pub struct BufferedAudio {
    ring: Arc<Mutex<SampleRing>>,
    conversion: Conversion,
    mono: bool,
    format: Option<AudioFormat>,
    queue: Vec<i16>,
}

impl Default for BufferedAudio {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferedAudio {
    pub fn new() -> Self {
        Self {
            ring: Arc::new(Mutex::new(SampleRing::default())),
            conversion: Conversion::Stopped,
            mono: false,
            format: None,
            queue: Vec::with_capacity(CHUNK_SAMPLES),
        }
    }

    /// Sizes the ring and picks the rate conversion. `fixed_rate == 0` selects
    /// the integer divider, any other value a sinc resampler to that rate.
    pub fn start(&mut self, mono: bool, source_rate: f64, fixed_rate: u32, fps: f64) -> AudioFormat {
        let (conversion, sample_rate) = if fixed_rate == 0 {
            let rate = source_rate.round().max(0.0) as u32;
            let divider = divider_for(rate);
            let conversion = if divider == 1 {
                Conversion::Direct
            } else {
                Conversion::Divided {
                    divider,
                    sums: [0; 2],
                    frames: 0,
                }
            };
            (conversion, rate / divider)
        } else {
            match StreamResampler::new(source_rate, fixed_rate) {
                Ok(resampler) => (Conversion::Resampled(resampler), fixed_rate),
                Err(e) => {
                    warn!("{e}; falling back to integer divider");
                    return self.start(mono, source_rate, 0, fps);
                }
            }
        };

        let channels: u16 = if mono { 1 } else { 2 };
        let period = period_for(sample_rate, fps);
        self.ring
            .lock()
            .resize(period * channels as usize * RING_PERIODS, channels as usize);
        self.conversion = conversion;
        self.mono = mono;
        self.queue.clear();
        let format = AudioFormat {
            sample_rate,
            channels,
            period,
        };
        info!(
            "Audio: {} Hz in, {} Hz out, {} channel(s), period {}",
            source_rate, format.sample_rate, format.channels, format.period
        );
        self.format = Some(format);
        format
    }

    pub fn stop(&mut self) {
        self.conversion = Conversion::Stopped;
        self.format = None;
        self.queue.clear();
        self.ring.lock().clear();
    }

    /// Drops queued samples and partially accumulated frames.
    pub fn reset(&mut self) {
        match &mut self.conversion {
            Conversion::Divided { sums, frames, .. } => {
                *sums = [0; 2];
                *frames = 0;
            }
            Conversion::Resampled(resampler) => resampler.reset(),
            Conversion::Direct | Conversion::Stopped => {}
        }
        self.queue.clear();
        self.ring.lock().clear();
    }

    pub fn format(&self) -> Option<AudioFormat> {
        self.format
    }

    pub fn divider(&self) -> u32 {
        match self.conversion {
            Conversion::Divided { divider, .. } => divider,
            _ => 1,
        }
    }

    pub fn overflow_count(&self) -> u64 {
        self.ring.lock().overflow_count()
    }

    pub fn queued(&self) -> usize {
        self.ring.lock().len()
    }

    /// Handle for the device side of the ring.
    pub fn reader(&self) -> AudioReader {
        AudioReader {
            ring: self.ring.clone(),
        }
    }

    /// Accepts interleaved stereo samples from the core.
    pub fn write_samples(&mut self, samples: &[i16]) {
        let samples = &samples[..samples.len() & !1];
        if samples.is_empty() {
            return;
        }
        let mono = self.mono;
        match &mut self.conversion {
            Conversion::Stopped => {}
            Conversion::Direct => {
                if mono {
                    let mut ring = self.ring.lock();
                    for pairs in samples.chunks(CHUNK_SAMPLES * 2) {
                        let folded: Vec<i16> = pairs
                            .chunks_exact(2)
                            .map(|p| ((p[0] as i32 + p[1] as i32) / 2) as i16)
                            .collect();
                        ring.push(&folded);
                    }
                } else {
                    let mut ring = self.ring.lock();
                    for chunk in samples.chunks(CHUNK_SAMPLES) {
                        ring.push(chunk);
                    }
                }
            }
            Conversion::Divided {
                divider,
                sums,
                frames,
            } => {
                let d = *divider as i32;
                for frame in samples.chunks_exact(2) {
                    sums[0] += frame[0] as i32;
                    sums[1] += frame[1] as i32;
                    *frames += 1;
                    if *frames == *divider {
                        if mono {
                            self.queue.push(((sums[0] + sums[1]) / (2 * d)) as i16);
                        } else {
                            self.queue.push((sums[0] / d) as i16);
                            self.queue.push((sums[1] / d) as i16);
                        }
                        *sums = [0; 2];
                        *frames = 0;
                        if self.queue.len() >= CHUNK_SAMPLES {
                            self.ring.lock().push(&self.queue);
                            self.queue.clear();
                        }
                    }
                }
                if !self.queue.is_empty() {
                    self.ring.lock().push(&self.queue);
                    self.queue.clear();
                }
            }
            Conversion::Resampled(resampler) => match resampler.process(samples) {
                Ok(out) => {
                    let mut ring = self.ring.lock();
                    if mono {
                        let folded: Vec<i16> = out
                            .chunks_exact(2)
                            .map(|p| ((p[0] as i32 + p[1] as i32) / 2) as i16)
                            .collect();
                        for chunk in folded.chunks(CHUNK_SAMPLES) {
                            ring.push(chunk);
                        }
                    } else {
                        for chunk in out.chunks(CHUNK_SAMPLES) {
                            ring.push(chunk);
                        }
                    }
                }
                Err(e) => warn!("{e}"),
            },
        }
    }

    /// Fills `dst` from the ring, zero-filling any shortfall.
    pub fn read_samples(&self, dst: &mut [i16]) -> usize {
        self.reader().read(dst)
    }
}

/// Consumer end of the sample ring, safe to move to an audio thread.
#[derive(Clone, Debug)]
pub struct AudioReader {
    ring: Arc<Mutex<SampleRing>>,
}

impl AudioReader {
    /// Returns how many samples came from the ring; the rest of `dst` is zeroed.
    pub fn read(&self, dst: &mut [i16]) -> usize {
        let read = self.ring.lock().pop(dst);
        dst[read..].fill(0);
        read
    }
}
