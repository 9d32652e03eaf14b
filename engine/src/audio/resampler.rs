use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

const CHUNK_FRAMES: usize = 512;
// Input backlog cap, in interleaved stereo samples.
const MAX_PENDING: usize = 65536;

/// Streaming stereo sinc resampler from the core's rate to a fixed output rate.
pub struct StreamResampler {
    inner: SincFixedIn<f32>,
    pending: [Vec<f32>; 2],
}

impl std::fmt::Debug for StreamResampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResampler")
            .field("pending_frames", &self.pending[0].len())
            .finish()
    }
}

impl StreamResampler {
    pub fn new(from_rate: f64, to_rate: u32) -> Result<Self, String> {
        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let inner = SincFixedIn::<f32>::new(to_rate as f64 / from_rate, 2.0, params, CHUNK_FRAMES, 2)
            .map_err(|e| format!("Failed to create resampler: {e}"))?;
        Ok(Self {
            inner,
            pending: [Vec::new(), Vec::new()],
        })
    }

    /// Queues interleaved stereo input and returns whatever output is ready,
    /// interleaved stereo.
    pub fn process(&mut self, samples: &[i16]) -> Result<Vec<i16>, String> {
        let mut out = Vec::new();
        let mut input = samples;
        loop {
            let room = MAX_PENDING.saturating_sub(self.pending[0].len() * 2);
            let take = input.len().min(room) & !1;
            for frame in input[..take].chunks_exact(2) {
                self.pending[0].push(frame[0] as f32 / 32768.0);
                self.pending[1].push(frame[1] as f32 / 32768.0);
            }
            input = &input[take..];
            self.drain_into(&mut out)?;
            if take == 0 || input.len() < 2 {
                break;
            }
        }
        Ok(out)
    }

    fn drain_into(&mut self, out: &mut Vec<i16>) -> Result<(), String> {
        loop {
            let needed = self.inner.input_frames_next();
            if self.pending[0].len() < needed {
                return Ok(());
            }
            let chunk = [&self.pending[0][..needed], &self.pending[1][..needed]];
            let resampled = self
                .inner
                .process(&chunk, None)
                .map_err(|e| format!("Resampling failed: {e}"))?;
            for (l, r) in resampled[0].iter().zip(resampled[1].iter()) {
                out.push(to_i16(*l));
                out.push(to_i16(*r));
            }
            for channel in &mut self.pending {
                channel.drain(..needed);
            }
        }
    }

    pub fn reset(&mut self) {
        self.inner.reset();
        for channel in &mut self.pending {
            channel.clear();
        }
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}
