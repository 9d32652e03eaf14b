use std::time::{Duration, Instant};

/// Paces the frame loop to the core's frame rate.
#[derive(Debug, Clone)]
pub struct FrameThrottle {
    frame_time: Duration,
    next_frame: Instant,
}

impl Default for FrameThrottle {
    fn default() -> Self {
        Self::new(60.0)
    }
}

impl FrameThrottle {
    pub fn new(fps: f64) -> Self {
        let mut throttle = Self {
            frame_time: Duration::ZERO,
            next_frame: Instant::now(),
        };
        throttle.reset(fps);
        throttle
    }

    /// Restarts pacing from now at `fps`.
    pub fn reset(&mut self, fps: f64) {
        let fps = if fps.is_finite() && fps > 0.0 { fps } else { 60.0 };
        self.frame_time = Duration::from_micros((1_000_000.0 / fps).round() as u64);
        self.next_frame = Instant::now();
    }

    pub fn frame_time(&self) -> Duration {
        self.frame_time
    }

    /// Time left until the next frame is due at `now`. When the frame is due
    /// (or late) the schedule advances by one frame and `None` is returned.
    pub fn check_wait_at(&mut self, now: Instant) -> Option<Duration> {
        if self.next_frame > now {
            return Some(self.next_frame - now);
        }
        self.next_frame += self.frame_time;
        None
    }

    /// Advances the schedule without waiting.
    pub fn skip_check(&mut self) {
        self.next_frame += self.frame_time;
    }

    /// Sleeps until the next frame is due. Returns `false` when the frame was
    /// already late, so the caller may skip presenting it.
    pub fn wait(&mut self) -> bool {
        let mut waited = false;
        while let Some(remaining) = self.check_wait_at(Instant::now()) {
            std::thread::sleep(remaining);
            waited = true;
        }
        waited
    }
}
