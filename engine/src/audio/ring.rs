//! Fixed-capacity FIFO of interleaved 16-bit samples.
//!
//! One slot is always left empty so `read == write` only ever means "empty".
//! When a push does not fit, the newest samples are dropped and the oldest are
//! kept; every such truncation bumps [`SampleRing::overflow_count`].

#[derive(Debug, Clone, Default)]
pub struct SampleRing {
    buf: Vec<i16>,
    read: usize,
    write: usize,
    channels: usize,
    overflows: u64,
}

impl SampleRing {
    /// `capacity` is the slot count; `capacity - 1` samples fit at once.
    /// Pushes are truncated to whole frames of `channels` samples.
    pub fn new(capacity: usize, channels: usize) -> Self {
        let mut ring = Self::default();
        ring.resize(capacity, channels);
        ring
    }

    pub fn resize(&mut self, capacity: usize, channels: usize) {
        self.buf = vec![0; capacity];
        self.channels = channels.max(1);
        self.read = 0;
        self.write = 0;
        self.overflows = 0;
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn len(&self) -> usize {
        if self.write >= self.read {
            self.write - self.read
        } else {
            self.buf.len() - (self.read - self.write)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    pub fn free(&self) -> usize {
        self.buf.len().saturating_sub(1) - self.len()
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflows
    }

    pub fn clear(&mut self) {
        self.read = 0;
        self.write = 0;
    }

    /// Appends as many samples as fit and returns how many were written.
    pub fn push(&mut self, samples: &[i16]) -> usize {
        if samples.is_empty() || self.buf.is_empty() {
            return 0;
        }
        let free = self.free();
        let count = if samples.len() <= free {
            samples.len()
        } else {
            self.overflows += 1;
            free - free % self.channels
        };
        if count == 0 {
            return 0;
        }

        let cap = self.buf.len();
        let first = count.min(cap - self.write);
        self.buf[self.write..self.write + first].copy_from_slice(&samples[..first]);
        if first < count {
            self.buf[..count - first].copy_from_slice(&samples[first..count]);
        }
        self.write = (self.write + count) % cap;
        count
    }

    /// Moves up to `dst.len()` samples out and returns how many were read.
    pub fn pop(&mut self, dst: &mut [i16]) -> usize {
        let count = dst.len().min(self.len());
        if count == 0 {
            return 0;
        }

        let cap = self.buf.len();
        let first = count.min(cap - self.read);
        dst[..first].copy_from_slice(&self.buf[self.read..self.read + first]);
        if first < count {
            dst[first..count].copy_from_slice(&self.buf[..count - first]);
        }
        self.read = (self.read + count) % cap;
        count
    }
}
