use crate::abi::PixelFormat;
use crate::audio::{AudioFormat, AudioReader};
use crate::input::InputBinding;

/// What the core handed to the video refresh callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Frame<'a> {
    /// Repeat the previous frame.
    Dupe,
    /// The core rendered into the frontend's hardware framebuffer.
    Hardware { width: u32, height: u32 },
    Pixels {
        data: &'a [u8],
        width: u32,
        height: u32,
        pitch: usize,
    },
}

pub trait VideoBackend {
    fn resolution_changed(&mut self, width: u32, height: u32, format: PixelFormat);
    fn render(&mut self, frame: Frame<'_>);
    fn set_message(&mut self, text: &str, frames: u32);

    /// The frame about to run is behind schedule; presenting it may be skipped.
    fn skip_next_frame(&mut self) {}
}

pub trait InputBackend {
    /// Feeds pending host events into `binding`.
    fn poll(&mut self, binding: &mut InputBinding);

    fn state(&mut self, binding: &InputBinding, port: u32, device: u32, index: u32, id: u32) -> i16 {
        binding.input_state(port, device, index, id)
    }
}

pub trait AudioOutput {
    /// Starts pulling samples from `reader` at the given format.
    fn open(&mut self, format: AudioFormat, reader: AudioReader) -> Result<(), String>;
    fn close(&mut self);
    fn pause(&mut self, paused: bool);
}

#[derive(Debug, Default)]
pub struct NullVideo {
    pub frames: u64,
}

impl VideoBackend for NullVideo {
    fn resolution_changed(&mut self, _width: u32, _height: u32, _format: PixelFormat) {}

    fn render(&mut self, _frame: Frame<'_>) {
        self.frames += 1;
    }

    fn set_message(&mut self, _text: &str, _frames: u32) {}
}

#[derive(Debug, Default)]
pub struct NullInput;

impl InputBackend for NullInput {
    fn poll(&mut self, _binding: &mut InputBinding) {}
}

#[derive(Debug, Default)]
pub struct NullAudio;

impl AudioOutput for NullAudio {
    fn open(&mut self, _format: AudioFormat, _reader: AudioReader) -> Result<(), String> {
        Ok(())
    }

    fn close(&mut self) {}

    fn pause(&mut self, _paused: bool) {}
}
