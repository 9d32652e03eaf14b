//! C entry points handed to the core, and the per-call context they reach.
//!
//! The libretro callbacks carry no user-data pointer, so the state they act on
//! is installed in a thread-local slot for the duration of each call into the
//! core by [`scoped`] and removed again on return. A callback arriving outside
//! such a call finds no context and answers with a neutral value.

use crate::abi::{self, LogPrintfFn};
use crate::audio::BufferedAudio;
use crate::backend::{Frame, InputBackend, VideoBackend};
use crate::environment::EnvironmentDispatcher;
use crate::input::InputBinding;
use std::cell::Cell;
use std::ffi::{c_char, c_uint, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::{debug, error, info, trace, warn};

/// Everything the core's callbacks can touch during one call.
pub struct Frontend {
    pub env: EnvironmentDispatcher,
    pub audio: BufferedAudio,
    pub input: InputBinding,
    pub video: Box<dyn VideoBackend>,
    pub input_backend: Box<dyn InputBackend>,
}

impl std::fmt::Debug for Frontend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frontend")
            .field("env", &self.env)
            .field("audio", &self.audio)
            .field("input", &self.input)
            .finish_non_exhaustive()
    }
}

impl Frontend {
    pub fn new(
        env: EnvironmentDispatcher,
        video: Box<dyn VideoBackend>,
        input_backend: Box<dyn InputBackend>,
    ) -> Self {
        Self {
            env,
            audio: BufferedAudio::new(),
            input: InputBinding::new(),
            video,
            input_backend,
        }
    }

    /// Forwards queued on-screen messages to the video backend.
    pub fn flush_messages(&mut self) {
        for message in self.env.drain_messages() {
            self.video.set_message(&message.text, message.frames);
        }
    }

    fn refresh(&mut self, data: *const c_void, width: u32, height: u32, pitch: usize) {
        if let Some(mode) = self.env.take_video_change() {
            self.video.resolution_changed(
                mode.geometry.base_width,
                mode.geometry.base_height,
                mode.format,
            );
        }
        let frame = if data.is_null() {
            Frame::Dupe
        } else if data == abi::HW_FRAME_BUFFER_VALID {
            Frame::Hardware { width, height }
        } else {
            let row = width as usize * self.env.pixel_format().bytes_per_pixel() as usize;
            let len = match height as usize {
                0 => 0,
                rows => pitch * (rows - 1) + row,
            };
            // SAFETY: the core guarantees `height` rows of `pitch` bytes at `data`,
            // the last of which holds at least one row of pixels.
            let data = unsafe { std::slice::from_raw_parts(data as *const u8, len) };
            Frame::Pixels {
                data,
                width,
                height,
                pitch,
            }
        };
        self.video.render(frame);
    }
}

thread_local! {
    static ACTIVE: Cell<*mut Frontend> = const { Cell::new(std::ptr::null_mut()) };
}

struct ContextGuard {
    previous: *mut Frontend,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        ACTIVE.set(self.previous);
    }
}

/// Runs `call` with `frontend` reachable from the C callbacks on this thread.
pub fn scoped<R>(frontend: &mut Frontend, call: impl FnOnce() -> R) -> R {
    let _guard = ContextGuard {
        previous: ACTIVE.replace(frontend as *mut Frontend),
    };
    call()
}

/// Whether a context is installed on this thread.
pub fn is_active() -> bool {
    !ACTIVE.get().is_null()
}

fn with_frontend<R>(neutral: R, name: &str, f: impl FnOnce(&mut Frontend) -> R) -> R {
    let ptr = ACTIVE.get();
    if ptr.is_null() {
        warn!("{name} called outside of a core call");
        return neutral;
    }
    // SAFETY: `scoped` holds the unique borrow of this frontend for as long as
    // the pointer is installed, and callbacks do not nest.
    let frontend = unsafe { &mut *ptr };
    match catch_unwind(AssertUnwindSafe(|| f(frontend))) {
        Ok(value) => value,
        Err(_) => {
            error!("Panic in {name} callback");
            neutral
        }
    }
}

pub unsafe extern "C" fn environment(cmd: c_uint, data: *mut c_void) -> bool {
    with_frontend(false, "environment", |fe| fe.env.dispatch(cmd, data, &mut fe.input))
}

pub unsafe extern "C" fn video_refresh(data: *const c_void, width: c_uint, height: c_uint, pitch: usize) {
    with_frontend((), "video_refresh", |fe| fe.refresh(data, width, height, pitch))
}

pub unsafe extern "C" fn audio_sample(left: i16, right: i16) {
    with_frontend((), "audio_sample", |fe| fe.audio.write_samples(&[left, right]))
}

pub unsafe extern "C" fn audio_sample_batch(data: *const i16, frames: usize) -> usize {
    if data.is_null() {
        return 0;
    }
    with_frontend(0, "audio_sample_batch", |fe| {
        // SAFETY: the core passes `frames` interleaved stereo frames.
        let samples = unsafe { std::slice::from_raw_parts(data, frames * 2) };
        fe.audio.write_samples(samples);
        frames
    })
}

pub unsafe extern "C" fn input_poll() {
    with_frontend((), "input_poll", |fe| fe.input_backend.poll(&mut fe.input))
}

pub unsafe extern "C" fn input_state(port: c_uint, device: c_uint, index: c_uint, id: c_uint) -> i16 {
    with_frontend(0, "input_state", |fe| {
        fe.input_backend.state(&fe.input, port, device, index, id)
    })
}

unsafe extern "C" fn core_log(level: c_uint, fmt: *const c_char) {
    let _ = catch_unwind(|| {
        // SAFETY: the format string is NUL-terminated.
        let Some(text) = (unsafe { abi::string_from_ptr(fmt) }) else {
            return;
        };
        let text = text.trim_end();
        match level {
            abi::LOG_DEBUG => debug!(target: "core", "{text}"),
            abi::LOG_INFO => info!(target: "core", "{text}"),
            abi::LOG_WARN => warn!(target: "core", "{text}"),
            abi::LOG_ERROR => error!(target: "core", "{text}"),
            _ => trace!(target: "core", "{text}"),
        }
    });
}

/// Log callback for `GET_LOG_INTERFACE`. The format string is logged as-is;
/// variadic arguments are not expanded.
pub fn log_printf() -> LogPrintfFn {
    // SAFETY: the two fixed arguments are passed identically to variadic and
    // non-variadic C functions on the supported targets, and the callee never
    // reads the variadic part.
    unsafe {
        std::mem::transmute::<unsafe extern "C" fn(c_uint, *const c_char), LogPrintfFn>(core_log)
    }
}

/// Rumble is not supported; every request reports failure.
pub extern "C" fn set_rumble_state(_port: c_uint, _effect: c_uint, _strength: u16) -> bool {
    false
}

/// There is no camera; starting one always fails.
pub extern "C" fn camera_start() -> bool {
    debug!("Core asked to start the camera");
    false
}

pub extern "C" fn camera_stop() {}
