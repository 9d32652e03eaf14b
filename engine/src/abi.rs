//! C ABI of libretro cores.
//!
//! Struct layouts, callback signatures and the numeric constants a core and a
//! frontend agree on. Everything here mirrors `libretro.h` (API version 1);
//! nothing is designed locally.

use std::ffi::{c_char, c_int, c_uint, c_void};

pub const RETRO_API_VERSION: c_uint = 1;

pub const DEVICE_TYPE_SHIFT: c_uint = 8;
pub const DEVICE_MASK: c_uint = (1 << DEVICE_TYPE_SHIFT) - 1;

pub const DEVICE_NONE: c_uint = 0;
pub const DEVICE_JOYPAD: c_uint = 1;
pub const DEVICE_MOUSE: c_uint = 2;
pub const DEVICE_KEYBOARD: c_uint = 3;
pub const DEVICE_LIGHTGUN: c_uint = 4;
pub const DEVICE_ANALOG: c_uint = 5;
pub const DEVICE_POINTER: c_uint = 6;

pub const DEVICE_ID_JOYPAD_B: c_uint = 0;
pub const DEVICE_ID_JOYPAD_Y: c_uint = 1;
pub const DEVICE_ID_JOYPAD_SELECT: c_uint = 2;
pub const DEVICE_ID_JOYPAD_START: c_uint = 3;
pub const DEVICE_ID_JOYPAD_UP: c_uint = 4;
pub const DEVICE_ID_JOYPAD_DOWN: c_uint = 5;
pub const DEVICE_ID_JOYPAD_LEFT: c_uint = 6;
pub const DEVICE_ID_JOYPAD_RIGHT: c_uint = 7;
pub const DEVICE_ID_JOYPAD_A: c_uint = 8;
pub const DEVICE_ID_JOYPAD_X: c_uint = 9;
pub const DEVICE_ID_JOYPAD_L: c_uint = 10;
pub const DEVICE_ID_JOYPAD_R: c_uint = 11;
pub const DEVICE_ID_JOYPAD_L2: c_uint = 12;
pub const DEVICE_ID_JOYPAD_R2: c_uint = 13;
pub const DEVICE_ID_JOYPAD_L3: c_uint = 14;
pub const DEVICE_ID_JOYPAD_R3: c_uint = 15;
/// Query id returning every joypad button as one bitmask.
pub const DEVICE_ID_JOYPAD_MASK: c_uint = 256;

pub const DEVICE_INDEX_ANALOG_LEFT: c_uint = 0;
pub const DEVICE_INDEX_ANALOG_RIGHT: c_uint = 1;
pub const DEVICE_INDEX_ANALOG_BUTTON: c_uint = 2;
pub const DEVICE_ID_ANALOG_X: c_uint = 0;
pub const DEVICE_ID_ANALOG_Y: c_uint = 1;

pub const MEMORY_SAVE_RAM: c_uint = 0;
pub const MEMORY_RTC: c_uint = 1;
pub const MEMORY_SYSTEM_RAM: c_uint = 2;
pub const MEMORY_VIDEO_RAM: c_uint = 3;

pub const REGION_NTSC: c_uint = 0;
pub const REGION_PAL: c_uint = 1;

pub const LANGUAGE_ENGLISH: c_uint = 0;

pub const LOG_DEBUG: c_uint = 0;
pub const LOG_INFO: c_uint = 1;
pub const LOG_WARN: c_uint = 2;
pub const LOG_ERROR: c_uint = 3;

/// Sentinel `data` pointer for video refresh: the frame was rendered into a
/// hardware framebuffer owned by the frontend.
pub const HW_FRAME_BUFFER_VALID: *const c_void = usize::MAX as *const c_void;

/// Maximum number of values in a v1 core option definition.
pub const NUM_CORE_OPTION_VALUES_MAX: usize = 128;

/// Environment command codes.
pub mod env {
    use std::ffi::c_uint;

    pub const EXPERIMENTAL: c_uint = 0x10000;
    pub const PRIVATE: c_uint = 0x20000;

    pub const SET_ROTATION: c_uint = 1;
    pub const GET_OVERSCAN: c_uint = 2;
    pub const GET_CAN_DUPE: c_uint = 3;
    pub const SET_MESSAGE: c_uint = 6;
    pub const SHUTDOWN: c_uint = 7;
    pub const SET_PERFORMANCE_LEVEL: c_uint = 8;
    pub const GET_SYSTEM_DIRECTORY: c_uint = 9;
    pub const SET_PIXEL_FORMAT: c_uint = 10;
    pub const SET_INPUT_DESCRIPTORS: c_uint = 11;
    pub const SET_KEYBOARD_CALLBACK: c_uint = 12;
    pub const SET_DISK_CONTROL_INTERFACE: c_uint = 13;
    pub const SET_HW_RENDER: c_uint = 14;
    pub const GET_VARIABLE: c_uint = 15;
    pub const SET_VARIABLES: c_uint = 16;
    pub const GET_VARIABLE_UPDATE: c_uint = 17;
    pub const SET_SUPPORT_NO_GAME: c_uint = 18;
    pub const GET_LIBRETRO_PATH: c_uint = 19;
    pub const SET_FRAME_TIME_CALLBACK: c_uint = 21;
    pub const SET_AUDIO_CALLBACK: c_uint = 22;
    pub const GET_RUMBLE_INTERFACE: c_uint = 23;
    pub const GET_INPUT_DEVICE_CAPABILITIES: c_uint = 24;
    pub const GET_SENSOR_INTERFACE: c_uint = 25 | EXPERIMENTAL;
    pub const GET_CAMERA_INTERFACE: c_uint = 26 | EXPERIMENTAL;
    pub const GET_LOG_INTERFACE: c_uint = 27;
    pub const GET_PERF_INTERFACE: c_uint = 28;
    pub const GET_LOCATION_INTERFACE: c_uint = 29;
    pub const GET_CORE_ASSETS_DIRECTORY: c_uint = 30;
    pub const GET_SAVE_DIRECTORY: c_uint = 31;
    pub const SET_SYSTEM_AV_INFO: c_uint = 32;
    pub const SET_PROC_ADDRESS_CALLBACK: c_uint = 33;
    pub const SET_SUBSYSTEM_INFO: c_uint = 34;
    pub const SET_CONTROLLER_INFO: c_uint = 35;
    pub const SET_MEMORY_MAPS: c_uint = 36 | EXPERIMENTAL;
    pub const SET_GEOMETRY: c_uint = 37;
    pub const GET_USERNAME: c_uint = 38;
    pub const GET_LANGUAGE: c_uint = 39;
    pub const GET_CURRENT_SOFTWARE_FRAMEBUFFER: c_uint = 40 | EXPERIMENTAL;
    pub const GET_HW_RENDER_INTERFACE: c_uint = 41 | EXPERIMENTAL;
    pub const SET_SUPPORT_ACHIEVEMENTS: c_uint = 42 | EXPERIMENTAL;
    pub const SET_HW_RENDER_CONTEXT_NEGOTIATION_INTERFACE: c_uint = 43 | EXPERIMENTAL;
    pub const SET_SERIALIZATION_QUIRKS: c_uint = 44;
    pub const SET_HW_SHARED_CONTEXT: c_uint = 44 | EXPERIMENTAL;
    pub const GET_VFS_INTERFACE: c_uint = 45 | EXPERIMENTAL;
    pub const GET_LED_INTERFACE: c_uint = 46 | EXPERIMENTAL;
    pub const GET_AUDIO_VIDEO_ENABLE: c_uint = 47 | EXPERIMENTAL;
    pub const GET_MIDI_INTERFACE: c_uint = 48 | EXPERIMENTAL;
    pub const GET_FASTFORWARDING: c_uint = 49 | EXPERIMENTAL;
    pub const GET_TARGET_REFRESH_RATE: c_uint = 50 | EXPERIMENTAL;
    pub const GET_INPUT_BITMASKS: c_uint = 51 | EXPERIMENTAL;
    pub const GET_CORE_OPTIONS_VERSION: c_uint = 52;
    pub const SET_CORE_OPTIONS: c_uint = 53;
    pub const SET_CORE_OPTIONS_INTL: c_uint = 54;
    pub const SET_CORE_OPTIONS_DISPLAY: c_uint = 55;
    pub const GET_PREFERRED_HW_RENDER: c_uint = 56;
    pub const SET_VARIABLE: c_uint = 70;
}

pub type EnvironmentFn = unsafe extern "C" fn(cmd: c_uint, data: *mut c_void) -> bool;
pub type VideoRefreshFn =
    unsafe extern "C" fn(data: *const c_void, width: c_uint, height: c_uint, pitch: usize);
pub type AudioSampleFn = unsafe extern "C" fn(left: i16, right: i16);
pub type AudioSampleBatchFn = unsafe extern "C" fn(data: *const i16, frames: usize) -> usize;
pub type InputPollFn = unsafe extern "C" fn();
pub type InputStateFn =
    unsafe extern "C" fn(port: c_uint, device: c_uint, index: c_uint, id: c_uint) -> i16;
pub type LogPrintfFn = unsafe extern "C" fn(level: c_uint, fmt: *const c_char, ...);
pub type SetRumbleStateFn = unsafe extern "C" fn(port: c_uint, effect: c_uint, strength: u16) -> bool;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SystemInfo {
    pub library_name: *const c_char,
    pub library_version: *const c_char,
    pub valid_extensions: *const c_char,
    pub need_fullpath: bool,
    pub block_extract: bool,
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            library_name: std::ptr::null(),
            library_version: std::ptr::null(),
            valid_extensions: std::ptr::null(),
            need_fullpath: false,
            block_extract: false,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GameGeometry {
    pub base_width: c_uint,
    pub base_height: c_uint,
    pub max_width: c_uint,
    pub max_height: c_uint,
    pub aspect_ratio: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SystemTiming {
    pub fps: f64,
    pub sample_rate: f64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SystemAvInfo {
    pub geometry: GameGeometry,
    pub timing: SystemTiming,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GameInfo {
    pub path: *const c_char,
    pub data: *const c_void,
    pub size: usize,
    pub meta: *const c_char,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Variable {
    pub key: *const c_char,
    pub value: *const c_char,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Message {
    pub msg: *const c_char,
    pub frames: c_uint,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct InputDescriptor {
    pub port: c_uint,
    pub device: c_uint,
    pub index: c_uint,
    pub id: c_uint,
    pub description: *const c_char,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CoreOptionValue {
    pub value: *const c_char,
    pub label: *const c_char,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CoreOptionDefinition {
    pub key: *const c_char,
    pub desc: *const c_char,
    pub info: *const c_char,
    pub values: [CoreOptionValue; NUM_CORE_OPTION_VALUES_MAX],
    pub default_value: *const c_char,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CoreOptionsIntl {
    pub us: *const CoreOptionDefinition,
    pub local: *const CoreOptionDefinition,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CoreOptionDisplay {
    pub key: *const c_char,
    pub visible: bool,
}

#[repr(C)]
pub struct LogCallback {
    pub log: Option<LogPrintfFn>,
}

#[repr(C)]
pub struct RumbleInterface {
    pub set_rumble_state: Option<SetRumbleStateFn>,
}

pub type CameraStartFn = unsafe extern "C" fn() -> bool;
pub type CameraStopFn = unsafe extern "C" fn();
pub type CameraLifetimeStatusFn = unsafe extern "C" fn();
pub type CameraFrameRawFn =
    unsafe extern "C" fn(buffer: *const u32, width: c_uint, height: c_uint, pitch: usize);
pub type CameraFrameTextureFn =
    unsafe extern "C" fn(texture_id: c_uint, texture_target: c_uint, affine: *const f32);

/// Filled in by the core, except `start` and `stop`, which the frontend provides.
#[repr(C)]
pub struct CameraCallback {
    pub caps: u64,
    pub width: c_uint,
    pub height: c_uint,
    pub start: Option<CameraStartFn>,
    pub stop: Option<CameraStopFn>,
    pub frame_raw_framebuffer: Option<CameraFrameRawFn>,
    pub frame_opengl_texture: Option<CameraFrameTextureFn>,
    pub initialized: Option<CameraLifetimeStatusFn>,
    pub deinitialized: Option<CameraLifetimeStatusFn>,
}

pub const VFS_FILE_ACCESS_READ: c_uint = 1 << 0;
pub const VFS_FILE_ACCESS_WRITE: c_uint = 1 << 1;
pub const VFS_FILE_ACCESS_READ_WRITE: c_uint = VFS_FILE_ACCESS_READ | VFS_FILE_ACCESS_WRITE;
pub const VFS_FILE_ACCESS_UPDATE_EXISTING: c_uint = 1 << 2;

pub const VFS_SEEK_POSITION_START: c_int = 0;
pub const VFS_SEEK_POSITION_CURRENT: c_int = 1;
pub const VFS_SEEK_POSITION_END: c_int = 2;

pub const VFS_STAT_IS_VALID: c_int = 1 << 0;
pub const VFS_STAT_IS_DIRECTORY: c_int = 1 << 1;
pub const VFS_STAT_IS_CHARACTER_SPECIAL: c_int = 1 << 2;

/// Highest VFS interface version this frontend implements.
pub const VFS_INTERFACE_VERSION: u32 = 3;

/// Opaque file handle handed to the core.
pub type VfsFileHandle = c_void;
/// Opaque directory handle handed to the core.
pub type VfsDirHandle = c_void;

/// Function table of VFS interface version 3, in `libretro.h` order.
#[repr(C)]
pub struct VfsInterface {
    pub get_path: Option<unsafe extern "C" fn(stream: *mut VfsFileHandle) -> *const c_char>,
    pub open: Option<
        unsafe extern "C" fn(path: *const c_char, mode: c_uint, hints: c_uint) -> *mut VfsFileHandle,
    >,
    pub close: Option<unsafe extern "C" fn(stream: *mut VfsFileHandle) -> c_int>,
    pub size: Option<unsafe extern "C" fn(stream: *mut VfsFileHandle) -> i64>,
    pub tell: Option<unsafe extern "C" fn(stream: *mut VfsFileHandle) -> i64>,
    pub seek: Option<unsafe extern "C" fn(stream: *mut VfsFileHandle, offset: i64, whence: c_int) -> i64>,
    pub read: Option<unsafe extern "C" fn(stream: *mut VfsFileHandle, s: *mut c_void, len: u64) -> i64>,
    pub write:
        Option<unsafe extern "C" fn(stream: *mut VfsFileHandle, s: *const c_void, len: u64) -> i64>,
    pub flush: Option<unsafe extern "C" fn(stream: *mut VfsFileHandle) -> c_int>,
    pub remove: Option<unsafe extern "C" fn(path: *const c_char) -> c_int>,
    pub rename: Option<unsafe extern "C" fn(old_path: *const c_char, new_path: *const c_char) -> c_int>,
    pub truncate: Option<unsafe extern "C" fn(stream: *mut VfsFileHandle, length: i64) -> i64>,
    pub stat: Option<unsafe extern "C" fn(path: *const c_char, size: *mut i32) -> c_int>,
    pub mkdir: Option<unsafe extern "C" fn(dir: *const c_char) -> c_int>,
    pub opendir:
        Option<unsafe extern "C" fn(dir: *const c_char, include_hidden: bool) -> *mut VfsDirHandle>,
    pub readdir: Option<unsafe extern "C" fn(dirstream: *mut VfsDirHandle) -> bool>,
    pub dirent_get_name: Option<unsafe extern "C" fn(dirstream: *mut VfsDirHandle) -> *const c_char>,
    pub dirent_is_dir: Option<unsafe extern "C" fn(dirstream: *mut VfsDirHandle) -> bool>,
    pub closedir: Option<unsafe extern "C" fn(dirstream: *mut VfsDirHandle) -> c_int>,
}

#[repr(C)]
pub struct VfsInterfaceInfo {
    pub required_interface_version: u32,
    pub iface: *const VfsInterface,
}

/// Pixel layouts a core can negotiate with `SET_PIXEL_FORMAT`.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum PixelFormat {
    /// 0RGB1555, native endian. The ABI default until the core says otherwise.
    #[default]
    Rgb1555 = 0,
    /// XRGB8888, native endian, 32 bits per pixel.
    Xrgb8888 = 1,
    /// RGB565, native endian, 16 bits per pixel.
    Rgb565 = 2,
}

impl PixelFormat {
    pub fn from_raw(raw: c_uint) -> Option<Self> {
        match raw {
            0 => Some(Self::Rgb1555),
            1 => Some(Self::Xrgb8888),
            2 => Some(Self::Rgb565),
            _ => None,
        }
    }

    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Xrgb8888 => 4,
            PixelFormat::Rgb1555 | PixelFormat::Rgb565 => 2,
        }
    }
}

/// Copies a NUL-terminated string handed over by the core.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that stays valid for
/// the duration of the call.
pub(crate) unsafe fn string_from_ptr(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: non-null and NUL-terminated per the caller contract.
    Some(unsafe { std::ffi::CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}
