//! Answers the environment callback, the channel a core uses to query and
//! configure the frontend.
//!
//! Raw command numbers are decoded once into [`EnvCommand`]. Each variant is
//! then handled by one method taking the payload type that command carries,
//! so the only untyped cast lives in [`Payload::get`].

pub mod variables;

use crate::abi::{
    self, CameraCallback, CoreOptionDefinition, CoreOptionDisplay, CoreOptionsIntl, GameGeometry,
    InputDescriptor, LogCallback, Message, PixelFormat, RumbleInterface, SystemAvInfo, Variable,
    VfsInterfaceInfo, env,
};
use crate::callbacks;
use crate::vfs;
use crate::input::{ButtonDescriptor, InputBinding};
use std::collections::{HashMap, VecDeque};
use std::ffi::{CString, c_char, c_int, c_uint, c_void};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
pub use variables::{CoreVariable, VariableOption, VariableSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvCommand {
    SetRotation,
    GetOverscan,
    GetCanDupe,
    SetMessage,
    Shutdown,
    SetPerformanceLevel,
    GetSystemDirectory,
    SetPixelFormat,
    SetInputDescriptors,
    GetVariable,
    SetVariables,
    GetVariableUpdate,
    SetSupportNoGame,
    GetLibretroPath,
    GetRumbleInterface,
    GetInputDeviceCapabilities,
    GetCameraInterface,
    GetLogInterface,
    GetCoreAssetsDirectory,
    GetSaveDirectory,
    SetSystemAvInfo,
    SetControllerInfo,
    SetMemoryMaps,
    SetGeometry,
    GetUsername,
    GetLanguage,
    SetSupportAchievements,
    SetSerializationQuirks,
    GetVfsInterface,
    GetAudioVideoEnable,
    GetFastforwarding,
    GetTargetRefreshRate,
    GetInputBitmasks,
    GetCoreOptionsVersion,
    SetCoreOptions,
    SetCoreOptionsIntl,
    SetCoreOptionsDisplay,
    SetVariable,
    Unknown(u32),
}

impl EnvCommand {
    pub fn decode(cmd: c_uint) -> Self {
        // private-range commands are never answered
        if cmd & env::PRIVATE != 0 {
            return Self::Unknown(cmd);
        }
        match cmd {
            env::SET_ROTATION => Self::SetRotation,
            env::GET_OVERSCAN => Self::GetOverscan,
            env::GET_CAN_DUPE => Self::GetCanDupe,
            env::SET_MESSAGE => Self::SetMessage,
            env::SHUTDOWN => Self::Shutdown,
            env::SET_PERFORMANCE_LEVEL => Self::SetPerformanceLevel,
            env::GET_SYSTEM_DIRECTORY => Self::GetSystemDirectory,
            env::SET_PIXEL_FORMAT => Self::SetPixelFormat,
            env::SET_INPUT_DESCRIPTORS => Self::SetInputDescriptors,
            env::GET_VARIABLE => Self::GetVariable,
            env::SET_VARIABLES => Self::SetVariables,
            env::GET_VARIABLE_UPDATE => Self::GetVariableUpdate,
            env::SET_SUPPORT_NO_GAME => Self::SetSupportNoGame,
            env::GET_LIBRETRO_PATH => Self::GetLibretroPath,
            env::GET_RUMBLE_INTERFACE => Self::GetRumbleInterface,
            env::GET_INPUT_DEVICE_CAPABILITIES => Self::GetInputDeviceCapabilities,
            env::GET_CAMERA_INTERFACE => Self::GetCameraInterface,
            env::GET_LOG_INTERFACE => Self::GetLogInterface,
            env::GET_CORE_ASSETS_DIRECTORY => Self::GetCoreAssetsDirectory,
            env::GET_SAVE_DIRECTORY => Self::GetSaveDirectory,
            env::SET_SYSTEM_AV_INFO => Self::SetSystemAvInfo,
            env::SET_CONTROLLER_INFO => Self::SetControllerInfo,
            env::SET_MEMORY_MAPS => Self::SetMemoryMaps,
            env::SET_GEOMETRY => Self::SetGeometry,
            env::GET_USERNAME => Self::GetUsername,
            env::GET_LANGUAGE => Self::GetLanguage,
            env::SET_SUPPORT_ACHIEVEMENTS => Self::SetSupportAchievements,
            env::SET_SERIALIZATION_QUIRKS => Self::SetSerializationQuirks,
            env::GET_VFS_INTERFACE => Self::GetVfsInterface,
            env::GET_AUDIO_VIDEO_ENABLE => Self::GetAudioVideoEnable,
            env::GET_FASTFORWARDING => Self::GetFastforwarding,
            env::GET_TARGET_REFRESH_RATE => Self::GetTargetRefreshRate,
            env::GET_INPUT_BITMASKS => Self::GetInputBitmasks,
            env::GET_CORE_OPTIONS_VERSION => Self::GetCoreOptionsVersion,
            env::SET_CORE_OPTIONS => Self::SetCoreOptions,
            env::SET_CORE_OPTIONS_INTL => Self::SetCoreOptionsIntl,
            env::SET_CORE_OPTIONS_DISPLAY => Self::SetCoreOptionsDisplay,
            env::SET_VARIABLE => Self::SetVariable,
            other => Self::Unknown(other),
        }
    }
}

/// The raw `data` argument of an environment call.
#[derive(Clone, Copy)]
struct Payload(*mut c_void);

impl Payload {
    /// # Safety
    /// For the command being handled, the core must pass either null or a
    /// pointer to a live `T`, as `libretro.h` specifies for that command.
    unsafe fn get<'a, T>(self) -> Option<&'a mut T> {
        // SAFETY: upheld by the caller.
        unsafe { (self.0 as *mut T).as_mut() }
    }

    fn is_null(self) -> bool {
        self.0.is_null()
    }
}

/// Paths and identity handed to the core on request. Unset entries are
/// answered with null, never with an invented default.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvironmentConfig {
    pub system_dir: Option<PathBuf>,
    pub save_dir: Option<PathBuf>,
    pub core_assets_dir: Option<PathBuf>,
    pub libretro_path: Option<PathBuf>,
    pub username: Option<String>,
    pub language: u32,
}

#[derive(Debug, Default)]
struct ConfigStrings {
    system_dir: Option<CString>,
    save_dir: Option<CString>,
    core_assets_dir: Option<CString>,
    libretro_path: Option<CString>,
    username: Option<CString>,
}

fn path_cstring(path: Option<&Path>) -> Option<CString> {
    path.and_then(|p| CString::new(p.to_string_lossy().as_bytes()).ok())
}

fn cstring_ptr(value: &Option<CString>) -> *const c_char {
    value.as_ref().map_or(std::ptr::null(), |s| s.as_ptr())
}

/// Video settings the core changed since the backend last saw them.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VideoMode {
    pub geometry: GameGeometry,
    pub format: PixelFormat,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OnScreenMessage {
    pub text: String,
    pub frames: u32,
}

#[derive(Debug, Default)]
pub struct EnvironmentDispatcher {
    config: EnvironmentConfig,
    strings: ConfigStrings,
    variables: VariableSet,
    returned_values: HashMap<String, CString>,
    pixel_format: PixelFormat,
    av_info: SystemAvInfo,
    video_changed: bool,
    av_changed: bool,
    rotation: u32,
    performance_level: u32,
    support_no_game: bool,
    support_achievements: bool,
    messages: VecDeque<OnScreenMessage>,
    shutdown: bool,
}

impl EnvironmentDispatcher {
    pub fn new(config: EnvironmentConfig) -> Self {
        let mut dispatcher = Self::default();
        dispatcher.configure(config);
        dispatcher
    }

    pub fn configure(&mut self, config: EnvironmentConfig) {
        self.strings = ConfigStrings {
            system_dir: path_cstring(config.system_dir.as_deref()),
            save_dir: path_cstring(config.save_dir.as_deref()),
            core_assets_dir: path_cstring(config.core_assets_dir.as_deref()),
            libretro_path: path_cstring(config.libretro_path.as_deref()),
            username: config
                .username
                .as_deref()
                .and_then(|name| CString::new(name).ok()),
        };
        self.config = config;
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    /// Drops everything the previous core negotiated.
    pub fn reset(&mut self) {
        self.variables.clear();
        self.returned_values.clear();
        self.pixel_format = PixelFormat::default();
        self.av_info = SystemAvInfo::default();
        self.video_changed = false;
        self.av_changed = false;
        self.rotation = 0;
        self.performance_level = 0;
        self.support_no_game = false;
        self.support_achievements = false;
        self.messages.clear();
        self.shutdown = false;
    }

    pub fn variables(&self) -> &VariableSet {
        &self.variables
    }

    pub fn variables_mut(&mut self) -> &mut VariableSet {
        &mut self.variables
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn av_info(&self) -> SystemAvInfo {
        self.av_info
    }

    /// Records the AV info the core reported after loading content.
    pub fn set_av_info(&mut self, av_info: SystemAvInfo) {
        self.av_info = av_info;
        self.video_changed = false;
        self.av_changed = false;
    }

    pub fn support_no_game(&self) -> bool {
        self.support_no_game
    }

    pub fn support_achievements(&self) -> bool {
        self.support_achievements
    }

    pub fn rotation(&self) -> u32 {
        self.rotation
    }

    pub fn performance_level(&self) -> u32 {
        self.performance_level
    }

    pub fn take_video_change(&mut self) -> Option<VideoMode> {
        std::mem::take(&mut self.video_changed).then_some(VideoMode {
            geometry: self.av_info.geometry,
            format: self.pixel_format,
        })
    }

    /// New timing from `SET_SYSTEM_AV_INFO`, if any arrived.
    pub fn take_av_change(&mut self) -> Option<SystemAvInfo> {
        std::mem::take(&mut self.av_changed).then_some(self.av_info)
    }

    pub fn push_message(&mut self, text: impl Into<String>, frames: u32) {
        self.messages.push_back(OnScreenMessage {
            text: text.into(),
            frames,
        });
    }

    pub fn drain_messages(&mut self) -> impl Iterator<Item = OnScreenMessage> + '_ {
        self.messages.drain(..)
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown
    }

    pub fn clear_shutdown(&mut self) {
        self.shutdown = false;
    }

    /// Handles one environment call. `data` is the core's payload pointer,
    /// read and written according to `cmd`.
    pub fn dispatch(&mut self, cmd: c_uint, data: *mut c_void, input: &mut InputBinding) -> bool {
        let command = EnvCommand::decode(cmd);
        let payload = Payload(data);
        // SAFETY: the core passes the payload type `libretro.h` documents for
        // `cmd`; each arm reads it as exactly that type.
        unsafe {
            match command {
                EnvCommand::SetRotation => payload.get::<c_uint>().is_some_and(|r| self.set_rotation(*r)),
                EnvCommand::GetOverscan => write(payload, false),
                EnvCommand::GetCanDupe => write(payload, true),
                EnvCommand::SetMessage => payload.get::<Message>().is_some_and(|m| self.set_message(m)),
                EnvCommand::Shutdown => {
                    info!("Core requested shutdown");
                    self.shutdown = true;
                    true
                }
                EnvCommand::SetPerformanceLevel => payload.get::<c_uint>().is_some_and(|level| {
                    self.performance_level = *level;
                    true
                }),
                EnvCommand::GetSystemDirectory => write(payload, cstring_ptr(&self.strings.system_dir)),
                EnvCommand::GetSaveDirectory => write(payload, cstring_ptr(&self.strings.save_dir)),
                EnvCommand::GetCoreAssetsDirectory => {
                    write(payload, cstring_ptr(&self.strings.core_assets_dir))
                }
                EnvCommand::GetLibretroPath => write(payload, cstring_ptr(&self.strings.libretro_path)),
                EnvCommand::GetUsername => write(payload, cstring_ptr(&self.strings.username)),
                EnvCommand::SetPixelFormat => {
                    payload.get::<c_uint>().is_some_and(|f| self.set_pixel_format(*f))
                }
                EnvCommand::SetInputDescriptors => {
                    let descriptors = read_input_descriptors(payload.0 as *const InputDescriptor);
                    input.set_descriptors(descriptors);
                    true
                }
                EnvCommand::GetVariable => payload.get::<Variable>().is_some_and(|v| self.get_variable(v)),
                EnvCommand::SetVariables => {
                    let vars = read_legacy_variables(payload.0 as *const Variable);
                    self.replace_variables(vars);
                    true
                }
                EnvCommand::GetVariableUpdate => write(payload, self.variables.is_updated()),
                EnvCommand::SetSupportNoGame => payload.get::<bool>().is_some_and(|b| {
                    self.support_no_game = *b;
                    true
                }),
                EnvCommand::GetRumbleInterface => payload.get::<RumbleInterface>().is_some_and(|iface| {
                    iface.set_rumble_state = Some(callbacks::set_rumble_state);
                    true
                }),
                EnvCommand::GetInputDeviceCapabilities => write(
                    payload,
                    (1u64 << abi::DEVICE_JOYPAD) | (1u64 << abi::DEVICE_ANALOG),
                ),
                EnvCommand::GetCameraInterface => payload.get::<CameraCallback>().is_some_and(|cam| {
                    cam.start = Some(callbacks::camera_start);
                    cam.stop = Some(callbacks::camera_stop);
                    true
                }),
                EnvCommand::GetLogInterface => payload.get::<LogCallback>().is_some_and(|cb| {
                    cb.log = Some(callbacks::log_printf());
                    true
                }),
                EnvCommand::SetSystemAvInfo => {
                    payload.get::<SystemAvInfo>().is_some_and(|av| self.set_system_av_info(av))
                }
                EnvCommand::SetGeometry => payload.get::<GameGeometry>().is_some_and(|g| self.set_geometry(g)),
                EnvCommand::GetLanguage => write(payload, self.config.language as c_uint),
                EnvCommand::SetControllerInfo | EnvCommand::SetMemoryMaps => true,
                EnvCommand::SetSupportAchievements => payload.get::<bool>().is_some_and(|b| {
                    self.support_achievements = *b;
                    true
                }),
                EnvCommand::SetSerializationQuirks => !payload.is_null(),
                EnvCommand::GetVfsInterface => {
                    payload.get::<VfsInterfaceInfo>().is_some_and(Self::get_vfs_interface)
                }
                // bit 0 video, bit 1 audio
                EnvCommand::GetAudioVideoEnable => write(payload, 3 as c_int),
                EnvCommand::GetFastforwarding => write(payload, false),
                EnvCommand::GetTargetRefreshRate => write(payload, self.av_info.timing.fps as f32),
                EnvCommand::GetInputBitmasks => true,
                EnvCommand::GetCoreOptionsVersion => write(payload, 1 as c_uint),
                EnvCommand::SetCoreOptions => {
                    let vars = read_option_definitions(payload.0 as *const CoreOptionDefinition, None);
                    self.replace_variables(vars);
                    true
                }
                EnvCommand::SetCoreOptionsIntl => payload.get::<CoreOptionsIntl>().is_some_and(|intl| {
                    let vars = read_option_definitions(intl.us, Some(intl.local));
                    self.replace_variables(vars);
                    true
                }),
                EnvCommand::SetCoreOptionsDisplay => payload
                    .get::<CoreOptionDisplay>()
                    .is_some_and(|d| self.set_option_display(d)),
                // a null payload asks whether the call is supported
                EnvCommand::SetVariable => match payload.get::<Variable>() {
                    Some(v) => self.set_variable(v),
                    None => true,
                },
                EnvCommand::Unknown(code) => {
                    if code & env::EXPERIMENTAL != 0 {
                        info!(
                            "Unhandled environment command {} (experimental)",
                            code & !env::EXPERIMENTAL
                        );
                    } else {
                        info!("Unhandled environment command {code}");
                    }
                    false
                }
            }
        }
    }

    fn set_rotation(&mut self, rotation: c_uint) -> bool {
        if rotation != 0 {
            debug!("Rejecting rotation {rotation}");
            return false;
        }
        self.rotation = rotation;
        true
    }

    fn set_message(&mut self, message: &Message) -> bool {
        // SAFETY: message text is a NUL-terminated string owned by the core.
        let Some(text) = (unsafe { abi::string_from_ptr(message.msg) }) else {
            return false;
        };
        info!("Core message: {text}");
        self.push_message(text, message.frames);
        true
    }

    fn set_pixel_format(&mut self, raw: c_uint) -> bool {
        let Some(format) = PixelFormat::from_raw(raw) else {
            warn!("Core requested unsupported pixel format {raw}");
            return false;
        };
        if format != self.pixel_format {
            self.pixel_format = format;
            self.video_changed = true;
        }
        true
    }

    fn set_geometry(&mut self, geometry: &GameGeometry) -> bool {
        let current = &mut self.av_info.geometry;
        current.base_width = geometry.base_width;
        current.base_height = geometry.base_height;
        // max size is fixed by the last SET_SYSTEM_AV_INFO; only widen it
        current.max_width = current.max_width.max(geometry.max_width);
        current.max_height = current.max_height.max(geometry.max_height);
        current.aspect_ratio = geometry.aspect_ratio;
        self.video_changed = true;
        true
    }

    fn set_system_av_info(&mut self, av_info: &SystemAvInfo) -> bool {
        info!(
            "Core changed AV info: {}x{} @ {:.3} fps, {} Hz",
            av_info.geometry.base_width,
            av_info.geometry.base_height,
            av_info.timing.fps,
            av_info.timing.sample_rate
        );
        self.av_info = *av_info;
        self.video_changed = true;
        self.av_changed = true;
        true
    }

    fn get_variable(&mut self, var: &mut Variable) -> bool {
        // SAFETY: the key is a NUL-terminated string owned by the core.
        let Some(key) = (unsafe { abi::string_from_ptr(var.key) }) else {
            return false;
        };
        let Some(value) = self.variables.value(&key) else {
            var.value = std::ptr::null();
            return false;
        };
        let Ok(value) = CString::new(value) else {
            return false;
        };
        let value = self.returned_values.entry(key).insert_entry(value);
        var.value = value.get().as_ptr();
        // reading an option consumes the pending update
        self.variables.take_updated();
        true
    }

    fn get_vfs_interface(info: &mut VfsInterfaceInfo) -> bool {
        if info.required_interface_version > abi::VFS_INTERFACE_VERSION {
            debug!(
                "Core wants VFS interface version {}, have {}",
                info.required_interface_version,
                abi::VFS_INTERFACE_VERSION
            );
            return false;
        }
        info.iface = &vfs::INTERFACE;
        true
    }

    fn set_variable(&mut self, var: &Variable) -> bool {
        // SAFETY: key and value are NUL-terminated strings owned by the core.
        let (key, value) = unsafe { (abi::string_from_ptr(var.key), abi::string_from_ptr(var.value)) };
        match (key, value) {
            (Some(key), Some(value)) => self.variables.set_value(&key, &value),
            _ => false,
        }
    }

    fn set_option_display(&mut self, display: &CoreOptionDisplay) -> bool {
        // SAFETY: the key is a NUL-terminated string owned by the core.
        match unsafe { abi::string_from_ptr(display.key) } {
            Some(key) => self.variables.set_visible(&key, display.visible),
            None => false,
        }
    }

    fn replace_variables(&mut self, vars: Vec<CoreVariable>) {
        self.returned_values.clear();
        self.variables.replace(vars);
    }
}

/// # Safety
/// `payload` must be null or point to a writable `T`.
unsafe fn write<T>(payload: Payload, value: T) -> bool {
    // SAFETY: upheld by the caller.
    match unsafe { payload.get::<T>() } {
        Some(slot) => {
            *slot = value;
            true
        }
        None => false,
    }
}

/// # Safety
/// `ptr` must be null or point to an array terminated by an entry with a null
/// description.
unsafe fn read_input_descriptors(mut ptr: *const InputDescriptor) -> Vec<ButtonDescriptor> {
    let mut out = Vec::new();
    if ptr.is_null() {
        return out;
    }
    loop {
        // SAFETY: `ptr` stays inside the terminated array.
        let desc = unsafe { &*ptr };
        // SAFETY: the description is NUL-terminated or null.
        let Some(description) = (unsafe { abi::string_from_ptr(desc.description) }) else {
            break;
        };
        out.push(ButtonDescriptor {
            port: desc.port,
            device: desc.device,
            index: desc.index,
            id: desc.id,
            description,
        });
        // SAFETY: the terminator has not been reached yet.
        ptr = unsafe { ptr.add(1) };
    }
    out
}

/// # Safety
/// `ptr` must be null or point to an array terminated by an entry with a null key.
unsafe fn read_legacy_variables(mut ptr: *const Variable) -> Vec<CoreVariable> {
    let mut out = Vec::new();
    if ptr.is_null() {
        return out;
    }
    loop {
        // SAFETY: `ptr` stays inside the terminated array.
        let var = unsafe { &*ptr };
        // SAFETY: key and value are NUL-terminated strings or null.
        let (key, value) = unsafe { (abi::string_from_ptr(var.key), abi::string_from_ptr(var.value)) };
        let Some(key) = key else {
            break;
        };
        match value.as_deref().and_then(|raw| CoreVariable::from_legacy(&key, raw)) {
            Some(parsed) => out.push(parsed),
            None => warn!("Ignoring malformed core variable {key}"),
        }
        // SAFETY: the terminator has not been reached yet.
        ptr = unsafe { ptr.add(1) };
    }
    out
}

/// Reads a definition table terminated by a null key. When `local` is given,
/// its descriptions and value labels replace the US ones key by key.
///
/// # Safety
/// Both pointers must be null or point to terminated definition arrays.
unsafe fn read_option_definitions(
    us: *const CoreOptionDefinition,
    local: Option<*const CoreOptionDefinition>,
) -> Vec<CoreVariable> {
    let mut localized: HashMap<String, &CoreOptionDefinition> = HashMap::new();
    if let Some(local) = local {
        // SAFETY: forwarded from the caller.
        for def in unsafe { definitions(local) } {
            // SAFETY: definitions() only yields entries with a non-null key.
            if let Some(key) = unsafe { abi::string_from_ptr(def.key) } {
                localized.insert(key, def);
            }
        }
    }

    let mut out = Vec::new();
    // SAFETY: forwarded from the caller.
    for def in unsafe { definitions(us) } {
        // SAFETY: every string in a definition is NUL-terminated or null.
        unsafe {
            let Some(key) = abi::string_from_ptr(def.key) else {
                continue;
            };
            let local_def = localized.get(&key).copied();
            let desc = local_def
                .and_then(|l| abi::string_from_ptr(l.desc))
                .or_else(|| abi::string_from_ptr(def.desc))
                .unwrap_or_default();
            let info = local_def
                .and_then(|l| abi::string_from_ptr(l.info))
                .or_else(|| abi::string_from_ptr(def.info))
                .unwrap_or_default();

            let mut options = Vec::new();
            for value in def.values.iter() {
                let Some(value_str) = abi::string_from_ptr(value.value) else {
                    break;
                };
                let local_label = local_def.and_then(|l| {
                    l.values
                        .iter()
                        .take_while(|v| !v.value.is_null())
                        .find(|v| abi::string_from_ptr(v.value).as_deref() == Some(value_str.as_str()))
                        .and_then(|v| abi::string_from_ptr(v.label))
                });
                let label = local_label
                    .or_else(|| abi::string_from_ptr(value.label))
                    .unwrap_or_default();
                options.push(VariableOption {
                    value: value_str,
                    label,
                });
            }
            let default_value = abi::string_from_ptr(def.default_value);
            out.push(CoreVariable::from_definition(
                &key,
                &desc,
                &info,
                options,
                default_value.as_deref(),
            ));
        }
    }
    out
}

/// # Safety
/// `ptr` must be null or point to an array terminated by a null key.
unsafe fn definitions<'a>(ptr: *const CoreOptionDefinition) -> Vec<&'a CoreOptionDefinition> {
    let mut out = Vec::new();
    if ptr.is_null() {
        return out;
    }
    let mut cursor = ptr;
    loop {
        // SAFETY: `cursor` stays inside the terminated array.
        let def = unsafe { &*cursor };
        if def.key.is_null() {
            break;
        }
        out.push(def);
        // SAFETY: the terminator has not been reached yet.
        cursor = unsafe { cursor.add(1) };
    }
    out
}
