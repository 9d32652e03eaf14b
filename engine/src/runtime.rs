use crate::abi::{self, GameInfo, SystemAvInfo};
use crate::backend::{AudioOutput, InputBackend, NullAudio, NullInput, NullVideo, VideoBackend};
use crate::callbacks::{self, Frontend};
use crate::core_host::{CoreApi, CoreHost};
use crate::environment::{EnvironmentConfig, EnvironmentDispatcher};
use crate::error::RuntimeError;
use crate::save::{MemorySaveStore, SaveKind, SaveMemoryRegion, SaveStore};
use crate::throttle::FrameThrottle;
use std::ffi::{CString, c_void};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

pub const DEFAULT_SAVE_CHECK_FRAMES: u32 = 600;
const LOADED_MESSAGE_SECONDS: f64 = 5.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverState {
    Unloaded,
    CoreLoaded,
    Initialized,
    GameLoaded,
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub system_dir: Option<PathBuf>,
    pub save_dir: Option<PathBuf>,
    pub core_assets_dir: Option<PathBuf>,
    /// Directory of per-core option files (`<core>.json`).
    pub core_options_dir: Option<PathBuf>,
    pub username: Option<String>,
    pub mono_audio: bool,
    /// Fixed output rate; 0 selects the integer divider.
    pub sample_rate: u32,
    /// Frames between save memory checks; 0 disables periodic checks.
    pub save_check_frames: u32,
    pub throttle: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            system_dir: None,
            save_dir: None,
            core_assets_dir: None,
            core_options_dir: None,
            username: None,
            mono_audio: false,
            sample_rate: 0,
            save_check_frames: DEFAULT_SAVE_CHECK_FRAMES,
            throttle: true,
        }
    }
}

impl RuntimeConfig {
    /// Lays out `system/`, `saves/` and `cores/` under one store directory.
    pub fn with_store_dir(store_dir: &Path) -> Self {
        Self {
            system_dir: Some(store_dir.join("system")),
            save_dir: Some(store_dir.join("saves")),
            core_options_dir: Some(store_dir.join("cores")),
            ..Self::default()
        }
    }
}

/// Cloneable stop request, checked between frames.
#[derive(Clone, Debug, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Backends {
    pub video: Box<dyn VideoBackend>,
    pub input: Box<dyn InputBackend>,
    pub audio: Box<dyn AudioOutput>,
    pub store: Box<dyn SaveStore>,
}

impl Backends {
    /// Discards video, input and audio; keeps saves in memory.
    pub fn null() -> Self {
        Self {
            video: Box::new(NullVideo::default()),
            input: Box::new(NullInput),
            audio: Box::new(NullAudio),
            store: Box::new(MemorySaveStore::new()),
        }
    }
}

/// Owns at most one core and drives it through its lifecycle.
pub struct DriverRuntime {
    state: DriverState,
    config: RuntimeConfig,
    core: Option<CoreHost>,
    frontend: Frontend,
    audio_output: Box<dyn AudioOutput>,
    store: Box<dyn SaveStore>,
    throttle: FrameThrottle,
    saves: Vec<SaveMemoryRegion>,
    frames_since_check: u32,
    shutdown: ShutdownHandle,
    content_path: Option<CString>,
    // the core may keep pointing into this until the game is unloaded
    content_data: Option<Vec<u8>>,
    frames: u64,
}

impl std::fmt::Debug for DriverRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRuntime")
            .field("state", &self.state)
            .field("core", &self.core)
            .field("frames", &self.frames)
            .finish_non_exhaustive()
    }
}

impl DriverRuntime {
    pub fn new(config: RuntimeConfig, backends: Backends) -> Self {
        let env = EnvironmentDispatcher::new(EnvironmentConfig {
            system_dir: config.system_dir.clone(),
            save_dir: config.save_dir.clone(),
            core_assets_dir: config.core_assets_dir.clone(),
            libretro_path: None,
            username: config.username.clone(),
            language: abi::LANGUAGE_ENGLISH,
        });
        Self {
            state: DriverState::Unloaded,
            config,
            core: None,
            frontend: Frontend::new(env, backends.video, backends.input),
            audio_output: backends.audio,
            store: backends.store,
            throttle: FrameThrottle::default(),
            saves: Vec::new(),
            frames_since_check: 0,
            shutdown: ShutdownHandle::default(),
            content_path: None,
            content_data: None,
            frames: 0,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn core(&self) -> Option<&CoreHost> {
        self.core.as_ref()
    }

    pub fn frontend(&self) -> &Frontend {
        &self.frontend
    }

    pub fn frontend_mut(&mut self) -> &mut Frontend {
        &mut self.frontend
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn av_info(&self) -> SystemAvInfo {
        self.frontend.env.av_info()
    }

    /// Frames run since the current game was loaded.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn save_regions(&self) -> &[SaveMemoryRegion] {
        &self.saves
    }

    fn require(&self, op: &'static str, allowed: &[DriverState]) -> Result<(), RuntimeError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(RuntimeError::InvalidState {
                op,
                state: self.state,
            })
        }
    }

    /// Calls into the core with the callback context installed.
    fn with_core<R>(&mut self, op: &'static str, f: impl FnOnce(&CoreApi) -> R) -> Result<R, RuntimeError> {
        let Some(core) = self.core.as_ref() else {
            return Err(RuntimeError::InvalidState {
                op,
                state: self.state,
            });
        };
        let api = *core.api();
        Ok(callbacks::scoped(&mut self.frontend, || f(&api)))
    }

    pub fn load_core(&mut self, path: impl AsRef<Path>) -> Result<(), RuntimeError> {
        self.require("load core", &[DriverState::Unloaded])?;
        let host = CoreHost::load(path)?;
        self.attach_core(host)
    }

    /// Takes ownership of an already loaded core.
    pub fn attach_core(&mut self, host: CoreHost) -> Result<(), RuntimeError> {
        self.require("load core", &[DriverState::Unloaded])?;
        self.core = Some(host);
        self.state = DriverState::CoreLoaded;
        Ok(())
    }

    fn core_options_path(&self) -> Option<PathBuf> {
        let dir = self.config.core_options_dir.as_ref()?;
        let core = self.core.as_ref()?;
        Some(dir.join(format!("{}.json", core.name())))
    }

    /// `<save_dir>/<core name>`, shared by save files and the core itself.
    pub fn core_save_dir(&self) -> Option<PathBuf> {
        let dir = self.config.save_dir.as_ref()?;
        let core = self.core.as_ref()?;
        Some(dir.join(core.name()))
    }

    pub fn init(&mut self) -> Result<(), RuntimeError> {
        self.require("init", &[DriverState::CoreLoaded])?;
        let mut env_config = self.frontend.env.config().clone();
        env_config.libretro_path = self.core.as_ref().map(|c| c.path().to_path_buf());
        env_config.save_dir = self.core_save_dir();
        if let Some(dir) = &env_config.save_dir
            && let Err(e) = self.store.create_dir(dir)
        {
            warn!("{e}");
        }
        self.frontend.env.reset();
        self.frontend.env.configure(env_config);
        if let Some(path) = self.core_options_path()
            && let Err(e) = self.frontend.env.variables_mut().load_overrides(&path)
        {
            warn!("{e}");
        }

        self.with_core("init", |api| {
            // SAFETY: resolved entry points; the environment callback has to be
            // in place before retro_init, the others only after it.
            unsafe {
                (api.retro_set_environment)(callbacks::environment);
                (api.retro_init)();
                (api.retro_set_video_refresh)(callbacks::video_refresh);
                (api.retro_set_audio_sample)(callbacks::audio_sample);
                (api.retro_set_audio_sample_batch)(callbacks::audio_sample_batch);
                (api.retro_set_input_poll)(callbacks::input_poll);
                (api.retro_set_input_state)(callbacks::input_state);
            }
        })?;
        self.state = DriverState::Initialized;
        info!("Core initialized");
        Ok(())
    }

    /// Loads content from disk. Cores that need the full path only get the path.
    pub fn load_game(&mut self, path: impl AsRef<Path>) -> Result<(), RuntimeError> {
        self.require("load game", &[DriverState::Initialized])?;
        let path = path.as_ref();
        let need_fullpath = self
            .core
            .as_ref()
            .is_some_and(|c| c.system_info().need_fullpath);
        let data = if need_fullpath {
            None
        } else {
            Some(std::fs::read(path).map_err(|source| RuntimeError::Content {
                path: path.to_path_buf(),
                source,
            })?)
        };
        self.load_content(path, data)
    }

    /// Loads content supplied by the caller; `path` names it for the core
    /// and for save files.
    pub fn load_game_from_memory(
        &mut self,
        path: impl AsRef<Path>,
        data: Vec<u8>,
    ) -> Result<(), RuntimeError> {
        self.require("load game", &[DriverState::Initialized])?;
        self.load_content(path.as_ref(), Some(data))
    }

    fn load_content(&mut self, path: &Path, data: Option<Vec<u8>>) -> Result<(), RuntimeError> {
        let c_path = CString::new(path.to_string_lossy().as_bytes())
            .map_err(|_| RuntimeError::InvalidPath(path.to_path_buf()))?;
        let info = GameInfo {
            path: c_path.as_ptr(),
            data: data
                .as_ref()
                .map_or(std::ptr::null(), |d| d.as_ptr() as *const c_void),
            size: data.as_ref().map_or(0, Vec::len),
            meta: std::ptr::null(),
        };
        // SAFETY: `info` and the buffers it points to outlive the call; the
        // buffers are kept until the game is unloaded.
        let loaded = self.with_core("load game", |api| unsafe { (api.retro_load_game)(&info) })?;
        if !loaded {
            error!("Core rejected {}", path.display());
            return Err(RuntimeError::GameRejected(path.to_path_buf()));
        }
        self.content_path = Some(c_path);
        self.content_data = data;

        self.saves.clear();
        if let (Some(save_dir), Some(core)) = (self.config.save_dir.as_ref(), self.core.as_ref()) {
            let core_name = core.name();
            for kind in [SaveKind::SaveRam, SaveKind::Rtc] {
                self.saves
                    .push(SaveMemoryRegion::for_content(kind, save_dir, &core_name, path));
            }
        }
        self.restore_saves();

        let mut av_info = SystemAvInfo::default();
        // SAFETY: `av_info` is a valid out-parameter.
        self.with_core("load game", |api| unsafe {
            (api.retro_get_system_av_info)(&mut av_info);
            (api.retro_set_controller_port_device)(0, abi::DEVICE_JOYPAD);
        })?;
        self.frontend.env.set_av_info(av_info);
        self.frontend.input.set_port_device(0, abi::DEVICE_JOYPAD);
        self.start_av(av_info);

        let format = self.frontend.env.pixel_format();
        self.frontend.video.resolution_changed(
            av_info.geometry.base_width,
            av_info.geometry.base_height,
            format,
        );
        let name = self
            .core
            .as_ref()
            .map(|c| c.system_info().library_name.clone())
            .unwrap_or_default();
        let frames = (av_info.timing.fps * LOADED_MESSAGE_SECONDS).round() as u32;
        self.frontend.env.push_message(format!("Loaded core: {name}"), frames);

        self.frames = 0;
        self.frames_since_check = 0;
        self.state = DriverState::GameLoaded;
        info!(
            "Loaded {} ({}x{}, {:.3} fps, {} Hz)",
            path.display(),
            av_info.geometry.base_width,
            av_info.geometry.base_height,
            av_info.timing.fps,
            av_info.timing.sample_rate
        );
        Ok(())
    }

    fn start_av(&mut self, av_info: SystemAvInfo) {
        self.audio_output.close();
        let format = self.frontend.audio.start(
            self.config.mono_audio,
            av_info.timing.sample_rate,
            self.config.sample_rate,
            av_info.timing.fps,
        );
        match self.audio_output.open(format, self.frontend.audio.reader()) {
            Ok(()) => self.audio_output.pause(false),
            Err(e) => warn!("Failed to open audio output: {e}"),
        }
        self.throttle.reset(av_info.timing.fps);
    }

    fn memory_region(&self, kind: SaveKind) -> Option<(*mut u8, usize)> {
        let api = self.core.as_ref()?.api();
        // SAFETY: plain queries on resolved entry points.
        let (ptr, len) = unsafe {
            (
                (api.retro_get_memory_data)(kind.memory_id()),
                (api.retro_get_memory_size)(kind.memory_id()),
            )
        };
        (!ptr.is_null() && len > 0).then_some((ptr as *mut u8, len))
    }

    fn restore_saves(&mut self) {
        let regions: Vec<_> = self
            .saves
            .iter()
            .map(|r| self.memory_region(r.kind()))
            .collect();
        for (region, memory) in self.saves.iter_mut().zip(regions) {
            let Some((ptr, len)) = memory else {
                continue;
            };
            // SAFETY: the core owns `len` bytes at `ptr` while the game is loaded.
            let memory = unsafe { std::slice::from_raw_parts_mut(ptr, len) };
            region.restore(self.store.as_ref(), memory);
        }
    }

    /// Persists save memory that changed since the last write. Returns the
    /// number of files written.
    pub fn sync_saves(&mut self) -> usize {
        let regions: Vec<_> = self
            .saves
            .iter()
            .map(|r| self.memory_region(r.kind()))
            .collect();
        let mut written = 0;
        for (region, memory) in self.saves.iter_mut().zip(regions) {
            let Some((ptr, len)) = memory else {
                continue;
            };
            // SAFETY: the core owns `len` bytes at `ptr` while the game is loaded.
            let memory = unsafe { std::slice::from_raw_parts(ptr as *const u8, len) };
            if region.sync(self.store.as_ref(), memory) {
                written += 1;
            }
        }
        written
    }

    /// Runs exactly one frame.
    pub fn run_frame(&mut self) -> Result<(), RuntimeError> {
        self.require("run", &[DriverState::GameLoaded, DriverState::Running])?;
        self.state = DriverState::Running;
        self.step()
    }

    fn step(&mut self) -> Result<(), RuntimeError> {
        if !self.config.throttle {
            self.throttle.skip_check();
        } else if !self.throttle.wait() {
            self.frontend.video.skip_next_frame();
        }
        // SAFETY: resolved entry point; callbacks are installed.
        self.with_core("run", |api| unsafe { (api.retro_run)() })?;
        self.frontend.flush_messages();
        if let Some(av_info) = self.frontend.env.take_av_change() {
            self.start_av(av_info);
        }
        self.frames += 1;

        let interval = self.config.save_check_frames;
        if interval > 0 {
            self.frames_since_check += 1;
            if self.frames_since_check >= interval {
                self.frames_since_check = 0;
                debug!("Checking save memory at frame {}", self.frames);
                self.sync_saves();
            }
        }
        Ok(())
    }

    fn should_stop(&self) -> bool {
        self.shutdown.is_requested() || self.frontend.env.shutdown_requested()
    }

    /// Runs frames until `should_quit` returns true or a shutdown is requested.
    /// Both are checked between frames. Returns the number of frames run;
    /// without a loaded game nothing runs.
    pub fn run(&mut self, mut should_quit: impl FnMut(u64) -> bool) -> u64 {
        if self
            .require("run", &[DriverState::GameLoaded, DriverState::Running])
            .is_err()
        {
            return 0;
        }
        self.state = DriverState::Running;
        let mut frames = 0;
        while !self.should_stop() && !should_quit(frames) {
            if let Err(e) = self.step() {
                error!("{e}");
                break;
            }
            frames += 1;
        }
        frames
    }

    pub fn reset(&mut self) -> Result<(), RuntimeError> {
        self.require("reset", &[DriverState::GameLoaded, DriverState::Running])?;
        // SAFETY: resolved entry point.
        self.with_core("reset", |api| unsafe { (api.retro_reset)() })?;
        self.frontend.audio.reset();
        self.throttle.reset(self.av_info().timing.fps);
        Ok(())
    }

    pub fn serialize(&mut self) -> Result<Vec<u8>, RuntimeError> {
        self.require("serialize", &[DriverState::GameLoaded, DriverState::Running])?;
        self.with_core("serialize", |api| {
            // SAFETY: the buffer is exactly the size the core asked for.
            unsafe {
                let size = (api.retro_serialize_size)();
                let mut buf = vec![0u8; size];
                (api.retro_serialize)(buf.as_mut_ptr() as *mut c_void, size).then_some(buf)
            }
        })?
        .ok_or(RuntimeError::CoreCall("serialize"))
    }

    pub fn unserialize(&mut self, state: &[u8]) -> Result<(), RuntimeError> {
        self.require("unserialize", &[DriverState::GameLoaded, DriverState::Running])?;
        // SAFETY: `state` is valid for reads of its length.
        let ok = self.with_core("unserialize", |api| unsafe {
            (api.retro_unserialize)(state.as_ptr() as *const c_void, state.len())
        })?;
        if ok {
            Ok(())
        } else {
            Err(RuntimeError::CoreCall("unserialize"))
        }
    }

    pub fn cheat_reset(&mut self) -> Result<(), RuntimeError> {
        self.require("reset cheats", &[DriverState::GameLoaded, DriverState::Running])?;
        // SAFETY: resolved entry point.
        self.with_core("reset cheats", |api| unsafe { (api.retro_cheat_reset)() })
    }

    pub fn cheat_set(&mut self, index: u32, enabled: bool, code: &str) -> Result<(), RuntimeError> {
        self.require("set cheat", &[DriverState::GameLoaded, DriverState::Running])?;
        let code = CString::new(code).map_err(|_| RuntimeError::CoreCall("set cheat"))?;
        // SAFETY: `code` outlives the call.
        self.with_core("set cheat", |api| unsafe {
            (api.retro_cheat_set)(index, enabled, code.as_ptr())
        })
    }

    pub fn set_controller_port_device(&mut self, port: u32, device: u32) -> Result<(), RuntimeError> {
        self.require(
            "set controller",
            &[
                DriverState::Initialized,
                DriverState::GameLoaded,
                DriverState::Running,
            ],
        )?;
        // SAFETY: resolved entry point.
        self.with_core("set controller", |api| unsafe {
            (api.retro_set_controller_port_device)(port, device)
        })?;
        self.frontend.input.set_port_device(port as usize, device);
        Ok(())
    }

    pub fn region(&mut self) -> Result<u32, RuntimeError> {
        self.require("query region", &[DriverState::GameLoaded, DriverState::Running])?;
        // SAFETY: resolved entry point.
        self.with_core("query region", |api| unsafe { (api.retro_get_region)() })
    }

    fn save_core_options(&mut self) {
        let Some(path) = self.core_options_path() else {
            return;
        };
        if self.frontend.env.variables().is_empty() {
            return;
        }
        if let Err(e) = self.frontend.env.variables_mut().save(&path) {
            warn!("{e}");
        }
    }

    pub fn unload_game(&mut self) -> Result<(), RuntimeError> {
        self.require("unload game", &[DriverState::GameLoaded, DriverState::Running])?;
        self.sync_saves();
        self.save_core_options();
        // SAFETY: resolved entry point.
        self.with_core("unload game", |api| unsafe { (api.retro_unload_game)() })?;
        self.audio_output.pause(true);
        self.audio_output.close();
        self.frontend.audio.stop();
        self.saves.clear();
        self.content_path = None;
        self.content_data = None;
        self.state = DriverState::Initialized;
        info!("Game unloaded after {} frame(s)", self.frames);
        Ok(())
    }

    pub fn deinit(&mut self) -> Result<(), RuntimeError> {
        self.require("deinit", &[DriverState::Initialized])?;
        self.save_core_options();
        // SAFETY: resolved entry point.
        self.with_core("deinit", |api| unsafe { (api.retro_deinit)() })?;
        self.frontend.env.reset();
        self.state = DriverState::CoreLoaded;
        Ok(())
    }

    pub fn unload(&mut self) -> Result<(), RuntimeError> {
        self.require("unload core", &[DriverState::CoreLoaded])?;
        if let Some(core) = self.core.take() {
            core.unload();
        }
        self.state = DriverState::Unloaded;
        Ok(())
    }

    /// Walks back down to `Unloaded` from whatever state the runtime is in.
    pub fn shutdown(&mut self) {
        let steps: [(DriverState, fn(&mut Self) -> Result<(), RuntimeError>); 4] = [
            (DriverState::Running, Self::unload_game),
            (DriverState::GameLoaded, Self::unload_game),
            (DriverState::Initialized, Self::deinit),
            (DriverState::CoreLoaded, Self::unload),
        ];
        for (state, step) in steps {
            if self.state == state
                && let Err(e) = step(self)
            {
                error!("{e}");
            }
        }
    }
}

impl Drop for DriverRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
