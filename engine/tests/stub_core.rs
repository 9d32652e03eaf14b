//! Drives the runtime through an in-process core that exports all 25 entry
//! points from a symbol table instead of a shared library.

use retrorun_engine::abi::{self, PixelFormat, env};
use retrorun_engine::audio::{AudioFormat, AudioReader};
use retrorun_engine::backend::{AudioOutput, Frame, NullAudio, NullInput, NullVideo, VideoBackend};
use retrorun_engine::save::MemorySaveStore;
use retrorun_engine::{
    Backends, CoreApi, CoreHost, DriverRuntime, DriverState, LoadError, RuntimeConfig, RuntimeError,
};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::{CStr, c_char, c_uint, c_void};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const SAVE_RAM_SIZE: usize = 64;
const SAVE_PATH: &str = "/saves/stub/game.sav";
const AUDIO_FRAMES: usize = 735;

thread_local! {
    static ENVIRONMENT: Cell<Option<abi::EnvironmentFn>> = const { Cell::new(None) };
    static VIDEO: Cell<Option<abi::VideoRefreshFn>> = const { Cell::new(None) };
    static AUDIO_BATCH: Cell<Option<abi::AudioSampleBatchFn>> = const { Cell::new(None) };
    static POLL: Cell<Option<abi::InputPollFn>> = const { Cell::new(None) };
    static STATE: Cell<Option<abi::InputStateFn>> = const { Cell::new(None) };
    static CALLS: RefCell<Vec<&'static str>> = const { RefCell::new(Vec::new()) };
    static FRAMES: Cell<u32> = const { Cell::new(0) };
    static SHUTDOWN_AT: Cell<u32> = const { Cell::new(0) };
    static SAVE_RAM: RefCell<Vec<u8>> = const { RefCell::new(Vec::new()) };
    static LOADED_SIZE: Cell<usize> = const { Cell::new(0) };
    static SPEED: RefCell<Option<String>> = const { RefCell::new(None) };
    static BUTTONS: Cell<i16> = const { Cell::new(0) };
    static OPTION_UPDATES: RefCell<Vec<bool>> = const { RefCell::new(Vec::new()) };
    static MODE_CHANGE_AT: Cell<u32> = const { Cell::new(0) };
    static SAVE_DIR: RefCell<Option<String>> = const { RefCell::new(None) };
}

fn reset_stub() {
    ENVIRONMENT.set(None);
    VIDEO.set(None);
    AUDIO_BATCH.set(None);
    POLL.set(None);
    STATE.set(None);
    CALLS.with_borrow_mut(Vec::clear);
    FRAMES.set(0);
    SHUTDOWN_AT.set(0);
    SAVE_RAM.set(vec![0; SAVE_RAM_SIZE]);
    LOADED_SIZE.set(0);
    SPEED.set(None);
    BUTTONS.set(0);
    OPTION_UPDATES.with_borrow_mut(Vec::clear);
    MODE_CHANGE_AT.set(0);
    SAVE_DIR.set(None);
}

fn record(call: &'static str) {
    CALLS.with_borrow_mut(|calls| calls.push(call));
}

fn calls() -> Vec<&'static str> {
    CALLS.with_borrow(Clone::clone)
}

fn call_env(cmd: c_uint, data: *mut c_void) -> bool {
    match ENVIRONMENT.get() {
        Some(cb) => unsafe { cb(cmd, data) },
        None => false,
    }
}

unsafe extern "C" fn retro_init() {
    record(if ENVIRONMENT.get().is_some() && VIDEO.get().is_none() {
        "init:env-only"
    } else {
        "init:unexpected"
    });
    let mut format = PixelFormat::Xrgb8888 as c_uint;
    call_env(env::SET_PIXEL_FORMAT, &mut format as *mut c_uint as *mut c_void);
    let vars = [
        abi::Variable {
            key: c"stub_speed".as_ptr(),
            value: c"Emulation speed; normal|fast|slow".as_ptr(),
        },
        abi::Variable {
            key: std::ptr::null(),
            value: std::ptr::null(),
        },
    ];
    call_env(env::SET_VARIABLES, vars.as_ptr() as *mut c_void);

    let mut dir: *const c_char = std::ptr::null();
    if call_env(env::GET_SAVE_DIRECTORY, &mut dir as *mut *const c_char as *mut c_void) && !dir.is_null() {
        SAVE_DIR.set(Some(unsafe { CStr::from_ptr(dir) }.to_string_lossy().to_string()));
    }
}

unsafe extern "C" fn retro_deinit() {
    record("deinit");
}

unsafe extern "C" fn retro_set_environment(cb: abi::EnvironmentFn) {
    record("set_environment");
    ENVIRONMENT.set(Some(cb));
}

unsafe extern "C" fn retro_set_video_refresh(cb: abi::VideoRefreshFn) {
    VIDEO.set(Some(cb));
}

unsafe extern "C" fn retro_set_audio_sample(_cb: abi::AudioSampleFn) {}

unsafe extern "C" fn retro_set_audio_sample_batch(cb: abi::AudioSampleBatchFn) {
    AUDIO_BATCH.set(Some(cb));
}

unsafe extern "C" fn retro_set_input_poll(cb: abi::InputPollFn) {
    POLL.set(Some(cb));
}

unsafe extern "C" fn retro_set_input_state(cb: abi::InputStateFn) {
    record("set_input_state");
    STATE.set(Some(cb));
}

unsafe extern "C" fn retro_api_version() -> c_uint {
    abi::RETRO_API_VERSION
}

unsafe extern "C" fn retro_get_system_info(info: *mut abi::SystemInfo) {
    unsafe {
        *info = abi::SystemInfo {
            library_name: c"Stub".as_ptr(),
            library_version: c"1.0".as_ptr(),
            valid_extensions: c"bin|rom".as_ptr(),
            need_fullpath: false,
            block_extract: false,
        };
    }
}

unsafe extern "C" fn retro_get_system_av_info(info: *mut abi::SystemAvInfo) {
    unsafe {
        *info = abi::SystemAvInfo {
            geometry: abi::GameGeometry {
                base_width: 320,
                base_height: 240,
                max_width: 320,
                max_height: 240,
                aspect_ratio: 4.0 / 3.0,
            },
            timing: abi::SystemTiming {
                fps: 60.0,
                sample_rate: 44100.0,
            },
        };
    }
}

unsafe extern "C" fn retro_set_controller_port_device(_port: c_uint, _device: c_uint) {
    record("set_controller");
}

unsafe extern "C" fn retro_reset() {
    FRAMES.set(0);
}

unsafe extern "C" fn retro_run() {
    let frame = FRAMES.get() + 1;
    FRAMES.set(frame);

    if let Some(poll) = POLL.get() {
        unsafe { poll() };
    }
    if let Some(state) = STATE.get() {
        BUTTONS.set(unsafe { state(0, abi::DEVICE_JOYPAD, 0, abi::DEVICE_ID_JOYPAD_MASK) });
    }

    let mut updated = false;
    if call_env(env::GET_VARIABLE_UPDATE, &mut updated as *mut bool as *mut c_void) {
        OPTION_UPDATES.with_borrow_mut(|seen| seen.push(updated));
    }
    let mut var = abi::Variable {
        key: c"stub_speed".as_ptr(),
        value: std::ptr::null(),
    };
    if call_env(env::GET_VARIABLE, &mut var as *mut abi::Variable as *mut c_void) && !var.value.is_null() {
        let value = unsafe { CStr::from_ptr(var.value) }.to_string_lossy().to_string();
        SPEED.set(Some(value));
    }

    if frame == 10 {
        SAVE_RAM.with_borrow_mut(|ram| ram[0] = 0xAB);
    }

    if MODE_CHANGE_AT.get() == frame {
        let mut geometry = abi::GameGeometry {
            base_width: 256,
            base_height: 224,
            max_width: 320,
            max_height: 240,
            aspect_ratio: 8.0 / 7.0,
        };
        call_env(env::SET_GEOMETRY, &mut geometry as *mut abi::GameGeometry as *mut c_void);
        let mut format = PixelFormat::Rgb565 as c_uint;
        call_env(env::SET_PIXEL_FORMAT, &mut format as *mut c_uint as *mut c_void);
    }

    let pixels = [0u8; 320 * 4];
    if let Some(video) = VIDEO.get() {
        unsafe { video(pixels.as_ptr() as *const c_void, 320, 1, 320 * 4) };
    }
    let samples = [0i16; AUDIO_FRAMES * 2];
    if let Some(batch) = AUDIO_BATCH.get() {
        unsafe { batch(samples.as_ptr(), AUDIO_FRAMES) };
    }

    if SHUTDOWN_AT.get() == frame {
        call_env(env::SHUTDOWN, std::ptr::null_mut());
    }
}

unsafe extern "C" fn retro_serialize_size() -> usize {
    4
}

unsafe extern "C" fn retro_serialize(data: *mut c_void, size: usize) -> bool {
    if size < 4 {
        return false;
    }
    let bytes = FRAMES.get().to_le_bytes();
    unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), data as *mut u8, 4) };
    true
}

unsafe extern "C" fn retro_unserialize(data: *const c_void, size: usize) -> bool {
    if size != 4 {
        return false;
    }
    let mut bytes = [0u8; 4];
    unsafe { std::ptr::copy_nonoverlapping(data as *const u8, bytes.as_mut_ptr(), 4) };
    FRAMES.set(u32::from_le_bytes(bytes));
    true
}

unsafe extern "C" fn retro_cheat_reset() {
    record("cheat_reset");
}

unsafe extern "C" fn retro_cheat_set(_index: c_uint, _enabled: bool, _code: *const c_char) {
    record("cheat_set");
}

unsafe extern "C" fn retro_load_game(info: *const abi::GameInfo) -> bool {
    let Some(info) = (unsafe { info.as_ref() }) else {
        return false;
    };
    if info.data.is_null() || info.size == 0 {
        return false;
    }
    LOADED_SIZE.set(info.size);
    record("load_game");
    true
}

unsafe extern "C" fn retro_load_game_special(
    _kind: c_uint,
    _info: *const abi::GameInfo,
    _count: usize,
) -> bool {
    false
}

unsafe extern "C" fn retro_unload_game() {
    record("unload_game");
}

unsafe extern "C" fn retro_get_region() -> c_uint {
    abi::REGION_NTSC
}

unsafe extern "C" fn retro_get_memory_data(id: c_uint) -> *mut c_void {
    if id == abi::MEMORY_SAVE_RAM {
        SAVE_RAM.with_borrow_mut(|ram| ram.as_mut_ptr() as *mut c_void)
    } else {
        std::ptr::null_mut()
    }
}

unsafe extern "C" fn retro_get_memory_size(id: c_uint) -> usize {
    if id == abi::MEMORY_SAVE_RAM {
        SAVE_RAM_SIZE
    } else {
        0
    }
}

macro_rules! symbol_table {
    ($($name:ident),+ $(,)?) => {
        HashMap::from([$((stringify!($name), $name as *const c_void)),+])
    };
}

fn symbols() -> HashMap<&'static str, *const c_void> {
    symbol_table![
        retro_init,
        retro_deinit,
        retro_set_environment,
        retro_set_video_refresh,
        retro_set_audio_sample,
        retro_set_audio_sample_batch,
        retro_set_input_poll,
        retro_set_input_state,
        retro_api_version,
        retro_get_system_info,
        retro_get_system_av_info,
        retro_set_controller_port_device,
        retro_reset,
        retro_run,
        retro_serialize_size,
        retro_serialize,
        retro_unserialize,
        retro_cheat_reset,
        retro_cheat_set,
        retro_load_game,
        retro_load_game_special,
        retro_unload_game,
        retro_get_region,
        retro_get_memory_data,
        retro_get_memory_size,
    ]
}

fn stub_host() -> CoreHost {
    CoreHost::from_symbols("/cores/stub_libretro.so", &symbols()).unwrap()
}

fn config() -> RuntimeConfig {
    RuntimeConfig {
        save_dir: Some(PathBuf::from("/saves")),
        throttle: false,
        ..RuntimeConfig::default()
    }
}

fn runtime_with(config: RuntimeConfig, store: &MemorySaveStore) -> DriverRuntime {
    let backends = Backends {
        video: Box::new(NullVideo::default()),
        input: Box::new(NullInput),
        audio: Box::new(NullAudio),
        store: Box::new(store.clone()),
    };
    runtime_with_backends(config, backends)
}

fn runtime_with_backends(config: RuntimeConfig, backends: Backends) -> DriverRuntime {
    reset_stub();
    let mut runtime = DriverRuntime::new(config, backends);
    runtime.attach_core(stub_host()).unwrap();
    runtime
}

type Events = Arc<Mutex<Vec<String>>>;

fn events(log: &Events) -> Vec<String> {
    log.lock().unwrap().clone()
}

struct RecordingVideo(Events);

impl VideoBackend for RecordingVideo {
    fn resolution_changed(&mut self, width: u32, height: u32, format: PixelFormat) {
        self.0.lock().unwrap().push(format!("mode {width}x{height} {format:?}"));
    }

    fn render(&mut self, frame: Frame<'_>) {
        let event = match frame {
            Frame::Dupe => "dupe",
            Frame::Hardware { .. } => "hw",
            Frame::Pixels { .. } => "frame",
        };
        self.0.lock().unwrap().push(event.to_string());
    }

    fn set_message(&mut self, _text: &str, _frames: u32) {}

    fn skip_next_frame(&mut self) {
        self.0.lock().unwrap().push("skip".to_string());
    }
}

struct RecordingAudio(Events);

impl AudioOutput for RecordingAudio {
    fn open(&mut self, format: AudioFormat, _reader: AudioReader) -> Result<(), String> {
        self.0.lock().unwrap().push(format!("open {}", format.sample_rate));
        Ok(())
    }

    fn close(&mut self) {
        self.0.lock().unwrap().push("close".to_string());
    }

    fn pause(&mut self, paused: bool) {
        let event = if paused { "pause" } else { "resume" };
        self.0.lock().unwrap().push(event.to_string());
    }
}

fn recording(config: RuntimeConfig) -> (DriverRuntime, Events, Events) {
    let video = Events::default();
    let audio = Events::default();
    let backends = Backends {
        video: Box::new(RecordingVideo(video.clone())),
        input: Box::new(NullInput),
        audio: Box::new(RecordingAudio(audio.clone())),
        store: Box::new(MemorySaveStore::new()),
    };
    let mut runtime = runtime_with_backends(config, backends);
    runtime.init().unwrap();
    runtime
        .load_game_from_memory("/roms/game.bin", vec![1, 2, 3, 4])
        .unwrap();
    (runtime, video, audio)
}

fn running(store: &MemorySaveStore) -> DriverRuntime {
    let mut runtime = runtime_with(config(), store);
    runtime.init().unwrap();
    runtime
        .load_game_from_memory("/roms/game.bin", vec![1, 2, 3, 4])
        .unwrap();
    runtime
}

#[test]
fn full_symbol_table_loads() {
    let symbols = symbols();
    assert_eq!(symbols.len(), CoreApi::SYMBOLS.len());
    let host = CoreHost::from_symbols("/cores/stub_libretro.so", &symbols).unwrap();
    assert_eq!(host.system_info().library_name, "Stub");
    assert_eq!(host.system_info().valid_extensions, vec!["bin", "rom"]);
    assert_eq!(host.name(), "stub");
}

#[test]
fn missing_retro_run_rejects_core() {
    let mut symbols = symbols();
    symbols.remove("retro_run");
    match CoreHost::from_symbols("/cores/stub_libretro.so", &symbols) {
        Err(LoadError::MissingSymbols(missing)) => assert_eq!(missing, vec!["retro_run"]),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn lifecycle_advances_one_step_at_a_time() {
    let store = MemorySaveStore::new();
    let mut runtime = runtime_with(config(), &store);
    assert_eq!(runtime.state(), DriverState::CoreLoaded);

    let err = runtime.load_game_from_memory("/roms/game.bin", vec![1]).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::InvalidState {
            state: DriverState::CoreLoaded,
            ..
        }
    ));
    assert!(runtime.attach_core(stub_host()).is_err());
    assert_eq!(runtime.state(), DriverState::CoreLoaded);

    runtime.init().unwrap();
    assert_eq!(runtime.state(), DriverState::Initialized);
    assert!(runtime.init().is_err());
    assert!(runtime.run_frame().is_err());
    assert_eq!(runtime.run(|_| false), 0);

    runtime
        .load_game_from_memory("/roms/game.bin", vec![1, 2, 3, 4])
        .unwrap();
    assert_eq!(runtime.state(), DriverState::GameLoaded);
    assert_eq!(LOADED_SIZE.get(), 4);
    assert!(runtime.deinit().is_err());

    runtime.run_frame().unwrap();
    assert_eq!(runtime.state(), DriverState::Running);
    assert!(runtime.unload().is_err());

    runtime.unload_game().unwrap();
    assert_eq!(runtime.state(), DriverState::Initialized);
    runtime.deinit().unwrap();
    assert_eq!(runtime.state(), DriverState::CoreLoaded);
    runtime.unload().unwrap();
    assert_eq!(runtime.state(), DriverState::Unloaded);
    assert!(runtime.core().is_none());

    assert_eq!(
        calls(),
        vec![
            "set_environment",
            "init:env-only",
            "set_input_state",
            "load_game",
            "set_controller",
            "unload_game",
            "deinit",
        ]
    );
}

#[test]
fn unload_game_accepted_before_first_frame() {
    let store = MemorySaveStore::new();
    let mut runtime = running(&store);
    assert_eq!(runtime.state(), DriverState::GameLoaded);
    runtime.unload_game().unwrap();
    assert_eq!(runtime.state(), DriverState::Initialized);
}

#[test]
fn rejected_game_keeps_runtime_initialized() {
    let store = MemorySaveStore::new();
    let mut runtime = runtime_with(config(), &store);
    runtime.init().unwrap();
    let err = runtime.load_game_from_memory("/roms/empty.bin", Vec::new()).unwrap_err();
    assert!(matches!(err, RuntimeError::GameRejected(_)));
    assert_eq!(runtime.state(), DriverState::Initialized);
}

#[test]
fn environment_negotiated_during_init() {
    let store = MemorySaveStore::new();
    let mut runtime = runtime_with(config(), &store);
    runtime.init().unwrap();

    let env = &runtime.frontend().env;
    assert_eq!(env.pixel_format(), PixelFormat::Xrgb8888);
    assert_eq!(env.variables().value("stub_speed"), Some("normal"));
    assert!(env.variables().is_updated());

    runtime
        .load_game_from_memory("/roms/game.bin", vec![1, 2, 3, 4])
        .unwrap();
    runtime
        .frontend_mut()
        .env
        .variables_mut()
        .set_value("stub_speed", "fast");
    runtime.run_frame().unwrap();
    assert_eq!(SPEED.with_borrow(Clone::clone).as_deref(), Some("fast"));
}

#[test]
fn av_info_configures_audio_and_video() {
    let store = MemorySaveStore::new();
    let mut runtime = running(&store);
    let av = runtime.av_info();
    assert_eq!(av.geometry.base_width, 320);
    assert_eq!(av.timing.fps, 60.0);

    let format = runtime.frontend().audio.format().unwrap();
    assert_eq!(format.sample_rate, 44100);
    assert_eq!(format.channels, 2);

    runtime.run_frame().unwrap();
    assert_eq!(runtime.frontend().audio.queued(), AUDIO_FRAMES * 2);
}

#[test]
fn stored_save_ram_is_restored_on_load() {
    let store = MemorySaveStore::new();
    store.insert(SAVE_PATH, vec![7, 8, 9]);
    let _runtime = running(&store);
    SAVE_RAM.with_borrow(|ram| {
        assert_eq!(&ram[..4], &[7, 8, 9, 0]);
        assert_eq!(ram.len(), SAVE_RAM_SIZE);
    });
}

#[test]
fn save_ram_persisted_on_check_interval() {
    let store = MemorySaveStore::new();
    let mut runtime = running(&store);

    assert_eq!(runtime.run(|frames| frames >= 599), 599);
    assert_eq!(store.writes(), 0);

    runtime.run_frame().unwrap();
    assert_eq!(store.writes(), 1);
    let saved = store.get(Path::new(SAVE_PATH)).unwrap();
    assert_eq!(saved.len(), SAVE_RAM_SIZE);
    assert_eq!(saved[0], 0xAB);

    // unchanged memory is not written again
    assert_eq!(runtime.run(|frames| frames >= 600), 600);
    assert_eq!(store.writes(), 1);
    runtime.unload_game().unwrap();
    assert_eq!(store.writes(), 1);
}

#[test]
fn save_ram_flushed_on_unload() {
    let store = MemorySaveStore::new();
    let mut runtime = running(&store);
    runtime.run(|frames| frames >= 20);
    assert_eq!(store.writes(), 0);
    runtime.unload_game().unwrap();
    assert_eq!(store.writes(), 1);
    assert_eq!(store.get(Path::new(SAVE_PATH)).unwrap()[0], 0xAB);
}

#[test]
fn shutdown_command_stops_run_loop() {
    let store = MemorySaveStore::new();
    let mut runtime = running(&store);
    SHUTDOWN_AT.set(5);
    assert_eq!(runtime.run(|_| false), 5);
    assert!(runtime.frontend().env.shutdown_requested());
}

#[test]
fn shutdown_handle_stops_run_loop() {
    let store = MemorySaveStore::new();
    let mut runtime = running(&store);
    let handle = runtime.shutdown_handle();
    handle.request();
    assert_eq!(runtime.run(|_| false), 0);
    handle.clear();
    assert_eq!(runtime.run(|frames| frames >= 3), 3);
}

#[test]
fn save_state_round_trip() {
    let store = MemorySaveStore::new();
    let mut runtime = running(&store);
    runtime.run(|frames| frames >= 3);
    let state = runtime.serialize().unwrap();
    assert_eq!(state, 3u32.to_le_bytes());

    runtime.run(|frames| frames >= 2);
    assert_eq!(FRAMES.get(), 5);
    runtime.unserialize(&state).unwrap();
    assert_eq!(FRAMES.get(), 3);
    assert!(matches!(
        runtime.unserialize(&[1, 2]),
        Err(RuntimeError::CoreCall("unserialize"))
    ));
}

#[test]
fn reset_cheats_and_region() {
    let store = MemorySaveStore::new();
    let mut runtime = running(&store);
    runtime.run(|frames| frames >= 4);
    runtime.reset().unwrap();
    assert_eq!(FRAMES.get(), 0);
    runtime.cheat_reset().unwrap();
    runtime.cheat_set(0, true, "ABCD-1234").unwrap();
    assert_eq!(runtime.region().unwrap(), abi::REGION_NTSC);
    let calls = calls();
    assert!(calls.contains(&"cheat_reset"));
    assert!(calls.contains(&"cheat_set"));
}

#[test]
fn joypad_state_reaches_core() {
    let store = MemorySaveStore::new();
    let mut runtime = running(&store);
    let input = &mut runtime.frontend_mut().input;
    input.install_default_keymap();
    input.on_input(
        retrorun_engine::input::PhysicalInput::keyboard(retrorun_engine::input::DEFAULT_KEYMAP[8]),
        true,
    );
    runtime.run_frame().unwrap();
    assert_eq!(BUTTONS.get(), 1 << abi::DEVICE_ID_JOYPAD_A);
}

#[test]
fn content_read_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let rom = dir.path().join("game.rom");
    std::fs::write(&rom, [0u8; 32]).unwrap();

    let store = MemorySaveStore::new();
    let mut runtime = runtime_with(config(), &store);
    runtime.init().unwrap();
    runtime.load_game(&rom).unwrap();
    assert_eq!(LOADED_SIZE.get(), 32);

    runtime.unload_game().unwrap();
    let err = runtime.load_game(dir.path().join("missing.rom")).unwrap_err();
    assert!(matches!(err, RuntimeError::Content { .. }));
    assert_eq!(runtime.state(), DriverState::Initialized);
}

#[test]
fn core_options_persist_across_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let config = RuntimeConfig {
        core_options_dir: Some(dir.path().to_path_buf()),
        ..config()
    };
    let store = MemorySaveStore::new();

    let mut runtime = runtime_with(config.clone(), &store);
    runtime.init().unwrap();
    runtime
        .frontend_mut()
        .env
        .variables_mut()
        .set_value("stub_speed", "slow");
    runtime.deinit().unwrap();
    runtime.unload().unwrap();
    assert!(dir.path().join("stub.json").exists());

    let mut runtime = runtime_with(config, &store);
    runtime.init().unwrap();
    assert_eq!(
        runtime.frontend().env.variables().value("stub_speed"),
        Some("slow")
    );
}

#[test]
fn option_update_consumed_when_core_reads_options() {
    let store = MemorySaveStore::new();
    let mut runtime = running(&store);
    assert!(runtime.frontend().env.variables().is_updated());

    runtime.run_frame().unwrap();
    assert!(!runtime.frontend().env.variables().is_updated());
    runtime.run_frame().unwrap();
    assert_eq!(OPTION_UPDATES.with_borrow(Clone::clone), vec![true, false]);

    runtime
        .frontend_mut()
        .env
        .variables_mut()
        .set_value("stub_speed", "slow");
    runtime.run_frame().unwrap();
    runtime.run_frame().unwrap();
    assert_eq!(
        OPTION_UPDATES.with_borrow(Clone::clone),
        vec![true, false, true, false]
    );
    assert_eq!(SPEED.with_borrow(Clone::clone).as_deref(), Some("slow"));
    assert!(!runtime.frontend().env.variables().is_updated());
}

#[test]
fn mid_session_mode_change_reaches_video_before_render() {
    let (mut runtime, video, _audio) = recording(config());
    MODE_CHANGE_AT.set(3);
    assert_eq!(runtime.run(|frames| frames >= 4), 4);
    assert_eq!(
        events(&video),
        vec![
            "mode 320x240 Xrgb8888",
            "frame",
            "frame",
            "mode 256x224 Rgb565",
            "frame",
            "frame",
        ]
    );
    let av = runtime.av_info();
    assert_eq!((av.geometry.base_width, av.geometry.base_height), (256, 224));
    assert_eq!(runtime.frontend().env.pixel_format(), PixelFormat::Rgb565);
}

#[test]
fn late_frame_hints_skip_and_audio_pauses_on_unload() {
    let config = RuntimeConfig {
        throttle: true,
        ..config()
    };
    let (mut runtime, video, audio) = recording(config);
    // pacing restarts at load, so the first frame is already due
    runtime.run_frame().unwrap();
    assert_eq!(events(&video), vec!["mode 320x240 Xrgb8888", "skip", "frame"]);

    runtime.unload_game().unwrap();
    assert_eq!(
        events(&audio),
        vec!["close", "open 44100", "resume", "pause", "close"]
    );
}

#[test]
fn unthrottled_frames_are_never_skipped() {
    let (mut runtime, video, _audio) = recording(config());
    runtime.run(|frames| frames >= 3);
    assert!(!events(&video).iter().any(|e| e == "skip"));
}

#[test]
fn save_directory_named_after_library() {
    let store = MemorySaveStore::new();
    let runtime = running(&store);
    assert_eq!(runtime.core_save_dir(), Some(PathBuf::from("/saves/stub")));
    assert_eq!(SAVE_DIR.with_borrow(Clone::clone).as_deref(), Some("/saves/stub"));
    assert_eq!(runtime.save_regions()[0].path(), Path::new(SAVE_PATH));
}
