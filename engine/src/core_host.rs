use crate::abi::{self, GameInfo, SystemAvInfo};
use crate::error::LoadError;
use libloading::Library;
use std::ffi::{c_char, c_uint, c_void};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Anything that can hand out raw entry-point addresses by name.
///
/// Implemented for a dynamically opened [`Library`] and for in-process symbol
/// tables, so both go through the same validation.
pub trait SymbolSource {
    fn symbol(&self, name: &'static str) -> Option<*const c_void>;
}

impl SymbolSource for Library {
    fn symbol(&self, name: &'static str) -> Option<*const c_void> {
        // SAFETY: the symbol is only read as an address here; it is typed later
        // against the libretro prototype of the same name.
        unsafe {
            self.get::<*const c_void>(name.as_bytes())
                .ok()
                .map(|sym| *sym)
        }
    }
}

impl<S: std::hash::BuildHasher> SymbolSource
    for std::collections::HashMap<&'static str, *const c_void, S>
{
    fn symbol(&self, name: &'static str) -> Option<*const c_void> {
        self.get(name).copied()
    }
}

macro_rules! core_api {
    ($($name:ident : $ty:ty),+ $(,)?) => {
        /// Entry points of a libretro core, all resolved or none.
        #[derive(Clone, Copy)]
        pub struct CoreApi {
            $(pub $name: $ty,)+
        }

        impl CoreApi {
            pub const SYMBOLS: &'static [&'static str] = &[$(stringify!($name)),+];

            pub fn resolve<S: SymbolSource + ?Sized>(source: &S) -> Result<Self, LoadError> {
                let mut missing = Vec::new();
                $(
                    let $name = source
                        .symbol(stringify!($name))
                        .filter(|ptr| !ptr.is_null());
                    if $name.is_none() {
                        missing.push(stringify!($name));
                    }
                )+
                let ($(Some($name),)+) = ($($name,)+) else {
                    return Err(LoadError::MissingSymbols(missing));
                };
                // SAFETY: every address was exported under its libretro name, so it
                // has the prototype declared for that name in `libretro.h`.
                unsafe {
                    Ok(Self {
                        $($name: std::mem::transmute::<*const c_void, $ty>($name),)+
                    })
                }
            }
        }
    };
}

core_api! {
    retro_init: unsafe extern "C" fn(),
    retro_deinit: unsafe extern "C" fn(),
    retro_set_environment: unsafe extern "C" fn(abi::EnvironmentFn),
    retro_set_video_refresh: unsafe extern "C" fn(abi::VideoRefreshFn),
    retro_set_audio_sample: unsafe extern "C" fn(abi::AudioSampleFn),
    retro_set_audio_sample_batch: unsafe extern "C" fn(abi::AudioSampleBatchFn),
    retro_set_input_poll: unsafe extern "C" fn(abi::InputPollFn),
    retro_set_input_state: unsafe extern "C" fn(abi::InputStateFn),
    retro_api_version: unsafe extern "C" fn() -> c_uint,
    retro_get_system_info: unsafe extern "C" fn(*mut abi::SystemInfo),
    retro_get_system_av_info: unsafe extern "C" fn(*mut SystemAvInfo),
    retro_set_controller_port_device: unsafe extern "C" fn(c_uint, c_uint),
    retro_reset: unsafe extern "C" fn(),
    retro_run: unsafe extern "C" fn(),
    retro_serialize_size: unsafe extern "C" fn() -> usize,
    retro_serialize: unsafe extern "C" fn(*mut c_void, usize) -> bool,
    retro_unserialize: unsafe extern "C" fn(*const c_void, usize) -> bool,
    retro_cheat_reset: unsafe extern "C" fn(),
    retro_cheat_set: unsafe extern "C" fn(c_uint, bool, *const c_char),
    retro_load_game: unsafe extern "C" fn(*const GameInfo) -> bool,
    retro_load_game_special: unsafe extern "C" fn(c_uint, *const GameInfo, usize) -> bool,
    retro_unload_game: unsafe extern "C" fn(),
    retro_get_region: unsafe extern "C" fn() -> c_uint,
    retro_get_memory_data: unsafe extern "C" fn(c_uint) -> *mut c_void,
    retro_get_memory_size: unsafe extern "C" fn(c_uint) -> usize,
}

/// Static description a core reports about itself.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SystemInfo {
    pub library_name: String,
    pub library_version: String,
    pub valid_extensions: Vec<String>,
    pub need_fullpath: bool,
    pub block_extract: bool,
}

impl SystemInfo {
    fn query(api: &CoreApi) -> Self {
        let mut raw = abi::SystemInfo::default();
        // SAFETY: `raw` is a valid out-parameter; the core fills it with static strings.
        unsafe { (api.retro_get_system_info)(&mut raw) };
        // SAFETY: pointers came from the core and point to static storage.
        let (library_name, library_version, extensions) = unsafe {
            (
                abi::string_from_ptr(raw.library_name),
                abi::string_from_ptr(raw.library_version),
                abi::string_from_ptr(raw.valid_extensions),
            )
        };
        Self {
            library_name: library_name.unwrap_or_default(),
            library_version: library_version.unwrap_or_default(),
            valid_extensions: split_extensions(extensions.as_deref().unwrap_or_default()),
            need_fullpath: raw.need_fullpath,
            block_extract: raw.block_extract,
        }
    }

    pub fn supports_extension(&self, ext: &str) -> bool {
        self.valid_extensions
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(ext))
    }
}

pub fn split_extensions(list: &str) -> Vec<String> {
    list.split('|')
        .map(str::trim)
        .filter(|ext| !ext.is_empty())
        .map(|ext| ext.to_ascii_lowercase())
        .collect()
}

/// A loaded core: the library (when dynamically opened) plus its entry points.
pub struct CoreHost {
    path: PathBuf,
    api: CoreApi,
    system_info: SystemInfo,
    // Dropped last so no entry point outlives the mapping.
    library: Option<Library>,
}

impl fmt::Debug for CoreHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreHost")
            .field("path", &self.path)
            .field("system_info", &self.system_info)
            .field("dynamic", &self.library.is_some())
            .finish()
    }
}

impl CoreHost {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        // SAFETY: loading a core runs its static initializers; cores are trusted plugins.
        let library = unsafe { Library::new(path) }.map_err(|e| {
            error!("Failed to open core {}: {e}", path.display());
            LoadError::Open {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;
        let api = CoreApi::resolve(&library).inspect_err(|e| {
            error!("Rejecting core {}: {e}", path.display());
        })?;
        Self::finish(path, api, Some(library))
    }

    /// Builds a host over entry points that are already mapped into the process.
    pub fn from_symbols<S: SymbolSource + ?Sized>(
        path: impl AsRef<Path>,
        source: &S,
    ) -> Result<Self, LoadError> {
        let api = CoreApi::resolve(source)?;
        Self::finish(path.as_ref(), api, None)
    }

    fn finish(path: &Path, api: CoreApi, library: Option<Library>) -> Result<Self, LoadError> {
        // SAFETY: resolved entry point with no arguments.
        let version = unsafe { (api.retro_api_version)() };
        if version != abi::RETRO_API_VERSION {
            error!(
                "Core {} uses API version {version}, expected {}",
                path.display(),
                abi::RETRO_API_VERSION
            );
            return Err(LoadError::ApiVersion {
                found: version,
                expected: abi::RETRO_API_VERSION,
            });
        }
        let system_info = SystemInfo::query(&api);
        info!(
            "Loaded core {} {} from {}",
            system_info.library_name,
            system_info.library_version,
            path.display()
        );
        Ok(Self {
            path: path.to_path_buf(),
            api,
            system_info,
            library,
        })
    }

    pub fn api(&self) -> &CoreApi {
        &self.api
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn system_info(&self) -> &SystemInfo {
        &self.system_info
    }

    /// Lowercased library name, naming the per-core save directory and option
    /// file. Cores reporting no name fall back to the library's file stem.
    pub fn name(&self) -> String {
        let name = self.system_info.library_name.trim().to_lowercase();
        if !name.is_empty() {
            return name.replace(['/', '\\'], "_");
        }
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "core".to_string())
    }

    pub fn unload(self) {
        info!("Unloading core {}", self.path.display());
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn symbol_list_covers_whole_abi() {
        assert_eq!(CoreApi::SYMBOLS.len(), 25);
        assert!(CoreApi::SYMBOLS.contains(&"retro_run"));
        assert!(CoreApi::SYMBOLS.contains(&"retro_get_memory_size"));
    }

    #[test]
    fn empty_table_reports_every_symbol() {
        let table: HashMap<&'static str, *const c_void> = HashMap::new();
        let Err(LoadError::MissingSymbols(missing)) = CoreApi::resolve(&table) else {
            panic!("empty table must not resolve");
        };
        assert_eq!(missing, CoreApi::SYMBOLS);
    }

    #[test]
    fn null_address_counts_as_missing() {
        let table = HashMap::from([("retro_init", std::ptr::null::<c_void>())]);
        let Err(LoadError::MissingSymbols(missing)) = CoreApi::resolve(&table) else {
            panic!("null symbols must not resolve");
        };
        assert!(missing.contains(&"retro_init"));
    }

    #[test]
    fn open_failure_is_typed() {
        let err = CoreHost::load("/nonexistent/core_libretro.so").unwrap_err();
        assert!(matches!(err, LoadError::Open { .. }));
    }

    #[test]
    fn extensions_are_split_and_normalized() {
        assert_eq!(
            split_extensions("smc|SFC| swc ||fig"),
            vec!["smc", "sfc", "swc", "fig"]
        );
        let info = SystemInfo {
            valid_extensions: split_extensions("gb|gbc"),
            ..SystemInfo::default()
        };
        assert!(info.supports_extension("GBC"));
        assert!(!info.supports_extension("nes"));
    }
}
