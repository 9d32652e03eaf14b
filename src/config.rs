use retrorun_engine::RuntimeConfig;
use retrorun_engine::runtime::DEFAULT_SAVE_CHECK_FRAMES;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "retrorun.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root for saves, system files, core options and the input map.
    pub store_dir: PathBuf,
    /// Extra directories searched for cores.
    pub core_dirs: Vec<PathBuf>,
    pub mono_audio: bool,
    /// Fixed output rate; 0 divides the core rate by an integer instead.
    pub sample_rate: u32,
    pub save_check_frames: u32,
    pub throttle: bool,
    pub username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            core_dirs: Vec::new(),
            mono_audio: false,
            sample_rate: 0,
            save_check_frames: DEFAULT_SAVE_CHECK_FRAMES,
            throttle: true,
            username: None,
        }
    }
}

fn default_store_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".local/share/retrorun"),
        None => PathBuf::from("retrorun"),
    }
}

impl Config {
    /// Reads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn input_map_path(&self) -> PathBuf {
        self.store_dir.join("input.json")
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            username: self.username.clone(),
            mono_audio: self.mono_audio,
            sample_rate: self.sample_rate,
            save_check_frames: self.save_check_frames,
            throttle: self.throttle,
            ..RuntimeConfig::with_store_dir(&self.store_dir)
        }
    }
}
