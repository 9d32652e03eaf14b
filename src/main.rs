mod config;
mod headless;
mod logging;

use anyhow::{Context, Result, bail};
use clap::Parser;
use config::{CONFIG_FILE, Config};
use headless::{DrainingAudio, LogVideo};
use retrorun_engine::backend::NullInput;
use retrorun_engine::discovery;
use retrorun_engine::save::FsSaveStore;
use retrorun_engine::{Backends, DriverRuntime};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "retrorun")]
#[command(about = "Run a libretro core headless against a content file")]
struct Args {
    /// Content (ROM) to load
    content: PathBuf,

    /// Config file
    #[arg(long, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Core library; found by content extension when omitted
    #[arg(long)]
    core: Option<PathBuf>,

    /// Stop after this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// Run as fast as the core allows
    #[arg(long)]
    no_throttle: bool,

    /// Fold audio to one channel
    #[arg(long)]
    mono: bool,
}

fn resolve_core(args: &Args, config: &Config) -> Result<PathBuf> {
    if let Some(core) = &args.core {
        return Ok(core.clone());
    }
    let cores = discovery::list_cores(&config.core_dirs);
    match discovery::find_core_for(&args.content, &cores) {
        Some(core) => {
            info!("Using {} {} for {}", core.name, core.version, args.content.display());
            Ok(core.path.clone())
        }
        None => bail!(
            "no core among {} found supports {}",
            cores.len(),
            args.content.display()
        ),
    }
}

fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();

    let mut config = Config::load(&args.config)?;
    if args.no_throttle {
        config.throttle = false;
    }
    if args.mono {
        config.mono_audio = true;
    }
    let core_path = resolve_core(&args, &config)?;

    let video = LogVideo::new();
    let presented = video.frame_counter();
    let backends = Backends {
        video: Box::new(video),
        input: Box::new(NullInput),
        audio: Box::new(DrainingAudio::new()),
        store: Box::new(FsSaveStore),
    };
    let mut runtime = DriverRuntime::new(config.runtime_config(), backends);

    let input_map = config.input_map_path();
    if let Err(e) = runtime.frontend_mut().input.load_or_default(&input_map) {
        warn!("{e}");
    }

    runtime
        .load_core(&core_path)
        .with_context(|| format!("loading {}", core_path.display()))?;
    runtime.init()?;
    runtime
        .load_game(&args.content)
        .with_context(|| format!("loading {}", args.content.display()))?;

    let limit = args.frames;
    let frames = runtime.run(|n| limit.is_some_and(|limit| n >= limit));
    info!(
        "Ran {frames} frame(s), presented {}",
        presented.load(Ordering::Relaxed)
    );

    runtime.unload_game()?;
    runtime.deinit()?;
    runtime.unload()?;

    if let Err(e) = runtime.frontend().input.save(&input_map) {
        warn!("{e}");
    }
    Ok(())
}
