use crate::core_host::CoreHost;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// What a core reported about itself when it was scanned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreInfo {
    pub path: PathBuf,
    pub name: String,
    pub version: String,
    pub extensions: Vec<String>,
    pub need_fullpath: bool,
}

impl CoreInfo {
    pub fn from_host(host: &CoreHost) -> Self {
        let info = host.system_info();
        Self {
            path: host.path().to_path_buf(),
            name: info.library_name.clone(),
            version: info.library_version.clone(),
            extensions: info.valid_extensions.clone(),
            need_fullpath: info.need_fullpath,
        }
    }

    pub fn supports(&self, content: &Path) -> bool {
        content.extension().is_some_and(|ext| {
            let ext = ext.to_string_lossy();
            self.extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext))
        })
    }
}

/// Scans `roots` (and `LIBRETRO_PATH`) for loadable cores.
pub fn list_cores(extra_roots: &[PathBuf]) -> Vec<CoreInfo> {
    let mut roots = extra_roots.to_vec();
    if let Ok(extra) = std::env::var("LIBRETRO_PATH") {
        for p in std::env::split_paths(&extra) {
            if !p.as_os_str().is_empty() {
                roots.push(p);
            }
        }
    }
    roots.extend(default_search_roots());

    let mut out = Vec::new();
    for root in roots {
        collect_cores(&root, &mut out);
    }
    out.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    out.dedup_by(|a, b| a.path == b.path);
    out
}

fn is_core_library(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(std::env::consts::DLL_EXTENSION))
}

fn collect_cores(root: &Path, out: &mut Vec<CoreInfo>) {
    let Ok(entries) = std::fs::read_dir(root) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(ft) = entry.file_type() else {
            continue;
        };

        if ft.is_dir() {
            collect_cores(&path, out);
            continue;
        }

        if !is_core_library(&path) {
            continue;
        }
        match CoreHost::load(&path) {
            Ok(host) => {
                let info = CoreInfo::from_host(&host);
                debug!(
                    "Found core {} ({}) supporting {}",
                    info.name,
                    path.display(),
                    info.extensions.join("|")
                );
                out.push(info);
                host.unload();
            }
            Err(e) => warn!("Skipping {}: {e}", path.display()),
        }
    }
}

/// First core, in order, that accepts the content's extension.
pub fn find_core_for<'a>(content: &Path, cores: &'a [CoreInfo]) -> Option<&'a CoreInfo> {
    cores.iter().find(|core| core.supports(content))
}

pub fn default_search_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();

    #[cfg(target_os = "windows")]
    {
        roots.push(PathBuf::from(r"C:\RetroArch-Win64\cores"));
    }

    #[cfg(target_os = "macos")]
    {
        roots.push(PathBuf::from(format!(
            "{}/Library/Application Support/RetroArch/cores",
            home_dir()
        )));
    }

    #[cfg(any(target_os = "linux", target_os = "freebsd", target_os = "openbsd"))]
    {
        roots.push(PathBuf::from("/usr/lib/libretro"));
        roots.push(PathBuf::from("/usr/local/lib/libretro"));
        roots.push(PathBuf::from(format!("{}/.config/retroarch/cores", home_dir())));
    }

    roots
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_default()
}
