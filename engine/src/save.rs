use crate::error::StoreError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Blob persistence keyed by path.
pub trait SaveStore {
    /// `Ok(None)` when nothing was stored under `path` yet.
    fn load(&self, path: &Path) -> Result<Option<Vec<u8>>, StoreError>;
    fn store(&self, path: &Path, data: &[u8]) -> Result<(), StoreError>;

    /// Makes sure `dir` exists for cores that write into it themselves.
    fn create_dir(&self, _dir: &Path) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FsSaveStore;

impl SaveStore for FsSaveStore {
    fn load(&self, path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
        match std::fs::read(path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn store(&self, path: &Path, data: &[u8]) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, data).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn create_dir(&self, dir: &Path) -> Result<(), StoreError> {
        std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })
    }
}

/// In-memory store, shared by clones.
#[derive(Debug, Default, Clone)]
pub struct MemorySaveStore {
    blobs: Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>,
    writes: Arc<Mutex<usize>>,
}

impl MemorySaveStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<Vec<u8>> {
        self.blobs.lock().get(path).cloned()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, data: Vec<u8>) {
        self.blobs.lock().insert(path.into(), data);
    }

    /// Number of `store` calls so far.
    pub fn writes(&self) -> usize {
        *self.writes.lock()
    }
}

impl SaveStore for MemorySaveStore {
    fn load(&self, path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.get(path))
    }

    fn store(&self, path: &Path, data: &[u8]) -> Result<(), StoreError> {
        self.insert(path, data.to_vec());
        *self.writes.lock() += 1;
        Ok(())
    }
}

/// Which core memory a region mirrors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveKind {
    SaveRam,
    Rtc,
}

impl SaveKind {
    pub const fn memory_id(self) -> u32 {
        match self {
            SaveKind::SaveRam => crate::abi::MEMORY_SAVE_RAM,
            SaveKind::Rtc => crate::abi::MEMORY_RTC,
        }
    }

    pub const fn extension(self) -> &'static str {
        match self {
            SaveKind::SaveRam => "sav",
            SaveKind::Rtc => "rtc",
        }
    }
}

/// A core memory region mirrored to one file, written only when its bytes
/// differ from what was last persisted.
#[derive(Debug, Clone)]
pub struct SaveMemoryRegion {
    kind: SaveKind,
    path: PathBuf,
    snapshot: Vec<u8>,
}

impl SaveMemoryRegion {
    pub fn new(kind: SaveKind, path: PathBuf) -> Self {
        Self {
            kind,
            path,
            snapshot: Vec::new(),
        }
    }

    /// `<save_dir>/<core>/<content stem>.<sav|rtc>`
    pub fn for_content(kind: SaveKind, save_dir: &Path, core: &str, content: &Path) -> Self {
        let stem = content
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "content".to_string());
        let path = save_dir
            .join(core)
            .join(format!("{stem}.{}", kind.extension()));
        Self::new(kind, path)
    }

    pub fn kind(&self) -> SaveKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> &[u8] {
        &self.snapshot
    }

    /// Copies the stored blob into `memory`, clamped to the shorter of the
    /// two, and remembers it as the persisted state. Returns bytes copied.
    pub fn restore(&mut self, store: &dyn SaveStore, memory: &mut [u8]) -> usize {
        let data = match store.load(&self.path) {
            Ok(Some(data)) => data,
            Ok(None) => {
                self.snapshot = memory.to_vec();
                return 0;
            }
            Err(e) => {
                warn!("Failed to read {}: {e}", self.path.display());
                self.snapshot = memory.to_vec();
                return 0;
            }
        };
        let count = data.len().min(memory.len());
        memory[..count].copy_from_slice(&data[..count]);
        self.snapshot = memory.to_vec();
        debug!(
            "Restored {count} byte(s) of {:?} from {}",
            self.kind,
            self.path.display()
        );
        count
    }

    /// Persists `memory` if it differs from the last persisted copy. Store
    /// failures are logged and retried on the next check.
    pub fn sync(&mut self, store: &dyn SaveStore, memory: &[u8]) -> bool {
        if memory.is_empty() || memory == self.snapshot.as_slice() {
            trace!("{:?} unchanged", self.kind);
            return false;
        }
        match store.store(&self.path, memory) {
            Ok(()) => {
                self.snapshot.clear();
                self.snapshot.extend_from_slice(memory);
                debug!("Wrote {} byte(s) to {}", memory.len(), self.path.display());
                true
            }
            Err(e) => {
                warn!("Failed to write {}: {e}", self.path.display());
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_layout() {
        let region = SaveMemoryRegion::for_content(
            SaveKind::SaveRam,
            Path::new("/store/saves"),
            "snes9x",
            Path::new("/roms/Super Game.sfc"),
        );
        assert_eq!(region.path(), Path::new("/store/saves/snes9x/Super Game.sav"));
        let rtc = SaveMemoryRegion::for_content(SaveKind::Rtc, Path::new("s"), "c", Path::new("g.gb"));
        assert_eq!(rtc.path(), Path::new("s/c/g.rtc"));
    }

    #[test]
    fn restore_clamps_to_smaller_size() {
        let store = MemorySaveStore::new();
        store.insert("a.sav", vec![1, 2, 3, 4, 5, 6]);
        let mut region = SaveMemoryRegion::new(SaveKind::SaveRam, PathBuf::from("a.sav"));
        let mut memory = [0u8; 4];
        assert_eq!(region.restore(&store, &mut memory), 4);
        assert_eq!(memory, [1, 2, 3, 4]);

        store.insert("b.sav", vec![9, 9]);
        let mut region = SaveMemoryRegion::new(SaveKind::SaveRam, PathBuf::from("b.sav"));
        let mut memory = [0u8; 4];
        assert_eq!(region.restore(&store, &mut memory), 2);
        assert_eq!(memory, [9, 9, 0, 0]);
        assert_eq!(region.snapshot(), &[9, 9, 0, 0]);
    }

    #[test]
    fn sync_writes_only_on_change() {
        let store = MemorySaveStore::new();
        let mut region = SaveMemoryRegion::new(SaveKind::SaveRam, PathBuf::from("x.sav"));
        let mut memory = [0u8; 8];
        region.restore(&store, &mut memory);

        assert!(!region.sync(&store, &memory));
        assert_eq!(store.writes(), 0);

        memory[3] = 0x42;
        assert!(region.sync(&store, &memory));
        assert!(!region.sync(&store, &memory));
        assert_eq!(store.writes(), 1);
        assert_eq!(store.get(Path::new("x.sav")).unwrap()[3], 0x42);
    }

    #[test]
    fn fs_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core").join("game.sav");
        let store = FsSaveStore;
        assert_eq!(store.load(&path).unwrap(), None);
        store.store(&path, &[7, 7, 7]).unwrap();
        assert_eq!(store.load(&path).unwrap(), Some(vec![7, 7, 7]));

        let nested = dir.path().join("saves").join("snes9x");
        store.create_dir(&nested).unwrap();
        store.create_dir(&nested).unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn store_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file").unwrap();
        // parent "directory" is a regular file
        let mut region = SaveMemoryRegion::new(SaveKind::Rtc, blocker.join("game.rtc"));
        assert!(!region.sync(&FsSaveStore, &[1, 2, 3]));
        assert!(region.snapshot().is_empty());
    }
}
