//! File system interface handed to cores through `GET_VFS_INTERFACE`.
//!
//! Handles are boxed Rust values passed to the core as opaque pointers and
//! reclaimed on close. Every entry point answers a null handle with the
//! interface's failure value.

use crate::abi::{
    self, VFS_FILE_ACCESS_READ, VFS_FILE_ACCESS_READ_WRITE, VFS_FILE_ACCESS_UPDATE_EXISTING,
    VFS_FILE_ACCESS_WRITE, VFS_SEEK_POSITION_CURRENT, VFS_SEEK_POSITION_END, VFS_SEEK_POSITION_START,
    VFS_STAT_IS_CHARACTER_SPECIAL, VFS_STAT_IS_DIRECTORY, VFS_STAT_IS_VALID, VfsDirHandle,
    VfsFileHandle, VfsInterface,
};
use std::ffi::{CString, c_char, c_int, c_uint, c_void};
use std::fs::{self, File, OpenOptions, ReadDir};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use tracing::debug;

pub static INTERFACE: VfsInterface = VfsInterface {
    get_path: Some(get_path),
    open: Some(open),
    close: Some(close),
    size: Some(size),
    tell: Some(tell),
    seek: Some(seek),
    read: Some(read),
    write: Some(write),
    flush: Some(flush),
    remove: Some(remove),
    rename: Some(rename),
    truncate: Some(truncate),
    stat: Some(stat),
    mkdir: Some(mkdir),
    opendir: Some(opendir),
    readdir: Some(readdir),
    dirent_get_name: Some(dirent_get_name),
    dirent_is_dir: Some(dirent_is_dir),
    closedir: Some(closedir),
};

struct VfsFile {
    path: CString,
    file: File,
}

struct VfsDir {
    entries: ReadDir,
    include_hidden: bool,
    current: Option<(CString, bool)>,
}

fn guarded<T>(fallback: T, f: impl FnOnce() -> T) -> T {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or(fallback)
}

/// # Safety
/// `path` must be null or a NUL-terminated string.
unsafe fn path_from_ptr(path: *const c_char) -> Option<PathBuf> {
    // SAFETY: upheld by the caller.
    unsafe { abi::string_from_ptr(path) }.map(PathBuf::from)
}

/// # Safety
/// `stream` must be null or a handle returned by [`open`] and not yet closed.
unsafe fn file<'a>(stream: *mut VfsFileHandle) -> Option<&'a mut VfsFile> {
    // SAFETY: upheld by the caller.
    unsafe { (stream as *mut VfsFile).as_mut() }
}

/// # Safety
/// `dir` must be null or a handle returned by [`opendir`] and not yet closed.
unsafe fn dir<'a>(dir: *mut VfsDirHandle) -> Option<&'a mut VfsDir> {
    // SAFETY: upheld by the caller.
    unsafe { (dir as *mut VfsDir).as_mut() }
}

fn open_options(mode: c_uint) -> Option<OpenOptions> {
    let update = mode & VFS_FILE_ACCESS_UPDATE_EXISTING != 0;
    let mut options = OpenOptions::new();
    match mode & VFS_FILE_ACCESS_READ_WRITE {
        VFS_FILE_ACCESS_READ => options.read(true),
        VFS_FILE_ACCESS_WRITE if update => options.write(true),
        VFS_FILE_ACCESS_WRITE => options.write(true).create(true).truncate(true),
        VFS_FILE_ACCESS_READ_WRITE if update => options.read(true).write(true),
        VFS_FILE_ACCESS_READ_WRITE => options.read(true).write(true).create(true).truncate(true),
        _ => return None,
    };
    Some(options)
}

unsafe extern "C" fn get_path(stream: *mut VfsFileHandle) -> *const c_char {
    // SAFETY: the core passes a handle from `open`.
    match unsafe { file(stream) } {
        Some(f) => f.path.as_ptr(),
        None => std::ptr::null(),
    }
}

unsafe extern "C" fn open(path: *const c_char, mode: c_uint, _hints: c_uint) -> *mut VfsFileHandle {
    guarded(std::ptr::null_mut(), || {
        // SAFETY: the path is a NUL-terminated string owned by the core.
        let Some(path) = (unsafe { path_from_ptr(path) }) else {
            return std::ptr::null_mut();
        };
        let Some(options) = open_options(mode) else {
            debug!("VFS open of {} with invalid mode {mode}", path.display());
            return std::ptr::null_mut();
        };
        let file = match options.open(&path) {
            Ok(file) => file,
            Err(e) => {
                debug!("VFS open of {} failed: {e}", path.display());
                return std::ptr::null_mut();
            }
        };
        let Ok(c_path) = CString::new(path.to_string_lossy().as_bytes()) else {
            return std::ptr::null_mut();
        };
        Box::into_raw(Box::new(VfsFile { path: c_path, file })) as *mut VfsFileHandle
    })
}

unsafe extern "C" fn close(stream: *mut VfsFileHandle) -> c_int {
    if stream.is_null() {
        return -1;
    }
    // SAFETY: the handle came from `Box::into_raw` in `open` and is closed once.
    drop(unsafe { Box::from_raw(stream as *mut VfsFile) });
    0
}

unsafe extern "C" fn size(stream: *mut VfsFileHandle) -> i64 {
    // SAFETY: the core passes a handle from `open`.
    let Some(f) = (unsafe { file(stream) }) else {
        return -1;
    };
    f.file.metadata().map_or(-1, |m| m.len() as i64)
}

unsafe extern "C" fn tell(stream: *mut VfsFileHandle) -> i64 {
    // SAFETY: the core passes a handle from `open`.
    let Some(f) = (unsafe { file(stream) }) else {
        return -1;
    };
    f.file.stream_position().map_or(-1, |pos| pos as i64)
}

unsafe extern "C" fn seek(stream: *mut VfsFileHandle, offset: i64, whence: c_int) -> i64 {
    // SAFETY: the core passes a handle from `open`.
    let Some(f) = (unsafe { file(stream) }) else {
        return -1;
    };
    let target = match whence {
        VFS_SEEK_POSITION_START if offset >= 0 => SeekFrom::Start(offset as u64),
        VFS_SEEK_POSITION_CURRENT => SeekFrom::Current(offset),
        VFS_SEEK_POSITION_END => SeekFrom::End(offset),
        _ => return -1,
    };
    f.file.seek(target).map_or(-1, |pos| pos as i64)
}

/// Returns the number of bytes read; 0 at end of file.
unsafe extern "C" fn read(stream: *mut VfsFileHandle, s: *mut c_void, len: u64) -> i64 {
    // SAFETY: the core passes a handle from `open`.
    let Some(f) = (unsafe { file(stream) }) else {
        return -1;
    };
    if s.is_null() {
        return -1;
    }
    // SAFETY: the core provides `len` writable bytes at `s`.
    let buf = unsafe { std::slice::from_raw_parts_mut(s as *mut u8, len as usize) };
    let mut filled = 0;
    while filled < buf.len() {
        match f.file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(_) => return -1,
        }
    }
    filled as i64
}

unsafe extern "C" fn write(stream: *mut VfsFileHandle, s: *const c_void, len: u64) -> i64 {
    // SAFETY: the core passes a handle from `open`.
    let Some(f) = (unsafe { file(stream) }) else {
        return -1;
    };
    if s.is_null() {
        return -1;
    }
    // SAFETY: the core provides `len` readable bytes at `s`.
    let buf = unsafe { std::slice::from_raw_parts(s as *const u8, len as usize) };
    match f.file.write_all(buf) {
        Ok(()) => len as i64,
        Err(_) => -1,
    }
}

unsafe extern "C" fn flush(stream: *mut VfsFileHandle) -> c_int {
    // SAFETY: the core passes a handle from `open`.
    let Some(f) = (unsafe { file(stream) }) else {
        return -1;
    };
    if f.file.flush().is_ok() { 0 } else { -1 }
}

unsafe extern "C" fn remove(path: *const c_char) -> c_int {
    // SAFETY: the path is a NUL-terminated string owned by the core.
    let Some(path) = (unsafe { path_from_ptr(path) }) else {
        return -1;
    };
    let removed = if path.is_dir() {
        fs::remove_dir(&path)
    } else {
        fs::remove_file(&path)
    };
    if removed.is_ok() { 0 } else { -1 }
}

unsafe extern "C" fn rename(old_path: *const c_char, new_path: *const c_char) -> c_int {
    // SAFETY: both paths are NUL-terminated strings owned by the core.
    let (Some(from), Some(to)) = (unsafe { (path_from_ptr(old_path), path_from_ptr(new_path)) })
    else {
        return -1;
    };
    if fs::rename(from, to).is_ok() { 0 } else { -1 }
}

unsafe extern "C" fn truncate(stream: *mut VfsFileHandle, length: i64) -> i64 {
    // SAFETY: the core passes a handle from `open`.
    let Some(f) = (unsafe { file(stream) }) else {
        return -1;
    };
    if length < 0 {
        return -1;
    }
    if f.file.set_len(length as u64).is_ok() { 0 } else { -1 }
}

/// Returns `VFS_STAT_*` flags, 0 when the path does not exist. The size is
/// written through `size` when it is non-null.
unsafe extern "C" fn stat(path: *const c_char, size: *mut i32) -> c_int {
    // SAFETY: the path is a NUL-terminated string owned by the core.
    let Some(path) = (unsafe { path_from_ptr(path) }) else {
        return 0;
    };
    let Ok(meta) = fs::metadata(&path) else {
        return 0;
    };
    // SAFETY: a non-null `size` points to a writable i32.
    if let Some(size) = unsafe { size.as_mut() } {
        *size = i32::try_from(meta.len()).unwrap_or(i32::MAX);
    }
    let mut flags = VFS_STAT_IS_VALID;
    if meta.is_dir() {
        flags |= VFS_STAT_IS_DIRECTORY;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        if meta.file_type().is_char_device() {
            flags |= VFS_STAT_IS_CHARACTER_SPECIAL;
        }
    }
    flags
}

/// 0 on success, -2 when the directory already exists, -1 otherwise.
unsafe extern "C" fn mkdir(dir: *const c_char) -> c_int {
    // SAFETY: the path is a NUL-terminated string owned by the core.
    let Some(dir) = (unsafe { path_from_ptr(dir) }) else {
        return -1;
    };
    match fs::create_dir(&dir) {
        Ok(()) => 0,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => -2,
        Err(e) => {
            debug!("VFS mkdir of {} failed: {e}", dir.display());
            -1
        }
    }
}

unsafe extern "C" fn opendir(dir: *const c_char, include_hidden: bool) -> *mut VfsDirHandle {
    // SAFETY: the path is a NUL-terminated string owned by the core.
    let Some(dir) = (unsafe { path_from_ptr(dir) }) else {
        return std::ptr::null_mut();
    };
    match fs::read_dir(&dir) {
        Ok(entries) => Box::into_raw(Box::new(VfsDir {
            entries,
            include_hidden,
            current: None,
        })) as *mut VfsDirHandle,
        Err(e) => {
            debug!("VFS opendir of {} failed: {e}", dir.display());
            std::ptr::null_mut()
        }
    }
}

/// Advances to the next entry; false when the listing is exhausted.
unsafe extern "C" fn readdir(dirstream: *mut VfsDirHandle) -> bool {
    // SAFETY: the core passes a handle from `opendir`.
    let Some(d) = (unsafe { dir(dirstream) }) else {
        return false;
    };
    guarded(false, || {
        d.current = None;
        for entry in d.entries.by_ref().flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !d.include_hidden && name.starts_with('.') {
                continue;
            }
            let Ok(c_name) = CString::new(name.as_bytes()) else {
                continue;
            };
            // follows symlinks, as a directory listing shown to the core should
            let is_dir = entry.path().is_dir();
            d.current = Some((c_name, is_dir));
            return true;
        }
        false
    })
}

unsafe extern "C" fn dirent_get_name(dirstream: *mut VfsDirHandle) -> *const c_char {
    // SAFETY: the core passes a handle from `opendir`.
    match unsafe { dir(dirstream) }.and_then(|d| d.current.as_ref()) {
        Some((name, _)) => name.as_ptr(),
        None => std::ptr::null(),
    }
}

unsafe extern "C" fn dirent_is_dir(dirstream: *mut VfsDirHandle) -> bool {
    // SAFETY: the core passes a handle from `opendir`.
    unsafe { dir(dirstream) }
        .and_then(|d| d.current.as_ref())
        .is_some_and(|(_, is_dir)| *is_dir)
}

unsafe extern "C" fn closedir(dirstream: *mut VfsDirHandle) -> c_int {
    if dirstream.is_null() {
        return -1;
    }
    // SAFETY: the handle came from `Box::into_raw` in `opendir` and is closed once.
    drop(unsafe { Box::from_raw(dirstream as *mut VfsDir) });
    0
}
