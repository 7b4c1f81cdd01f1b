//! Process-wide storage read by the fault path
//!
//! The fault path cannot allocate or lock, so everything it needs lives in fixed-capacity
//! statics here. Writers run in normal execution and serialize on [`WRITE_LOCK`]; the fault path
//! only ever reads.

use crate::errors::InstallError;
use std::{
    cell::UnsafeCell,
    ffi::c_char,
    path::{Path, PathBuf},
    ptr,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering},
    },
};

/// Host function that copies the console scroll-back into `buffer` as a nul-terminated string
pub type ConsoleHistoryFn = unsafe extern "C" fn(buffer: *mut c_char, length: usize);

pub const CONSOLE_HISTORY_CAPACITY: usize = 64 * 1024;

/// A byte string with a fixed capacity that can be read from fault context
pub struct FixedBuf<const N: usize> {
    bytes: UnsafeCell<[u8; N]>,
    len: AtomicUsize,
}

// SAFETY: writes are serialized by `WRITE_LOCK`, reads tolerate a torn value
unsafe impl<const N: usize> Sync for FixedBuf<N> {}

impl<const N: usize> FixedBuf<N> {
    pub const fn new() -> Self {
        Self {
            bytes: UnsafeCell::new([0; N]),
            len: AtomicUsize::new(0),
        }
    }

    /// Stores `value`, truncated on a character boundary to the capacity
    ///
    /// One byte is always kept free for a nul terminator. Returns the number of bytes stored.
    pub fn store(&self, value: &str) -> usize {
        let mut len = value.len().min(N - 1);
        while !value.is_char_boundary(len) {
            len -= 1;
        }
        self.len.store(0, Ordering::Release);
        // SAFETY: the caller holds `WRITE_LOCK`; the fault path reads at most `len` bytes
        unsafe {
            let bytes = &mut *self.bytes.get();
            bytes[..len].copy_from_slice(&value.as_bytes()[..len]);
            bytes[len] = 0;
        }
        self.len.store(len, Ordering::Release);
        len
    }

    pub fn load(&self) -> &[u8] {
        let len = self.len.load(Ordering::Acquire);
        // SAFETY: `len` bytes were initialized before `len` was published
        unsafe { &(&*self.bytes.get())[..len] }
    }

    /// Pointer to the nul-terminated contents
    pub fn as_c_ptr(&self) -> *const c_char {
        self.bytes.get().cast()
    }

    pub fn is_empty(&self) -> bool {
        self.len.load(Ordering::Acquire) == 0
    }
}

impl<const N: usize> Default for FixedBuf<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// A registered always-included memory range
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryRange {
    pub ptr: usize,
    pub len: usize,
}

/// Everything the sidecar writer prints
pub struct CrashState {
    pub map: FixedBuf<256>,
    pub game_path: FixedBuf<512>,
    pub command_line: FixedBuf<1024>,
    pub framework_path: FixedBuf<512>,
    pub game_directory: FixedBuf<256>,
    pub framework_version: FixedBuf<64>,
    pub steam_inf: FixedBuf<1024>,
    pub panic_message: FixedBuf<512>,
    pub dump_path: FixedBuf<512>,
}

impl CrashState {
    pub const fn new() -> Self {
        Self {
            map: FixedBuf::new(),
            game_path: FixedBuf::new(),
            command_line: FixedBuf::new(),
            framework_path: FixedBuf::new(),
            game_directory: FixedBuf::new(),
            framework_version: FixedBuf::new(),
            steam_inf: FixedBuf::new(),
            panic_message: FixedBuf::new(),
            dump_path: FixedBuf::new(),
        }
    }
}

pub static STATE: CrashState = CrashState::new();

/// Serializes every writer of [`STATE`]
pub static WRITE_LOCK: Mutex<()> = Mutex::new(());

static APP_MEMORY: AtomicPtr<MemoryRange> = AtomicPtr::new(ptr::null_mut());
static CONSOLE_READER: AtomicUsize = AtomicUsize::new(0);
static DUMP_PATH_USED: AtomicBool = AtomicBool::new(false);

struct ConsoleBuf(UnsafeCell<[u8; CONSOLE_HISTORY_CAPACITY]>);

// SAFETY: only touched by the fault path, which runs once
unsafe impl Sync for ConsoleBuf {}

static CONSOLE_HISTORY: ConsoleBuf = ConsoleBuf(UnsafeCell::new([0; CONSOLE_HISTORY_CAPACITY]));

/// Runs `f` with the write lock held, ignoring poisoning
pub fn with_write_lock<R>(f: impl FnOnce() -> R) -> R {
    let _guard = match WRITE_LOCK.lock() {
        Ok(guard) => guard,
        Err(e) => e.into_inner(),
    };
    f()
}

/// Publishes `range` as the always-included dump memory and returns the previous registration
///
/// The caller keeps ownership of both pointees and must keep the returned one alive until no
/// fault can still be reading it.
pub fn swap_app_memory(range: *mut MemoryRange) -> *mut MemoryRange {
    APP_MEMORY.swap(range, Ordering::AcqRel)
}

pub fn app_memory() -> Option<MemoryRange> {
    let range = APP_MEMORY.load(Ordering::Acquire);
    // SAFETY: registrations outlive the next swap, see `swap_app_memory`
    (!range.is_null()).then(|| unsafe { *range })
}

pub fn set_console_reader(reader: Option<ConsoleHistoryFn>) {
    CONSOLE_READER.store(reader.map_or(0, |f| f as usize), Ordering::Release);
}

pub fn console_reader() -> Option<ConsoleHistoryFn> {
    let raw = CONSOLE_READER.load(Ordering::Acquire);
    // SAFETY: only ever stores a `ConsoleHistoryFn` or 0
    (raw != 0).then(|| unsafe { std::mem::transmute::<usize, ConsoleHistoryFn>(raw) })
}

/// Fills the static console buffer from the host and returns the captured text
///
/// Only called from the fault path.
pub fn read_console_history() -> &'static [u8] {
    let Some(reader) = console_reader() else {
        return &[];
    };
    // SAFETY: the fault path is the only user of the buffer and runs once
    unsafe {
        let bytes = &mut *CONSOLE_HISTORY.0.get();
        bytes[0] = 0;
        reader(bytes.as_mut_ptr().cast(), CONSOLE_HISTORY_CAPACITY);
        bytes[CONSOLE_HISTORY_CAPACITY - 1] = 0;
        let len = bytes.iter().position(|b| *b == 0).unwrap_or(0);
        &bytes[..len]
    }
}

/// Picks a fresh `<uuid>.dmp` path in `dump_dir` for the next fault
pub fn prepare_dump_path(dump_dir: &Path) -> Result<PathBuf, InstallError> {
    let path = dump_dir.join(format!(
        "{}.{}",
        uuid::Uuid::new_v4().hyphenated(),
        crate::DUMP_EXTENSION
    ));
    let Some(text) = path.to_str() else {
        return Err(InstallError::DumpPathTooLong(path));
    };
    // Leave room for the sidecar extension the fault path appends
    if text.len() + crate::SIDECAR_EXTENSION.len() + 2 > 512 {
        return Err(InstallError::DumpPathTooLong(path));
    }
    with_write_lock(|| STATE.dump_path.store(text));
    DUMP_PATH_USED.store(false, Ordering::Release);
    Ok(path)
}

pub fn mark_dump_path_used() {
    DUMP_PATH_USED.store(true, Ordering::Release);
}

pub fn take_dump_path_used() -> bool {
    DUMP_PATH_USED.swap(false, Ordering::AcqRel)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fixed_buf_truncates_on_char_boundary() {
        let buf = FixedBuf::<5>::new();
        assert!(buf.is_empty());
        assert_eq!(buf.store("ab"), 2);
        assert_eq!(buf.load(), b"ab");
        // 4 usable bytes, and 'é' would straddle the limit
        assert_eq!(buf.store("abcé"), 3);
        assert_eq!(buf.load(), b"abc");
        // SAFETY: the buffer is nul-terminated after the stored bytes
        let c = unsafe { std::ffi::CStr::from_ptr(buf.as_c_ptr()) };
        assert_eq!(c.to_bytes(), b"abc");
    }

    #[test]
    fn dump_paths_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let first = prepare_dump_path(dir.path()).unwrap();
        let second = prepare_dump_path(dir.path()).unwrap();
        assert_ne!(first, second);
        assert_eq!(first.extension().unwrap(), "dmp");
        assert_eq!(first.parent().unwrap(), dir.path());
    }

    #[test]
    fn overlong_dump_dir_is_rejected() {
        let dir = PathBuf::from(format!("/{}", "d".repeat(600)));
        assert!(matches!(
            prepare_dump_path(&dir),
            Err(InstallError::DumpPathTooLong(_))
        ));
    }
}
