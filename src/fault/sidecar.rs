//! The `<dump>.txt` metadata sidecar and the fault-time report lines
//!
//! Everything here may run in signal context: no allocation, no locks, raw descriptor writes.

use super::state::{CrashState, STATE, read_console_history};

pub const CONFIG_BEGIN: &[u8] = b"-------- CONFIG BEGIN --------";
pub const CONFIG_END: &[u8] = b"\n-------- CONFIG END --------\n";
pub const CONSOLE_BEGIN: &[u8] = b"-------- CONSOLE HISTORY BEGIN --------\n";
pub const CONSOLE_END: &[u8] = b"-------- CONSOLE HISTORY END --------\n";

/// Identifies the build that wrote a sidecar
pub const BUILD_ID: &str = match option_env!("MINIDUMP_RELAY_BUILD_ID") {
    Some(id) => id,
    None => "dev",
};

const PATH_CAPACITY: usize = 528;

/// Destination for fault-time output
pub trait RawSink {
    fn put(&mut self, bytes: &[u8]);
}

impl RawSink for Vec<u8> {
    fn put(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Writes straight to a file descriptor with `write(2)`
#[cfg(unix)]
pub struct FdSink(pub libc::c_int);

#[cfg(unix)]
impl RawSink for FdSink {
    fn put(&mut self, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            // SAFETY: write(2) is async-signal-safe and `bytes` is a valid buffer
            let written = unsafe { libc::write(self.0, bytes.as_ptr().cast(), bytes.len()) };
            if written < 0 {
                if std::io::Error::last_os_error().raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                return;
            }
            if written == 0 {
                return;
            }
            bytes = &bytes[written as usize..];
        }
    }
}

/// An [`FdSink`] that closes its descriptor when dropped
#[cfg(unix)]
struct OwnedFdSink(FdSink);

#[cfg(unix)]
impl RawSink for OwnedFdSink {
    fn put(&mut self, bytes: &[u8]) {
        self.0.put(bytes);
    }
}

#[cfg(unix)]
impl Drop for OwnedFdSink {
    fn drop(&mut self) {
        // SAFETY: the descriptor is owned by this sink
        unsafe { libc::close(self.0.0) };
    }
}

#[cfg(target_os = "windows")]
impl RawSink for std::fs::File {
    fn put(&mut self, bytes: &[u8]) {
        use std::io::Write;
        let _ = self.write_all(bytes);
    }
}

#[cfg(not(unix))]
struct StdoutSink;

#[cfg(not(unix))]
impl RawSink for StdoutSink {
    fn put(&mut self, bytes: &[u8]) {
        use std::io::Write;
        let _ = std::io::stdout().write_all(bytes);
    }
}

/// Writes a report line to stdout from fault context
pub fn report(prefix: &[u8], path: &[u8]) {
    #[cfg(unix)]
    let mut out = FdSink(libc::STDOUT_FILENO);
    #[cfg(not(unix))]
    let mut out = StdoutSink;

    out.put(prefix);
    out.put(path);
    out.put(b"\n");
}

fn put_key(sink: &mut impl RawSink, key: &[u8], value: &[u8]) {
    sink.put(b"\n");
    sink.put(key);
    sink.put(b"=");
    sink.put(value);
}

/// Renders the sidecar for `state`, followed by `console` when it is not empty
pub fn render(state: &CrashState, console: &[u8], sink: &mut impl RawSink) {
    sink.put(CONFIG_BEGIN);
    put_key(sink, b"Map", state.map.load());
    put_key(sink, b"GamePath", state.game_path.load());
    put_key(sink, b"CommandLine", state.command_line.load());
    put_key(sink, b"SourceModPath", state.framework_path.load());
    put_key(sink, b"GameDirectory", state.game_directory.load());
    if !state.framework_version.is_empty() {
        put_key(sink, b"SourceModVersion", state.framework_version.load());
    }
    put_key(sink, b"ExtensionVersion", crate::CLIENT_VERSION.as_bytes());
    put_key(sink, b"ExtensionBuild", BUILD_ID.as_bytes());
    if !state.panic_message.is_empty() {
        put_key(sink, b"PanicMessage", state.panic_message.load());
    }
    sink.put(state.steam_inf.load());
    sink.put(CONFIG_END);

    if !console.is_empty() {
        sink.put(CONSOLE_BEGIN);
        sink.put(console);
        sink.put(CONSOLE_END);
    }
}

/// Builds `<dump path>.txt\0` in a stack buffer
fn sidecar_path(dump_path: &[u8], out: &mut [u8; PATH_CAPACITY]) -> Option<usize> {
    let ext = crate::SIDECAR_EXTENSION.as_bytes();
    let len = dump_path.len() + 1 + ext.len();
    if len + 1 > out.len() {
        return None;
    }
    out[..dump_path.len()].copy_from_slice(dump_path);
    out[dump_path.len()] = b'.';
    out[dump_path.len() + 1..len].copy_from_slice(ext);
    out[len] = 0;
    Some(len)
}

/// Writes the sidecar next to the dump that was just written
///
/// Returns `false` when the file could not be created.
pub fn write_sidecar(dump_path: &[u8]) -> bool {
    let mut path = [0u8; PATH_CAPACITY];
    let Some(len) = sidecar_path(dump_path, &mut path) else {
        return false;
    };
    let Some(mut sink) = open_sidecar(&path, len) else {
        report(b"Failed to open metadata file!", b"");
        return false;
    };
    render(&STATE, read_console_history(), &mut sink);
    true
}

#[cfg(unix)]
fn open_sidecar(path: &[u8; PATH_CAPACITY], _len: usize) -> Option<OwnedFdSink> {
    let fd = crate::fail_point_else!(SIDECAR_OPEN, -1, {
        // SAFETY: `path` is nul-terminated
        unsafe {
            libc::open(
                path.as_ptr().cast(),
                libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC | libc::O_CLOEXEC,
                (libc::S_IRUSR | libc::S_IWUSR) as libc::c_uint,
            )
        }
    });
    (fd >= 0).then_some(OwnedFdSink(FdSink(fd)))
}

#[cfg(not(unix))]
fn open_sidecar(path: &[u8; PATH_CAPACITY], len: usize) -> Option<std::fs::File> {
    crate::fail_point_else!(
        SIDECAR_OPEN,
        None,
        std::str::from_utf8(&path[..len])
            .ok()
            .and_then(|path| std::fs::File::create(path).ok())
    )
}
