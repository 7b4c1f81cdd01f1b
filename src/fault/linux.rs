//! Linux fault path
//!
//! `crash-handler` owns the signal handlers. On a fault the handler clones a watchdog process,
//! which clones a writer that ptraces this one and writes the minidump. The faulting thread
//! waits for the watchdog and then writes the sidecar itself.

use super::{
    sidecar,
    state::{self, STATE},
};
use crate::errors::InstallError;
use crash_handler::{CrashContext, CrashEvent, CrashEventResult, CrashHandler};
use minidump_writer::{app_memory::AppMemory, minidump_writer::MinidumpWriter};
use nix::{
    errno::Errno,
    sys::{
        signal::{self, Signal},
        wait::{WaitPidFlag, WaitStatus, waitpid},
    },
    unistd::Pid,
};
use std::{mem::MaybeUninit, panic::AssertUnwindSafe, ptr, time::Duration};

/// Signals whose handlers are watched and reasserted
pub const HANDLED_SIGNALS: [Signal; 5] = [
    Signal::SIGSEGV,
    Signal::SIGABRT,
    Signal::SIGFPE,
    Signal::SIGILL,
    Signal::SIGBUS,
];

const HELPER_TIMEOUT: Duration = Duration::from_secs(30);
const HELPER_POLL: Duration = Duration::from_millis(10);
/// Extra time the faulting thread gives the watchdog to kill a stuck writer and report back
const WATCHDOG_GRACE: Duration = Duration::from_secs(5);

struct DumpOnFault;

unsafe impl CrashEvent for DumpOnFault {
    fn on_crash(&self, context: &CrashContext) -> CrashEventResult {
        CrashEventResult::Handled(handle_fault(context))
    }
}

pub(super) struct Handler {
    inner: CrashHandler,
    installed: [libc::sigaction; HANDLED_SIGNALS.len()],
}

impl Handler {
    pub fn attach() -> Result<Self, InstallError> {
        let inner = CrashHandler::attach(Box::new(DumpOnFault))?;
        Ok(Self {
            inner,
            installed: current_actions(),
        })
    }

    /// Puts the handlers recorded at attach time back if anything replaced them
    pub fn ensure_installed(&self) -> bool {
        reassert(&self.installed)
    }

    pub fn simulate(&self) -> bool {
        matches!(
            self.inner.simulate_signal(libc::SIGSEGV as _),
            CrashEventResult::Handled(true)
        )
    }
}

fn current_actions() -> [libc::sigaction; HANDLED_SIGNALS.len()] {
    HANDLED_SIGNALS.map(|signal| {
        let mut action = MaybeUninit::<libc::sigaction>::zeroed();
        // SAFETY: a null `act` only queries the current disposition
        unsafe {
            libc::sigaction(signal as libc::c_int, ptr::null(), action.as_mut_ptr());
            action.assume_init()
        }
    })
}

/// Reinstalls every recorded action if at least one was displaced
fn reassert(installed: &[libc::sigaction; HANDLED_SIGNALS.len()]) -> bool {
    let displaced = current_actions()
        .iter()
        .zip(installed)
        .any(|(current, ours)| current.sa_sigaction != ours.sa_sigaction);

    if displaced {
        for (signal, action) in HANDLED_SIGNALS.iter().zip(installed) {
            // SAFETY: `action` was read back from the kernel after attaching
            unsafe { libc::sigaction(*signal as libc::c_int, action, ptr::null_mut()) };
        }
    }
    displaced
}

fn handle_fault(context: &CrashContext) -> bool {
    let path = STATE.dump_path.load();
    if path.is_empty() {
        return false;
    }
    state::mark_dump_path_used();

    let written = write_dump_via_helper(context);
    if written {
        sidecar::report(b"Wrote minidump to: ", path);
        sidecar::write_sidecar(path);
    } else {
        sidecar::report(b"Failed to write minidump to: ", path);
    }
    written
}

/// Forks without running atfork handlers, which may not be safe in a faulting process
///
/// Returns 0 in the child, like fork(2).
unsafe fn clone_process() -> libc::c_long {
    // SAFETY: no flags besides the exit signal, so the child gets a copy of the address space
    unsafe {
        libc::syscall(
            libc::SYS_clone,
            libc::SIGCHLD as libc::c_long,
            0 as libc::c_long,
            0 as libc::c_long,
            0 as libc::c_long,
            0 as libc::c_long,
        )
    }
}

/// Writes the dump from a writer process, supervised by a watchdog process
///
/// The writer ptrace-stops every thread in this process. If it dies before detaching, the
/// threads stay group-stopped, so the watchdog (which never traces anything) sends `SIGCONT`
/// once the writer is gone, however it went.
fn write_dump_via_helper(context: &CrashContext) -> bool {
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: raw syscalls on stack buffers
    let written = unsafe {
        if libc::pipe(fds.as_mut_ptr()) != 0 {
            return false;
        }
        let [read_end, write_end] = fds;

        match clone_process() {
            -1 => {
                libc::close(read_end);
                libc::close(write_end);
                false
            }
            0 => {
                libc::close(write_end);
                let mut go = 0u8;
                let _ = libc::read(read_end, (&raw mut go).cast(), 1);
                libc::close(read_end);
                let ok = supervise_writer(context);
                let _ = signal::kill(Pid::from_raw(context.pid), Signal::SIGCONT);
                libc::_exit(if ok { 0 } else { 1 });
            }
            pid => {
                libc::close(read_end);
                let pid = pid as libc::pid_t;
                // Yama also lets descendants of the named process attach
                libc::prctl(libc::PR_SET_PTRACER, pid as libc::c_ulong, 0, 0, 0);
                let go = 1u8;
                libc::write(write_end, (&raw const go).cast(), 1);
                libc::close(write_end);
                wait_for_helper(Pid::from_raw(pid), HELPER_TIMEOUT + WATCHDOG_GRACE)
            }
        }
    };

    // SAFETY: prctl(2) with integer arguments
    unsafe { libc::prctl(libc::PR_SET_PTRACER, 0 as libc::c_ulong, 0, 0, 0) };
    let _ = signal::kill(Pid::from_raw(context.pid), Signal::SIGCONT);
    written
}

/// Runs in the watchdog process
fn supervise_writer(context: &CrashContext) -> bool {
    // SAFETY: see `clone_process`
    match unsafe { clone_process() } {
        -1 => false,
        0 => {
            reset_fault_signals();
            let ok = std::panic::catch_unwind(AssertUnwindSafe(|| dump_in_helper(context)))
                .unwrap_or(false);
            // SAFETY: _exit(2) skips atexit handlers inherited from the host
            unsafe { libc::_exit(if ok { 0 } else { 1 }) }
        }
        pid => wait_for_helper(Pid::from_raw(pid as libc::pid_t), HELPER_TIMEOUT),
    }
}

/// A fault in the writer kills it instead of re-entering the inherited handler
fn reset_fault_signals() {
    let mut unblock = signal::SigSet::empty();
    for sig in HANDLED_SIGNALS {
        // SAFETY: installing the default disposition
        let _ = unsafe { signal::signal(sig, signal::SigHandler::SigDfl) };
        unblock.add(sig);
    }
    let _ = signal::pthread_sigmask(signal::SigmaskHow::SIG_UNBLOCK, Some(&unblock), None);
}

/// Runs in the writer process
fn dump_in_helper(context: &CrashContext) -> bool {
    let Ok(path) = std::str::from_utf8(STATE.dump_path.load()) else {
        return false;
    };
    let Ok(mut file) = std::fs::File::create(path) else {
        return false;
    };

    let mut writer = MinidumpWriter::new(context.pid, context.tid);
    writer.set_crash_context(minidump_writer::crash_context::CrashContext {
        inner: context.clone(),
    });
    if let Some(range) = state::app_memory() {
        writer.set_app_memory(vec![AppMemory {
            ptr: range.ptr,
            length: range.len,
        }]);
    }
    writer.dump(&mut file).is_ok()
}

fn wait_for_helper(pid: Pid, timeout: Duration) -> bool {
    let mut waited = Duration::ZERO;
    loop {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => return code == 0,
            Ok(WaitStatus::Signaled(..)) => return false,
            Ok(_) | Err(Errno::EINTR) => {}
            Err(_) => return false,
        }

        if waited >= timeout {
            let _ = signal::kill(pid, Signal::SIGKILL);
            let _ = waitpid(pid, None);
            return false;
        }

        let pause = libc::timespec {
            tv_sec: 0,
            tv_nsec: HELPER_POLL.as_nanos() as libc::c_long,
        };
        // SAFETY: nanosleep(2) is async-signal-safe
        unsafe { libc::nanosleep(&pause, ptr::null_mut()) };
        waited += HELPER_POLL;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::process::Command;

    fn spawn(script: &str) -> Pid {
        let child = Command::new("sh").args(["-c", script]).spawn().unwrap();
        Pid::from_raw(child.id() as libc::pid_t)
    }

    #[test]
    fn helper_exit_status_decides_success() {
        assert!(wait_for_helper(spawn("exit 0"), Duration::from_secs(10)));
        assert!(!wait_for_helper(spawn("exit 3"), Duration::from_secs(10)));
    }

    #[test]
    fn stuck_helper_is_killed() {
        let started = std::time::Instant::now();
        assert!(!wait_for_helper(spawn("sleep 30"), Duration::from_millis(50)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn reassert_is_noop_when_nothing_changed() {
        let actions = current_actions();
        assert!(!reassert(&actions));
    }
}
