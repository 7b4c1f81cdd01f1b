//! Process-wide fault capture
//!
//! [`FaultInterceptor::install`] hooks the platform's fatal-fault mechanism once per process. A
//! fault writes `<uuid>.dmp` into the dump directory, prints a report line to stdout and, when
//! the dump was written, a `<uuid>.dmp.txt` sidecar with everything [`crate::ContextRegistry`]
//! recorded. The faulting thread then falls through to the host's own handling.

pub mod exception;
pub mod panic_hook;
pub mod sidecar;
pub mod state;

use crate::errors::InstallError;
use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        mod linux;
        use linux as platform;
    } else if #[cfg(target_os = "windows")] {
        mod windows;
        use windows as platform;
    }
}

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// The installed fault hooks
///
/// Only one may exist per process. Dropping it releases the slot, although the platform hooks
/// themselves stay chained until process exit on Linux.
pub struct FaultInterceptor {
    dump_dir: PathBuf,
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "windows"))]
    handler: platform::Handler,
}

impl FaultInterceptor {
    /// Installs the fault hooks, writing future dumps into `dump_dir`
    ///
    /// The directory is created if needed and the first dump path is picked up front, since
    /// nothing can be generated at fault time.
    pub fn install(dump_dir: impl Into<PathBuf>) -> Result<Self, InstallError> {
        if INSTALLED.swap(true, Ordering::AcqRel) {
            return Err(InstallError::AlreadyInstalled);
        }

        let dump_dir = dump_dir.into();
        Self::attach(dump_dir).inspect_err(|_| INSTALLED.store(false, Ordering::Release))
    }

    #[cfg(any(target_os = "linux", target_os = "android", target_os = "windows"))]
    fn attach(dump_dir: PathBuf) -> Result<Self, InstallError> {
        std::fs::create_dir_all(&dump_dir)
            .map_err(|e| InstallError::CreateDumpDir(dump_dir.clone(), e))?;
        let first = state::prepare_dump_path(&dump_dir)?;
        panic_hook::install();
        let handler = platform::Handler::attach()?;

        log::info!(
            "fault interceptor installed, next dump goes to {}",
            first.display()
        );
        Ok(Self { dump_dir, handler })
    }

    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "windows")))]
    fn attach(_dump_dir: PathBuf) -> Result<Self, InstallError> {
        Err(InstallError::UnsupportedPlatform)
    }

    /// Re-arms the interceptor
    ///
    /// Picks a fresh dump path if the previous one was consumed by a handled fault and puts the
    /// hooks back if something displaced them. Returns true when the hooks had to be
    /// reinstalled. Meant to be called periodically, e.g. once per host frame.
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "windows"))]
    pub fn ensure_installed(&self) -> bool {
        if state::take_dump_path_used() {
            if let Err(e) = state::prepare_dump_path(&self.dump_dir) {
                log::error!("unable to pick a new dump path: {e}");
            }
        }

        let reinstalled = self.handler.ensure_installed();
        if reinstalled {
            log::warn!("fault handler was displaced and has been reinstalled");
        }
        reinstalled
    }

    /// Runs the full fault path against a synthetic fault on the calling thread
    ///
    /// Returns true if a dump was written.
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "windows"))]
    pub fn simulate_fault(&self) -> bool {
        self.handler.simulate()
    }

    pub fn dump_directory(&self) -> &Path {
        &self.dump_dir
    }
}

impl Drop for FaultInterceptor {
    fn drop(&mut self) {
        INSTALLED.store(false, Ordering::Release);
    }
}
