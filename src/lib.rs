//! Crash capture and presubmit-negotiated minidump upload for long-running game servers.
//!
//! The crate is split along the two execution contexts it cares about:
//!
//! - [`fault`] and [`context`] run inside the host process. The fault path writes a minidump
//!   plus a `<dump>.txt` metadata sidecar from signal/exception context, reading only the
//!   fixed-capacity buffers that [`context::ContextRegistry`] fills during normal execution.
//! - [`upload`], [`negotiate`] and [`classify`] run on a background thread after startup. They
//!   scan the dump directory, ask the remote policy service what to do with each crash, submit
//!   symbols/binaries on request and finally upload and delete every artifact.

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        pub mod linux;
    }
}

pub mod classify;
pub mod config;
pub mod context;
pub mod error_list;
pub mod errors;
pub mod fail_points;
pub mod fault;
pub mod negotiate;
pub mod upload;

pub use config::UploadConfig;
pub use context::ContextRegistry;
pub use fault::FaultInterceptor;
pub use upload::{UploadResults, UploadWorker};

/// Version reported to every remote endpoint as `ExtensionVersion`.
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Extension appended to a dump path to name its metadata sidecar.
pub const SIDECAR_EXTENSION: &str = "txt";

/// Extension the upload worker looks for in the dump directory.
pub const DUMP_EXTENSION: &str = "dmp";
