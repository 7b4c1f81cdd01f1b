//! The crash signature sent to the presubmit endpoint
//!
//! ```text
//! 2|<time>|<os>|<cpu>|<crashed 1/0>|<reason>|<address hex>|<thread>
//!   then per module: |M|<debug file name>|<debug identifier>
//!   then per frame:  |F|<module index or -1>|<offset hex>
//! ```
//!
//! Frames come from the requesting thread, innermost first, and are capped at
//! [`MAX_FRAMES`]. Module order is the dump's module list order.

use crate::classify::file_name_of;
use std::fmt::{self, Write};

pub const SIGNATURE_VERSION: u32 = 2;
pub const MAX_FRAMES: usize = 1024;

/// A module referenced by a dump
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModuleRecord {
    pub code_file: String,
    pub debug_file: String,
    /// Breakpad formatted debug identifier
    pub debug_identifier: String,
    pub code_identifier: String,
    pub base_address: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameRecord {
    /// Index into [`CrashSummary::modules`]
    pub module_index: Option<usize>,
    /// Offset from the module base, or the raw instruction when there is no module
    pub offset: u64,
}

/// Everything the signature and the module policy need from a dump
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CrashSummary {
    /// Seconds since the epoch at which the dump was written
    pub timestamp: u64,
    pub os: String,
    pub cpu: String,
    pub crashed: bool,
    pub reason: String,
    pub address: u64,
    pub requesting_thread: usize,
    pub modules: Vec<ModuleRecord>,
    pub frames: Vec<FrameRecord>,
    pub main_module: Option<usize>,
}

impl CrashSummary {
    pub fn main_module(&self) -> Option<&ModuleRecord> {
        self.main_module.and_then(|idx| self.modules.get(idx))
    }
}

/// The deduplication key for a crash
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CrashFingerprint(String);

impl CrashFingerprint {
    pub fn compute(summary: &CrashSummary) -> Self {
        let mut out = String::with_capacity(
            64 + summary.modules.len() * 64 + summary.frames.len().min(MAX_FRAMES) * 16,
        );
        // Writing into a String cannot fail
        let _ = write_signature(&mut out, summary);
        Self(out)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CrashFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn write_signature(out: &mut String, summary: &CrashSummary) -> fmt::Result {
    write!(
        out,
        "{SIGNATURE_VERSION}|{}|{}|{}|{}|{}|{:x}|{}",
        summary.timestamp,
        summary.os,
        summary.cpu,
        u8::from(summary.crashed),
        summary.reason,
        summary.address,
        summary.requesting_thread,
    )?;

    for module in &summary.modules {
        write!(
            out,
            "|M|{}|{}",
            file_name_of(&module.debug_file),
            module.debug_identifier
        )?;
    }

    for frame in summary.frames.iter().take(MAX_FRAMES) {
        match frame.module_index {
            Some(idx) => write!(out, "|F|{idx}|{:x}", frame.offset)?,
            None => write!(out, "|F|-1|{:x}", frame.offset)?,
        }
    }
    Ok(())
}
