//! Local dump analysis
//!
//! Stack walking runs without symbols, only module-relative offsets are needed.

use super::fingerprint::{CrashSummary, FrameRecord, ModuleRecord};
use crate::errors::AnalyzeError;
use minidump::{Minidump, Module};
use minidump_processor::ProcessState;
use minidump_unwind::{Symbolizer, simple_symbol_supplier};
use std::{path::Path, time::UNIX_EPOCH};

/// Turns a dump on disk into a [`CrashSummary`]
pub trait DumpAnalyzer: Send {
    fn analyze(&self, dump: &Path) -> Result<CrashSummary, AnalyzeError>;
}

/// [`DumpAnalyzer`] backed by `minidump-processor`
#[derive(Clone, Copy, Debug, Default)]
pub struct MinidumpAnalyzer;

impl DumpAnalyzer for MinidumpAnalyzer {
    fn analyze(&self, dump: &Path) -> Result<CrashSummary, AnalyzeError> {
        let minidump =
            Minidump::read_path(dump).map_err(|e| AnalyzeError::Read(dump.to_owned(), e))?;

        let provider = Symbolizer::new(simple_symbol_supplier(Vec::new()));
        let state = futures::executor::block_on(async {
            minidump_processor::process_minidump(&minidump, &provider).await
        })?;

        summarize(&state)
    }
}

fn summarize(state: &ProcessState) -> Result<CrashSummary, AnalyzeError> {
    let modules: Vec<_> = state
        .modules
        .iter()
        .map(|module| ModuleRecord {
            code_file: module.code_file().into_owned(),
            debug_file: module
                .debug_file()
                .map(|f| f.into_owned())
                .unwrap_or_default(),
            debug_identifier: module
                .debug_identifier()
                .map(|id| id.breakpad().to_string())
                .unwrap_or_default(),
            code_identifier: module
                .code_identifier()
                .map(|id| id.to_string())
                .unwrap_or_default(),
            base_address: module.base_address(),
        })
        .collect();

    let requesting_thread = state.requesting_thread.unwrap_or(0);
    let stack = state
        .threads
        .get(requesting_thread)
        .filter(|stack| !stack.frames.is_empty())
        .ok_or(AnalyzeError::MissingStack(requesting_thread))?;

    let frames = stack
        .frames
        .iter()
        .map(|frame| {
            let module_index = frame.module.as_ref().and_then(|module| {
                modules
                    .iter()
                    .position(|m| m.base_address == module.base_address())
            });
            // The return address, not the call instruction, keeps signatures stable
            let address = frame.resume_address;
            let offset = match frame.module.as_ref() {
                Some(module) if module_index.is_some() => {
                    address.wrapping_sub(module.base_address())
                }
                _ => address,
            };
            FrameRecord {
                module_index,
                offset,
            }
        })
        .collect();

    let main_module = state.modules.main_module().and_then(|main| {
        modules
            .iter()
            .position(|m| m.base_address == main.base_address())
    });

    let (reason, address) = state
        .exception_info
        .as_ref()
        .map_or((String::new(), 0), |info| {
            (info.reason.to_string(), info.address.0)
        });

    Ok(CrashSummary {
        timestamp: state
            .time
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs()),
        os: state.system_info.os.to_string(),
        cpu: state.system_info.cpu.to_string(),
        crashed: state.crashed(),
        reason,
        address,
        requesting_thread,
        modules,
        frames,
        main_module,
    })
}
