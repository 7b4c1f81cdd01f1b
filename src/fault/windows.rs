//! Windows fault path: a first-in-line vectored exception handler
//!
//! Dumps are written in-process with `MiniDumpWriteDump`. The plugin context blob travels as a
//! [`PLUGIN_CONTEXT_STREAM`] user stream.

use super::{
    exception::{self, is_fatal_exception},
    sidecar,
    state::{self, STATE},
};
use crate::errors::InstallError;
use std::{
    ffi::c_void,
    fs::File,
    mem,
    os::windows::io::AsRawHandle,
    ptr,
    sync::atomic::{AtomicPtr, Ordering},
};
use windows_sys::Win32::{
    Foundation::HANDLE,
    System::{
        Diagnostics::Debug::{
            AddVectoredExceptionHandler, CONTEXT, EXCEPTION_POINTERS, EXCEPTION_RECORD,
            MINIDUMP_EXCEPTION_INFORMATION, MINIDUMP_USER_STREAM,
            MINIDUMP_USER_STREAM_INFORMATION, MiniDumpNormal, MiniDumpWriteDump, RaiseException,
            RemoveVectoredExceptionHandler, RtlCaptureContext,
        },
        Threading::{GetCurrentProcess, GetCurrentProcessId, GetCurrentThreadId},
    },
};

/// User stream type of the plugin context blob, outside the range reserved by Microsoft
pub const PLUGIN_CONTEXT_STREAM: u32 = 0x534d_0001;

const EXCEPTION_CONTINUE_SEARCH: i32 = 0;
const EXCEPTION_EXECUTE_HANDLER: i32 = 1;

static HANDLE: AtomicPtr<c_void> = AtomicPtr::new(ptr::null_mut());

pub(super) struct Handler;

impl Handler {
    pub fn attach() -> Result<Self, InstallError> {
        register()?;
        // SAFETY: replaces the CRT abort handler with one that raises a fatal exception
        unsafe { libc::signal(libc::SIGABRT, on_abort as libc::sighandler_t) };
        Ok(Self)
    }

    /// Re-registers the handler if a fault already removed it
    pub fn ensure_installed(&self) -> bool {
        HANDLE.load(Ordering::Acquire).is_null() && register().is_ok()
    }

    pub fn simulate(&self) -> bool {
        // SAFETY: builds a synthetic exception for the current thread
        unsafe {
            let mut context: CONTEXT = mem::zeroed();
            RtlCaptureContext(&mut context);
            let mut record: EXCEPTION_RECORD = mem::zeroed();
            record.ExceptionCode = exception::EXCEPTION_ACCESS_VIOLATION as i32;
            record.ExceptionAddress = Self::simulate as *mut c_void;
            let mut pointers = EXCEPTION_POINTERS {
                ExceptionRecord: &mut record,
                ContextRecord: &mut context,
            };
            write_dump(&mut pointers)
        }
    }
}

impl Drop for Handler {
    fn drop(&mut self) {
        unregister();
    }
}

fn register() -> Result<(), InstallError> {
    // SAFETY: `on_exception` matches PVECTORED_EXCEPTION_HANDLER
    let handle = unsafe { AddVectoredExceptionHandler(1, Some(on_exception)) };
    if handle.is_null() {
        return Err(InstallError::VectoredHandler);
    }
    let previous = HANDLE.swap(handle, Ordering::AcqRel);
    if !previous.is_null() {
        // SAFETY: `previous` came from AddVectoredExceptionHandler
        unsafe { RemoveVectoredExceptionHandler(previous) };
    }
    Ok(())
}

fn unregister() {
    let handle = HANDLE.swap(ptr::null_mut(), Ordering::AcqRel);
    if !handle.is_null() {
        // SAFETY: `handle` came from AddVectoredExceptionHandler
        unsafe { RemoveVectoredExceptionHandler(handle) };
    }
}

unsafe extern "C" fn on_abort(_signal: libc::c_int) {
    // SAFETY: raising is the whole point, the vectored handler picks it up
    unsafe {
        RaiseException(
            exception::STATUS_FATAL_APP_EXIT,
            exception::EXCEPTION_NONCONTINUABLE,
            0,
            ptr::null(),
        )
    };
}

unsafe extern "system" fn on_exception(info: *mut EXCEPTION_POINTERS) -> i32 {
    // SAFETY: the system hands us valid exception pointers
    let record = unsafe { &mut *(*info).ExceptionRecord };
    let code = record.ExceptionCode as u32;
    if !is_fatal_exception(code, record.ExceptionFlags) {
        return EXCEPTION_CONTINUE_SEARCH;
    }

    if !write_dump(info) {
        return EXCEPTION_CONTINUE_SEARCH;
    }

    // Hand the now-dumped exception to the host as a breakpoint
    unregister();
    record.ExceptionCode = exception::EXCEPTION_BREAKPOINT as i32;
    EXCEPTION_EXECUTE_HANDLER
}

fn write_dump(info: *mut EXCEPTION_POINTERS) -> bool {
    let path = STATE.dump_path.load();
    if path.is_empty() {
        return false;
    }
    state::mark_dump_path_used();

    let written = std::str::from_utf8(path)
        .ok()
        .and_then(|path| File::create(path).ok())
        .is_some_and(|file| write_minidump(&file, info));

    if written {
        sidecar::report(b"Wrote minidump to: ", path);
        sidecar::write_sidecar(path);
    } else {
        sidecar::report(b"Failed to write minidump to: ", path);
    }
    written
}

fn write_minidump(file: &File, info: *mut EXCEPTION_POINTERS) -> bool {
    let exception = MINIDUMP_EXCEPTION_INFORMATION {
        // SAFETY: plain thread id query
        ThreadId: unsafe { GetCurrentThreadId() },
        ExceptionPointers: info,
        ClientPointers: 0,
    };

    // The stream points straight at the registered blob, nothing is copied at fault time
    let blob = state::app_memory();
    let mut streams = [MINIDUMP_USER_STREAM {
        Type: PLUGIN_CONTEXT_STREAM,
        BufferSize: blob.map_or(0, |range| range.len as u32),
        Buffer: blob.map_or(ptr::null_mut(), |range| range.ptr as *mut c_void),
    }];
    let stream_info = MINIDUMP_USER_STREAM_INFORMATION {
        UserStreamCount: u32::from(blob.is_some()),
        UserStreamArray: streams.as_mut_ptr(),
    };

    // SAFETY: every pointer outlives the call
    let ret = unsafe {
        MiniDumpWriteDump(
            GetCurrentProcess(),
            GetCurrentProcessId(),
            file.as_raw_handle() as HANDLE,
            MiniDumpNormal,
            &exception,
            &stream_info,
            ptr::null(),
        )
    };
    ret != 0
}
