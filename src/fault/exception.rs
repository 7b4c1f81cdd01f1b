//! Which Windows structured exceptions count as a crash

pub const EXCEPTION_ACCESS_VIOLATION: u32 = 0xC000_0005;
pub const EXCEPTION_INVALID_HANDLE: u32 = 0xC000_0008;
pub const EXCEPTION_ARRAY_BOUNDS_EXCEEDED: u32 = 0xC000_008C;
pub const EXCEPTION_DATATYPE_MISALIGNMENT: u32 = 0x8000_0002;
pub const EXCEPTION_ILLEGAL_INSTRUCTION: u32 = 0xC000_001D;
pub const EXCEPTION_INT_DIVIDE_BY_ZERO: u32 = 0xC000_0094;
pub const EXCEPTION_FLT_DIVIDE_BY_ZERO: u32 = 0xC000_008E;
pub const EXCEPTION_STACK_OVERFLOW: u32 = 0xC000_00FD;
pub const STATUS_STACK_BUFFER_OVERRUN: u32 = 0xC000_0409;
pub const STATUS_HEAP_CORRUPTION: u32 = 0xC000_0374;
/// Raised by the `abort()` hook
pub const STATUS_FATAL_APP_EXIT: u32 = 0x4000_0015;
pub const EXCEPTION_BREAKPOINT: u32 = 0x8000_0003;

pub const EXCEPTION_NONCONTINUABLE: u32 = 0x1;

/// Returns true for exception codes that should produce a dump
///
/// Code 0 only counts when the exception cannot be continued.
pub fn is_fatal_exception(code: u32, flags: u32) -> bool {
    match code {
        EXCEPTION_ACCESS_VIOLATION
        | EXCEPTION_INVALID_HANDLE
        | EXCEPTION_ARRAY_BOUNDS_EXCEEDED
        | EXCEPTION_DATATYPE_MISALIGNMENT
        | EXCEPTION_ILLEGAL_INSTRUCTION
        | EXCEPTION_INT_DIVIDE_BY_ZERO
        | EXCEPTION_FLT_DIVIDE_BY_ZERO
        | EXCEPTION_STACK_OVERFLOW
        | STATUS_STACK_BUFFER_OVERRUN
        | STATUS_HEAP_CORRUPTION
        | STATUS_FATAL_APP_EXIT => true,
        0 => flags & EXCEPTION_NONCONTINUABLE != 0,
        _ => false,
    }
}
