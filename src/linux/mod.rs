//! Linux-only support for symbol submission

pub mod auxv;
pub mod module_reader;
pub mod vdso;
